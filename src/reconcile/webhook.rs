// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-namespace callback secret MinIO pods use to reach the operator.

use super::Error;
use crate::context::Context;
use crate::types::v2::certificate::secret_bytes;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::{WEBHOOK_ARGS_KEY, WEBHOOK_PASSWORD_KEY, WEBHOOK_SECRET, WEBHOOK_USERNAME_KEY};
use crate::utils::random_alphanumeric;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use tracing::info;

const USERNAME_LEN: usize = 20;
const PASSWORD_LEN: usize = 40;

/// `env://` arguments rewritten for a TLS-enabled operator, `None` when
/// nothing needs to change.
pub fn upgrade_args_scheme(args: &str) -> Option<String> {
    args.strip_prefix("env://")
        .map(|rest| format!("env+tls://{rest}"))
}

/// Whether the stored principal and token are plain alphanumerics.
pub fn has_valid_credentials(secret: &corev1::Secret) -> bool {
    [WEBHOOK_USERNAME_KEY, WEBHOOK_PASSWORD_KEY].iter().all(|key| {
        secret_bytes(secret, key).is_some_and(|v| !v.is_empty() && v.iter().all(u8::is_ascii_alphanumeric))
    })
}

async fn create_secret(ctx: &Context, tenant: &Tenant, namespace: &str) -> Result<(), Error> {
    let secret = tenant.new_webhook_secret(
        &ctx.config,
        &random_alphanumeric(USERNAME_LEN),
        &random_alphanumeric(PASSWORD_LEN),
    );
    match ctx.create(&secret, namespace).await {
        Ok(_) => {
            info!(tenant = %tenant.name(), namespace = %namespace, "created operator webhook secret");
            ctx.record(
                tenant,
                EventType::Normal,
                "WebhookSecretCreated",
                "Operator webhook secret created",
            )
            .await?;
            Ok(())
        }
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Creates the callback secret, or moves an existing one onto `env+tls://`
/// when the operator serves TLS. A rewrite bumps the revision so pools
/// restart and pick up the new arguments.
pub async fn ensure_secret(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    let Some(mut secret) = ctx.get_opt::<corev1::Secret>(WEBHOOK_SECRET, &ns).await? else {
        create_secret(ctx, &tenant, &ns).await?;
        return Ok(tenant);
    };

    if !ctx.config.tls_enabled {
        return Ok(tenant);
    }
    let Some(args) = secret_bytes(&secret, WEBHOOK_ARGS_KEY)
        .and_then(|v| upgrade_args_scheme(&String::from_utf8_lossy(v)))
    else {
        return Ok(tenant);
    };

    secret
        .data
        .get_or_insert_with(Default::default)
        .insert(WEBHOOK_ARGS_KEY.to_owned(), ByteString(args.into_bytes()));
    ctx.replace(&secret, &ns).await?;
    info!(tenant = %tenant.name(), "webhook arguments moved to env+tls, restarting pools");

    let tenant = ctx
        .update_status(&tenant, |status| status.revision += 1)
        .await?;
    ctx.record(
        &tenant,
        EventType::Normal,
        "WebhookSecretUpdated",
        "Webhook arguments switched to TLS",
    )
    .await?;
    Ok(tenant)
}

/// Drops the callback secret and issues a fresh one.
pub async fn regenerate(ctx: &Context, tenant: &Tenant) -> Result<(), Error> {
    let ns = tenant.namespace()?;
    ctx.delete_if_exists::<corev1::Secret>(WEBHOOK_SECRET, &ns)
        .await?;
    create_secret(ctx, tenant, &ns).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;

    #[test]
    fn test_upgrade_args_scheme() {
        assert_eq!(
            upgrade_args_scheme("env://u:p@operator:4222/webhook/v1/getenv/t1/acme").as_deref(),
            Some("env+tls://u:p@operator:4222/webhook/v1/getenv/t1/acme")
        );
        assert_eq!(upgrade_args_scheme("env+tls://u:p@operator:4222/x"), None);
    }

    #[test]
    fn test_credentials_check() {
        let tenant = crate::tests::create_test_tenant();
        let cfg = OperatorConfig::default();

        let secret = tenant.new_webhook_secret(&cfg, &random_alphanumeric(20), &random_alphanumeric(40));
        assert!(has_valid_credentials(&secret));

        let secret = tenant.new_webhook_secret(&cfg, "user", "pa$$word");
        assert!(!has_valid_credentials(&secret));

        let mut secret = tenant.new_webhook_secret(&cfg, "user", "password");
        secret.data.as_mut().unwrap().remove(WEBHOOK_USERNAME_KEY);
        assert!(!has_valid_credentials(&secret));
    }
}

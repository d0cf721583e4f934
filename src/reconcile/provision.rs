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

//! One-shot user and bucket creation on a freshly initialized tenant.

use super::{AdminSnafu, Error};
use crate::context::Context;
use crate::types::v2::certificate::secret_bytes;
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::tenant::Tenant;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use snafu::ResultExt;
use tracing::{info, warn};

pub const CONSOLE_ACCESS_KEY: &str = "CONSOLE_ACCESS_KEY";
pub const CONSOLE_SECRET_KEY: &str = "CONSOLE_SECRET_KEY";
/// Policy attached to every provisioned user.
pub const USER_POLICY: &str = "consoleAdmin";

/// Access and secret key held by a user secret.
pub fn user_credentials(secret: &corev1::Secret) -> Option<(String, String)> {
    let read = |key| {
        secret_bytes(secret, key)
            .map(|v| String::from_utf8_lossy(v).trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    Some((read(CONSOLE_ACCESS_KEY)?, read(CONSOLE_SECRET_KEY)?))
}

/// Creates the users listed in `spec.users`, once.
pub async fn users(ctx: &Context, tenant: Tenant, configuration: &TenantConfiguration) -> Result<Tenant, Error> {
    if tenant.status_or_default().provisioned_users || tenant.spec.users.is_empty() {
        return Ok(tenant);
    }
    let ns = tenant.namespace()?;

    let mut credentials = Vec::new();
    for reference in &tenant.spec.users {
        match ctx.get_opt::<corev1::Secret>(&reference.name, &ns).await? {
            Some(secret) => match user_credentials(&secret) {
                Some(c) => credentials.push(c),
                None => warn!(tenant = %tenant.name(), secret = %reference.name, "user secret lacks console keys"),
            },
            None => warn!(tenant = %tenant.name(), secret = %reference.name, "user secret not found"),
        }
    }

    let admin = super::tenant_admin(ctx, &tenant, configuration)?;
    for (access_key, secret_key) in &credentials {
        let created = async {
            admin.add_user(access_key, secret_key).await?;
            admin.set_policy(USER_POLICY, access_key).await
        }
        .await;
        if let Err(e) = created {
            warn!(tenant = %tenant.name(), user = %access_key, error = %e, "unable to create MinIO user");
            ctx.record(
                &tenant,
                EventType::Warning,
                "UsersCreatedFailed",
                &format!("Users creation failed: {e}"),
            )
            .await?;
            return Err(e).context(AdminSnafu);
        }
    }

    info!(tenant = %tenant.name(), count = credentials.len(), "users provisioned");
    let tenant = ctx
        .update_status(&tenant, |status| status.provisioned_users = true)
        .await?;
    ctx.record(&tenant, EventType::Normal, "UsersCreated", "Users created")
        .await?;
    Ok(tenant)
}

/// Creates the buckets listed in `spec.buckets`, once. Existing buckets count
/// as created.
pub async fn buckets(ctx: &Context, tenant: Tenant, configuration: &TenantConfiguration) -> Result<Tenant, Error> {
    if tenant.status_or_default().provisioned_buckets || tenant.spec.buckets.is_empty() {
        return Ok(tenant);
    }

    let admin = super::tenant_admin(ctx, &tenant, configuration)?;
    for bucket in &tenant.spec.buckets {
        match admin
            .make_bucket(&bucket.name, bucket.region.as_deref(), bucket.object_lock)
            .await
        {
            Ok(true) => info!(tenant = %tenant.name(), bucket = %bucket.name, "bucket created"),
            Ok(false) => info!(tenant = %tenant.name(), bucket = %bucket.name, "bucket already exists"),
            Err(e) => {
                warn!(tenant = %tenant.name(), bucket = %bucket.name, error = %e, "unable to create bucket");
                ctx.record(
                    &tenant,
                    EventType::Warning,
                    "BucketsCreatedFailed",
                    &format!("Bucket {} creation failed: {e}", bucket.name),
                )
                .await?;
                return Err(e).context(AdminSnafu);
            }
        }
    }

    let tenant = ctx
        .update_status(&tenant, |status| status.provisioned_buckets = true)
        .await?;
    ctx.record(&tenant, EventType::Normal, "BucketsCreated", "Buckets created")
        .await?;
    Ok(tenant)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn secret(entries: &[(&str, &str)]) -> corev1::Secret {
        corev1::Secret {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_user_credentials() {
        let s = secret(&[(CONSOLE_ACCESS_KEY, "console\n"), (CONSOLE_SECRET_KEY, "console123")]);
        assert_eq!(
            user_credentials(&s),
            Some(("console".to_owned(), "console123".to_owned()))
        );

        let s = secret(&[(CONSOLE_ACCESS_KEY, "console")]);
        assert_eq!(user_credentials(&s), None);

        let s = secret(&[(CONSOLE_ACCESS_KEY, ""), (CONSOLE_SECRET_KEY, "x")]);
        assert_eq!(user_credentials(&s), None);
    }
}

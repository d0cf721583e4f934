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

//! One-shot migrations of a tenant's persisted state, keyed by `status.syncVersion`.

use super::{Error, webhook};
use crate::context::Context;
use crate::types::v2::WEBHOOK_SECRET;
use crate::types::v2::pool::Pool;
use crate::types::v2::status::Status;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::monitoring::{
    LEGACY_LOG_QUERY_TOKEN_KEY, LEGACY_PROMETHEUS_URL_KEY, LOG_QUERY_TOKEN_KEY, PROMETHEUS_URL_KEY,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;
use tracing::info;

pub const V420: &str = "v4.2.0";
pub const V424: &str = "v4.2.4";
pub const V428: &str = "v4.2.8";

const STEPS: [&str; 3] = [V420, V424, V428];

fn version_key(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.strip_prefix('v')?.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((major, minor, patch))
}

/// Steps newer than `sync_version`, oldest first. An empty or unreadable
/// version runs them all.
pub fn pending_steps(sync_version: &str) -> Vec<&'static str> {
    let Some(current) = version_key(sync_version) else {
        return STEPS.to_vec();
    };
    STEPS
        .into_iter()
        .filter(|step| version_key(step).is_some_and(|k| k > current))
        .collect()
}

/// Moves values stored under pre-v4.2 key names to their current names.
pub fn rename_legacy_keys(data: &mut BTreeMap<String, ByteString>) -> bool {
    let mut changed = false;
    for (legacy, current) in [
        (LEGACY_LOG_QUERY_TOKEN_KEY, LOG_QUERY_TOKEN_KEY),
        (LEGACY_PROMETHEUS_URL_KEY, PROMETHEUS_URL_KEY),
    ] {
        if let Some(value) = data.remove(legacy) {
            data.entry(current.to_owned()).or_insert(value);
            changed = true;
        }
    }
    changed
}

/// Pools that ran before non-root contexts were injected keep running as before.
pub fn backfill_legacy_security_context(spec_pools: &[Pool], status: &mut Status) {
    if !status.any_pool_initialized() {
        return;
    }
    for (i, pool) in status.pools.iter_mut().enumerate() {
        if spec_pools.get(i).is_some_and(|p| p.security_context.is_none()) {
            pool.legacy_security_context = true;
        }
    }
}

async fn upgrade_420(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    if let Some(mut secret) = ctx
        .get_opt::<corev1::Secret>(&tenant.log_secret_name(), &ns)
        .await?
        && rename_legacy_keys(secret.data.get_or_insert_with(Default::default))
    {
        ctx.replace(&secret, &ns).await?;
        info!(tenant = %tenant.name(), "renamed legacy log search secret keys");
    }

    // regenerated by the webhook phase
    ctx.delete_if_exists::<corev1::Secret>(WEBHOOK_SECRET, &ns)
        .await?;

    Ok(ctx
        .update_status(&tenant, |status| status.sync_version = V420.to_owned())
        .await?)
}

async fn upgrade_424(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let pools = tenant.spec.pools.clone();
    Ok(ctx
        .update_status(&tenant, |status| {
            backfill_legacy_security_context(&pools, status);
            status.sync_version = V424.to_owned();
        })
        .await?)
}

async fn upgrade_428(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    let secret = ctx.get_opt::<corev1::Secret>(WEBHOOK_SECRET, &ns).await?;
    let regenerate = secret.as_ref().is_some_and(|s| !webhook::has_valid_credentials(s));
    if regenerate {
        info!(tenant = %tenant.name(), "webhook credentials are not alphanumeric, regenerating");
        webhook::regenerate(ctx, &tenant).await?;
    }

    Ok(ctx
        .update_status(&tenant, |status| {
            if regenerate {
                status.revision += 1;
            }
            status.sync_version = V428.to_owned();
        })
        .await?)
}

/// Applies every pending step in order. A failing step aborts the reconcile
/// and is retried from the same version next time.
pub async fn run(ctx: &Context, mut tenant: Tenant) -> Result<Tenant, Error> {
    for step in pending_steps(&tenant.status_or_default().sync_version) {
        info!(tenant = %tenant.name(), version = step, "upgrading tenant state");
        tenant = match step {
            V420 => upgrade_420(ctx, tenant).await?,
            V424 => upgrade_424(ctx, tenant).await?,
            _ => upgrade_428(ctx, tenant).await?,
        };
    }
    Ok(tenant)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::v2::status::pool::{Pool as PoolStatus, PoolState};

    #[test]
    fn test_pending_steps() {
        assert_eq!(pending_steps(""), vec![V420, V424, V428]);
        assert_eq!(pending_steps("v4.2.0"), vec![V424, V428]);
        assert_eq!(pending_steps("v4.2.4"), vec![V428]);
        assert!(pending_steps("v4.2.8").is_empty());
        assert!(pending_steps("v5.0.0").is_empty());
        assert_eq!(pending_steps("garbage"), vec![V420, V424, V428]);
    }

    #[test]
    fn test_rename_legacy_keys() {
        let mut data: BTreeMap<String, ByteString> = [
            (LEGACY_LOG_QUERY_TOKEN_KEY.to_owned(), ByteString(b"token".to_vec())),
            ("POSTGRES_PASSWORD".to_owned(), ByteString(b"pw".to_vec())),
        ]
        .into_iter()
        .collect();

        assert!(rename_legacy_keys(&mut data));
        assert_eq!(data[LOG_QUERY_TOKEN_KEY].0, b"token");
        assert!(!data.contains_key(LEGACY_LOG_QUERY_TOKEN_KEY));
        assert!(!rename_legacy_keys(&mut data));
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let tenant = crate::tests::create_test_tenant();
        let mut status = Status {
            pools: vec![PoolStatus {
                ss_name: "acme-p0".to_owned(),
                state: PoolState::Initialized,
                legacy_security_context: false,
            }],
            ..Default::default()
        };

        backfill_legacy_security_context(&tenant.spec.pools, &mut status);
        let once = status.clone();
        backfill_legacy_security_context(&tenant.spec.pools, &mut status);
        assert_eq!(once, status);
        assert!(status.pools[0].legacy_security_context);
    }

    #[test]
    fn test_backfill_skips_new_tenants() {
        let tenant = crate::tests::create_test_tenant();
        let mut status = Status {
            pools: vec![PoolStatus::new("acme-p0".to_owned())],
            ..Default::default()
        };
        backfill_legacy_security_context(&tenant.spec.pools, &mut status);
        assert!(!status.pools[0].legacy_security_context);
    }
}

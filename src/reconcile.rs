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

use crate::admin::{self, AdminClient};
use crate::context::Context;
use crate::error_policy::tenant_key;
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::{artifacts, certs, context, types};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::{OptionExt, ResultExt, Snafu};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod certificate;
pub mod config;
pub mod freeze;
pub mod image;
pub mod kes;
pub mod ladder;
pub mod monitoring;
pub mod pool;
pub mod provision;
pub mod service;
pub mod webhook;

const MISSING_CREDS_REQUEUE: Duration = Duration::from_secs(60);
const RESYNC_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("certificate error: {}", source))]
    Certs { source: certs::Error },

    #[snafu(display("admin API error: {}", source))]
    Admin { source: admin::Error },

    #[snafu(display("update artifacts error: {}", source))]
    Artifacts { source: artifacts::Error },

    #[snafu(display("invalid tenant state: {}", msg))]
    Validation { msg: String },

    #[snafu(display("MinIO is not ready"))]
    MinIONotReady,

    #[snafu(display("MinIO is restarting"))]
    MinIORestarting,

    #[snafu(display("log search is not ready"))]
    LogSearchNotReady,

    #[snafu(display("waiting for {}", what))]
    Waiting { what: String },

    #[snafu(display("tenant root credentials are not set"))]
    MissingCredentials,

    #[snafu(display("{} {} is not controlled by this tenant", kind, name))]
    NotOwned { kind: String, name: String },

    #[snafu(display("pools run different MinIO versions"))]
    InconsistentVersions,

    #[snafu(display("refusing to downgrade MinIO from {} to {}", current, target))]
    Downgrade { current: String, target: String },
}

impl Error {
    /// Progress markers: the tenant advanced and must be looked at again later.
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            Error::MinIONotReady | Error::MinIORestarting | Error::LogSearchNotReady | Error::Waiting { .. }
        )
    }
}

/// Admin client for `endpoint`, authenticated with the tenant's root credentials.
pub(crate) fn admin_client(
    ctx: &Context,
    configuration: &TenantConfiguration,
    endpoint: &str,
) -> Result<Arc<dyn AdminClient>, Error> {
    let (access_key, secret_key) = configuration
        .root_credentials()
        .context(MissingCredentialsSnafu)?;
    ctx.admin
        .connect(endpoint, &access_key, &secret_key)
        .context(AdminSnafu)
}

/// Admin client talking to the tenant through its cluster-IP service.
pub(crate) fn tenant_admin(
    ctx: &Context,
    tenant: &Tenant,
    configuration: &TenantConfiguration,
) -> Result<Arc<dyn AdminClient>, Error> {
    admin_client(ctx, configuration, &tenant.service_url(&ctx.config.cluster_domain))
}

/// Whether the cluster answers its health endpoint with a healthy verdict.
pub(crate) async fn cluster_healthy(admin: &dyn AdminClient) -> bool {
    match admin.cluster_health().await {
        Ok(health) => health.healthy(),
        Err(e) => {
            debug!(error = %e, "cluster health probe failed");
            false
        }
    }
}

/// Another tenant in the same namespace that already reached `Initialized`.
async fn initialized_sibling(ctx: &Context, tenant: &Tenant) -> Result<Option<String>, Error> {
    if State::Initialized.is(&tenant.status_or_default().current_state) {
        return Ok(None);
    }
    let tenants = ctx.list::<Tenant>(&tenant.namespace()?).await?;
    Ok(tenants
        .into_iter()
        .find(|t| t.name() != tenant.name() && State::Initialized.is(&t.status_or_default().current_state))
        .map(|t| t.name()))
}

pub async fn reconcile_tenant(tenant: Arc<Tenant>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = tenant.namespace()?;
    if !ctx.config.is_watched(&ns) {
        return Ok(Action::await_change());
    }

    let Some(latest) = ctx.get_opt::<Tenant>(&tenant.name(), &ns).await? else {
        debug!(tenant = %tenant.name(), namespace = %ns, "tenant is gone");
        ctx.limiter.forget(&tenant_key(&tenant));
        return Ok(Action::await_change());
    };
    if latest.metadata.deletion_timestamp.is_some() {
        ctx.limiter.forget(&tenant_key(&tenant));
        debug!(
            "tenant {} is deleted, deletion_timestamp is {:?}",
            latest.name(),
            latest.metadata.deletion_timestamp
        );
        return Ok(Action::await_change());
    }

    // 1. bring the persisted state up to date
    let tenant = ladder::run(&ctx, latest).await?;

    // 2. effective configuration
    let configuration = config::load(&ctx.client, &tenant).await?;

    // 3. removed pools
    if pool::removed_pools(&tenant) {
        warn!(tenant = %tenant.name(), "pools were removed from the tenant, decommissioning is not allowed");
        ctx.set_current_state(&tenant, &State::DecommissioningNotAllowed.to_string())
            .await?;
        ctx.record(
            &tenant,
            EventType::Warning,
            "DecommissioningNotAllowed",
            "Removing pools is not supported, restore the pool list",
        )
        .await?;
        return Ok(Action::await_change());
    }

    // 4. defaults and validation
    let mut tenant = tenant;
    tenant.ensure_defaults(&ctx.config);
    if let Err(e) = tenant.validate() {
        let message = e.to_string();
        warn!(tenant = %tenant.name(), error = %message, "tenant failed validation");
        ctx.set_current_state(&tenant, &message).await?;
        ctx.record(&tenant, EventType::Warning, "ValidationFailed", &message)
            .await?;
        return Ok(Action::await_change());
    }
    if configuration.root_credentials().is_none() {
        warn!(tenant = %tenant.name(), "root credentials are missing");
        ctx.set_current_state(&tenant, &State::MissingCreds.to_string())
            .await?;
        return Ok(Action::requeue(MISSING_CREDS_REQUEUE));
    }

    // 5.-7. certificates and the callback secret
    let tenant = certificate::infer_auto_cert(&ctx, tenant).await?;
    let tenant = webhook::ensure_secret(&ctx, tenant).await?;
    let tenant = certificate::reconcile(&ctx, tenant).await?;

    // 8. services
    let tenant = service::reconcile(&ctx, tenant).await?;

    // 9. one initialized tenant per namespace
    if let Some(other) = initialized_sibling(&ctx, &tenant).await? {
        warn!(tenant = %tenant.name(), other = %other, "another tenant already owns the namespace");
        ctx.set_current_state(&tenant, &State::AlreadyExists.to_string())
            .await?;
        ctx.record(
            &tenant,
            EventType::Warning,
            "AlreadyExists",
            &format!("Tenant {other} already exists in the namespace"),
        )
        .await?;
        return Ok(Action::await_change());
    }

    // 10. KES
    let tenant = kes::reconcile(&ctx, tenant).await?;

    let Some(tenant) = freeze::reconcile(&ctx, tenant).await? else {
        return Ok(Action::await_change());
    };

    // 11.-13. pool statefulsets, expansion restart, initialization sweep
    let (tenant, observed) = pool::reconcile_pools(&ctx, tenant, &configuration).await?;

    // 14. restart settling
    let (tenant, settled) = pool::wait_on_ready(&ctx, tenant, &configuration).await?;
    if let Some(action) = settled {
        return Ok(action);
    }

    // 15. one MinIO version across pools
    if !observed.uniform_images() {
        ctx.set_current_state(&tenant, &State::InconsistentMinIOVersions.to_string())
            .await?;
        return InconsistentVersionsSnafu.fail();
    }

    // 16. online upgrade
    let tenant = image::upgrade(&ctx, tenant, &observed, &configuration).await?;

    // 17. pool spec sync
    let tenant = pool::sync_pools(&ctx, tenant, &configuration).await?;

    // 18. observability stacks
    let tenant = monitoring::reconcile(&ctx, tenant, &configuration).await?;

    // 19. one-shot provisioning
    let tenant = provision::users(&ctx, tenant, &configuration).await?;
    let tenant = provision::buckets(&ctx, tenant, &configuration).await?;

    // 20.
    let tenant = ctx
        .set_state(&tenant, State::Initialized, observed.available_replicas)
        .await?;
    ctx.limiter.forget(&tenant_key(&tenant));
    info!(tenant = %tenant.name(), namespace = %ns, "tenant reconciled");
    Ok(Action::requeue(RESYNC_PERIOD))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{FakeApiServer, MockAdmin, create_test_tenant, test_context};

    #[tokio::test]
    async fn test_gone_tenant_resets_backoff() {
        let api = FakeApiServer::default();
        let ctx = Arc::new(test_context(&api, MockAdmin::default()));
        let tenant = Arc::new(create_test_tenant());
        let key = tenant_key(&tenant);
        ctx.limiter.next_delay(&key);
        ctx.limiter.next_delay(&key);

        let action = reconcile_tenant(tenant, ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(ctx.limiter.next_delay(&key), Duration::from_secs(5));
    }

    #[test]
    fn test_sentinels() {
        assert!(Error::MinIONotReady.is_sentinel());
        assert!(Error::MinIORestarting.is_sentinel());
        assert!(Error::LogSearchNotReady.is_sentinel());
        assert!(
            Error::Waiting {
                what: "operator CA".to_owned()
            }
            .is_sentinel()
        );
        assert!(!Error::MissingCredentials.is_sentinel());
        assert!(!Error::InconsistentVersions.is_sentinel());
        assert!(
            !Error::Validation {
                msg: "bad".to_owned()
            }
            .is_sentinel()
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotOwned {
            kind: "StatefulSet".to_owned(),
            name: "acme-p0".to_owned(),
        };
        assert_eq!(err.to_string(), "StatefulSet acme-p0 is not controlled by this tenant");

        let err = Error::Downgrade {
            current: "RELEASE.2021-08-01T00-00-00Z".to_owned(),
            target: "RELEASE.2021-06-07T21-40-51Z".to_owned(),
        };
        assert!(err.to_string().contains("downgrade"));
    }
}

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

//! Online MinIO upgrades driven by a change of `spec.image`.

use super::pool::{self, ObservedPools};
use super::{AdminSnafu, ArtifactsSnafu, DowngradeSnafu, Error, MinIONotReadySnafu};
use crate::admin::AdminClient;
use crate::artifacts::{self, RegistryCredentials};
use crate::config::{OperatorConfig, WEBHOOK_PORT};
use crate::context::Context;
use crate::types::v2::OPERATOR_CA_SECRET;
use crate::types::v2::WEBHOOK_API_UPDATE;
use crate::types::v2::certificate::secret_bytes;
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::diff::image_tag;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::EventType;
use snafu::ResultExt;
use tracing::{info, warn};

/// First release that embeds the console in the server.
pub const CONSOLE_CUTOVER_RELEASE: &str = "RELEASE.2021-07-27T02-40-15Z";

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// Where pools download `minio.<tag>` during an online update.
pub fn update_url(cfg: &OperatorConfig, https: bool, release: DateTime<Utc>) -> String {
    format!(
        "{}://{}:{}{}/minio.{}.sha256sum",
        if https { "https" } else { "http" },
        cfg.operator_fqdn(),
        WEBHOOK_PORT,
        WEBHOOK_API_UPDATE,
        artifacts::release_tag(release)
    )
}

/// Whether moving from `current` to `target` goes back in time. Tags that are
/// not release tags cannot be ordered and never count as a downgrade.
pub fn is_downgrade(current: &str, target: &str) -> bool {
    match (artifacts::release_time(current), artifacts::release_time(target)) {
        (Ok(current), Ok(target)) => target < current,
        _ => false,
    }
}

/// Whether the server at `updated` serves the console itself.
pub fn console_is_embedded(updated: &str) -> bool {
    match (
        artifacts::release_time(updated),
        artifacts::release_time(CONSOLE_CUTOVER_RELEASE),
    ) {
        (Ok(updated), Ok(cutover)) => updated >= cutover,
        _ => false,
    }
}

async fn pull_credentials(ctx: &Context, tenant: &Tenant) -> Result<Option<RegistryCredentials>, Error> {
    let Some(name) = tenant
        .spec
        .image_pull_secret
        .as_ref()
        .map(|r| r.name.as_str())
        .filter(|n| !n.is_empty())
    else {
        return Ok(None);
    };
    let reference = artifacts::ImageReference::parse(tenant.image()).context(ArtifactsSnafu)?;
    let secret = ctx
        .get_opt::<corev1::Secret>(name, &tenant.namespace()?)
        .await?;
    let credentials = secret
        .as_ref()
        .and_then(|s| secret_bytes(s, DOCKER_CONFIG_KEY))
        .and_then(|config| artifacts::credentials_from_docker_config(config, &reference));
    if credentials.is_none() {
        // the pull secret may be attached to the service account instead
        info!(tenant = %tenant.name(), secret = %name, "no registry credentials in pull secret, pulling anonymously");
    }
    Ok(credentials)
}

async fn fail(ctx: &Context, tenant: &Tenant, message: String) -> Result<(), Error> {
    if let Err(e) = artifacts::remove().await {
        warn!(error = %e, "failed to remove update artifacts");
    }
    ctx.record(tenant, EventType::Warning, "UpdateFailed", &message)
        .await?;
    ctx.set_current_state(tenant, &message).await?;
    Ok(())
}

/// Updates the running servers in place when `spec.image` moved to a new tag,
/// then rewrites every pool statefulset.
pub async fn upgrade(
    ctx: &Context,
    tenant: Tenant,
    observed: &ObservedPools,
    configuration: &TenantConfiguration,
) -> Result<Tenant, Error> {
    let Some(current_image) = observed.current_image() else {
        return Ok(tenant);
    };
    let current = image_tag(current_image).to_owned();
    let target = image_tag(tenant.image()).to_owned();
    if current == target {
        return Ok(tenant);
    }
    if is_downgrade(&current, &target) {
        warn!(tenant = %tenant.name(), current = %current, target = %target, "refusing to downgrade");
        ctx.record(
            &tenant,
            EventType::Warning,
            "UpdateFailed",
            &format!("Downgrading MinIO from {current} to {target} is not supported"),
        )
        .await?;
        return DowngradeSnafu { current, target }.fail();
    }

    let admin = super::tenant_admin(ctx, &tenant, configuration)?;
    if !super::cluster_healthy(admin.as_ref()).await {
        info!(tenant = %tenant.name(), "tenant is not healthy, postponing online update");
        ctx.record(
            &tenant,
            EventType::Warning,
            "UpdateFailed",
            "Tenant is not online, can't update it",
        )
        .await?;
        return MinIONotReadySnafu.fail();
    }

    let tenant = ctx
        .set_current_state(&tenant, &State::UpdatingMinIOVersion.to_string())
        .await?;
    ctx.record(
        &tenant,
        EventType::Normal,
        "UpdateVersion",
        &format!("Updating MinIO Version to {}", tenant.image()),
    )
    .await?;

    let credentials = pull_credentials(ctx, &tenant).await?;
    let release = match artifacts::fetch(&ctx.http, tenant.image(), credentials).await {
        Ok(release) => release,
        Err(e) => {
            fail(ctx, &tenant, format!("Fetching update artifacts failed: {e}")).await?;
            return Err(e).context(ArtifactsSnafu);
        }
    };

    let ns = tenant.namespace()?;
    let ca_mounted = ctx
        .get_opt::<corev1::Secret>(OPERATOR_CA_SECRET, &ns)
        .await?
        .is_some();
    let url = update_url(&ctx.config, ctx.config.tls_enabled && ca_mounted, release);
    info!(tenant = %tenant.name(), from = %current, to = %target, url = %url, "updating MinIO");

    install(ctx, tenant, admin.as_ref(), &url, configuration).await
}

/// Asks the servers to install the staged release, then rewrites every pool
/// statefulset. Servers that refuse in-place updates only get the rewrite.
async fn install(
    ctx: &Context,
    tenant: Tenant,
    admin: &dyn AdminClient,
    url: &str,
    configuration: &TenantConfiguration,
) -> Result<Tenant, Error> {
    match admin.server_update(url).await {
        Ok(status) if status.current_version != status.updated_version => {
            if console_is_embedded(&status.updated_version) {
                let ns = tenant.namespace()?;
                let console = tenant.console_name();
                ctx.delete_if_exists::<v1::Deployment>(&console, &ns)
                    .await?;
                ctx.delete_if_exists::<corev1::Service>(&console, &ns)
                    .await?;
                info!(tenant = %tenant.name(), "removed the stand-alone console");
            }
            info!(
                tenant = %tenant.name(),
                from = %status.current_version,
                to = %status.updated_version,
                "MinIO updated"
            );
        }
        Ok(status) => {
            info!(tenant = %tenant.name(), version = %status.current_version, "MinIO already runs this version");
        }
        Err(e) if e.is_method_not_allowed() => {
            warn!(tenant = %tenant.name(), error = %e, "in-place update is disabled, updating the statefulsets only");
            ctx.record(
                &tenant,
                EventType::Warning,
                "UpdateDisabled",
                "In-place update is disabled, falling back to a statefulset update",
            )
            .await?;
        }
        Err(e) => {
            fail(ctx, &tenant, format!("Tenant '{}' MinIO update failed with {e}", tenant.name())).await?;
            return Err(e).context(AdminSnafu);
        }
    }

    if let Err(e) = artifacts::remove().await {
        warn!(error = %e, "failed to remove update artifacts");
    }
    pool::replace_pools(ctx, tenant, configuration).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{FakeApiServer, MockAdmin, TENANT_PATH, create_test_tenant, statefulset_path, test_configuration, test_context};
    use crate::types::v2::status::Status;
    use crate::types::v2::status::pool::{Pool as PoolStatus, PoolState};
    use http::Method;

    #[test]
    fn test_update_url() {
        let cfg = OperatorConfig::default();
        let release = artifacts::release_time("RELEASE.2021-08-05T22-01-19Z").unwrap();
        assert_eq!(
            update_url(&cfg, true, release),
            format!(
                "https://operator.{}.svc.cluster.local:4222/webhook/v1/update/minio.RELEASE.2021-08-05T22-01-19Z.sha256sum",
                cfg.namespace
            )
        );
        assert!(update_url(&cfg, false, release).starts_with("http://"));
    }

    #[test]
    fn test_downgrade_detection() {
        assert!(is_downgrade(
            "RELEASE.2021-08-05T22-01-19Z",
            "RELEASE.2021-06-07T21-40-51Z"
        ));
        assert!(!is_downgrade(
            "RELEASE.2021-06-07T21-40-51Z",
            "RELEASE.2021-08-05T22-01-19Z"
        ));
        assert!(!is_downgrade("latest", "RELEASE.2021-06-07T21-40-51Z"));
    }

    #[test]
    fn test_console_cutover() {
        assert!(console_is_embedded(CONSOLE_CUTOVER_RELEASE));
        assert!(console_is_embedded("RELEASE.2021-08-05T22-01-19Z"));
        assert!(!console_is_embedded("RELEASE.2021-07-22T05-23-32Z"));
        assert!(!console_is_embedded("edge"));
    }

    #[tokio::test]
    async fn test_disabled_in_place_update_falls_back_to_statefulsets() {
        let api = FakeApiServer::default();
        let admin = MockAdmin {
            update_error: Some(405),
            ..Default::default()
        };
        let ctx = test_context(&api, admin.clone());

        let mut tenant = create_test_tenant();
        tenant.status = Some(Status {
            pools: vec![PoolStatus {
                ss_name: "acme-p0".to_owned(),
                state: PoolState::Initialized,
                legacy_security_context: false,
            }],
            ..Default::default()
        });
        let running = tenant
            .new_pool_statefulset(0, &ctx.config, &Default::default())
            .unwrap();
        api.insert(TENANT_PATH, &tenant);
        api.insert(&statefulset_path("acme-p0"), &running);

        tenant.spec.image = Some("minio/minio:RELEASE.2021-08-05T22-01-19Z".to_owned());
        let url = update_url(&ctx.config, false, artifacts::release_time("RELEASE.2021-08-05T22-01-19Z").unwrap());
        install(&ctx, tenant, &admin, &url, &test_configuration())
            .await
            .unwrap();

        assert_eq!(api.event_reasons(), vec!["UpdateDisabled", "PoolUpdated"]);
        assert_eq!(api.writes_to(Method::PUT, &statefulset_path("acme-p0")), 1);
        let rewritten: v1::StatefulSet = api.get(&statefulset_path("acme-p0")).unwrap();
        let image = rewritten.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image.as_deref(), Some("minio/minio:RELEASE.2021-08-05T22-01-19Z"));
    }

    #[tokio::test]
    async fn test_failed_in_place_update_aborts() {
        let api = FakeApiServer::default();
        let admin = MockAdmin {
            update_error: Some(500),
            ..Default::default()
        };
        let ctx = test_context(&api, admin.clone());
        let tenant = create_test_tenant();
        api.insert(TENANT_PATH, &tenant);

        let err = install(&ctx, tenant, &admin, "http://operator/update", &test_configuration())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Admin { .. }));
        assert_eq!(api.event_reasons(), vec!["UpdateFailed"]);
        assert_eq!(api.writes_to(Method::PUT, &statefulset_path("acme-p0")), 0);
    }
}

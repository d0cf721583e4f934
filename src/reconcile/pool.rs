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

use super::{AdminSnafu, Error, MinIONotReadySnafu, MinIORestartingSnafu, NotOwnedSnafu};
use crate::context::Context;
use crate::types::error::Error as TypesError;
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::status::Status;
use crate::types::v2::status::pool::{Pool as PoolStatus, PoolState};
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::diff::{merge_statefulset, pool_statefulset_matches};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use snafu::ResultExt;
use std::time::Duration;
use tracing::{info, warn};

/// How long a restarted cluster is given to report healthy.
pub const READY_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

/// What the pool pass saw of the running statefulsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedPools {
    /// Image of container 0, one entry per pool.
    pub images: Vec<String>,
    pub available_replicas: i32,
}

impl ObservedPools {
    fn add(&mut self, ss: &v1::StatefulSet) {
        let image = ss
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_default();
        self.images.push(image);
        self.available_replicas += ss
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or_default();
    }

    pub fn uniform_images(&self) -> bool {
        self.images.windows(2).all(|w| w[0] == w[1])
    }

    pub fn current_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

/// Spec pools form a strict prefix of the recorded ones.
pub fn removed_pools(tenant: &Tenant) -> bool {
    tenant
        .status
        .as_ref()
        .is_some_and(|s| s.pools.len() > tenant.spec.pools.len())
}

/// Recorded pool entries extended with one `NotCreated` entry per new spec
/// pool. Existing entries, and their `ssName`, are kept as they are.
pub fn with_pool_entries(tenant: &Tenant) -> Vec<PoolStatus> {
    let mut pools = tenant.status_or_default().pools;
    for pool in tenant.spec.pools.iter().skip(pools.len()) {
        pools.push(PoolStatus::new(tenant.pool_statefulset_name(pool)));
    }
    pools
}

/// A pool joined an initialized cluster and the running servers have not been
/// restarted for it yet. A pool created in this pass always needs a restart,
/// even while an earlier restart is still settling. A pool left `Created`
/// with no restart pending is one whose restart call failed.
pub fn needs_expansion_restart(status: &Status, created_new_pool: bool) -> bool {
    if !status.any_pool_initialized() {
        return false;
    }
    created_new_pool
        || (status.pools.iter().any(|p| p.state != PoolState::Initialized) && status.waiting_on_ready.is_none())
}

/// Whether `since` (RFC3339) lies less than [`READY_WINDOW`] before `now`.
pub fn within_ready_window(since: &str, now: DateTime<Utc>) -> bool {
    DateTime::parse_from_rfc3339(since)
        .map(|t| now - t.with_timezone(&Utc) < READY_WINDOW)
        .unwrap_or(false)
}

fn pool_status(tenant: &Tenant, index: usize) -> Result<PoolStatus, Error> {
    tenant
        .status
        .as_ref()
        .and_then(|s| s.pools.get(index))
        .cloned()
        .ok_or_else(|| TypesError::MissingPoolStatus { index }.into())
}

async fn not_owned(ctx: &Context, tenant: &Tenant, name: String) -> Error {
    if let Err(e) = ctx
        .set_current_state(tenant, &State::NotOwned.to_string())
        .await
    {
        warn!(tenant = %tenant.name(), error = %e, "failed to record NotOwned state");
    }
    NotOwnedSnafu {
        kind: "StatefulSet",
        name,
    }
    .build()
}

/// Creates missing pool statefulsets, restarts the cluster when pools were
/// added to it, then marks every pool initialized.
pub async fn reconcile_pools(
    ctx: &Context,
    tenant: Tenant,
    configuration: &TenantConfiguration,
) -> Result<(Tenant, ObservedPools), Error> {
    let ns = tenant.namespace()?;
    let entries = with_pool_entries(&tenant);
    let mut tenant = ctx
        .update_status(&tenant, |status| status.pools = entries.clone())
        .await?;

    let mut observed = ObservedPools::default();
    let mut created_new_pool = false;
    let pools = tenant.spec.pools.clone();
    for (index, pool) in pools.iter().enumerate() {
        let ss_name = pool_status(&tenant, index)?.ss_name;

        match ctx.get_opt::<v1::StatefulSet>(&ss_name, &ns).await? {
            Some(ss) => {
                if !tenant.owns(&ss.metadata) {
                    return Err(not_owned(ctx, &tenant, ss_name).await);
                }
                observed.add(&ss);
            }
            None => {
                tenant = ctx
                    .set_current_state(&tenant, &State::ProvisioningStatefulSet.to_string())
                    .await?;
                let desired = tenant.new_pool_statefulset(index, &ctx.config, &configuration.skip_env_vars)?;
                let ss = ctx.create(&desired, &ns).await?;
                tenant = ctx
                    .update_status(&tenant, |status| {
                        if let Some(p) = status.pools.get_mut(index) {
                            p.state = PoolState::Created;
                        }
                    })
                    .await?;
                created_new_pool = true;
                info!(tenant = %tenant.name(), pool = %pool.name, statefulset = %ss_name, "pool created");
                ctx.record(
                    &tenant,
                    EventType::Normal,
                    "PoolCreated",
                    &format!("Tenant pool {} created", pool.name),
                )
                .await?;
                observed.add(&ss);
            }
        }
    }

    let status = tenant.status_or_default();
    if needs_expansion_restart(&status, created_new_pool) {
        let Some(running) = status.pools.iter().find(|p| p.state == PoolState::Initialized) else {
            return MinIONotReadySnafu.fail();
        };
        let endpoint = tenant.pod_url(&format!("{}-0", running.ss_name), &ctx.config.cluster_domain);
        let admin = super::admin_client(ctx, configuration, &endpoint)?;
        admin.service_restart().await.context(AdminSnafu)?;
        info!(tenant = %tenant.name(), endpoint = %endpoint, "restarted MinIO to join the new pools");

        let now = Utc::now().to_rfc3339();
        let tenant = ctx
            .update_status(&tenant, |status| {
                for pool in status.pools.iter_mut() {
                    if pool.state == PoolState::NotCreated {
                        pool.state = PoolState::Created;
                    }
                }
                status.waiting_on_ready = Some(now.clone());
                status.current_state = State::Restarting.to_string();
            })
            .await?;
        ctx.record(
            &tenant,
            EventType::Normal,
            "Restarting",
            "Restarting MinIO to pick up the new pools",
        )
        .await?;
        return MinIORestartingSnafu.fail();
    }

    let tenant = ctx
        .update_status(&tenant, |status| {
            for pool in status.pools.iter_mut() {
                pool.state = PoolState::Initialized;
            }
        })
        .await?;
    Ok((tenant, observed))
}

/// Holds the reconcile after an expansion restart until the cluster reports
/// healthy, for at most [`READY_WINDOW`].
pub async fn wait_on_ready(
    ctx: &Context,
    tenant: Tenant,
    configuration: &TenantConfiguration,
) -> Result<(Tenant, Option<Action>), Error> {
    let Some(since) = tenant.status_or_default().waiting_on_ready else {
        return Ok((tenant, None));
    };

    if !within_ready_window(&since, Utc::now()) {
        let tenant = ctx
            .update_status(&tenant, |status| status.waiting_on_ready = None)
            .await?;
        return Ok((tenant, None));
    }

    let admin = super::tenant_admin(ctx, &tenant, configuration)?;
    if !super::cluster_healthy(admin.as_ref()).await {
        ctx.set_current_state(&tenant, &State::WaitingForReady.to_string())
            .await?;
        return MinIONotReadySnafu.fail();
    }

    let tenant = ctx
        .update_status(&tenant, |status| status.waiting_on_ready = None)
        .await?;
    Ok((tenant, Some(Action::requeue(Duration::from_secs(1)))))
}

async fn update_pools(
    ctx: &Context,
    mut tenant: Tenant,
    configuration: &TenantConfiguration,
    force: bool,
) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    for index in 0..tenant.spec.pools.len() {
        let ss_name = pool_status(&tenant, index)?.ss_name;
        let desired = tenant.new_pool_statefulset(index, &ctx.config, &configuration.skip_env_vars)?;
        let Some(mut observed) = ctx.get_opt::<v1::StatefulSet>(&ss_name, &ns).await? else {
            continue;
        };
        if !tenant.owns(&observed.metadata) {
            return Err(not_owned(ctx, &tenant, ss_name).await);
        }
        if !force && pool_statefulset_matches(&desired, &observed)? {
            continue;
        }

        tenant = ctx
            .set_current_state(&tenant, &State::UpdatingPool.to_string())
            .await?;
        merge_statefulset(&mut observed, &desired);
        ctx.replace(&observed, &ns).await?;
        info!(tenant = %tenant.name(), statefulset = %ss_name, "pool statefulset updated");
        ctx.record(
            &tenant,
            EventType::Normal,
            "PoolUpdated",
            &format!("Tenant pool statefulset {ss_name} updated"),
        )
        .await?;
    }
    Ok(tenant)
}

/// Patches pool statefulsets that drifted from the builder output.
pub async fn sync_pools(ctx: &Context, tenant: Tenant, configuration: &TenantConfiguration) -> Result<Tenant, Error> {
    update_pools(ctx, tenant, configuration, false).await
}

/// Rewrites every pool statefulset, used after an online update.
pub async fn replace_pools(ctx: &Context, tenant: Tenant, configuration: &TenantConfiguration) -> Result<Tenant, Error> {
    update_pools(ctx, tenant, configuration, true).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{
        FakeApiServer, MockAdmin, TENANT_PATH, create_test_pool, create_test_tenant, statefulset_path,
        test_configuration, test_context,
    };
    use std::sync::atomic::Ordering;

    fn status_with(states: &[PoolState]) -> Status {
        Status {
            pools: states
                .iter()
                .enumerate()
                .map(|(i, s)| PoolStatus {
                    ss_name: format!("acme-p{i}"),
                    state: *s,
                    legacy_security_context: false,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pool_entries_keep_recorded_names() {
        let mut tenant = create_test_tenant();
        tenant.status = Some(status_with(&[PoolState::Initialized]));
        // renaming a pool must not change its statefulset
        tenant.spec.pools[0].name = "renamed".to_owned();
        tenant.spec.pools.push(create_test_pool("p1", 4, 4));

        let entries = with_pool_entries(&tenant);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ss_name, "acme-p0");
        assert_eq!(entries[0].state, PoolState::Initialized);
        assert_eq!(entries[1].ss_name, "acme-p1");
        assert_eq!(entries[1].state, PoolState::NotCreated);
    }

    #[test]
    fn test_removed_pools() {
        let mut tenant = create_test_tenant();
        assert!(!removed_pools(&tenant));
        tenant.status = Some(status_with(&[PoolState::Initialized, PoolState::Initialized]));
        assert!(removed_pools(&tenant));
    }

    #[test]
    fn test_expansion_restart() {
        // a brand new tenant has nothing running to restart
        assert!(!needs_expansion_restart(&status_with(&[PoolState::Created]), true));
        assert!(!needs_expansion_restart(&status_with(&[PoolState::Initialized]), false));
        assert!(needs_expansion_restart(
            &status_with(&[PoolState::Initialized, PoolState::Created]),
            true
        ));

        // the restart for this pool already went out
        let mut restarted = status_with(&[PoolState::Initialized, PoolState::Created]);
        restarted.waiting_on_ready = Some(Utc::now().to_rfc3339());
        assert!(!needs_expansion_restart(&restarted, false));

        // the restart call for this pool failed on an earlier pass
        let failed = status_with(&[PoolState::Initialized, PoolState::Created]);
        assert!(needs_expansion_restart(&failed, false));
    }

    #[test]
    fn test_expansion_restart_while_waiting_on_ready() {
        let mut status = status_with(&[PoolState::Initialized, PoolState::Initialized, PoolState::Created]);
        status.waiting_on_ready = Some((Utc::now() - chrono::Duration::minutes(1)).to_rfc3339());
        assert!(needs_expansion_restart(&status, true));
    }

    #[test]
    fn test_ready_window() {
        let now = Utc::now();
        let recent = (now - chrono::Duration::minutes(1)).to_rfc3339();
        let old = (now - chrono::Duration::minutes(6)).to_rfc3339();
        assert!(within_ready_window(&recent, now));
        assert!(!within_ready_window(&old, now));
        assert!(!within_ready_window("not a time", now));
    }

    #[test]
    fn test_observed_images() {
        let tenant = create_test_tenant();
        let cfg = crate::config::OperatorConfig::default();
        let ss = tenant
            .new_pool_statefulset(0, &cfg, &Default::default())
            .unwrap();

        let mut observed = ObservedPools::default();
        observed.add(&ss);
        observed.add(&ss);
        assert!(observed.uniform_images());
        assert_eq!(observed.current_image(), Some(crate::tests::TEST_IMAGE));

        observed.images.push("minio/minio:RELEASE.2021-08-01T00-00-00Z".to_owned());
        assert!(!observed.uniform_images());
    }

    /// Tenant `acme` with `pools` in its spec, the recorded pool `states`, and
    /// a running statefulset for every recorded pool.
    fn expanded_tenant(api: &FakeApiServer, pools: &[&str], states: &[PoolState], waiting: Option<String>) -> Tenant {
        let mut tenant = create_test_tenant();
        tenant.spec.pools = pools.iter().map(|p| create_test_pool(p, 4, 4)).collect();
        let mut status = status_with(states);
        status.waiting_on_ready = waiting;
        tenant.status = Some(status);

        let cfg = crate::config::OperatorConfig::default();
        for index in 0..states.len() {
            let ss = tenant
                .new_pool_statefulset(index, &cfg, &Default::default())
                .unwrap();
            api.insert(&statefulset_path(&format!("acme-p{index}")), &ss);
        }
        api.insert(TENANT_PATH, &tenant);
        tenant
    }

    fn states(tenant: &Tenant) -> Vec<PoolState> {
        tenant
            .status_or_default()
            .pools
            .iter()
            .map(|p| p.state)
            .collect()
    }

    #[tokio::test]
    async fn test_added_pool_restarts_then_initializes() {
        let api = FakeApiServer::default();
        let admin = MockAdmin::default();
        let ctx = test_context(&api, admin.clone());
        let configuration = test_configuration();
        let tenant = expanded_tenant(&api, &["p0", "p1"], &[PoolState::Initialized], None);

        let err = reconcile_pools(&ctx, tenant, &configuration)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MinIORestarting));
        assert_eq!(admin.restarts.load(Ordering::SeqCst), 1);
        assert!(
            api.get::<v1::StatefulSet>(&statefulset_path("acme-p1"))
                .is_some()
        );
        let stored = api.tenant();
        assert_eq!(states(&stored), vec![PoolState::Initialized, PoolState::Created]);
        assert!(stored.status_or_default().waiting_on_ready.is_some());
        assert_eq!(stored.status_or_default().current_state, State::Restarting.to_string());
        assert_eq!(api.event_reasons(), vec!["PoolCreated", "Restarting"]);

        // next pass: nothing new, the pending restart settles
        let (tenant, observed) = reconcile_pools(&ctx, api.tenant(), &configuration)
            .await
            .unwrap();
        assert_eq!(admin.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(states(&tenant), vec![PoolState::Initialized, PoolState::Initialized]);
        assert_eq!(observed.images.len(), 2);

        let (tenant, action) = wait_on_ready(&ctx, tenant, &configuration)
            .await
            .unwrap();
        assert!(action.is_some());
        assert!(tenant.status_or_default().waiting_on_ready.is_none());
        assert!(api.tenant().status_or_default().waiting_on_ready.is_none());
        assert_eq!(states(&api.tenant()), vec![PoolState::Initialized, PoolState::Initialized]);
    }

    #[tokio::test]
    async fn test_pool_added_while_waiting_on_ready_restarts() {
        let api = FakeApiServer::default();
        let admin = MockAdmin::default();
        let ctx = test_context(&api, admin.clone());
        let earlier = (Utc::now() - chrono::Duration::minutes(1)).to_rfc3339();
        let tenant = expanded_tenant(
            &api,
            &["p0", "p1", "p2"],
            &[PoolState::Initialized, PoolState::Initialized],
            Some(earlier.clone()),
        );

        let err = reconcile_pools(&ctx, tenant, &test_configuration())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MinIORestarting));
        assert_eq!(admin.restarts.load(Ordering::SeqCst), 1);
        let stored = api.tenant();
        assert_eq!(
            states(&stored),
            vec![PoolState::Initialized, PoolState::Initialized, PoolState::Created]
        );
        assert_ne!(stored.status_or_default().waiting_on_ready, Some(earlier));
    }

    #[tokio::test]
    async fn test_failed_restart_is_retried() {
        let api = FakeApiServer::default();
        let admin = MockAdmin::default();
        let ctx = test_context(&api, admin.clone());
        let tenant = expanded_tenant(
            &api,
            &["p0", "p1"],
            &[PoolState::Initialized, PoolState::Created],
            None,
        );

        let err = reconcile_pools(&ctx, tenant, &test_configuration())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MinIORestarting));
        assert_eq!(admin.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(api.writes_to(http::Method::POST, "/apis/apps/v1/namespaces/t1/statefulsets"), 0);
    }
}

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

//! Health monitor. Samples each initialized tenant's cluster health and drive
//! counts and writes them, with a color, into the tenant status.
//!
//! Runs as its own controller: every tenant is re-checked after the
//! monitoring interval, and pod changes trigger an early check.

use crate::admin::{self, ClusterHealth, DriveCounts};
use crate::context::Context;
use crate::reconcile::{self, Error};
use crate::types::v2::TENANT_LABEL;
use crate::types::v2::status::pool::PoolState;
use crate::types::v2::status::state::HealthStatus;
use crate::types::v2::tenant::Tenant;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::controller::Action;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts after the first one when the tenant does not answer in time.
pub const HEALTH_RETRIES: u32 = 5;
pub const HEALTH_RETRY_WAIT: Duration = Duration::from_secs(10);

pub const UNAVAILABLE_MESSAGE: &str = "Service Unavailable";
pub const ABOUT_TO_LOSE_QUORUM_MESSAGE: &str = "About to lose quorum";
pub const HEALING_MESSAGE: &str = "Healing";
pub const REDUCED_AVAILABILITY_MESSAGE: &str = "Reduced Availability";
pub const PODS_NOT_RUNNING_MESSAGE: &str = "Not all pods are running";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assessment {
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl Assessment {
    fn new(status: HealthStatus, message: Option<&str>) -> Self {
        Self {
            status,
            message: message.map(str::to_owned),
        }
    }
}

/// Color of a tenant from its health probe, its drive counts when known, and
/// whether all of its pods run.
pub fn assess(health: &ClusterHealth, drives: Option<DriveCounts>, pods_running: bool) -> Assessment {
    let healing = health.healing_drives;

    if let Some(drives) = drives
        && drives.online < health.write_quorum
    {
        return Assessment::new(HealthStatus::Red, Some(UNAVAILABLE_MESSAGE));
    }

    let assessment = match health.status {
        200 => {
            let offline = drives.is_some_and(|d| d.offline > 0);
            if healing > 0 {
                Assessment::new(HealthStatus::Yellow, Some(HEALING_MESSAGE))
            } else if offline {
                Assessment::new(HealthStatus::Yellow, Some(REDUCED_AVAILABILITY_MESSAGE))
            } else {
                Assessment::new(HealthStatus::Green, None)
            }
        }
        412 if healing > 0 => Assessment {
            status: HealthStatus::Yellow,
            message: Some(format!("{HEALING_MESSAGE} {healing} drives")),
        },
        412 => Assessment::new(HealthStatus::Yellow, Some(ABOUT_TO_LOSE_QUORUM_MESSAGE)),
        _ => Assessment::new(HealthStatus::Red, Some(UNAVAILABLE_MESSAGE)),
    };

    if !pods_running && assessment.status == HealthStatus::Green {
        return Assessment::new(HealthStatus::Yellow, Some(PODS_NOT_RUNNING_MESSAGE));
    }
    assessment
}

/// Runs `probe`, retrying timeouts.
async fn with_retries<T, F, Fut>(ctx: &Context, what: &str, probe: F) -> Result<T, admin::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, admin::Error>>,
{
    let mut attempt = 0;
    loop {
        match probe().await {
            Err(e) if e.is_timeout() && attempt < HEALTH_RETRIES => {
                attempt += 1;
                debug!(probe = %what, attempt, error = %e, "tenant did not answer, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(HEALTH_RETRY_WAIT) => {}
                    _ = ctx.cancel.cancelled() => return Err(e),
                }
            }
            other => return other,
        }
    }
}

fn pods_running(pods: &[corev1::Pod]) -> bool {
    pods.iter().all(|pod| {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            == Some("Running")
    })
}

pub async fn check_tenant(tenant: Arc<Tenant>, ctx: Arc<Context>) -> Result<Action, Error> {
    let interval = Action::requeue(ctx.config.monitoring_interval);
    let ns = tenant.namespace()?;
    if !ctx.config.is_watched(&ns) {
        return Ok(Action::await_change());
    }
    let Some(tenant) = ctx.get_opt::<Tenant>(&tenant.name(), &ns).await? else {
        return Ok(Action::await_change());
    };
    if tenant.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let initialized = tenant
        .status_or_default()
        .pools
        .iter()
        .any(|p| p.state == PoolState::Initialized);
    if !initialized {
        debug!(tenant = %tenant.name(), "no pool is initialized, skipping health check");
        return Ok(interval);
    }

    let configuration = reconcile::config::load(&ctx.client, &tenant).await?;
    let admin = reconcile::tenant_admin(&ctx, &tenant, &configuration)?;

    let health = match with_retries(&ctx, "cluster health", || admin.cluster_health()).await {
        Ok(health) => health,
        Err(e) => {
            info!(tenant = %tenant.name(), error = %e, "failed to get cluster health");
            return Ok(interval);
        }
    };
    let drives = match with_retries(&ctx, "storage info", || admin.storage_info()).await {
        Ok(drives) => Some(drives),
        Err(e) => {
            info!(tenant = %tenant.name(), error = %e, "failed to get storage info");
            None
        }
    };
    let pods = ctx
        .list_labeled::<corev1::Pod>(&ns, &format!("{TENANT_LABEL}={}", tenant.name()))
        .await?;
    let assessment = assess(&health, drives, pods_running(&pods.items));

    info!(
        tenant = %tenant.name(),
        health = %assessment.status,
        healing = health.healing_drives,
        write_quorum = health.write_quorum,
        online = drives.map(|d| d.online),
        offline = drives.map(|d| d.offline),
        "health sampled"
    );
    ctx.update_status(&tenant, |status| {
        status.drives_healing = health.healing_drives;
        status.write_quorum = health.write_quorum;
        if let Some(drives) = drives {
            status.drives_online = drives.online;
            status.drives_offline = drives.offline;
        }
        status.health_status = Some(assessment.status);
        status.health_message = assessment.message.clone();
    })
    .await?;
    Ok(interval)
}

pub fn error_policy(tenant: Arc<Tenant>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(tenant = %tenant.name(), error = %error, "health check failed");
    Action::requeue(ctx.config.monitoring_interval)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn health(status: u16, healing: i32, quorum: i32) -> ClusterHealth {
        ClusterHealth {
            status,
            healing_drives: healing,
            write_quorum: quorum,
        }
    }

    fn drives(online: i32, offline: i32) -> Option<DriveCounts> {
        Some(DriveCounts { online, offline })
    }

    #[test]
    fn test_green() {
        let a = assess(&health(200, 0, 9), drives(16, 0), true);
        assert_eq!(a, Assessment::new(HealthStatus::Green, None));
    }

    #[test]
    fn test_red_below_write_quorum() {
        let a = assess(&health(200, 0, 9), drives(8, 8), true);
        assert_eq!(a.status, HealthStatus::Red);
        assert_eq!(a.message.as_deref(), Some(UNAVAILABLE_MESSAGE));
    }

    #[test]
    fn test_yellow_offline_or_healing() {
        let a = assess(&health(200, 0, 9), drives(15, 1), true);
        assert_eq!(a.status, HealthStatus::Yellow);
        assert_eq!(a.message.as_deref(), Some(REDUCED_AVAILABILITY_MESSAGE));

        let a = assess(&health(200, 2, 9), drives(16, 0), true);
        assert_eq!(a.status, HealthStatus::Yellow);
        assert_eq!(a.message.as_deref(), Some(HEALING_MESSAGE));
    }

    #[test]
    fn test_status_code_messages() {
        let a = assess(&health(503, 0, 9), None, true);
        assert_eq!(a.status, HealthStatus::Red);
        assert_eq!(a.message.as_deref(), Some(UNAVAILABLE_MESSAGE));

        let a = assess(&health(412, 0, 9), drives(12, 4), true);
        assert_eq!(a.status, HealthStatus::Yellow);
        assert_eq!(a.message.as_deref(), Some(ABOUT_TO_LOSE_QUORUM_MESSAGE));

        let a = assess(&health(412, 3, 9), drives(12, 4), true);
        assert_eq!(a.message.as_deref(), Some("Healing 3 drives"));
    }

    #[test]
    fn test_pods_not_running_is_yellow() {
        let a = assess(&health(200, 0, 9), drives(16, 0), false);
        assert_eq!(a.status, HealthStatus::Yellow);

        let a = assess(&health(503, 0, 9), drives(16, 0), false);
        assert_eq!(a.status, HealthStatus::Red);
    }

    #[test]
    fn test_pods_running() {
        let pod = |phase: &str| corev1::Pod {
            status: Some(corev1::PodStatus {
                phase: Some(phase.to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pods_running(&[pod("Running"), pod("Running")]));
        assert!(!pods_running(&[pod("Running"), pod("Pending")]));
        assert!(pods_running(&[]));
    }
}

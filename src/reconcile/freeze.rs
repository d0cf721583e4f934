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

use super::Error;
use crate::context::Context;
use crate::types::error::Error as TypesError;
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use k8s_openapi::api::apps::v1;
use kube::runtime::events::EventType;
use tracing::info;

/// Workloads a frozen tenant scales down, as `(statefulsets, deployments)`.
pub fn frozen_workloads(tenant: &Tenant) -> Result<(Vec<String>, Vec<String>), TypesError> {
    let recorded = tenant.status.as_ref().map(|s| s.pools.as_slice()).unwrap_or_default();
    if recorded.len() < tenant.spec.pools.len() {
        return Err(TypesError::MissingPoolStatus {
            index: recorded.len(),
        });
    }

    let mut statefulsets: Vec<String> = recorded.iter().map(|p| p.ss_name.clone()).collect();
    let mut deployments = Vec::new();
    if tenant.has_prometheus() {
        statefulsets.push(tenant.prometheus_name());
    }
    if tenant.has_log() {
        statefulsets.push(tenant.log_statefulset_name());
        deployments.push(tenant.log_search_api_name());
    }
    Ok((statefulsets, deployments))
}

/// Returns `None` while the tenant stays frozen.
pub async fn reconcile(ctx: &Context, tenant: Tenant) -> Result<Option<Tenant>, Error> {
    let frozen = State::Frozen.is(&tenant.status_or_default().current_state);

    match (tenant.frozen(), frozen) {
        (true, true) => Ok(None),
        (true, false) => {
            let ns = tenant.namespace()?;
            let (statefulsets, deployments) = frozen_workloads(&tenant)?;
            for name in &statefulsets {
                ctx.scale::<v1::StatefulSet>(name, &ns, 0).await?;
            }
            for name in &deployments {
                ctx.scale::<v1::Deployment>(name, &ns, 0).await?;
            }
            info!(tenant = %tenant.name(), namespace = %ns, "tenant frozen");
            let tenant = ctx
                .set_current_state(&tenant, &State::Frozen.to_string())
                .await?;
            ctx.record(
                &tenant,
                EventType::Normal,
                "Frozen",
                "Tenant workloads scaled to zero",
            )
            .await?;
            Ok(None)
        }
        (false, true) => {
            info!(tenant = %tenant.name(), "tenant unfrozen");
            let tenant = ctx
                .set_current_state(&tenant, &State::Initialized.to_string())
                .await?;
            ctx.record(&tenant, EventType::Normal, "Unfrozen", "Tenant unfrozen")
                .await?;
            Ok(Some(tenant))
        }
        (false, false) => Ok(Some(tenant)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::v2::status::Status;
    use crate::types::v2::status::pool::Pool as PoolStatus;

    #[test]
    fn test_frozen_workloads_use_recorded_names() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.status = Some(Status {
            pools: vec![PoolStatus::new("acme-legacy".to_owned())],
            ..Default::default()
        });

        let (statefulsets, deployments) = frozen_workloads(&tenant).unwrap();
        assert_eq!(statefulsets, vec!["acme-legacy".to_owned()]);
        assert!(deployments.is_empty());
    }

    #[test]
    fn test_frozen_workloads_need_pool_status() {
        let tenant = crate::tests::create_test_tenant();
        assert!(matches!(
            frozen_workloads(&tenant),
            Err(TypesError::MissingPoolStatus { index: 0 })
        ));
    }
}

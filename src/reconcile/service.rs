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

use super::{Error, NotOwnedSnafu};
use crate::context::Context;
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::services::merge_service;
use k8s_openapi::api::core::v1 as corev1;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use tracing::info;

/// Creates `desired` when missing, otherwise folds its spec into the
/// observed service. Services owned by someone else are left alone.
async fn check_or_create_service(
    mut tenant: Tenant,
    ctx: &Context,
    desired: corev1::Service,
    creating: State,
    label: &str,
) -> Result<Tenant, Error> {
    let ns = tenant.namespace()?;
    let name = desired.name_any();

    let mut svc = match ctx.get::<corev1::Service>(&name, &ns).await {
        Ok(svc) => svc,
        Err(e) if e.is_not_found() => {
            let new_tenant = ctx.set_current_state(&tenant, &creating.to_string()).await?;

            ctx.create(&desired, &ns).await?;

            ctx.record(
                &new_tenant,
                EventType::Normal,
                "SvcCreated",
                &format!("{label} Service Created"),
            )
            .await?;

            return Ok(new_tenant);
        }
        e => e?,
    };

    if !tenant.owns(&svc.metadata) {
        ctx.set_current_state(&tenant, &State::NotOwned.to_string())
            .await?;
        return NotOwnedSnafu {
            kind: "Service",
            name,
        }
        .fail();
    }

    if merge_service(&mut svc, &desired) {
        tenant = ctx
            .set_current_state(&tenant, &State::UpdatingServices.to_string())
            .await?;
        ctx.replace(&svc, &ns).await?;
        info!(tenant = %tenant.name(), service = %name, "service updated");
        ctx.record(
            &tenant,
            EventType::Normal,
            "SvcUpdated",
            &format!("{label} Service Updated"),
        )
        .await?;
    }

    Ok(tenant)
}

/// Cluster-IP, console and headless services, in that order.
pub async fn reconcile(ctx: &Context, tenant: Tenant) -> Result<Tenant, Error> {
    let ci = tenant.new_ci_service();
    let tenant = check_or_create_service(tenant, ctx, ci, State::ProvisioningCIService, "MinIO").await?;

    let console = tenant.new_console_service();
    let tenant = check_or_create_service(
        tenant,
        ctx,
        console,
        State::ProvisioningConsoleService,
        "Console",
    )
    .await?;

    let headless = tenant.new_headless_service();
    check_or_create_service(
        tenant,
        ctx,
        headless,
        State::ProvisioningHLService,
        "Headless",
    )
    .await
}

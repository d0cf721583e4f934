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

//! Prometheus and log search stacks, created when enabled and removed when not.

use super::{Error, LogSearchNotReadySnafu, MissingCredentialsSnafu, NotOwnedSnafu};
use crate::context::Context;
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::diff::{merge_statefulset, statefulset_matches};
use crate::utils::random_alphanumeric;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use kube::Resource;
use kube::ResourceExt;
use kube::runtime::events::EventType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::OptionExt;
use std::fmt::Debug;
use tracing::info;

const LOG_PASSWORD_LEN: usize = 20;
const LOG_TOKEN_LEN: usize = 32;

/// Creates `desired` unless an object of that name exists. Returns whether it
/// was created.
async fn create_if_missing<T>(ctx: &Context, tenant: &Tenant, desired: &T) -> Result<bool, Error>
where
    T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    let ns = tenant.namespace()?;
    let name = desired.name_any();
    if ctx.get_opt::<T>(&name, &ns).await?.is_some() {
        return Ok(false);
    }
    match ctx.create(desired, &ns).await {
        Ok(_) => {
            info!(tenant = %tenant.name(), kind = %T::kind(&Default::default()), name = %name, "created");
            Ok(true)
        }
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Creates the statefulset or brings a drifted one back to `desired`.
/// Returns the observed object.
async fn check_or_create_statefulset(
    ctx: &Context,
    tenant: &Tenant,
    desired: v1::StatefulSet,
    provisioning: State,
) -> Result<v1::StatefulSet, Error> {
    let ns = tenant.namespace()?;
    let name = desired.name_any();
    let Some(mut observed) = ctx.get_opt::<v1::StatefulSet>(&name, &ns).await? else {
        ctx.set_current_state(tenant, &provisioning.to_string())
            .await?;
        let created = ctx.create(&desired, &ns).await?;
        ctx.record(
            tenant,
            EventType::Normal,
            "StsCreated",
            &format!("Statefulset {name} created"),
        )
        .await?;
        return Ok(created);
    };

    if !tenant.owns(&observed.metadata) {
        return NotOwnedSnafu {
            kind: "StatefulSet",
            name,
        }
        .fail();
    }
    if statefulset_matches(&desired, &observed)? {
        return Ok(observed);
    }
    merge_statefulset(&mut observed, &desired);
    let updated = ctx.replace(&observed, &ns).await?;
    ctx.record(
        tenant,
        EventType::Normal,
        "StsUpdated",
        &format!("Statefulset {name} updated"),
    )
    .await?;
    Ok(updated)
}

async fn prometheus(ctx: &Context, tenant: &Tenant, configuration: &TenantConfiguration) -> Result<(), Error> {
    let ns = tenant.namespace()?;
    if !tenant.has_prometheus() {
        ctx.delete_if_exists::<v1::StatefulSet>(&tenant.prometheus_name(), &ns)
            .await?;
        ctx.delete_if_exists::<corev1::Service>(&tenant.prometheus_headless_service_name(), &ns)
            .await?;
        ctx.delete_if_exists::<corev1::ConfigMap>(&tenant.prometheus_config_map_name(), &ns)
            .await?;
        return Ok(());
    }

    if ctx
        .get_opt::<corev1::ConfigMap>(&tenant.prometheus_config_map_name(), &ns)
        .await?
        .is_none()
    {
        let (access_key, secret_key) = configuration
            .root_credentials()
            .context(MissingCredentialsSnafu)?;
        let token = tenant.prometheus_bearer_token(&access_key, &secret_key)?;
        let config = tenant.prometheus_config(&ctx.config.cluster_domain, token)?;
        create_if_missing(ctx, tenant, &tenant.new_prometheus_config_map(config)).await?;
    }
    create_if_missing(ctx, tenant, &tenant.new_prometheus_headless_service()).await?;
    check_or_create_statefulset(
        ctx,
        tenant,
        tenant.new_prometheus_statefulset(),
        State::ProvisioningPrometheus,
    )
    .await?;
    Ok(())
}

async fn log_search(ctx: &Context, tenant: &Tenant) -> Result<(), Error> {
    let ns = tenant.namespace()?;
    if !tenant.has_log() {
        ctx.delete_if_exists::<v1::Deployment>(&tenant.log_search_api_name(), &ns)
            .await?;
        ctx.delete_if_exists::<corev1::Service>(&tenant.log_search_api_name(), &ns)
            .await?;
        ctx.delete_if_exists::<v1::StatefulSet>(&tenant.log_statefulset_name(), &ns)
            .await?;
        ctx.delete_if_exists::<corev1::Service>(&tenant.log_headless_service_name(), &ns)
            .await?;
        ctx.delete_if_exists::<corev1::Secret>(&tenant.log_secret_name(), &ns)
            .await?;
        return Ok(());
    }

    if ctx
        .get_opt::<corev1::Secret>(&tenant.log_secret_name(), &ns)
        .await?
        .is_none()
    {
        let secret = tenant.new_log_secret(
            &random_alphanumeric(LOG_PASSWORD_LEN),
            &random_alphanumeric(LOG_TOKEN_LEN),
            &random_alphanumeric(LOG_TOKEN_LEN),
        );
        create_if_missing(ctx, tenant, &secret).await?;
    }
    create_if_missing(ctx, tenant, &tenant.new_log_headless_service()).await?;
    let db = check_or_create_statefulset(
        ctx,
        tenant,
        tenant.new_log_statefulset(),
        State::ProvisioningLogSearch,
    )
    .await?;

    let ready = db
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or_default();
    if ready < 1 {
        ctx.set_current_state(tenant, &State::WaitingForLogSearch.to_string())
            .await?;
        return LogSearchNotReadySnafu.fail();
    }

    create_if_missing(ctx, tenant, &tenant.new_log_search_api_service()).await?;
    let desired = tenant.new_log_search_api_deployment();
    if !create_if_missing(ctx, tenant, &desired).await? {
        // restores the replicas of an unfrozen tenant
        let observed = ctx
            .get::<v1::Deployment>(&tenant.log_search_api_name(), &ns)
            .await?;
        let want = desired.spec.as_ref().and_then(|s| s.replicas);
        let have = observed.spec.as_ref().and_then(|s| s.replicas);
        if let Some(want) = want
            && have != Some(want)
        {
            ctx.scale::<v1::Deployment>(&tenant.log_search_api_name(), &ns, want)
                .await?;
        }
    }
    Ok(())
}

pub async fn reconcile(ctx: &Context, tenant: Tenant, configuration: &TenantConfiguration) -> Result<Tenant, Error> {
    prometheus(ctx, &tenant, configuration).await?;
    log_search(ctx, &tenant).await?;
    Ok(tenant)
}

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

use crate::context::{self, KubeSnafu};
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::tenant::Tenant;
use k8s_openapi::api::core::v1 as corev1;
use kube::Api;
use snafu::futures::TryFutureExt;

async fn optional_secret(
    api: &Api<corev1::Secret>,
    reference: Option<&corev1::LocalObjectReference>,
) -> Result<Option<corev1::Secret>, context::Error> {
    match reference.filter(|r| !r.name.is_empty()) {
        Some(r) => api.get_opt(&r.name).context(KubeSnafu).await,
        None => Ok(None),
    }
}

/// Reads the credentials and configuration secrets and composes the tenant's
/// effective environment. Missing secrets contribute nothing.
pub async fn load(client: &kube::Client, tenant: &Tenant) -> Result<TenantConfiguration, context::Error> {
    let api: Api<corev1::Secret> = Api::namespaced(client.clone(), &tenant.namespace()?);
    let creds = optional_secret(&api, tenant.spec.creds_secret.as_ref()).await?;
    let configuration = optional_secret(&api, tenant.spec.configuration.as_ref()).await?;
    Ok(TenantConfiguration::compose(
        tenant,
        creds.as_ref(),
        configuration.as_ref(),
    ))
}

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

//! Cluster reads and writes the webhook handlers depend on.

use crate::context::{self, KubeSnafu};
use crate::reconcile;
use crate::types::policy_binding::PolicyBinding;
use crate::types::v2::configuration::TenantConfiguration;
use crate::types::v2::tenant::Tenant;
use async_trait::async_trait;
use k8s_openapi::api::authentication::v1 as authv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use snafu::futures::TryFutureExt;

/// Outcome of a token review.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenIdentity {
    pub authenticated: bool,
    pub username: String,
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant(&self, namespace: &str, name: &str) -> Result<Option<Tenant>, context::Error>;

    async fn tenants(&self, namespace: &str) -> Result<Vec<Tenant>, context::Error>;

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<corev1::Secret>, context::Error>;

    /// Effective environment of `tenant`.
    async fn configuration(&self, tenant: &Tenant) -> Result<TenantConfiguration, context::Error>;

    async fn policy_bindings(&self, namespace: &str) -> Result<Vec<PolicyBinding>, context::Error>;

    /// Counts one issued credential against the binding.
    async fn record_authorization(&self, binding: &PolicyBinding) -> Result<(), context::Error>;

    async fn review_token(&self, token: &str) -> Result<TokenIdentity, context::Error>;

    /// Creates `service`, treating an existing one as success.
    async fn create_service(&self, namespace: &str, service: &corev1::Service) -> Result<(), context::Error>;

    /// Deletes a service, treating a missing one as success.
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), context::Error>;
}

/// [`TenantDirectory`] backed by the Kubernetes API.
pub struct KubeDirectory {
    client: kube::Client,
}

impl KubeDirectory {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TenantDirectory for KubeDirectory {
    async fn tenant(&self, namespace: &str, name: &str) -> Result<Option<Tenant>, context::Error> {
        let api: Api<Tenant> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    async fn tenants(&self, namespace: &str) -> Result<Vec<Tenant>, context::Error> {
        let api: Api<Tenant> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .list(&ListParams::default())
            .context(KubeSnafu)
            .await?
            .items)
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<corev1::Secret>, context::Error> {
        let api: Api<corev1::Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    async fn configuration(&self, tenant: &Tenant) -> Result<TenantConfiguration, context::Error> {
        reconcile::config::load(&self.client, tenant).await
    }

    async fn policy_bindings(&self, namespace: &str) -> Result<Vec<PolicyBinding>, context::Error> {
        let api: Api<PolicyBinding> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .list(&ListParams::default())
            .context(KubeSnafu)
            .await?
            .items)
    }

    async fn record_authorization(&self, binding: &PolicyBinding) -> Result<(), context::Error> {
        let namespace = binding.namespace().unwrap_or_default();
        let api: Api<PolicyBinding> = Api::namespaced(self.client.clone(), &namespace);
        let authorizations = binding
            .status
            .as_ref()
            .map(|s| s.usage.authorizations)
            .unwrap_or_default()
            + 1;
        let patch = serde_json::json!({ "status": { "usage": { "authorizations": authorizations } } });
        api.patch_status(&binding.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    async fn review_token(&self, token: &str) -> Result<TokenIdentity, context::Error> {
        let api: Api<authv1::TokenReview> = Api::all(self.client.clone());
        let review = authv1::TokenReview {
            spec: authv1::TokenReviewSpec {
                token: Some(token.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        let reviewed = api
            .create(&PostParams::default(), &review)
            .context(KubeSnafu)
            .await?;
        let status = reviewed.status.unwrap_or_default();
        Ok(TokenIdentity {
            authenticated: status.authenticated.unwrap_or(false),
            username: status.user.and_then(|u| u.username).unwrap_or_default(),
        })
    }

    async fn create_service(&self, namespace: &str, service: &corev1::Service) -> Result<(), context::Error> {
        let api: Api<corev1::Service> = Api::namespaced(self.client.clone(), namespace);
        match api
            .create(&PostParams::default(), service)
            .context(KubeSnafu)
            .await
        {
            Err(e) if e.is_already_exists() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), context::Error> {
        let api: Api<corev1::Service> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(name, &Default::default())
            .context(KubeSnafu)
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

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

use crate::admin::AdminConnector;
use crate::certs::CsrApi;
use crate::config::OperatorConfig;
use crate::error_policy::RateLimiter;
use crate::server::cert_manager::CertManager;
use crate::types;
use crate::types::v2::status::Status;
use crate::types::v2::status::state::State;
use crate::types::v2::tenant::Tenant;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, ObjectList, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt, api::Api};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use snafu::futures::TryFutureExt;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const FIELD_MANAGER: &str = "minio-operator";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

/// HTTP status carried by an API server error response.
pub fn api_status(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(status) => Some(status.code),
        _ => None,
    }
}

impl Error {
    fn status(&self) -> Option<u16> {
        match self {
            Error::Kube { source } => api_status(source),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(status) } if status.code == 409 && status.reason == "AlreadyExists")
    }
}

/// Shared state of the tenant and health controllers.
pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) config: Arc<OperatorConfig>,
    pub(crate) admin: Arc<dyn AdminConnector>,
    pub(crate) csr: Arc<dyn CsrApi>,
    pub(crate) http: reqwest::Client,
    pub(crate) limiter: RateLimiter,
    pub(crate) cancel: CancellationToken,
    /// Set when the webhook server runs with TLS and must pick up rotated certificates.
    pub(crate) operator_certs: Option<Arc<CertManager>>,
}

impl Context {
    pub fn new(
        client: kube::Client,
        config: Arc<OperatorConfig>,
        admin: Arc<dyn AdminConnector>,
        csr: Arc<dyn CsrApi>,
        http: reqwest::Client,
        cancel: CancellationToken,
        operator_certs: Option<Arc<CertManager>>,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: Some(config.hostname.clone()),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            config,
            admin,
            csr,
            http,
            limiter: RateLimiter::default(),
            cancel,
            operator_certs,
        }
    }

    /// send event
    #[inline]
    pub async fn record(
        &self,
        resource: &Tenant,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .context(RecordSnafu)
            .await
    }

    /// Writes the status produced by `update` unless it equals the current
    /// one. On a write conflict the tenant is re-read and the update retried once.
    ///
    /// The returned tenant keeps the in-memory spec of `resource`, so defaults
    /// applied during the reconcile survive the round trip.
    pub async fn update_status<F>(&self, resource: &Tenant, update: F) -> Result<Tenant, Error>
    where
        F: Fn(&mut Status),
    {
        let api: Api<Tenant> = Api::namespaced(self.client.clone(), &resource.namespace()?);
        let name = resource.name();

        let write = async |tenant: &Tenant| -> Result<Tenant, Error> {
            let current = tenant.status_or_default();
            let mut status = current.clone();
            update(&mut status);
            if status == current {
                return Ok(tenant.clone());
            }

            let mut body = tenant.clone();
            body.status = Some(status);
            let written = api
                .replace_status(&name, &PostParams::default(), &body)
                .context(KubeSnafu)
                .await?;
            body.metadata = written.metadata;
            body.status = written.status;
            Ok(body)
        };

        match write(resource).await {
            Err(e) if e.is_conflict() => {
                info!(tenant = %name, "status update conflicted, retrying on the latest version");
                let latest = api.get(&name).context(KubeSnafu).await?;
                let mut merged = resource.clone();
                merged.metadata = latest.metadata;
                merged.status = latest.status;
                write(&merged).await
            }
            other => other,
        }
    }

    /// Sets `currentState` and `availableReplicas`.
    pub async fn set_state(&self, resource: &Tenant, state: State, replicas: i32) -> Result<Tenant, Error> {
        debug!(tenant = %resource.name(), state = %state, "updating tenant state");
        self.update_status(resource, |status| {
            status.current_state = state.to_string();
            status.available_replicas = replicas;
        })
        .await
    }

    /// Sets `currentState` only, e.g. to a validation message.
    pub async fn set_current_state(&self, resource: &Tenant, state: &str) -> Result<Tenant, Error> {
        self.update_status(resource, |status| status.current_state = state.to_owned())
            .await
    }

    pub async fn delete<T>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    /// Deletes `name`, treating a missing object as success.
    pub async fn delete_if_exists<T>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        match self.delete::<T>(name, namespace).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn get<T>(&self, name: &str, namespace: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).context(KubeSnafu).await
    }

    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    pub async fn create<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn replace<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&resource.name_any(), &PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn list<T>(&self, namespace: &str) -> Result<ObjectList<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default()).context(KubeSnafu).await
    }

    pub async fn list_labeled<T>(&self, namespace: &str, selector: &str) -> Result<ObjectList<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default().labels(selector))
            .context(KubeSnafu)
            .await
    }

    pub async fn apply<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &resource.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .context(KubeSnafu)
        .await
    }

    /// Merge-patches `/spec/replicas` of a scalable workload.
    pub async fn scale<T>(&self, name: &str, namespace: &str, replicas: i32) -> Result<(), Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .context(KubeSnafu)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        let body = serde_json::json!({
            "status": "Failure",
            "message": "boom",
            "reason": reason,
            "code": code,
        });
        Error::Kube {
            source: kube::Error::Api(serde_json::from_value(body).unwrap()),
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(409, "Conflict").is_already_exists());
        assert!(api_error(409, "AlreadyExists").is_already_exists());
        assert!(!api_error(500, "InternalError").is_not_found());
    }
}

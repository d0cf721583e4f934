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

use crate::config::OperatorConfig;
use crate::types;
use crate::types::error::NoNamespaceSnafu;
use crate::types::v2::certificate::{CertificateConfig, LocalCertificateReference};
use crate::types::v2::k8s;
use crate::types::v2::kes::KesConfig;
use crate::types::v2::observability::{LogConfig, PrometheusConfig};
use crate::types::v2::pool::Pool;
use crate::types::v2::status::Status;
use crate::types::v2::{
    KES_DEFAULT_KEY, KES_PORT, KES_REPLICAS, LOG_SEARCH_API_IMAGE, MINIO_CI_SERVICE,
    PROMETHEUS_IMAGE, TENANT_LABEL,
};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, KubeSchema, Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;

pub mod diff;
pub mod hosts;
pub mod kes;
pub mod monitoring;
pub mod secrets;
pub mod services;
pub mod validation;
pub mod workloads;

const DEFAULT_ORG_NAME: &str = "system:nodes";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[kube(
    group = "minio.min.io",
    version = "v2",
    kind = "Tenant",
    namespaced,
    status = "crate::types::v2::status::Status",
    shortname = "tenant",
    plural = "tenants",
    singular = "tenant",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.currentState"}"#,
    printcolumn = r#"{"name":"Health", "type":"string", "jsonPath":".status.healthStatus"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[x_kube(validation = Rule::new("self.size() > 0").message("pools must be configured"))]
    pub pools: Vec<Pool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<corev1::LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<k8s::ImagePullPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_management_policy: Option<k8s::PodManagementPolicy>,

    /// Secret with `accesskey`/`secretkey` root credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds_secret: Option<corev1::LocalObjectReference>,

    /// Secret with a `config.env` file of `export KEY=value` lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<corev1::LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<corev1::EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_cert_secret: Vec<LocalCertificateReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_ca_cert_secret: Vec<LocalCertificateReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_client_cert_secret: Option<LocalCertificateReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_auto_cert: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_config: Option<CertificateConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kes: Option<KesConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_cars: Option<SideCars>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_services: Option<ExposeServices>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_metadata: Option<ServiceMetadata>,

    /// Secrets holding `CONSOLE_ACCESS_KEY`/`CONSOLE_SECRET_KEY` for users to create.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<corev1::LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<Bucket>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<corev1::Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<corev1::Probe>,

    /// Scales every managed workload to zero while set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
pub struct Features {
    #[serde(default, rename = "bucketDNS")]
    pub bucket_dns: bool,
}

/// One-way switches from ClusterIP to LoadBalancer.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
pub struct ExposeServices {
    #[serde(default, rename = "minio")]
    pub minio: bool,

    #[serde(default)]
    pub console: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio_service_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio_service_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_service_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_service_annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SideCars {
    #[serde(default)]
    pub containers: Vec<corev1::Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<corev1::PersistentVolumeClaim>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<corev1::Volume>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub object_lock: bool,
}

impl Tenant {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn status_or_default(&self) -> Status {
        self.status.clone().unwrap_or_default()
    }

    /// a new owner reference for tenant
    pub fn new_owner_ref(&self) -> metav1::OwnerReference {
        metav1::OwnerReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name(),
            uid: self.meta().uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// True when `meta` carries a controller reference to this tenant.
    pub fn owns(&self, meta: &metav1::ObjectMeta) -> bool {
        let uid = self.meta().uid.as_deref().unwrap_or_default();
        meta.owner_references.iter().flatten().any(|r| {
            r.kind == Self::kind(&()) && (r.uid == uid || (uid.is_empty() && r.name == self.name()))
        })
    }

    /// Fills every defaulted field in memory. Never persisted.
    pub fn ensure_defaults(&mut self, cfg: &OperatorConfig) {
        if self.spec.pod_management_policy.is_none() {
            self.spec.pod_management_policy = Some(k8s::PodManagementPolicy::Parallel);
        }

        if self.spec.image.as_deref().unwrap_or_default().is_empty() {
            self.spec.image = Some(cfg.minio_image.clone());
        }

        if self.spec.image_pull_policy.is_none() {
            self.spec.image_pull_policy = Some(k8s::ImagePullPolicy::IfNotPresent);
        }

        for (i, pool) in self.spec.pools.iter_mut().enumerate() {
            if pool.name.is_empty() {
                pool.name = format!("pool-{i}");
            }
        }

        if self.spec.mount_path.as_deref().unwrap_or_default().is_empty() {
            self.spec.mount_path = Some(super::DEFAULT_MOUNT_PATH.to_owned());
        }

        let wildcard = self.wildcard_name(&cfg.cluster_domain);
        let hosts = self.minio_hosts(&cfg.cluster_domain);
        let cert_config = self.spec.cert_config.get_or_insert_with(Default::default);
        if cert_config.common_name.as_deref().unwrap_or_default().is_empty() {
            cert_config.common_name = Some(wildcard);
        }
        if cert_config.dns_names.is_empty() {
            cert_config.dns_names = hosts;
        }
        if cert_config.organization_name.is_empty() {
            cert_config.organization_name = vec![DEFAULT_ORG_NAME.to_owned()];
        }

        if let Some(kes) = self.spec.kes.as_mut() {
            if kes.image.as_deref().unwrap_or_default().is_empty() {
                kes.image = Some(cfg.kes_image.clone());
            }
            if kes.replicas.unwrap_or_default() == 0 {
                kes.replicas = Some(KES_REPLICAS);
            }
            if kes.image_pull_policy.is_none() {
                kes.image_pull_policy = Some(k8s::ImagePullPolicy::IfNotPresent);
            }
            if kes.key_name.as_deref().unwrap_or_default().is_empty() {
                kes.key_name = Some(KES_DEFAULT_KEY.to_owned());
            }
        }

        if let Some(prometheus) = self.spec.prometheus.as_mut()
            && prometheus.image.as_deref().unwrap_or_default().is_empty()
        {
            prometheus.image = Some(PROMETHEUS_IMAGE.to_owned());
        }

        if let Some(log) = self.spec.log.as_mut()
            && log.image.as_deref().unwrap_or_default().is_empty()
        {
            log.image = Some(LOG_SEARCH_API_IMAGE.to_owned());
        }
    }

    pub fn image(&self) -> &str {
        self.spec.image.as_deref().unwrap_or_default()
    }

    pub fn image_pull_policy(&self) -> String {
        self.spec
            .image_pull_policy
            .clone()
            .unwrap_or_default()
            .to_string()
    }

    pub fn mount_path(&self) -> &str {
        self.spec
            .mount_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(super::DEFAULT_MOUNT_PATH)
    }

    pub fn auto_cert(&self) -> bool {
        self.spec.request_auto_cert.unwrap_or(true)
    }

    pub fn external_cert(&self) -> bool {
        !self.spec.external_cert_secret.is_empty()
    }

    /// Whether MinIO serves TLS.
    pub fn tls(&self) -> bool {
        self.auto_cert() || self.external_cert()
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls() { "https" } else { "http" }
    }

    pub fn has_kes(&self) -> bool {
        self.spec.kes.is_some()
    }

    pub fn has_log(&self) -> bool {
        self.spec.log.is_some()
    }

    pub fn has_prometheus(&self) -> bool {
        self.spec.prometheus.is_some()
    }

    pub fn bucket_dns(&self) -> bool {
        self.spec.features.as_ref().is_some_and(|f| f.bucket_dns)
    }

    pub fn frozen(&self) -> bool {
        self.spec.freeze.unwrap_or(false)
    }

    pub fn kes_replicas(&self) -> i32 {
        self.spec
            .kes
            .as_ref()
            .and_then(|k| k.replicas)
            .filter(|r| *r > 0)
            .unwrap_or(KES_REPLICAS)
    }

    pub fn kes_key_name(&self) -> String {
        self.spec
            .kes
            .as_ref()
            .and_then(|k| k.key_name.clone())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| KES_DEFAULT_KEY.to_owned())
    }

    pub fn tenant_labels(&self) -> BTreeMap<String, String> {
        [(TENANT_LABEL.to_owned(), self.name())].into_iter().collect()
    }

    pub fn headless_service_name(&self) -> String {
        format!("{}-hl", self.name())
    }

    pub fn console_name(&self) -> String {
        format!("{}-console", self.name())
    }

    pub fn tls_secret_name(&self) -> String {
        format!("{}-tls", self.name())
    }

    pub fn csr_name(&self) -> Result<String, types::error::Error> {
        Ok(format!("{}-{}-csr", self.name(), self.namespace()?))
    }

    pub fn client_tls_secret_name(&self) -> String {
        format!("{}-client-tls", self.name())
    }

    pub fn client_csr_name(&self) -> Result<String, types::error::Error> {
        Ok(format!("{}-client-{}-csr", self.name(), self.namespace()?))
    }

    pub fn kes_statefulset_name(&self) -> String {
        format!("{}-kes", self.name())
    }

    pub fn kes_headless_service_name(&self) -> String {
        format!("{}-kes-hl-svc", self.name())
    }

    pub fn kes_tls_secret_name(&self) -> String {
        format!("{}-kes-tls", self.name())
    }

    pub fn kes_csr_name(&self) -> Result<String, types::error::Error> {
        Ok(format!("{}-kes-{}-csr", self.name(), self.namespace()?))
    }

    pub fn kes_job_name(&self) -> String {
        format!("{}-kes-create-key", self.name())
    }

    pub fn prometheus_name(&self) -> String {
        format!("{}-prometheus", self.name())
    }

    pub fn prometheus_headless_service_name(&self) -> String {
        format!("{}-prometheus-hl-svc", self.name())
    }

    pub fn prometheus_config_map_name(&self) -> String {
        format!("{}-prometheus-config-map", self.name())
    }

    pub fn log_statefulset_name(&self) -> String {
        format!("{}-log", self.name())
    }

    pub fn log_headless_service_name(&self) -> String {
        format!("{}-log-hl-svc", self.name())
    }

    pub fn log_secret_name(&self) -> String {
        format!("{}-log-secret", self.name())
    }

    pub fn log_search_api_name(&self) -> String {
        format!("{}-logsearchapi", self.name())
    }

    /// Name a pool's StatefulSet gets the first time it is seen.
    pub fn pool_statefulset_name(&self, pool: &Pool) -> String {
        format!("{}-{}", self.name(), pool.name)
    }

    /// StatefulSet name for pool `index`, preferring the one recorded in status.
    pub fn pool_ss_name(&self, index: usize) -> Option<String> {
        self.status
            .as_ref()
            .and_then(|s| s.pools.get(index))
            .map(|p| p.ss_name.clone())
            .or_else(|| {
                self.spec
                    .pools
                    .get(index)
                    .map(|p| self.pool_statefulset_name(p))
            })
    }

    /// `*.<hl>.<ns>.svc.<domain>`
    pub fn wildcard_name(&self, domain: &str) -> String {
        format!("*.{}", self.headless_service_host(domain))
    }

    pub fn headless_service_host(&self, domain: &str) -> String {
        format!(
            "{}.{}.svc.{}",
            self.headless_service_name(),
            self.namespace().unwrap_or_default(),
            domain
        )
    }

    /// `minio.<ns>.svc.<domain>`
    pub fn service_fqdn(&self, domain: &str) -> String {
        format!(
            "{}.{}.svc.{}",
            MINIO_CI_SERVICE,
            self.namespace().unwrap_or_default(),
            domain
        )
    }

    /// Endpoint of the tenant's cluster-IP service, with the default port for its scheme.
    pub fn service_url(&self, domain: &str) -> String {
        format!("{}://{}", self.scheme(), self.service_fqdn(domain))
    }

    /// Endpoint of a single pod through the headless service.
    pub fn pod_url(&self, pod: &str, domain: &str) -> String {
        format!(
            "{}://{}.{}:{}",
            self.scheme(),
            pod,
            self.headless_service_host(domain),
            super::MINIO_PORT
        )
    }

    pub fn kes_service_host(&self, domain: &str) -> String {
        format!(
            "{}.{}.svc.{}",
            self.kes_headless_service_name(),
            self.namespace().unwrap_or_default(),
            domain
        )
    }

    pub fn kes_endpoint(&self, domain: &str) -> String {
        format!("https://{}:{}", self.kes_service_host(domain), KES_PORT)
    }

    pub fn kes_hosts(&self, domain: &str) -> Vec<String> {
        let mut hosts: Vec<String> = (0..self.kes_replicas())
            .map(|i| {
                format!(
                    "{}-{}.{}",
                    self.kes_statefulset_name(),
                    i,
                    self.kes_service_host(domain)
                )
            })
            .collect();
        hosts.push(self.kes_service_host(domain));
        hosts
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::config::OperatorConfig;
    use crate::types::v2::k8s::PodManagementPolicy;

    #[test]
    fn test_names() {
        let tenant = crate::tests::create_test_tenant();
        assert_eq!(tenant.headless_service_name(), "acme-hl");
        assert_eq!(tenant.csr_name().unwrap(), "acme-t1-csr");
        assert_eq!(tenant.client_csr_name().unwrap(), "acme-client-t1-csr");
        assert_eq!(tenant.kes_csr_name().unwrap(), "acme-kes-t1-csr");
        assert_eq!(tenant.pool_ss_name(0).unwrap(), "acme-p0");
        assert_eq!(
            tenant.wildcard_name("cluster.local"),
            "*.acme-hl.t1.svc.cluster.local"
        );
    }

    #[test]
    fn test_pool_ss_name_prefers_status() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.status = Some(crate::types::v2::status::Status {
            pools: vec![crate::types::v2::status::pool::Pool::new(
                "acme-zone-0".to_owned(),
            )],
            ..Default::default()
        });
        tenant.spec.pools[0].name = "renamed".to_owned();

        assert_eq!(tenant.pool_ss_name(0).unwrap(), "acme-zone-0");
    }

    #[test]
    fn test_ensure_defaults() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.image = None;
        tenant.spec.pools[0].name = String::new();
        let cfg = OperatorConfig::default();
        tenant.ensure_defaults(&cfg);

        assert_eq!(tenant.image(), cfg.minio_image);
        assert_eq!(tenant.spec.pools[0].name, "pool-0");
        assert_eq!(tenant.mount_path(), "/export");
        assert_eq!(
            tenant.spec.pod_management_policy,
            Some(PodManagementPolicy::Parallel)
        );
        let cert_config = tenant.spec.cert_config.unwrap();
        assert_eq!(
            cert_config.common_name.as_deref(),
            Some("*.acme-hl.t1.svc.cluster.local")
        );
        assert_eq!(cert_config.organization_name, vec!["system:nodes"]);
        assert!(!cert_config.dns_names.is_empty());
    }

    #[test]
    fn test_tls_defaults_to_auto_cert() {
        let mut tenant = crate::tests::create_test_tenant();
        assert!(tenant.tls());
        assert_eq!(tenant.service_url("cluster.local"), "https://minio.t1.svc.cluster.local");

        tenant.spec.request_auto_cert = Some(false);
        assert!(!tenant.tls());
        assert_eq!(tenant.scheme(), "http");
    }

    #[test]
    fn test_owns() {
        let tenant = crate::tests::create_test_tenant();
        let mut meta = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            owner_references: Some(vec![tenant.new_owner_ref()]),
            ..Default::default()
        };
        assert!(tenant.owns(&meta));

        meta.owner_references = None;
        assert!(!tenant.owns(&meta));
    }
}

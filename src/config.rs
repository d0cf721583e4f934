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

//! Process-wide settings, read once at startup from the environment and CLI.

use crate::types::v2::WEBHOOK_API_BUCKET_SERVICE;
use std::time::Duration;

pub const DEFAULT_MINIO_IMAGE: &str = "minio/minio:RELEASE.2021-06-07T21-40-51Z";
pub const DEFAULT_KES_IMAGE: &str = "minio/kes:v0.14.0";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "minio-operator";
pub const DEFAULT_HOSTNAME: &str = "operator-pod";
pub const DEFAULT_CSR_SIGNER: &str = "kubernetes.io/kubelet-serving";
pub const WEBHOOK_PORT: u16 = 4222;

const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Which certificates.k8s.io API the operator talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrVersion {
    V1,
    V1Beta1,
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace the operator itself runs in.
    pub namespace: String,
    pub watched_namespaces: Vec<String>,
    pub hostname: String,
    pub cert_password: Option<String>,
    pub tls_enabled: bool,
    pub cluster_domain: String,
    pub minio_image: String,
    pub kes_image: String,
    pub monitoring_interval: Duration,
    pub certificates_version: Option<CsrVersion>,
    pub csr_signer_name: String,
    pub hosts_template: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None, None, None)
    }
}

impl OperatorConfig {
    pub fn from_env(hosts_template: Option<String>) -> Self {
        let namespace = std::fs::read_to_string(NAMESPACE_FILE)
            .ok()
            .map(|s| s.trim().to_owned());
        Self::from_lookup(|key| std::env::var(key).ok(), namespace, hosts_template)
    }

    pub(crate) fn from_lookup<F>(
        lookup: F,
        namespace: Option<String>,
        hosts_template: Option<String>,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let watched_namespaces = lookup("WATCHED_NAMESPACE")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let tls_enabled = match lookup("MINIO_OPERATOR_TLS_ENABLE") {
            None => true,
            Some(v) => v.is_empty() || v == "on",
        };

        let monitoring_interval = non_empty("MONITORING_INTERVAL")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(3);

        let certificates_version = non_empty("OPERATOR_CERTIFICATES_VERSION").and_then(|v| {
            match v.as_str() {
                "v1" => Some(CsrVersion::V1),
                "v1beta1" => Some(CsrVersion::V1Beta1),
                _ => None,
            }
        });

        Self {
            namespace: namespace
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_OPERATOR_NAMESPACE.to_owned()),
            watched_namespaces,
            hostname: non_empty("HOSTNAME").unwrap_or_else(|| DEFAULT_HOSTNAME.to_owned()),
            cert_password: non_empty("OPERATOR_CERT_PASSWD"),
            tls_enabled,
            cluster_domain: non_empty("CLUSTER_DOMAIN")
                .unwrap_or_else(|| DEFAULT_CLUSTER_DOMAIN.to_owned()),
            minio_image: non_empty("TENANT_MINIO_IMAGE")
                .unwrap_or_else(|| DEFAULT_MINIO_IMAGE.to_owned()),
            kes_image: non_empty("TENANT_KES_IMAGE")
                .unwrap_or_else(|| DEFAULT_KES_IMAGE.to_owned()),
            monitoring_interval: Duration::from_secs(monitoring_interval * 60),
            certificates_version,
            csr_signer_name: non_empty("MINIO_OPERATOR_CSR_SIGNER_NAME")
                .unwrap_or_else(|| DEFAULT_CSR_SIGNER.to_owned()),
            hosts_template: hosts_template.filter(|t| !t.is_empty()),
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls_enabled { "https" } else { "http" }
    }

    /// `operator.<ns>.svc.<domain>`
    pub fn operator_fqdn(&self) -> String {
        format!("operator.{}.svc.{}", self.namespace, self.cluster_domain)
    }

    /// Base URL tenant pods use to reach the operator's webhook server.
    pub fn webhook_base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.scheme(),
            self.operator_fqdn(),
            WEBHOOK_PORT
        )
    }

    /// Bucket DNS callback endpoint for the tenant `namespace/name`.
    pub fn bucket_service_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}{}/{}/{}",
            self.webhook_base_url(),
            WEBHOOK_API_BUCKET_SERVICE,
            namespace,
            name
        )
    }

    pub fn operator_hosts(&self) -> Vec<String> {
        vec![
            "operator".to_owned(),
            format!("operator.{}.svc", self.namespace),
            self.operator_fqdn(),
        ]
    }

    pub fn is_watched(&self, namespace: &str) -> bool {
        self.watched_namespaces.is_empty() || self.watched_namespaces.iter().any(|n| n == namespace)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> OperatorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|k| vars.get(k).cloned(), None, None)
    }

    #[test]
    fn test_defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.namespace, "minio-operator");
        assert_eq!(cfg.hostname, "operator-pod");
        assert_eq!(cfg.cluster_domain, "cluster.local");
        assert!(cfg.tls_enabled);
        assert_eq!(cfg.monitoring_interval, Duration::from_secs(180));
        assert!(cfg.watched_namespaces.is_empty());
        assert!(cfg.is_watched("anything"));
        assert_eq!(cfg.certificates_version, None);
    }

    #[test]
    fn test_tls_toggle() {
        assert!(config_from(&[("MINIO_OPERATOR_TLS_ENABLE", "on")]).tls_enabled);
        assert!(!config_from(&[("MINIO_OPERATOR_TLS_ENABLE", "off")]).tls_enabled);
        assert_eq!(
            config_from(&[("MINIO_OPERATOR_TLS_ENABLE", "off")]).webhook_base_url(),
            "http://operator.minio-operator.svc.cluster.local:4222"
        );
    }

    #[test]
    fn test_watched_namespaces() {
        let cfg = config_from(&[("WATCHED_NAMESPACE", "t1, t2,,")]);
        assert_eq!(cfg.watched_namespaces, vec!["t1", "t2"]);
        assert!(cfg.is_watched("t2"));
        assert!(!cfg.is_watched("t3"));
    }

    #[test]
    fn test_overrides() {
        let cfg = config_from(&[
            ("CLUSTER_DOMAIN", "corp.internal"),
            ("MONITORING_INTERVAL", "10"),
            ("OPERATOR_CERTIFICATES_VERSION", "v1beta1"),
            ("TENANT_MINIO_IMAGE", "store:v9"),
        ]);
        assert_eq!(cfg.operator_fqdn(), "operator.minio-operator.svc.corp.internal");
        assert_eq!(cfg.monitoring_interval, Duration::from_secs(600));
        assert_eq!(cfg.certificates_version, Some(CsrVersion::V1Beta1));
        assert_eq!(cfg.minio_image, "store:v9");
    }
}

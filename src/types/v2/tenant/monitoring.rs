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

//! Prometheus and log-search sub-stacks.

use super::Tenant;
use crate::types;
use crate::types::error::JwtSnafu;
use crate::types::v2::{
    LOG_PG_IMAGE, LOG_PG_LABEL, LOG_PG_PORT, LOG_SEARCH_API_IMAGE, LOG_SEARCH_API_LABEL,
    LOG_SEARCH_API_PORT, MINIO_SERVICE_PORT_HTTP, MINIO_SERVICE_PORT_HTTPS, PROMETHEUS_IMAGE,
    PROMETHEUS_LABEL, PROMETHEUS_PORT,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde::Serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;

pub const PROMETHEUS_CONFIG_KEY: &str = "prometheus.yml";
pub const LOG_PG_PASSWORD_KEY: &str = "POSTGRES_PASSWORD";
pub const LOG_PG_CONN_KEY: &str = "LOGSEARCH_PG_CONN_STR";
pub const LOG_AUDIT_TOKEN_KEY: &str = "LOGSEARCH_AUDIT_AUTH_TOKEN";
pub const LOG_QUERY_TOKEN_KEY: &str = "MINIO_QUERY_AUTH_TOKEN";
pub const LEGACY_LOG_QUERY_TOKEN_KEY: &str = "LOGSEARCH_QUERY_AUTH_TOKEN";
pub const PROMETHEUS_URL_KEY: &str = "MINIO_PROMETHEUS_URL";
pub const LEGACY_PROMETHEUS_URL_KEY: &str = "CONSOLE_PROMETHEUS_URL";

const LOG_PG_USER: &str = "postgres";
const LOG_AUDIT_DB: &str = "minio_logs";
const DEFAULT_DISK_GB: i32 = 5;
const METRICS_PATH: &str = "/minio/v2/metrics/cluster";
const BEARER_TOKEN_YEARS: i64 = 100;

#[derive(Serialize)]
struct BearerClaims<'a> {
    exp: i64,
    sub: &'a str,
    iss: &'a str,
}

#[derive(Serialize)]
struct PrometheusConfigFile {
    global: GlobalConfig,
    scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Serialize)]
struct GlobalConfig {
    scrape_interval: String,
    evaluation_interval: String,
}

#[derive(Serialize)]
struct ScrapeConfig {
    job_name: String,
    bearer_token: String,
    metrics_path: String,
    scheme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_config: Option<TlsConfig>,
    static_configs: Vec<StaticConfig>,
}

#[derive(Serialize)]
struct TlsConfig {
    insecure_skip_verify: bool,
}

#[derive(Serialize)]
struct StaticConfig {
    targets: Vec<String>,
}

fn labels_with(
    base: BTreeMap<String, String>,
    extra: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut labels = extra.cloned().unwrap_or_default();
    labels.extend(base);
    labels
}

fn storage_claim(name: String, gb: i32, storage_class: Option<String>) -> corev1::PersistentVolumeClaim {
    corev1::PersistentVolumeClaim {
        metadata: metav1::ObjectMeta {
            name: Some(name),
            ..Default::default()
        },
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
            storage_class_name: storage_class,
            resources: Some(corev1::VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_owned(), Quantity(format!("{gb}Gi")))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_owned(),
        value_from: Some(corev1::EnvVarSource {
            secret_key_ref: Some(corev1::SecretKeySelector {
                name: secret.to_owned(),
                key: key.to_owned(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_non_root() -> corev1::PodSecurityContext {
    corev1::PodSecurityContext {
        run_as_user: Some(1000),
        run_as_group: Some(1000),
        run_as_non_root: Some(true),
        fs_group: Some(1000),
        ..Default::default()
    }
}

impl Tenant {
    /// HS512 JWT Prometheus presents to the metrics endpoint.
    pub fn prometheus_bearer_token(
        &self,
        access_key: &str,
        secret_key: &str,
    ) -> Result<String, types::error::Error> {
        let exp = chrono::Utc::now() + chrono::Duration::days(365 * BEARER_TOKEN_YEARS);
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &BearerClaims {
                exp: exp.timestamp(),
                sub: access_key,
                iss: "prometheus",
            },
            &EncodingKey::from_secret(secret_key.as_bytes()),
        )
        .context(JwtSnafu)
    }

    pub fn prometheus_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.tenant_labels();
        labels.insert(PROMETHEUS_LABEL.to_owned(), self.prometheus_name());
        labels
    }

    pub fn log_pg_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.tenant_labels();
        labels.insert(LOG_PG_LABEL.to_owned(), self.log_statefulset_name());
        labels
    }

    pub fn log_search_api_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.tenant_labels();
        labels.insert(LOG_SEARCH_API_LABEL.to_owned(), self.log_search_api_name());
        labels
    }

    fn owned_meta(&self, name: String, labels: BTreeMap<String, String>) -> metav1::ObjectMeta {
        metav1::ObjectMeta {
            name: Some(name),
            namespace: self.namespace().ok(),
            owner_references: Some(vec![self.new_owner_ref()]),
            labels: Some(labels),
            ..Default::default()
        }
    }

    fn headless(&self, name: String, labels: BTreeMap<String, String>, port: i32, port_name: &str) -> corev1::Service {
        corev1::Service {
            metadata: self.owned_meta(name, labels.clone()),
            spec: Some(corev1::ServiceSpec {
                cluster_ip: Some("None".to_owned()),
                selector: Some(labels),
                ports: Some(vec![corev1::ServicePort {
                    port,
                    name: Some(port_name.to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// `prometheus.yml` scraping the tenant's cluster metrics.
    pub fn prometheus_config(
        &self,
        domain: &str,
        bearer_token: String,
    ) -> Result<String, types::error::Error> {
        let port = if self.tls() {
            MINIO_SERVICE_PORT_HTTPS
        } else {
            MINIO_SERVICE_PORT_HTTP
        };
        let config = PrometheusConfigFile {
            global: GlobalConfig {
                scrape_interval: "1m".to_owned(),
                evaluation_interval: "1m".to_owned(),
            },
            scrape_configs: vec![ScrapeConfig {
                job_name: "minio-job".to_owned(),
                bearer_token,
                metrics_path: METRICS_PATH.to_owned(),
                scheme: self.scheme().to_owned(),
                tls_config: self.tls().then_some(TlsConfig {
                    insecure_skip_verify: true,
                }),
                static_configs: vec![StaticConfig {
                    targets: vec![format!("{}:{}", self.service_fqdn(domain), port)],
                }],
            }],
        };
        serde_yaml_ng::to_string(&config).map_err(|e| types::error::Error::InternalError {
            msg: format!("prometheus config: {e}"),
        })
    }

    pub fn new_prometheus_config_map(&self, config: String) -> corev1::ConfigMap {
        corev1::ConfigMap {
            metadata: self.owned_meta(self.prometheus_config_map_name(), self.prometheus_labels()),
            data: Some([(PROMETHEUS_CONFIG_KEY.to_owned(), config)].into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn new_prometheus_headless_service(&self) -> corev1::Service {
        self.headless(
            self.prometheus_headless_service_name(),
            self.prometheus_labels(),
            PROMETHEUS_PORT,
            "http-prometheus",
        )
    }

    pub fn new_prometheus_statefulset(&self) -> v1::StatefulSet {
        let prometheus = self.spec.prometheus.clone().unwrap_or_default();
        let name = self.prometheus_name();
        let config_volume = format!("{name}-config");

        let container = corev1::Container {
            name: "prometheus".to_owned(),
            image: Some(prometheus.image.clone().unwrap_or_else(|| PROMETHEUS_IMAGE.to_owned())),
            image_pull_policy: Some(self.image_pull_policy()),
            args: Some(vec![
                "--config.file=/etc/prometheus/prometheus.yml".to_owned(),
                "--storage.tsdb.path=/prometheus".to_owned(),
                "--web.enable-lifecycle".to_owned(),
            ]),
            ports: Some(vec![corev1::ContainerPort {
                container_port: PROMETHEUS_PORT,
                ..Default::default()
            }]),
            volume_mounts: Some(vec![
                corev1::VolumeMount {
                    name: name.clone(),
                    mount_path: "/prometheus".to_owned(),
                    sub_path: Some("prometheus".to_owned()),
                    ..Default::default()
                },
                corev1::VolumeMount {
                    name: config_volume.clone(),
                    mount_path: "/etc/prometheus".to_owned(),
                    ..Default::default()
                },
            ]),
            resources: prometheus.resources.clone(),
            ..Default::default()
        };

        v1::StatefulSet {
            metadata: self.owned_meta(name.clone(), self.prometheus_labels()),
            spec: Some(v1::StatefulSetSpec {
                replicas: Some(1),
                service_name: Some(self.prometheus_headless_service_name()),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.prometheus_labels()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels_with(self.prometheus_labels(), prometheus.labels.as_ref())),
                        annotations: prometheus.annotations.clone(),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: vec![container],
                        volumes: Some(vec![corev1::Volume {
                            name: config_volume,
                            config_map: Some(corev1::ConfigMapVolumeSource {
                                name: self.prometheus_config_map_name(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        service_account_name: prometheus
                            .service_account_name
                            .clone()
                            .or_else(|| self.spec.service_account_name.clone()),
                        image_pull_secrets: self.spec.image_pull_secret.clone().map(|s| vec![s]),
                        node_selector: prometheus.node_selector.clone(),
                        affinity: prometheus.affinity.clone(),
                        tolerations: (!prometheus.tolerations.is_empty())
                            .then(|| prometheus.tolerations.clone()),
                        security_context: Some(
                            prometheus.security_context.clone().unwrap_or_else(default_non_root),
                        ),
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![storage_claim(
                    name,
                    prometheus.disk_capacity_gb.filter(|g| *g > 0).unwrap_or(DEFAULT_DISK_GB),
                    prometheus.storage_class_name.clone(),
                )]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn new_log_secret(&self, password: &str, audit_token: &str, query_token: &str) -> corev1::Secret {
        let conn = format!(
            "postgres://{LOG_PG_USER}:{password}@{}:{LOG_PG_PORT}/{LOG_AUDIT_DB}?sslmode=disable",
            self.log_headless_service_name()
        );
        let data = [
            (LOG_PG_PASSWORD_KEY, password.to_owned()),
            (LOG_PG_CONN_KEY, conn),
            (LOG_AUDIT_TOKEN_KEY, audit_token.to_owned()),
            (LOG_QUERY_TOKEN_KEY, query_token.to_owned()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), ByteString(v.into_bytes())))
        .collect();

        corev1::Secret {
            metadata: self.owned_meta(self.log_secret_name(), self.log_pg_labels()),
            type_: Some("Opaque".to_owned()),
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn new_log_headless_service(&self) -> corev1::Service {
        self.headless(
            self.log_headless_service_name(),
            self.log_pg_labels(),
            LOG_PG_PORT,
            "http-log-pg",
        )
    }

    pub fn new_log_statefulset(&self) -> v1::StatefulSet {
        let log = self.spec.log.clone().unwrap_or_default();
        let db = log.db.clone().unwrap_or_default();
        let name = self.log_statefulset_name();

        let claim = match db.volume_claim_template.clone() {
            Some(mut vct) => {
                vct.metadata.name = Some(name.clone());
                vct
            }
            None => storage_claim(name.clone(), DEFAULT_DISK_GB, None),
        };

        let container = corev1::Container {
            name: "log-search-pg".to_owned(),
            image: Some(db.image.clone().unwrap_or_else(|| LOG_PG_IMAGE.to_owned())),
            image_pull_policy: Some(self.image_pull_policy()),
            ports: Some(vec![corev1::ContainerPort {
                container_port: LOG_PG_PORT,
                ..Default::default()
            }]),
            env: Some(vec![
                corev1::EnvVar {
                    name: "POSTGRES_DB".to_owned(),
                    value: Some(LOG_AUDIT_DB.to_owned()),
                    ..Default::default()
                },
                corev1::EnvVar {
                    name: "POSTGRES_USER".to_owned(),
                    value: Some(LOG_PG_USER.to_owned()),
                    ..Default::default()
                },
                secret_env(LOG_PG_PASSWORD_KEY, &self.log_secret_name(), LOG_PG_PASSWORD_KEY),
            ]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: name.clone(),
                mount_path: "/var/lib/postgresql/data".to_owned(),
                sub_path: Some("data".to_owned()),
                ..Default::default()
            }]),
            resources: db.resources.clone(),
            ..Default::default()
        };

        v1::StatefulSet {
            metadata: self.owned_meta(name, self.log_pg_labels()),
            spec: Some(v1::StatefulSetSpec {
                replicas: Some(1),
                service_name: Some(self.log_headless_service_name()),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.log_pg_labels()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(self.log_pg_labels()),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: vec![container],
                        image_pull_secrets: self.spec.image_pull_secret.clone().map(|s| vec![s]),
                        service_account_name: self.spec.service_account_name.clone(),
                        node_selector: db.node_selector.clone(),
                        affinity: db.affinity.clone(),
                        tolerations: (!db.tolerations.is_empty()).then(|| db.tolerations.clone()),
                        security_context: Some(db.security_context.clone().unwrap_or(
                            corev1::PodSecurityContext {
                                run_as_user: Some(999),
                                run_as_group: Some(999),
                                run_as_non_root: Some(true),
                                fs_group: Some(999),
                                ..Default::default()
                            },
                        )),
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![claim]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn new_log_search_api_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: self.owned_meta(self.log_search_api_name(), self.log_search_api_labels()),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(self.log_search_api_labels()),
                ports: Some(vec![corev1::ServicePort {
                    port: LOG_SEARCH_API_PORT,
                    name: Some("http-logsearchapi".to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn new_log_search_api_deployment(&self) -> v1::Deployment {
        let log = self.spec.log.clone().unwrap_or_default();
        let secret = self.log_secret_name();
        let disk_gb = log
            .audit
            .as_ref()
            .and_then(|a| a.disk_capacity_gb)
            .unwrap_or_default();

        let container = corev1::Container {
            name: "logsearchapi".to_owned(),
            image: Some(log.image.clone().unwrap_or_else(|| LOG_SEARCH_API_IMAGE.to_owned())),
            image_pull_policy: Some(self.image_pull_policy()),
            ports: Some(vec![corev1::ContainerPort {
                container_port: LOG_SEARCH_API_PORT,
                ..Default::default()
            }]),
            env: Some(vec![
                corev1::EnvVar {
                    name: "LOGSEARCH_DISK_CAPACITY_GB".to_owned(),
                    value: Some(disk_gb.to_string()),
                    ..Default::default()
                },
                secret_env(LOG_PG_CONN_KEY, &secret, LOG_PG_CONN_KEY),
                secret_env(LOG_AUDIT_TOKEN_KEY, &secret, LOG_AUDIT_TOKEN_KEY),
                secret_env(LOG_QUERY_TOKEN_KEY, &secret, LOG_QUERY_TOKEN_KEY),
            ]),
            resources: log.resources.clone(),
            ..Default::default()
        };

        v1::Deployment {
            metadata: self.owned_meta(self.log_search_api_name(), self.log_search_api_labels()),
            spec: Some(v1::DeploymentSpec {
                replicas: Some(1),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.log_search_api_labels()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels_with(self.log_search_api_labels(), log.labels.as_ref())),
                        annotations: log.annotations.clone(),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: vec![container],
                        service_account_name: self.spec.service_account_name.clone(),
                        image_pull_secrets: self.spec.image_pull_secret.clone().map(|s| vec![s]),
                        node_selector: log.node_selector.clone(),
                        affinity: log.affinity.clone(),
                        tolerations: (!log.tolerations.is_empty()).then(|| log.tolerations.clone()),
                        restart_policy: Some("Always".to_owned()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    #[test]
    fn test_prometheus_bearer_token() {
        let tenant = crate::tests::create_test_tenant();
        let token = tenant.prometheus_bearer_token("ak", "sk").unwrap();

        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_issuer(&["prometheus"]);
        let data = jsonwebtoken::decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(b"sk"),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims["sub"], "ak");
    }

    #[test]
    fn test_prometheus_config() {
        let tenant = crate::tests::create_test_tenant();
        let config = tenant.prometheus_config("cluster.local", "tok".to_owned()).unwrap();
        let parsed: serde_json::Value = serde_yaml_ng::from_str(&config).unwrap();
        let scrape = &parsed["scrape_configs"][0];
        assert_eq!(scrape["metrics_path"], "/minio/v2/metrics/cluster");
        assert_eq!(scrape["scheme"], "https");
        assert_eq!(scrape["bearer_token"], "tok");
        assert_eq!(
            scrape["static_configs"][0]["targets"][0],
            "minio.t1.svc.cluster.local:443"
        );
    }

    #[test]
    fn test_prometheus_statefulset() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.prometheus = Some(Default::default());
        let ss = tenant.new_prometheus_statefulset();
        assert_eq!(ss.metadata.name.as_deref(), Some("acme-prometheus"));
        let spec = ss.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let vct = &spec.volume_claim_templates.unwrap()[0];
        let storage = vct
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .unwrap();
        assert_eq!(storage.0, "5Gi");
    }

    #[test]
    fn test_log_secret() {
        let tenant = crate::tests::create_test_tenant();
        let secret = tenant.new_log_secret("pw", "audit", "query");
        let data = secret.data.unwrap();
        assert_eq!(data[LOG_QUERY_TOKEN_KEY].0, b"query");
        let conn = String::from_utf8(data[LOG_PG_CONN_KEY].0.clone()).unwrap();
        assert!(conn.starts_with("postgres://postgres:pw@acme-log-hl-svc:5432/"));
    }

    #[test]
    fn test_log_search_api_deployment() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.log = Some(Default::default());
        let deployment = tenant.new_log_search_api_deployment();
        assert_eq!(deployment.metadata.name.as_deref(), Some("acme-logsearchapi"));
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("minio/logsearchapi:v4.1.1"));
    }
}

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

use super::Tenant;
use crate::types;
use crate::types::v2::certificate::secret_keys;
use crate::types::v2::kes::KesConfig;
use crate::types::v2::{KES_CONFIG_MOUNT, KES_LABEL, KES_PORT};
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::batch::v1 as batchv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

const KES_CONTAINER: &str = "kes";
const KES_CONFIG_KEY: &str = "server-config.yaml";
pub const KES_IDENTITY_ENV: &str = "MINIO_KES_IDENTITY";

impl Tenant {
    fn kes(&self) -> Result<&KesConfig, types::error::Error> {
        self.spec
            .kes
            .as_ref()
            .ok_or(types::error::Error::InternalError {
                msg: "tenant has no KES configuration".to_owned(),
            })
    }

    pub fn kes_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.tenant_labels();
        labels.insert(KES_LABEL.to_owned(), self.kes_statefulset_name());
        labels
    }

    fn kes_volume_name(&self) -> String {
        format!("{}-kes-config", self.name())
    }

    fn kes_image(&self) -> Option<String> {
        self.spec.kes.as_ref().and_then(|k| k.image.clone())
    }

    pub fn new_kes_headless_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: metav1::ObjectMeta {
                name: Some(self.kes_headless_service_name()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                labels: Some(self.kes_labels()),
                ..Default::default()
            },
            spec: Some(corev1::ServiceSpec {
                cluster_ip: Some("None".to_owned()),
                publish_not_ready_addresses: Some(true),
                selector: Some(self.kes_labels()),
                ports: Some(vec![corev1::ServicePort {
                    port: KES_PORT,
                    name: Some("http-kes".to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// KES StatefulSet. `identity` is the hex SHA-256 of the MinIO client
    /// certificate's public key, exposed to KES as its admin principal.
    pub fn new_kes_statefulset(&self, identity: &str) -> Result<v1::StatefulSet, types::error::Error> {
        let kes = self.kes()?;

        let (cert_secret, keys) = match &kes.external_cert_secret {
            Some(cert) => (cert.name.clone(), secret_keys(cert.type_.as_deref())),
            None => (self.kes_tls_secret_name(), secret_keys(None)),
        };

        let projections = vec![
            corev1::VolumeProjection {
                secret: Some(corev1::SecretProjection {
                    name: cert_secret,
                    items: Some(vec![
                        corev1::KeyToPath {
                            key: keys.cert.to_owned(),
                            path: "server.crt".to_owned(),
                            mode: None,
                        },
                        corev1::KeyToPath {
                            key: keys.key.to_owned(),
                            path: "server.key".to_owned(),
                            mode: None,
                        },
                    ]),
                    optional: None,
                }),
                ..Default::default()
            },
            corev1::VolumeProjection {
                secret: Some(corev1::SecretProjection {
                    name: kes.kes_secret.name.clone(),
                    items: Some(vec![corev1::KeyToPath {
                        key: KES_CONFIG_KEY.to_owned(),
                        path: KES_CONFIG_KEY.to_owned(),
                        mode: None,
                    }]),
                    optional: None,
                }),
                ..Default::default()
            },
        ];

        let mut pod_labels = kes.labels.clone().unwrap_or_default();
        pod_labels.extend(self.kes_labels());

        let container = corev1::Container {
            name: KES_CONTAINER.to_owned(),
            image: self.kes_image(),
            image_pull_policy: kes.image_pull_policy.as_ref().map(ToString::to_string),
            args: Some(vec![
                "server".to_owned(),
                format!("--config={KES_CONFIG_MOUNT}/{KES_CONFIG_KEY}"),
                "--auth=off".to_owned(),
            ]),
            ports: Some(vec![corev1::ContainerPort {
                container_port: KES_PORT,
                ..Default::default()
            }]),
            env: Some(vec![corev1::EnvVar {
                name: KES_IDENTITY_ENV.to_owned(),
                value: Some(identity.to_owned()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: self.kes_volume_name(),
                mount_path: KES_CONFIG_MOUNT.to_owned(),
                ..Default::default()
            }]),
            resources: kes.resources.clone(),
            ..Default::default()
        };

        Ok(v1::StatefulSet {
            metadata: metav1::ObjectMeta {
                name: Some(self.kes_statefulset_name()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                labels: Some(self.kes_labels()),
                ..Default::default()
            },
            spec: Some(v1::StatefulSetSpec {
                replicas: Some(self.kes_replicas()),
                service_name: Some(self.kes_headless_service_name()),
                pod_management_policy: Some("Parallel".to_owned()),
                update_strategy: Some(v1::StatefulSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_owned()),
                    ..Default::default()
                }),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.kes_labels()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(pod_labels),
                        annotations: kes.annotations.clone(),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: vec![container],
                        volumes: Some(vec![corev1::Volume {
                            name: self.kes_volume_name(),
                            projected: Some(corev1::ProjectedVolumeSource {
                                sources: Some(projections),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        image_pull_secrets: self.spec.image_pull_secret.clone().map(|s| vec![s]),
                        service_account_name: kes.service_account_name.clone(),
                        scheduler_name: self.spec.scheduler.clone(),
                        node_selector: kes.node_selector.clone(),
                        affinity: kes.affinity.clone(),
                        tolerations: (!kes.tolerations.is_empty()).then(|| kes.tolerations.clone()),
                        security_context: kes.security_context.clone(),
                        restart_policy: Some("Always".to_owned()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// One-shot job creating the tenant's master key in KES.
    pub fn new_kes_job(&self, domain: &str) -> Result<batchv1::Job, types::error::Error> {
        let kes = self.kes()?;

        let (client_secret, keys) = match &self.spec.external_client_cert_secret {
            Some(cert) => (cert.name.clone(), secret_keys(cert.type_.as_deref())),
            None => (self.client_tls_secret_name(), secret_keys(None)),
        };

        let container = corev1::Container {
            name: KES_CONTAINER.to_owned(),
            image: self.kes_image(),
            image_pull_policy: kes.image_pull_policy.as_ref().map(ToString::to_string),
            args: Some(vec![
                "key".to_owned(),
                "create".to_owned(),
                self.kes_key_name(),
                "-k".to_owned(),
            ]),
            env: Some(vec![
                corev1::EnvVar {
                    name: "KES_SERVER".to_owned(),
                    value: Some(self.kes_endpoint(domain)),
                    ..Default::default()
                },
                corev1::EnvVar {
                    name: "KES_CLIENT_CERT".to_owned(),
                    value: Some(format!("{KES_CONFIG_MOUNT}/minio.crt")),
                    ..Default::default()
                },
                corev1::EnvVar {
                    name: "KES_CLIENT_KEY".to_owned(),
                    value: Some(format!("{KES_CONFIG_MOUNT}/minio.key")),
                    ..Default::default()
                },
            ]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: self.kes_volume_name(),
                mount_path: KES_CONFIG_MOUNT.to_owned(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Ok(batchv1::Job {
            metadata: metav1::ObjectMeta {
                name: Some(self.kes_job_name()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                labels: Some(self.kes_labels()),
                ..Default::default()
            },
            spec: Some(batchv1::JobSpec {
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(self.kes_labels()),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        restart_policy: Some("OnFailure".to_owned()),
                        containers: vec![container],
                        image_pull_secrets: self.spec.image_pull_secret.clone().map(|s| vec![s]),
                        volumes: Some(vec![corev1::Volume {
                            name: self.kes_volume_name(),
                            projected: Some(corev1::ProjectedVolumeSource {
                                sources: Some(vec![corev1::VolumeProjection {
                                    secret: Some(corev1::SecretProjection {
                                        name: client_secret,
                                        items: Some(vec![
                                            corev1::KeyToPath {
                                                key: keys.cert.to_owned(),
                                                path: "minio.crt".to_owned(),
                                                mode: None,
                                            },
                                            corev1::KeyToPath {
                                                key: keys.key.to_owned(),
                                                path: "minio.key".to_owned(),
                                                mode: None,
                                            },
                                        ]),
                                        optional: None,
                                    }),
                                    ..Default::default()
                                }]),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;

    fn kes_tenant() -> Tenant {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.kes = Some(KesConfig {
            kes_secret: corev1::LocalObjectReference {
                name: "kes-config".to_owned(),
            },
            ..Default::default()
        });
        tenant.ensure_defaults(&OperatorConfig::default());
        tenant
    }

    #[test]
    fn test_kes_statefulset() {
        let tenant = kes_tenant();
        let ss = tenant.new_kes_statefulset("abc123").unwrap();
        assert_eq!(ss.metadata.name.as_deref(), Some("acme-kes"));
        let spec = ss.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.service_name.as_deref(), Some("acme-kes-hl-svc"));

        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("minio/kes:v0.14.0"));
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, KES_IDENTITY_ENV);
        assert_eq!(env[0].value.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_kes_job() {
        let tenant = kes_tenant();
        let job = tenant.new_kes_job("cluster.local").unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("acme-kes-create-key"));
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec!["key", "create", "my-minio-key", "-k"]
        );
    }

    #[test]
    fn test_kes_hosts() {
        let tenant = kes_tenant();
        assert_eq!(
            tenant.kes_hosts("cluster.local"),
            vec![
                "acme-kes-0.acme-kes-hl-svc.t1.svc.cluster.local",
                "acme-kes-1.acme-kes-hl-svc.t1.svc.cluster.local",
                "acme-kes-hl-svc.t1.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn test_kes_builders_require_config() {
        let tenant = crate::tests::create_test_tenant();
        assert!(tenant.new_kes_statefulset("x").is_err());
    }
}

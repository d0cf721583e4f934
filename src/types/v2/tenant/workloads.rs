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
use crate::config::OperatorConfig;
use crate::types;
use crate::types::v2::certificate::{LocalCertificateReference, secret_keys};
use crate::types::v2::configuration::{
    CONFIG_ENV_KEY, CREDS_ACCESS_KEY, CREDS_SECRET_KEY, ROOT_PASSWORD, ROOT_USER,
};
use crate::types::v2::pool::Pool;
use crate::types::v2::{
    CERTS_DIR, CONSOLE_PORT, CONSOLE_TLS_PORT, MINIO_CONTAINER, MINIO_PORT, MINIO_PORT_NAME_HTTP,
    MINIO_PORT_NAME_HTTPS, OPERATOR_CA_SECRET, POOL_LABEL, REVISION_ANNOTATION, WEBHOOK_ARGS_KEY,
    WEBHOOK_SECRET,
};
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::{BTreeMap, BTreeSet};

const DEFAULT_VOLUME_NAME: &str = "data";
const CONFIG_VOLUME_NAME: &str = "configuration";
const CONFIG_MOUNT_PATH: &str = "/tmp/minio-config";
const DEFAULT_RUN_AS: i64 = 1000;
const MINISIGN_PUBKEY: &str = "RWTx5Zr1tiHQLwG9keckT0c45M3AGeHD6IvimQHpyRywVWGbP1aVSGav";
pub const BUCKET_DNS_ENV: &str = "MINIO_DNS_WEBHOOK_ENDPOINT";

fn key_to_path(key: &str, path: &str) -> corev1::KeyToPath {
    corev1::KeyToPath {
        key: key.to_owned(),
        path: path.to_owned(),
        mode: None,
    }
}

fn secret_projection(
    name: &str,
    items: Vec<corev1::KeyToPath>,
    optional: bool,
) -> corev1::VolumeProjection {
    corev1::VolumeProjection {
        secret: Some(corev1::SecretProjection {
            name: name.to_owned(),
            items: Some(items),
            optional: optional.then_some(true),
        }),
        ..Default::default()
    }
}

fn env_value(name: &str, value: impl Into<String>) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_secret(name: &str, secret: &str, key: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_owned(),
        value_from: Some(corev1::EnvVarSource {
            secret_key_ref: Some(corev1::SecretKeySelector {
                name: secret.to_owned(),
                key: key.to_owned(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cert/key projection for a certificate secret, honouring its key layout.
fn cert_items(reference: &LocalCertificateReference, cert_path: &str, key_path: &str) -> Vec<corev1::KeyToPath> {
    let keys = secret_keys(reference.type_.as_deref());
    vec![key_to_path(keys.cert, cert_path), key_to_path(keys.key, key_path)]
}

impl Tenant {
    pub fn pool_labels(&self, pool: &Pool) -> BTreeMap<String, String> {
        let mut labels = self.pool_selector_labels(pool);
        if let Some(extra) = &pool.labels {
            for (k, v) in extra {
                labels.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        labels
    }

    pub fn pool_selector_labels(&self, pool: &Pool) -> BTreeMap<String, String> {
        let mut labels = self.tenant_labels();
        labels.insert(POOL_LABEL.to_owned(), pool.name.clone());
        labels
    }

    fn pool_security_context(&self, index: usize, pool: &Pool) -> Option<corev1::PodSecurityContext> {
        if let Some(ctx) = &pool.security_context {
            return Some(ctx.clone());
        }
        let legacy = self
            .status
            .as_ref()
            .and_then(|s| s.pools.get(index))
            .is_some_and(|p| p.legacy_security_context);
        if legacy {
            // tenants created before the non-root default keep running as root
            return None;
        }
        Some(corev1::PodSecurityContext {
            run_as_user: Some(DEFAULT_RUN_AS),
            run_as_group: Some(DEFAULT_RUN_AS),
            run_as_non_root: Some(true),
            fs_group: Some(DEFAULT_RUN_AS),
            ..Default::default()
        })
    }

    /// Sources of the `/tmp/certs` projected volume.
    fn tls_projections(&self, cfg: &OperatorConfig) -> Vec<corev1::VolumeProjection> {
        let mut sources = Vec::new();

        if self.auto_cert() {
            sources.push(secret_projection(
                &self.tls_secret_name(),
                vec![
                    key_to_path("public.crt", "public.crt"),
                    key_to_path("private.key", "private.key"),
                    key_to_path("public.crt", "CAs/public.crt"),
                ],
                false,
            ));
        }

        for (i, cert) in self.spec.external_cert_secret.iter().enumerate() {
            let (cert_path, key_path) = if i == 0 && !self.auto_cert() {
                ("public.crt".to_owned(), "private.key".to_owned())
            } else {
                (format!("hostname-{i}/public.crt"), format!("hostname-{i}/private.key"))
            };
            sources.push(secret_projection(
                &cert.name,
                cert_items(cert, &cert_path, &key_path),
                false,
            ));
        }

        for (i, ca) in self.spec.external_ca_cert_secret.iter().enumerate() {
            let keys = secret_keys(ca.type_.as_deref());
            sources.push(secret_projection(
                &ca.name,
                vec![key_to_path(keys.ca, &format!("CAs/ca-{i}.crt"))],
                false,
            ));
        }

        if self.has_kes() {
            match &self.spec.external_client_cert_secret {
                Some(client) => sources.push(secret_projection(
                    &client.name,
                    cert_items(client, "client.crt", "client.key"),
                    false,
                )),
                None => sources.push(secret_projection(
                    &self.client_tls_secret_name(),
                    vec![
                        key_to_path("public.crt", "client.crt"),
                        key_to_path("private.key", "client.key"),
                    ],
                    false,
                )),
            }

            let kes_cert = self
                .spec
                .kes
                .as_ref()
                .and_then(|k| k.external_cert_secret.clone());
            match kes_cert {
                Some(cert) => {
                    let keys = secret_keys(cert.type_.as_deref());
                    sources.push(secret_projection(
                        &cert.name,
                        vec![key_to_path(keys.ca, "CAs/kes.crt")],
                        false,
                    ));
                }
                None => sources.push(secret_projection(
                    &self.kes_tls_secret_name(),
                    vec![key_to_path("public.crt", "CAs/kes.crt")],
                    false,
                )),
            }
        }

        if cfg.tls_enabled {
            sources.push(secret_projection(
                OPERATOR_CA_SECRET,
                vec![key_to_path("public.crt", "CAs/operator.crt")],
                true,
            ));
        }

        sources
    }

    fn pool_env(
        &self,
        cfg: &OperatorConfig,
        skip_env_vars: &BTreeSet<String>,
    ) -> Vec<corev1::EnvVar> {
        let mut env = vec![
            env_secret(WEBHOOK_ARGS_KEY, WEBHOOK_SECRET, WEBHOOK_ARGS_KEY),
            env_value("MINIO_UPDATE", "on"),
            env_value("MINIO_UPDATE_MINISIGN_PUBKEY", MINISIGN_PUBKEY),
        ];

        if self.bucket_dns() {
            let namespace = self.metadata.namespace.as_deref().unwrap_or_default();
            env.push(env_value(BUCKET_DNS_ENV, cfg.bucket_service_url(namespace, &self.name())));
            env.push(env_value("MINIO_DOMAIN", self.service_fqdn(&cfg.cluster_domain)));
        }

        if let Some(creds) = self.spec.creds_secret.as_ref().filter(|c| !c.name.is_empty()) {
            env.push(env_secret(ROOT_USER, &creds.name, CREDS_ACCESS_KEY));
            env.push(env_secret(ROOT_PASSWORD, &creds.name, CREDS_SECRET_KEY));
        }

        if self.spec.configuration.is_some() {
            env.push(env_value(
                "MINIO_CONFIG_ENV_FILE",
                format!("{CONFIG_MOUNT_PATH}/{CONFIG_ENV_KEY}"),
            ));
        }

        if self.has_kes() {
            env.push(env_value(
                "MINIO_KMS_KES_ENDPOINT",
                self.kes_endpoint(&cfg.cluster_domain),
            ));
            env.push(env_value("MINIO_KMS_KES_CERT_FILE", format!("{CERTS_DIR}/client.crt")));
            env.push(env_value("MINIO_KMS_KES_KEY_FILE", format!("{CERTS_DIR}/client.key")));
            env.push(env_value("MINIO_KMS_KES_CA_PATH", format!("{CERTS_DIR}/CAs/kes.crt")));
            env.push(env_value("MINIO_KMS_KES_KEY_NAME", self.kes_key_name()));
        }

        for user_env in &self.spec.env {
            env.retain(|e| e.name != user_env.name);
            env.push(user_env.clone());
        }

        env.retain(|e| !skip_env_vars.contains(&e.name));
        env
    }

    fn pool_volume_claim_templates(&self, pool: &Pool) -> Vec<corev1::PersistentVolumeClaim> {
        let base = pool
            .volume_claim_template
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_VOLUME_NAME.to_owned());

        (0..pool.volumes_per_server)
            .map(|i| {
                let mut vct = pool.volume_claim_template.clone();
                vct.metadata.name = Some(format!("{base}{i}"));
                vct.metadata.namespace = None;
                vct.status = None;
                vct
            })
            .chain(
                self.spec
                    .side_cars
                    .iter()
                    .flat_map(|s| s.volume_claim_templates.iter().cloned()),
            )
            .collect()
    }

    fn pool_volume_mounts(&self, pool: &Pool) -> Vec<corev1::VolumeMount> {
        let base = pool
            .volume_claim_template
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_VOLUME_NAME.to_owned());
        let mount = self.mount_path().trim_end_matches('/');

        let mut mounts: Vec<corev1::VolumeMount> = if pool.volumes_per_server == 1 {
            vec![corev1::VolumeMount {
                name: format!("{base}0"),
                mount_path: mount.to_owned(),
                ..Default::default()
            }]
        } else {
            (0..pool.volumes_per_server)
                .map(|i| corev1::VolumeMount {
                    name: format!("{base}{i}"),
                    mount_path: format!("{mount}{i}"),
                    ..Default::default()
                })
                .collect()
        };

        mounts.push(corev1::VolumeMount {
            name: self.tls_secret_name(),
            mount_path: CERTS_DIR.to_owned(),
            ..Default::default()
        });

        if self.spec.configuration.is_some() {
            mounts.push(corev1::VolumeMount {
                name: CONFIG_VOLUME_NAME.to_owned(),
                mount_path: CONFIG_MOUNT_PATH.to_owned(),
                read_only: Some(true),
                ..Default::default()
            });
        }
        mounts
    }

    fn minio_container(
        &self,
        pool: &Pool,
        cfg: &OperatorConfig,
        skip_env_vars: &BTreeSet<String>,
    ) -> corev1::Container {
        let (port_name, console_port) = if self.tls() {
            (MINIO_PORT_NAME_HTTPS, CONSOLE_TLS_PORT)
        } else {
            (MINIO_PORT_NAME_HTTP, CONSOLE_PORT)
        };

        corev1::Container {
            name: MINIO_CONTAINER.to_owned(),
            image: Some(self.image().to_owned()),
            image_pull_policy: Some(self.image_pull_policy()),
            args: Some(vec![
                "server".to_owned(),
                "--certs-dir".to_owned(),
                CERTS_DIR.to_owned(),
                "--console-address".to_owned(),
                format!(":{console_port}"),
            ]),
            ports: Some(vec![
                corev1::ContainerPort {
                    container_port: MINIO_PORT,
                    name: Some(port_name.to_owned()),
                    ..Default::default()
                },
                corev1::ContainerPort {
                    container_port: console_port,
                    name: Some("http-console".to_owned()),
                    ..Default::default()
                },
            ]),
            env: Some(self.pool_env(cfg, skip_env_vars)),
            volume_mounts: Some(self.pool_volume_mounts(pool)),
            resources: pool.resources.clone(),
            liveness_probe: self.spec.liveness.clone(),
            readiness_probe: self.spec.readiness.clone(),
            ..Default::default()
        }
    }

    fn pool_volumes(&self, cfg: &OperatorConfig) -> Vec<corev1::Volume> {
        let mut volumes = vec![corev1::Volume {
            name: self.tls_secret_name(),
            projected: Some(corev1::ProjectedVolumeSource {
                sources: Some(self.tls_projections(cfg)),
                ..Default::default()
            }),
            ..Default::default()
        }];

        if let Some(config) = &self.spec.configuration {
            volumes.push(corev1::Volume {
                name: CONFIG_VOLUME_NAME.to_owned(),
                secret: Some(corev1::SecretVolumeSource {
                    secret_name: Some(config.name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        if let Some(side_cars) = &self.spec.side_cars {
            volumes.extend(side_cars.volumes.iter().cloned());
        }
        volumes
    }

    /// Desired StatefulSet for pool `index`. The name comes from
    /// `status.pools[index].ssName` once recorded.
    pub fn new_pool_statefulset(
        &self,
        index: usize,
        cfg: &OperatorConfig,
        skip_env_vars: &BTreeSet<String>,
    ) -> Result<v1::StatefulSet, types::error::Error> {
        let pool = self
            .spec
            .pools
            .get(index)
            .ok_or(types::error::Error::InternalError {
                msg: format!("pool index {index} out of range"),
            })?;
        let name = self
            .pool_ss_name(index)
            .unwrap_or_else(|| self.pool_statefulset_name(pool));
        let labels = self.pool_labels(pool);
        let revision = self.status.as_ref().map(|s| s.revision).unwrap_or_default();

        let mut annotations = pool.annotations.clone().unwrap_or_default();
        annotations.insert(REVISION_ANNOTATION.to_owned(), revision.to_string());

        let mut containers = vec![self.minio_container(pool, cfg, skip_env_vars)];
        if let Some(side_cars) = &self.spec.side_cars {
            containers.extend(side_cars.containers.iter().cloned());
        }

        Ok(v1::StatefulSet {
            metadata: metav1::ObjectMeta {
                name: Some(name),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(v1::StatefulSetSpec {
                replicas: Some(pool.servers),
                service_name: Some(self.headless_service_name()),
                pod_management_policy: Some(
                    self.spec
                        .pod_management_policy
                        .clone()
                        .unwrap_or_default()
                        .to_string(),
                ),
                update_strategy: Some(v1::StatefulSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_owned()),
                    ..Default::default()
                }),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.pool_selector_labels(pool)),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers,
                        volumes: Some(self.pool_volumes(cfg)),
                        image_pull_secrets: self.spec.image_pull_secret.clone().map(|s| vec![s]),
                        service_account_name: self.spec.service_account_name.clone(),
                        priority_class_name: self.spec.priority_class_name.clone(),
                        scheduler_name: self.spec.scheduler.clone(),
                        security_context: self.pool_security_context(index, pool),
                        node_selector: pool.node_selector.clone(),
                        affinity: pool.affinity.clone(),
                        tolerations: (!pool.tolerations.is_empty()).then(|| pool.tolerations.clone()),
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(self.pool_volume_claim_templates(pool)),
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
    use crate::types::v2::status::{Status, pool::Pool as PoolStatus};

    fn build(tenant: &Tenant) -> v1::StatefulSet {
        tenant
            .new_pool_statefulset(0, &OperatorConfig::default(), &BTreeSet::new())
            .expect("Should create StatefulSet")
    }

    fn container(ss: &v1::StatefulSet) -> corev1::Container {
        ss.spec
            .clone()
            .expect("StatefulSet should have spec")
            .template
            .spec
            .expect("Pod template should have spec")
            .containers[0]
            .clone()
    }

    #[test]
    fn test_statefulset_shape() {
        let tenant = crate::tests::create_test_tenant();
        let ss = build(&tenant);
        let spec = ss.spec.clone().unwrap();

        assert_eq!(ss.metadata.name.as_deref(), Some("acme-p0"));
        assert_eq!(spec.replicas, Some(4));
        assert_eq!(spec.service_name.as_deref(), Some("acme-hl"));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));

        let vcts = spec.volume_claim_templates.unwrap();
        let names: Vec<_> = vcts.iter().map(|v| v.metadata.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["data0", "data1", "data2", "data3"]);

        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.get("v1.min.io/tenant").unwrap(), "acme");
        assert_eq!(selector.get("v1.min.io/pool").unwrap(), "p0");
    }

    #[test]
    fn test_statefulset_volume_mounts() {
        let tenant = crate::tests::create_test_tenant();
        let mounts = container(&build(&tenant)).volume_mounts.unwrap();
        assert_eq!(mounts[0].name, "data0");
        assert_eq!(mounts[0].mount_path, "/export0");
        assert_eq!(mounts[3].mount_path, "/export3");
        assert!(mounts.iter().any(|m| m.mount_path == "/tmp/certs" && m.name == "acme-tls"));
    }

    #[test]
    fn test_statefulset_single_volume_mount() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.pools[0].volumes_per_server = 1;
        let mounts = container(&build(&tenant)).volume_mounts.unwrap();
        assert_eq!(mounts[0].name, "data0");
        assert_eq!(mounts[0].mount_path, "/export");
    }

    #[test]
    fn test_statefulset_env() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.env = vec![env_value("MINIO_UPDATE", "off")];
        let env = container(&build(&tenant)).env.unwrap();

        let args = env.iter().find(|e| e.name == "MINIO_ARGS").unwrap();
        let secret_ref = args
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret_ref.name, "operator-webhook-secret");

        let root = env.iter().find(|e| e.name == "MINIO_ROOT_USER").unwrap();
        assert!(root.value_from.is_some());

        let update: Vec<_> = env.iter().filter(|e| e.name == "MINIO_UPDATE").collect();
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].value.as_deref(), Some("off"));
    }

    #[test]
    fn test_statefulset_skips_configured_env() {
        let tenant = crate::tests::create_test_tenant();
        let skip: BTreeSet<String> = [ROOT_USER.to_owned()].into_iter().collect();
        let ss = tenant
            .new_pool_statefulset(0, &OperatorConfig::default(), &skip)
            .unwrap();
        let env = container(&ss).env.unwrap();
        assert!(!env.iter().any(|e| e.name == ROOT_USER));
        assert!(env.iter().any(|e| e.name == ROOT_PASSWORD));
    }

    #[test]
    fn test_statefulset_kes_env_and_certs() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.kes = Some(Default::default());
        let ss = build(&tenant);
        let env = container(&ss).env.unwrap();
        let endpoint = env.iter().find(|e| e.name == "MINIO_KMS_KES_ENDPOINT").unwrap();
        assert_eq!(
            endpoint.value.as_deref(),
            Some("https://acme-kes-hl-svc.t1.svc.cluster.local:7373")
        );

        let volumes = ss.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        let sources = volumes[0].projected.clone().unwrap().sources.unwrap();
        let paths: Vec<String> = sources
            .iter()
            .filter_map(|s| s.secret.as_ref())
            .flat_map(|s| s.items.clone().unwrap_or_default())
            .map(|i| i.path)
            .collect();
        assert!(paths.contains(&"client.crt".to_owned()));
        assert!(paths.contains(&"CAs/kes.crt".to_owned()));
        assert!(paths.contains(&"CAs/operator.crt".to_owned()));
    }

    #[test]
    fn test_statefulset_security_context() {
        let mut tenant = crate::tests::create_test_tenant();
        let ctx = build(&tenant).spec.unwrap().template.spec.unwrap().security_context;
        assert_eq!(ctx.unwrap().run_as_non_root, Some(true));

        let mut status_pool = PoolStatus::new("acme-p0".to_owned());
        status_pool.legacy_security_context = true;
        tenant.status = Some(Status {
            pools: vec![status_pool],
            ..Default::default()
        });
        let ctx = build(&tenant).spec.unwrap().template.spec.unwrap().security_context;
        assert!(ctx.is_none());
    }

    #[test]
    fn test_statefulset_revision_annotation() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.status = Some(Status {
            revision: 3,
            ..Default::default()
        });
        let annotations = build(&tenant)
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .annotations
            .unwrap();
        assert_eq!(annotations.get(REVISION_ANNOTATION).unwrap(), "3");
    }
}

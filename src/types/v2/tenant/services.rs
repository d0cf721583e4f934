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
use crate::types::v2::{
    CONSOLE_PORT, CONSOLE_TLS_PORT, MINIO_CI_SERVICE, MINIO_PORT, MINIO_PORT_NAME_HTTP,
    MINIO_PORT_NAME_HTTPS, MINIO_SERVICE_PORT_HTTP, MINIO_SERVICE_PORT_HTTPS,
};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr;
use std::collections::BTreeMap;

pub const CLUSTER_IP: &str = "ClusterIP";
pub const LOAD_BALANCER: &str = "LoadBalancer";

fn merged(
    base: BTreeMap<String, String>,
    extra: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut out = extra.cloned().unwrap_or_default();
    out.extend(base);
    out
}

impl Tenant {
    fn service_meta(
        &self,
        name: String,
        labels: Option<&BTreeMap<String, String>>,
        annotations: Option<&BTreeMap<String, String>>,
    ) -> metav1::ObjectMeta {
        metav1::ObjectMeta {
            name: Some(name),
            namespace: self.namespace().ok(),
            owner_references: Some(vec![self.new_owner_ref()]),
            labels: Some(merged(self.tenant_labels(), labels)),
            annotations: annotations.filter(|a| !a.is_empty()).cloned(),
            ..Default::default()
        }
    }

    fn minio_exposed(&self) -> bool {
        self.spec.expose_services.as_ref().is_some_and(|e| e.minio)
    }

    fn console_exposed(&self) -> bool {
        self.spec.expose_services.as_ref().is_some_and(|e| e.console)
    }

    /// The `minio` cluster-IP service fronting every pool.
    pub fn new_ci_service(&self) -> corev1::Service {
        let metadata = self.spec.service_metadata.as_ref();
        let (port, name) = if self.tls() {
            (MINIO_SERVICE_PORT_HTTPS, MINIO_PORT_NAME_HTTPS)
        } else {
            (MINIO_SERVICE_PORT_HTTP, MINIO_PORT_NAME_HTTP)
        };
        corev1::Service {
            metadata: self.service_meta(
                MINIO_CI_SERVICE.to_owned(),
                metadata.and_then(|m| m.minio_service_labels.as_ref()),
                metadata.and_then(|m| m.minio_service_annotations.as_ref()),
            ),
            spec: Some(corev1::ServiceSpec {
                type_: Some(if self.minio_exposed() { LOAD_BALANCER } else { CLUSTER_IP }.to_owned()),
                selector: Some(self.tenant_labels()),
                ports: Some(vec![corev1::ServicePort {
                    port,
                    target_port: Some(intstr::IntOrString::Int(MINIO_PORT)),
                    name: Some(name.to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn new_console_service(&self) -> corev1::Service {
        let metadata = self.spec.service_metadata.as_ref();
        let (port, name) = if self.tls() {
            (CONSOLE_TLS_PORT, "https-console")
        } else {
            (CONSOLE_PORT, "http-console")
        };
        corev1::Service {
            metadata: self.service_meta(
                self.console_name(),
                metadata.and_then(|m| m.console_service_labels.as_ref()),
                metadata.and_then(|m| m.console_service_annotations.as_ref()),
            ),
            spec: Some(corev1::ServiceSpec {
                type_: Some(if self.console_exposed() { LOAD_BALANCER } else { CLUSTER_IP }.to_owned()),
                selector: Some(self.tenant_labels()),
                ports: Some(vec![corev1::ServicePort {
                    port,
                    target_port: Some(intstr::IntOrString::Int(port)),
                    name: Some(name.to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Headless service giving every pod a stable DNS name.
    pub fn new_headless_service(&self) -> corev1::Service {
        let name = if self.tls() { MINIO_PORT_NAME_HTTPS } else { MINIO_PORT_NAME_HTTP };
        corev1::Service {
            metadata: self.service_meta(self.headless_service_name(), None, None),
            spec: Some(corev1::ServiceSpec {
                type_: Some(CLUSTER_IP.to_owned()),
                cluster_ip: Some("None".to_owned()),
                publish_not_ready_addresses: Some(true),
                selector: Some(self.tenant_labels()),
                ports: Some(vec![corev1::ServicePort {
                    port: MINIO_PORT,
                    name: Some(name.to_owned()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// `ExternalName` alias `<bucket>` -> `minio.<ns>.svc.<domain>` for bucket DNS.
    pub fn new_bucket_service(&self, bucket: &str, domain: &str) -> corev1::Service {
        corev1::Service {
            metadata: self.service_meta(bucket.to_owned(), None, None),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ExternalName".to_owned()),
                external_name: Some(self.service_fqdn(domain)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Applies the desired service spec onto `observed`, keeping the cluster-assigned
/// fields. Returns false when nothing changed. Type only widens to LoadBalancer.
pub fn merge_service(observed: &mut corev1::Service, desired: &corev1::Service) -> bool {
    let Some(desired_spec) = desired.spec.as_ref() else {
        return false;
    };
    let spec = observed.spec.get_or_insert_with(Default::default);
    let mut changed = false;

    let widen = desired_spec.type_.as_deref() == Some(LOAD_BALANCER)
        && spec.type_.as_deref() != Some(LOAD_BALANCER);
    if widen {
        spec.type_ = Some(LOAD_BALANCER.to_owned());
        changed = true;
    }

    if spec.selector != desired_spec.selector {
        spec.selector = desired_spec.selector.clone();
        changed = true;
    }

    let ports_match = match (&spec.ports, &desired_spec.ports) {
        (Some(observed), Some(desired)) => {
            observed.len() == desired.len()
                && observed.iter().zip(desired).all(|(o, d)| {
                    o.port == d.port && o.name == d.name && (d.target_port.is_none() || o.target_port == d.target_port)
                })
        }
        (None, None) => true,
        _ => false,
    };
    if !ports_match {
        let node_ports: BTreeMap<i32, i32> = spec
            .ports
            .iter()
            .flatten()
            .filter_map(|p| p.node_port.map(|np| (p.port, np)))
            .collect();
        spec.ports = desired_spec.ports.clone().map(|ports| {
            ports
                .into_iter()
                .map(|mut p| {
                    p.node_port = node_ports.get(&p.port).copied();
                    p
                })
                .collect()
        });
        changed = true;
    }

    for (observed_map, desired_map) in [
        (&mut observed.metadata.labels, &desired.metadata.labels),
        (&mut observed.metadata.annotations, &desired.metadata.annotations),
    ] {
        if let Some(desired_map) = desired_map {
            let target = observed_map.get_or_insert_with(Default::default);
            for (k, v) in desired_map {
                if target.get(k) != Some(v) {
                    target.insert(k.clone(), v.clone());
                    changed = true;
                }
            }
        }
    }

    changed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::v2::tenant::ExposeServices;

    #[test]
    fn test_ci_service() {
        let tenant = crate::tests::create_test_tenant();
        let svc = tenant.new_ci_service();
        assert_eq!(svc.metadata.name.as_deref(), Some("minio"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 443);
        assert_eq!(port.name.as_deref(), Some("https-minio"));
    }

    #[test]
    fn test_ci_service_plain_http() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.request_auto_cert = Some(false);
        let port = tenant.new_ci_service().spec.unwrap().ports.unwrap()[0].clone();
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(intstr::IntOrString::Int(9000)));
    }

    #[test]
    fn test_headless_service() {
        let tenant = crate::tests::create_test_tenant();
        let svc = tenant.new_headless_service();
        assert_eq!(svc.metadata.name.as_deref(), Some("acme-hl"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
    }

    #[test]
    fn test_merge_service_only_widens() {
        let mut tenant = crate::tests::create_test_tenant();
        let mut observed = tenant.new_ci_service();
        assert!(!merge_service(&mut observed, &tenant.new_ci_service()));

        tenant.spec.expose_services = Some(ExposeServices {
            minio: true,
            console: false,
        });
        assert!(merge_service(&mut observed, &tenant.new_ci_service()));
        assert_eq!(
            observed.spec.as_ref().unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );

        tenant.spec.expose_services = None;
        assert!(!merge_service(&mut observed, &tenant.new_ci_service()));
        assert_eq!(
            observed.spec.as_ref().unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );
    }

    #[test]
    fn test_merge_service_keeps_node_ports() {
        let mut tenant = crate::tests::create_test_tenant();
        let mut observed = tenant.new_ci_service();
        if let Some(ports) = observed.spec.as_mut().and_then(|s| s.ports.as_mut()) {
            ports[0].node_port = Some(30443);
        }
        tenant.spec.request_auto_cert = Some(false);
        assert!(merge_service(&mut observed, &tenant.new_ci_service()));
        let ports = observed.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].node_port, None);
    }

    #[test]
    fn test_bucket_service() {
        let tenant = crate::tests::create_test_tenant();
        let svc = tenant.new_bucket_service("photos", "cluster.local");
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(
            spec.external_name.as_deref(),
            Some("minio.t1.svc.cluster.local")
        );
    }
}

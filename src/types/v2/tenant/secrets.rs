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
use crate::types::v2::{
    OPERATOR_CA_SECRET, WEBHOOK_API_GETENV, WEBHOOK_ARGS_KEY, WEBHOOK_PASSWORD_KEY, WEBHOOK_SECRET,
    WEBHOOK_USERNAME_KEY,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

pub const TLS_CERT_KEY: &str = "public.crt";
pub const TLS_KEY_KEY: &str = "private.key";

fn bytes(entries: Vec<(&str, Vec<u8>)>) -> BTreeMap<String, ByteString> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_owned(), ByteString(v)))
        .collect()
}

impl Tenant {
    /// URL MinIO resolves its `env://` arguments from.
    pub fn webhook_args_url(&self, cfg: &OperatorConfig, username: &str, password: &str) -> String {
        let scheme = if cfg.tls_enabled { "env+tls" } else { "env" };
        format!(
            "{scheme}://{username}:{password}@{}:{}{WEBHOOK_API_GETENV}/{}/{}",
            cfg.operator_fqdn(),
            crate::config::WEBHOOK_PORT,
            self.namespace().unwrap_or_default(),
            self.name()
        )
    }

    pub fn new_webhook_secret(&self, cfg: &OperatorConfig, username: &str, password: &str) -> corev1::Secret {
        corev1::Secret {
            metadata: metav1::ObjectMeta {
                name: Some(WEBHOOK_SECRET.to_owned()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                ..Default::default()
            },
            type_: Some("Opaque".to_owned()),
            data: Some(bytes(vec![
                (WEBHOOK_USERNAME_KEY, username.as_bytes().to_vec()),
                (WEBHOOK_PASSWORD_KEY, password.as_bytes().to_vec()),
                (
                    WEBHOOK_ARGS_KEY,
                    self.webhook_args_url(cfg, username, password).into_bytes(),
                ),
            ])),
            ..Default::default()
        }
    }

    /// Opaque secret holding an issued key pair in MinIO's file layout.
    pub fn new_tls_secret(&self, name: String, private_key_pem: &[u8], certificate_pem: &[u8]) -> corev1::Secret {
        corev1::Secret {
            metadata: metav1::ObjectMeta {
                name: Some(name),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                labels: Some(self.tenant_labels()),
                ..Default::default()
            },
            type_: Some("Opaque".to_owned()),
            data: Some(bytes(vec![
                (TLS_KEY_KEY, private_key_pem.to_vec()),
                (TLS_CERT_KEY, certificate_pem.to_vec()),
            ])),
            ..Default::default()
        }
    }

    /// Copy of the operator CA in the tenant namespace, trusted by MinIO pods.
    pub fn new_operator_ca_secret(&self, ca_pem: &[u8]) -> corev1::Secret {
        corev1::Secret {
            metadata: metav1::ObjectMeta {
                name: Some(OPERATOR_CA_SECRET.to_owned()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![self.new_owner_ref()]),
                ..Default::default()
            },
            type_: Some("Opaque".to_owned()),
            data: Some(bytes(vec![(TLS_CERT_KEY, ca_pem.to_vec())])),
            ..Default::default()
        }
    }
}

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

use k8s_openapi::api::core::v1 as corev1;
use kube::KubeSchema;
use serde::{Deserialize, Serialize};

/// A secret holding a certificate, plus the secret type deciding its key names.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
pub struct LocalCertificateReference {
    pub name: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Subject used for auto-generated certificates.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organization_name: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
}

/// Key names used inside a certificate secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecretKeys {
    pub cert: &'static str,
    pub key: &'static str,
    pub ca: &'static str,
}

const TLS_KEYS: SecretKeys = SecretKeys {
    cert: "tls.crt",
    key: "tls.key",
    ca: "ca.crt",
};

const MINIO_KEYS: SecretKeys = SecretKeys {
    cert: "public.crt",
    key: "private.key",
    ca: "public.crt",
};

/// `kubernetes.io/tls` and cert-manager secrets use `tls.*`; everything else
/// uses the `public.crt`/`private.key` layout.
pub fn secret_keys(secret_type: Option<&str>) -> SecretKeys {
    match secret_type {
        Some("kubernetes.io/tls") | Some("cert-manager.io/v1alpha2") | Some("cert-manager.io/v1") => {
            TLS_KEYS
        }
        _ => MINIO_KEYS,
    }
}

pub fn secret_keys_for(secret: &corev1::Secret) -> SecretKeys {
    secret_keys(secret.type_.as_deref())
}

/// Returns the bytes of `key` in `secret`, if any.
pub fn secret_bytes<'a>(secret: &'a corev1::Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_keys_by_type() {
        assert_eq!(secret_keys(Some("kubernetes.io/tls")).cert, "tls.crt");
        assert_eq!(secret_keys(Some("cert-manager.io/v1")).ca, "ca.crt");
        assert_eq!(secret_keys(Some("Opaque")).cert, "public.crt");
        assert_eq!(secret_keys(None).key, "private.key");
    }
}

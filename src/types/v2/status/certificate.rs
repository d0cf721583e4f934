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

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cert_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_certificates: Option<CustomCertificates>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomCertificates {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minio: Vec<CustomCertificateConfig>,

    #[serde(default, rename = "minioCAs", skip_serializing_if = "Vec::is_empty")]
    pub minio_cas: Vec<CustomCertificateConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client: Vec<CustomCertificateConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomCertificateConfig {
    pub cert_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,

    pub expiry: String,

    pub expires_in: String,

    pub serial_no: String,
}

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

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::Display;

/// Values written to `status.currentState`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum State {
    #[strum(to_string = "Initialized")]
    Initialized,

    #[strum(to_string = "Tenant credentials are not set properly")]
    MissingCreds,

    #[strum(to_string = "Provisioning MinIO Cluster IP Service")]
    ProvisioningCIService,

    #[strum(to_string = "Provisioning Console Service")]
    ProvisioningConsoleService,

    #[strum(to_string = "Provisioning MinIO Headless Service")]
    ProvisioningHLService,

    #[strum(to_string = "Provisioning MinIO Statefulset")]
    ProvisioningStatefulSet,

    #[strum(to_string = "Provisioning KES StatefulSet")]
    ProvisioningKesStatefulSet,

    #[strum(to_string = "Provisioning Prometheus")]
    ProvisioningPrometheus,

    #[strum(to_string = "Provisioning Log Search")]
    ProvisioningLogSearch,

    #[strum(to_string = "Updating MinIO Version")]
    UpdatingMinIOVersion,

    #[strum(to_string = "Updating KES")]
    UpdatingKes,

    #[strum(to_string = "Updating Pool")]
    UpdatingPool,

    #[strum(to_string = "Updating Services")]
    UpdatingServices,

    #[strum(to_string = "Restarting MinIO")]
    Restarting,

    #[strum(to_string = "Waiting for MinIO TLS Certificate")]
    WaitingForTls,

    #[strum(to_string = "Waiting for MinIO TLS Client Certificate")]
    WaitingForClientTls,

    #[strum(to_string = "Waiting for KES TLS Certificate")]
    WaitingForKesTls,

    #[strum(to_string = "Waiting for Pods to be ready")]
    WaitingForReady,

    #[strum(to_string = "Waiting for Log Search")]
    WaitingForLogSearch,

    #[strum(to_string = "Frozen")]
    Frozen,

    #[strum(to_string = "StatefulSet not controlled by operator")]
    NotOwned,

    #[strum(to_string = "Pool Decommissioning Not Allowed")]
    DecommissioningNotAllowed,

    #[strum(to_string = "Another MinIO Tenant already exists in the namespace")]
    AlreadyExists,

    #[strum(to_string = "Different versions across MinIO Pools")]
    InconsistentMinIOVersions,

    #[strum(to_string = "Failed to provision TLS certificate")]
    FailedCsr,
}

impl State {
    pub fn is(&self, current: &str) -> bool {
        self.to_string() == current
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[strum(to_string = "green")]
    Green,

    #[strum(to_string = "yellow")]
    Yellow,

    #[strum(to_string = "red")]
    Red,
}

impl JsonSchema for HealthStatus {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("HealthStatus")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "HealthStatus"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "string",
            "enum": ["green", "yellow", "red"]
        })
    }
}

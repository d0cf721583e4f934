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

pub mod certificate;
pub mod pool;
pub mod state;

use kube::KubeSchema;
use serde::{Deserialize, Serialize};

/// Tenant status. Only the controllers write it.
#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub current_state: String,

    #[serde(default)]
    pub available_replicas: i32,

    /// Bumped to force a rolling restart of every pool.
    #[serde(default)]
    pub revision: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sync_version: String,

    #[serde(default)]
    pub certificates: certificate::Status,

    #[serde(default)]
    pub pools: Vec<pool::Pool>,

    #[serde(default)]
    pub write_quorum: i32,

    #[serde(default)]
    pub drives_online: i32,

    #[serde(default)]
    pub drives_offline: i32,

    #[serde(default)]
    pub drives_healing: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<state::HealthStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_message: Option<String>,

    /// RFC3339 time of the last expansion restart, cleared once the cluster is healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_on_ready: Option<String>,

    #[serde(default)]
    pub provisioned_users: bool,

    #[serde(default)]
    pub provisioned_buckets: bool,
}

impl Status {
    pub fn any_pool_initialized(&self) -> bool {
        self.pools
            .iter()
            .any(|p| p.state == pool::PoolState::Initialized)
    }
}

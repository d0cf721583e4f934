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

use kube::KubeSchema;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::Display;

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// StatefulSet name captured when the pool was first seen. Never recomputed.
    pub ss_name: String,

    pub state: PoolState,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub legacy_security_context: bool,
}

impl Pool {
    pub fn new(ss_name: String) -> Self {
        Self {
            ss_name,
            state: PoolState::NotCreated,
            legacy_security_context: false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum PoolState {
    #[serde(rename = "PoolNotCreated")]
    #[strum(serialize = "PoolNotCreated")]
    NotCreated,

    #[serde(rename = "PoolCreated")]
    #[strum(serialize = "PoolCreated")]
    Created,

    #[serde(rename = "PoolInitialized")]
    #[strum(serialize = "PoolInitialized")]
    Initialized,
}

impl JsonSchema for PoolState {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("PoolState")
    }
    fn schema_id() -> Cow<'static, str> {
        Cow::Borrowed(concat!(module_path!(), "::", "PoolState"))
    }
    fn json_schema(_generator: &mut SchemaGenerator) -> Schema {
        json_schema! {
            {"type": "string"}
        }
    }
}

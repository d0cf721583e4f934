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

use kube::{CustomResource, KubeSchema};
use serde::{Deserialize, Serialize};

/// Grants the policies listed here to one service account, for STS requests
/// against the tenant living in the binding's namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq)]
#[kube(
    group = "sts.min.io",
    version = "v1alpha1",
    kind = "PolicyBinding",
    namespaced,
    status = "PolicyBindingStatus",
    shortname = "policybinding",
    plural = "policybindings",
    singular = "policybinding",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.currentState"}"#,
    printcolumn = r#"{"name":"Authorizations", "type":"integer", "jsonPath":".status.usage.authorizations"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBindingSpec {
    pub application: Application,

    #[serde(default)]
    pub policies: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub namespace: String,

    #[serde(rename = "serviceaccount")]
    pub service_account: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBindingStatus {
    #[serde(default)]
    pub current_state: String,

    #[serde(default)]
    pub usage: Usage,
}

#[derive(Deserialize, Serialize, Clone, Debug, KubeSchema, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub authorizations: i64,
}

impl PolicyBinding {
    pub fn applies_to(&self, namespace: &str, service_account: &str) -> bool {
        self.spec.application.namespace == namespace
            && self.spec.application.service_account == service_account
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_policy_binding_shape() {
        let binding: PolicyBinding = serde_json::from_value(serde_json::json!({
            "apiVersion": "sts.min.io/v1alpha1",
            "kind": "PolicyBinding",
            "metadata": {"name": "robot", "namespace": "t1"},
            "spec": {
                "application": {"namespace": "app", "serviceaccount": "robot"},
                "policies": ["readonly"]
            }
        }))
        .unwrap();

        assert!(binding.applies_to("app", "robot"));
        assert!(!binding.applies_to("app", "other"));
        assert_eq!(binding.spec.policies, vec!["readonly"]);
    }

    #[test]
    fn test_policy_binding_crd() {
        let crd = PolicyBinding::crd();
        assert_eq!(crd.spec.group, "sts.min.io");
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}

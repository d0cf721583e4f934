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
use crate::types::v2::pool::Pool;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

fn invalid(msg: impl Into<String>) -> types::error::Error {
    types::error::Error::Validation { msg: msg.into() }
}

fn valid_tenant_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Parses the numeric prefix of a quantity such as `10Gi` or `0.5Ti`.
fn quantity_is_positive(q: &Quantity) -> bool {
    let digits: String = q
        .0
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse::<f64>().is_ok_and(|v| v > 0.0)
}

impl Pool {
    pub fn validate(&self, index: usize) -> Result<(), types::error::Error> {
        if self.servers <= 0 {
            return Err(invalid(format!("pool #{index} cannot have 0 servers")));
        }
        if self.volumes_per_server <= 0 {
            return Err(invalid(format!(
                "pool #{index} cannot have 0 volumes per server"
            )));
        }
        if self.servers == 1 && self.volumes_per_server < 4 && self.volumes_per_server != 1 {
            return Err(invalid(format!(
                "pool #{index} setup must have a minimum of 4 volumes per server"
            )));
        }
        if (self.servers == 2 || self.servers == 3) && self.volumes_per_server < 2 {
            return Err(invalid(format!(
                "pool #{index} setup must have a minimum of 2 volumes per server"
            )));
        }

        let spec = self
            .volume_claim_template
            .spec
            .as_ref()
            .ok_or_else(|| invalid("a volume claim template must be specified"))?;
        let storage = spec
            .resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .ok_or_else(|| invalid("volume claim template must specify resource storage request"))?;
        if !quantity_is_positive(storage) {
            return Err(invalid("volume size must be greater than 0"));
        }
        if spec.access_modes.as_ref().is_none_or(Vec::is_empty) {
            return Err(invalid("volume access mode must be specified"));
        }
        Ok(())
    }
}

impl Tenant {
    /// Structural checks run after defaulting. Failures are not retried.
    pub fn validate(&self) -> Result<(), types::error::Error> {
        if !valid_tenant_name(&self.name()) {
            return Err(invalid(
                "tenant name must be 3 to 63 characters of lowercase letters, digits or '-'",
            ));
        }
        if self.spec.pools.is_empty() {
            return Err(invalid("pools must be configured"));
        }
        let has_creds = self
            .spec
            .creds_secret
            .as_ref()
            .is_some_and(|s| !s.name.is_empty())
            || self
                .spec
                .configuration
                .as_ref()
                .is_some_and(|s| !s.name.is_empty());
        if !has_creds {
            return Err(invalid(
                "please set credsSecret secret with credentials for Tenant",
            ));
        }
        for (i, pool) in self.spec.pools.iter().enumerate() {
            pool.validate(i)?;
        }

        let mut names: Vec<&str> = self.spec.pools.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(invalid("pool names must be unique"));
        }

        if let Some(kes) = &self.spec.kes
            && kes.kes_secret.name.is_empty()
        {
            return Err(invalid("kes.kesSecret must reference the KES configuration"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::config::OperatorConfig;

    fn validated(mutate: impl FnOnce(&mut crate::types::v2::tenant::Tenant)) -> Result<(), String> {
        let mut tenant = crate::tests::create_test_tenant();
        mutate(&mut tenant);
        tenant.ensure_defaults(&OperatorConfig::default());
        tenant.validate().map_err(|e| e.to_string())
    }

    #[test]
    fn test_valid_tenant() {
        assert!(validated(|_| {}).is_ok());
    }

    #[test]
    fn test_rejects_small_volume_counts() {
        let err = validated(|t| {
            t.spec.pools[0].servers = 1;
            t.spec.pools[0].volumes_per_server = 2;
        })
        .unwrap_err();
        assert!(err.contains("pool #0 setup must have a minimum of 4 volumes per server"));

        let err = validated(|t| {
            t.spec.pools[0].servers = 3;
            t.spec.pools[0].volumes_per_server = 1;
        })
        .unwrap_err();
        assert!(err.contains("minimum of 2 volumes per server"));

        assert!(validated(|t| {
            t.spec.pools[0].servers = 1;
            t.spec.pools[0].volumes_per_server = 1;
        })
        .is_ok());
    }

    #[test]
    fn test_rejects_zero_servers() {
        let err = validated(|t| t.spec.pools[0].servers = 0).unwrap_err();
        assert!(err.contains("pool #0 cannot have 0 servers"));
    }

    #[test]
    fn test_rejects_bad_volume_claim_template() {
        let err = validated(|t| t.spec.pools[0].volume_claim_template.spec = None).unwrap_err();
        assert!(err.contains("a volume claim template must be specified"));

        let err = validated(|t| {
            t.spec.pools[0].volume_claim_template = crate::tests::create_test_volume_claim("0Gi")
        })
        .unwrap_err();
        assert!(err.contains("volume size must be greater than 0"));

        let err = validated(|t| {
            if let Some(spec) = t.spec.pools[0].volume_claim_template.spec.as_mut() {
                spec.access_modes = None;
            }
        })
        .unwrap_err();
        assert!(err.contains("volume access mode must be specified"));
    }

    #[test]
    fn test_rejects_missing_credentials_and_bad_name() {
        let err = validated(|t| t.spec.creds_secret = None).unwrap_err();
        assert!(err.contains("credsSecret"));

        let err = validated(|t| t.metadata.name = Some("Acme_Store".to_owned())).unwrap_err();
        assert!(err.contains("tenant name"));
    }

    #[test]
    fn test_rejects_duplicate_pool_names() {
        let err = validated(|t| {
            t.spec
                .pools
                .push(crate::tests::create_test_pool("p0", 4, 4))
        })
        .unwrap_err();
        assert!(err.contains("unique"));
    }
}

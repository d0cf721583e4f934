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

use super::certificate::secret_bytes;
use super::tenant::Tenant;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

pub const CONFIG_ENV_KEY: &str = "config.env";
pub const CREDS_ACCESS_KEY: &str = "accesskey";
pub const CREDS_SECRET_KEY: &str = "secretkey";
pub const ROOT_USER: &str = "MINIO_ROOT_USER";
pub const ROOT_PASSWORD: &str = "MINIO_ROOT_PASSWORD";
const LEGACY_ACCESS_KEY: &str = "MINIO_ACCESS_KEY";
const LEGACY_SECRET_KEY: &str = "MINIO_SECRET_KEY";

/// Effective environment of a tenant, merged as `env < credsSecret < configuration`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantConfiguration {
    pub vars: BTreeMap<String, String>,
    /// Keys defined by the configuration file. The pod spec must not repeat them.
    pub skip_env_vars: BTreeSet<String>,
}

impl TenantConfiguration {
    pub fn compose(
        tenant: &Tenant,
        creds: Option<&corev1::Secret>,
        configuration: Option<&corev1::Secret>,
    ) -> Self {
        let mut vars = BTreeMap::new();

        for env in &tenant.spec.env {
            if let Some(value) = &env.value {
                vars.insert(env.name.clone(), value.clone());
            }
        }

        if let Some(secret) = creds {
            for (key, name) in [(CREDS_ACCESS_KEY, ROOT_USER), (CREDS_SECRET_KEY, ROOT_PASSWORD)] {
                if let Some(value) = secret_bytes(secret, key) {
                    vars.insert(name.to_owned(), String::from_utf8_lossy(value).into_owned());
                }
            }
        }

        let mut skip_env_vars = BTreeSet::new();
        if let Some(content) = configuration.and_then(|s| secret_bytes(s, CONFIG_ENV_KEY)) {
            for (key, value) in parse_config_env(&String::from_utf8_lossy(content)) {
                skip_env_vars.insert(key.clone());
                vars.insert(key, value);
            }
        }

        Self {
            vars,
            skip_env_vars,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Root access and secret key, accepting the legacy variable names.
    pub fn root_credentials(&self) -> Option<(String, String)> {
        let user = self.get(ROOT_USER).or_else(|| self.get(LEGACY_ACCESS_KEY))?;
        let password = self
            .get(ROOT_PASSWORD)
            .or_else(|| self.get(LEGACY_SECRET_KEY))?;
        if user.is_empty() || password.is_empty() {
            return None;
        }
        Some((user.to_owned(), password.to_owned()))
    }
}

/// Parses `export KEY="value"` lines. Anything else is ignored.
pub fn parse_config_env(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let Some(assignment) = line.trim().strip_prefix("export ") else {
            continue;
        };
        let Some((name, raw)) = assignment.split_once('=') else {
            continue;
        };
        let name = name.trim();
        match unquote(raw.trim()) {
            Some(value) => {
                vars.insert(name.to_owned(), value);
            }
            None => warn!(variable = %name, "syntax error in config.env, skipped"),
        }
    }
    vars
}

fn unquote(raw: &str) -> Option<String> {
    if let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
    {
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    other => out.push(other),
                },
                '"' => return None,
                c => out.push(c),
            }
        }
        return Some(out);
    }
    if let Some(inner) = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
    {
        return Some(inner.to_owned());
    }
    if raw.contains(char::is_whitespace) || raw.contains('"') {
        return None;
    }
    Some(raw.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn secret(data: &[(&str, &str)]) -> corev1::Secret {
        corev1::Secret {
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_config_env() {
        let vars = parse_config_env(
            "export MINIO_ROOT_USER=\"minio\"\n# comment\nexport MINIO_BROWSER=off\nexport BAD=\"a\" b\"\nMINIO_X=1\n",
        );
        assert_eq!(vars.get("MINIO_ROOT_USER").unwrap(), "minio");
        assert_eq!(vars.get("MINIO_BROWSER").unwrap(), "off");
        assert!(!vars.contains_key("BAD"));
        assert!(!vars.contains_key("MINIO_X"));
    }

    #[test]
    fn test_compose_precedence() {
        let mut tenant = crate::tests::create_test_tenant();
        tenant.spec.env = vec![
            corev1::EnvVar {
                name: ROOT_USER.to_owned(),
                value: Some("from-env".to_owned()),
                ..Default::default()
            },
            corev1::EnvVar {
                name: "MINIO_STORAGE_CLASS_STANDARD".to_owned(),
                value: Some("EC:2".to_owned()),
                ..Default::default()
            },
        ];
        let creds = secret(&[("accesskey", "from-creds"), ("secretkey", "pw-creds")]);
        let config = secret(&[("config.env", "export MINIO_ROOT_PASSWORD=\"pw-config\"\n")]);

        let composed = TenantConfiguration::compose(&tenant, Some(&creds), Some(&config));
        assert_eq!(composed.get(ROOT_USER), Some("from-creds"));
        assert_eq!(composed.get(ROOT_PASSWORD), Some("pw-config"));
        assert_eq!(composed.get("MINIO_STORAGE_CLASS_STANDARD"), Some("EC:2"));
        assert!(composed.skip_env_vars.contains(ROOT_PASSWORD));
        assert!(!composed.skip_env_vars.contains(ROOT_USER));
        assert_eq!(
            composed.root_credentials(),
            Some(("from-creds".to_owned(), "pw-config".to_owned()))
        );
    }

    #[test]
    fn test_root_credentials_accept_legacy_names() {
        let tenant = crate::tests::create_test_tenant();
        let config = secret(&[(
            "config.env",
            "export MINIO_ACCESS_KEY=\"ak\"\nexport MINIO_SECRET_KEY=\"sk\"\n",
        )]);
        let composed = TenantConfiguration::compose(&tenant, None, Some(&config));
        assert_eq!(
            composed.root_credentials(),
            Some(("ak".to_owned(), "sk".to_owned()))
        );

        let empty = TenantConfiguration::compose(&tenant, None, None);
        assert_eq!(empty.root_credentials(), None);
    }
}

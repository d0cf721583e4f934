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

//! DNS names derived from a tenant: pod hosts in ellipsis form, certificate
//! SANs and the arguments MinIO receives through `MINIO_ARGS`.

use super::Tenant;
use crate::types;
use crate::types::v2::MINIO_CI_SERVICE;
use crate::types::v2::pool::Pool;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static TEMPLATE_FIELD: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}"));

/// `{start...end}` as understood by MinIO's endpoint expansion.
pub fn ellipsis(start: i32, end: i32) -> String {
    format!("{{{start}...{end}}}")
}

struct TemplateValues<'a> {
    stateful_set: &'a str,
    ci_service: &'a str,
    hl_service: &'a str,
    ellipsis: &'a str,
    domain: &'a str,
    namespace: &'a str,
}

/// Renders the `{{.Field}}` subset of Go templates used by `--hosts-template`.
fn render_template(template: &str, values: &TemplateValues<'_>) -> Result<String, types::error::Error> {
    let re = TEMPLATE_FIELD
        .as_ref()
        .map_err(|e| types::error::Error::HostsTemplate { msg: e.to_string() })?;

    let mut unknown = None;
    let out = re.replace_all(template, |caps: &Captures<'_>| {
        match &caps[1] {
            "StatefulSet" => values.stateful_set,
            "CIService" => values.ci_service,
            "HLService" => values.hl_service,
            "Ellipsis" => values.ellipsis,
            "Domain" => values.domain,
            "Namespace" => values.namespace,
            other => {
                unknown = Some(other.to_owned());
                ""
            }
        }
        .to_owned()
    });

    if let Some(field) = unknown {
        return Err(types::error::Error::HostsTemplate {
            msg: format!("unknown field .{field}"),
        });
    }
    if out.contains("{{") {
        return Err(types::error::Error::HostsTemplate {
            msg: "unsupported template action".to_owned(),
        });
    }
    Ok(out.into_owned())
}

impl Tenant {
    /// One ellipsis host per pool: `<ss>-{0...N-1}.<hl>.<ns>.svc.<domain>`.
    pub fn minio_hosts(&self, domain: &str) -> Vec<String> {
        self.spec
            .pools
            .iter()
            .enumerate()
            .map(|(i, pool)| {
                let ss_name = self
                    .pool_ss_name(i)
                    .unwrap_or_else(|| self.pool_statefulset_name(pool));
                let ordinals = if pool.servers == 1 {
                    "0".to_owned()
                } else {
                    ellipsis(0, pool.servers - 1)
                };
                format!(
                    "{}-{}.{}",
                    ss_name,
                    ordinals,
                    self.headless_service_host(domain)
                )
            })
            .collect()
    }

    /// Hosts rendered through the operator's hosts template. The ellipsis
    /// counts pods across pools, so pool `n` continues where pool `n-1` ended.
    pub fn templated_minio_hosts(
        &self,
        template: &str,
        domain: &str,
    ) -> Result<Vec<String>, types::error::Error> {
        let namespace = self.namespace()?;
        let hl_service = self.headless_service_name();
        let mut hosts = Vec::with_capacity(self.spec.pools.len());
        let mut index = 0;
        for (i, pool) in self.spec.pools.iter().enumerate() {
            let max = index + pool.servers;
            let ss_name = self
                .pool_ss_name(i)
                .unwrap_or_else(|| self.pool_statefulset_name(pool));
            let range = ellipsis(index, max - 1);
            hosts.push(render_template(
                template,
                &TemplateValues {
                    stateful_set: &ss_name,
                    ci_service: MINIO_CI_SERVICE,
                    hl_service: &hl_service,
                    ellipsis: &range,
                    domain,
                    namespace: &namespace,
                },
            )?);
            index = max;
        }
        Ok(hosts)
    }

    /// Hosts used for pool endpoints, honouring the hosts template when set.
    pub fn pool_hosts(
        &self,
        hosts_template: Option<&str>,
        domain: &str,
    ) -> Result<Vec<String>, types::error::Error> {
        match hosts_template {
            Some(template) => self.templated_minio_hosts(template, domain),
            None => Ok(self.minio_hosts(domain)),
        }
    }

    /// Service level names covered by the server certificate.
    pub fn all_minio_hosts(&self, domain: &str) -> Vec<String> {
        let namespace = self.namespace().unwrap_or_default();
        vec![
            self.service_fqdn(domain),
            format!("{MINIO_CI_SERVICE}.{namespace}"),
            format!("{MINIO_CI_SERVICE}.{namespace}.svc"),
            self.wildcard_name(domain),
        ]
    }

    /// SANs requested for the tenant's server certificate.
    pub fn certificate_hosts(
        &self,
        hosts_template: Option<&str>,
        domain: &str,
    ) -> Result<Vec<String>, types::error::Error> {
        let mut hosts = self.pool_hosts(hosts_template, domain)?;
        hosts.extend(self.all_minio_hosts(domain));
        if self.bucket_dns() {
            hosts.push(format!("*.{}", self.service_fqdn(domain)));
        }
        hosts.dedup();
        Ok(hosts)
    }

    /// `/<mount>{0...V-1}/<subpath>`, or `/<mount>/<subpath>` for a single volume.
    pub fn volume_path_for_pool(&self, pool: &Pool) -> String {
        let mount = self.mount_path().trim_end_matches('/');
        let sub_path = self
            .spec
            .sub_path
            .as_deref()
            .unwrap_or_default()
            .trim_matches('/');
        let base = if pool.volumes_per_server == 1 {
            mount.to_owned()
        } else {
            format!("{mount}{}", ellipsis(0, pool.volumes_per_server - 1))
        };
        if sub_path.is_empty() {
            base
        } else {
            format!("{base}/{sub_path}")
        }
    }

    /// Arguments MinIO resolves from `MINIO_ARGS` at boot.
    pub fn minio_args(
        &self,
        hosts_template: Option<&str>,
        domain: &str,
    ) -> Result<Vec<String>, types::error::Error> {
        if let [pool] = self.spec.pools.as_slice()
            && pool.servers == 1
        {
            return Ok(vec![self.volume_path_for_pool(pool)]);
        }

        let hosts = self.pool_hosts(hosts_template, domain)?;
        Ok(hosts
            .iter()
            .zip(&self.spec.pools)
            .map(|(host, pool)| {
                format!("{}://{}{}", self.scheme(), host, self.volume_path_for_pool(pool))
            })
            .collect())
    }
}

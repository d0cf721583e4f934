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

//! `GET /webhook/v1/getenv/{namespace}/{name}?key=` serves environment values
//! a tenant pod resolves at start-up.

use super::AppState;
use super::auth::authorize;
use super::error::{self, Result};
use crate::config::OperatorConfig;
use crate::types::v2::tenant::Tenant;
use crate::types::v2::tenant::workloads::BUCKET_DNS_ENV;
use crate::types::v2::WEBHOOK_ARGS_KEY;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

#[derive(Debug, Deserialize)]
pub struct GetEnvQuery {
    #[serde(default)]
    key: String,
}

/// Value of `key` for `tenant`.
pub fn lookup(cfg: &OperatorConfig, tenant: &Tenant, namespace: &str, key: &str) -> Result<String> {
    match key {
        WEBHOOK_ARGS_KEY => {
            let args = tenant
                .minio_args(cfg.hosts_template.as_deref(), &cfg.cluster_domain)
                .map_err(|e| error::Error::InternalServer {
                    message: e.to_string(),
                })?;
            Ok(args.join(" "))
        }
        BUCKET_DNS_ENV => Ok(cfg.bucket_service_url(namespace, &tenant.name())),
        _ => error::BadRequestSnafu {
            message: format!("unsupported key '{key}'"),
        }
        .fail(),
    }
}

pub async fn get_env(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<GetEnvQuery>,
    headers: HeaderMap,
) -> Result<String> {
    authorize(&state, &headers, &namespace).await?;
    let tenant = state
        .directory
        .tenant(&namespace, &name)
        .await
        .context(error::KubeApiSnafu)?
        .context(error::NotFoundSnafu {
            resource: format!("tenant {namespace}/{name}"),
        })?;
    lookup(&state.config, &tenant, &namespace, &query.key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let cfg = OperatorConfig::default();
        let tenant = crate::tests::create_test_tenant();

        let args = lookup(&cfg, &tenant, "default", WEBHOOK_ARGS_KEY).unwrap();
        assert!(args.contains(".svc.cluster.local"));
        assert!(!args.contains('\n'));

        let dns = lookup(&cfg, &tenant, "default", BUCKET_DNS_ENV).unwrap();
        assert_eq!(
            dns,
            format!(
                "https://operator.{}.svc.cluster.local:4222/webhook/v1/bucketsrv/default/{}",
                cfg.namespace,
                tenant.name()
            )
        );

        assert!(matches!(
            lookup(&cfg, &tenant, "default", "PATH"),
            Err(error::Error::BadRequest { .. })
        ));
    }
}

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

//! Bucket DNS: one `ExternalName` service per bucket, pointing at the tenant's
//! primary service.

use super::AppState;
use super::auth::authorize;
use super::error::{self, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, ensure};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct BucketQuery {
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    delete: bool,
}

/// Service names are DNS labels, so dotted bucket names cannot be exposed.
pub fn validate_bucket(bucket: &str) -> Result<()> {
    ensure!(
        !bucket.is_empty(),
        error::BadRequestSnafu {
            message: "missing bucket name"
        }
    );
    ensure!(
        !bucket.contains('.'),
        error::BadRequestSnafu {
            message: format!("bucket name '{bucket}' contains '.'")
        }
    );
    Ok(())
}

pub async fn bucket_service(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<BucketQuery>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    authorize(&state, &headers, &namespace).await?;

    if query.delete {
        state
            .directory
            .delete_service(&namespace, &query.bucket)
            .await
            .context(error::KubeApiSnafu)?;
        info!(namespace = %namespace, bucket = %query.bucket, "bucket service deleted");
        return Ok(StatusCode::OK);
    }

    validate_bucket(&query.bucket)?;
    let tenant = state
        .directory
        .tenant(&namespace, &name)
        .await
        .context(error::KubeApiSnafu)?
        .context(error::NotFoundSnafu {
            resource: format!("tenant {namespace}/{name}"),
        })?;
    let service = tenant.new_bucket_service(&query.bucket, &state.config.cluster_domain);
    state
        .directory
        .create_service(&namespace, &service)
        .await
        .context(error::KubeApiSnafu)?;
    info!(namespace = %namespace, tenant = %name, bucket = %query.bucket, "bucket service created");
    Ok(StatusCode::OK)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bucket() {
        assert!(validate_bucket("photos").is_ok());
        assert!(validate_bucket("my.photos").is_err());
        assert!(validate_bucket("").is_err());
    }
}

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

//! Bearer JWT check for tenant pod callbacks. Tokens are HS256, signed with
//! the namespace's webhook password and issued by its webhook username.

use super::AppState;
use super::error::{self, Error, Result};
use crate::types::v2::certificate::secret_bytes;
use crate::types::v2::{WEBHOOK_PASSWORD_KEY, WEBHOOK_SECRET, WEBHOOK_USERNAME_KEY};
use axum::http::{HeaderMap, header};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use k8s_openapi::api::core::v1 as corev1;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    #[allow(dead_code)]
    sub: Option<String>,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Checks `token` against the webhook credentials stored in `secret`.
pub fn verify(token: &str, secret: &corev1::Secret) -> Result<()> {
    let username = secret_bytes(secret, WEBHOOK_USERNAME_KEY)
        .map(String::from_utf8_lossy)
        .context(error::ForbiddenSnafu {
            message: "webhook credentials are incomplete",
        })?;
    let password = secret_bytes(secret, WEBHOOK_PASSWORD_KEY).context(error::ForbiddenSnafu {
        message: "webhook credentials are incomplete",
    })?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = HashSet::new();
    validation.validate_aud = false;
    validation.set_issuer(&[username.to_string()]);

    decode::<Claims>(token, &DecodingKey::from_secret(password), &validation).context(error::JwtSnafu)?;
    Ok(())
}

/// Authorizes a callback from a pod in `namespace`.
pub async fn authorize(state: &AppState, headers: &HeaderMap, namespace: &str) -> Result<()> {
    let token = bearer_token(headers).context(error::ForbiddenSnafu {
        message: "missing bearer token",
    })?;
    let secret = state
        .directory
        .secret(namespace, WEBHOOK_SECRET)
        .await
        .context(error::KubeApiSnafu)?
        .ok_or_else(|| Error::Forbidden {
            message: "no webhook credentials in namespace".to_owned(),
        })?;
    verify(token, &secret).inspect_err(|e| {
        tracing::warn!(namespace = %namespace, error = %e, "rejected webhook callback");
    })
}

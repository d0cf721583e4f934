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

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use snafu::Snafu;

/// Errors of the webhook endpoints.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unauthorized: {}", message))]
    Unauthorized { message: String },

    #[snafu(display("Forbidden: {}", message))]
    Forbidden { message: String },

    #[snafu(display("Not found: {}", resource))]
    NotFound { resource: String },

    #[snafu(display("Bad request: {}", message))]
    BadRequest { message: String },

    #[snafu(display("Internal server error: {}", message))]
    InternalServer { message: String },

    #[snafu(display("Kubernetes API error: {}", source))]
    KubeApi { source: crate::context::Error },

    #[snafu(display("JWT error: {}", source))]
    Jwt { source: jsonwebtoken::errors::Error },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Unauthorized { message } => (StatusCode::UNAUTHORIZED, "Unauthorized", message.clone()),
            Error::Forbidden { message } => (StatusCode::FORBIDDEN, "Forbidden", message.clone()),
            Error::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                "NotFound",
                format!("Resource not found: {resource}"),
            ),
            Error::BadRequest { message } => (StatusCode::BAD_REQUEST, "BadRequest", message.clone()),
            Error::InternalServer { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                message.clone(),
            ),
            Error::KubeApi { source } => {
                tracing::warn!(error = %source, "webhook request failed on the Kubernetes API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "KubeApiError",
                    "Kubernetes API error".to_owned(),
                )
            }
            // never echo token validation details
            Error::Jwt { .. } => (
                StatusCode::FORBIDDEN,
                "JwtError",
                "Invalid or expired token".to_owned(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_owned(),
            message,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

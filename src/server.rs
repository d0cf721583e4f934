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

//! The operator's HTTP(S) endpoints on port 4222: pod callbacks, update
//! artifacts, CRD conversion and STS.

use crate::admin::AdminConnector;
use crate::artifacts::UPDATE_DIR;
use crate::config::{OperatorConfig, WEBHOOK_PORT};
use crate::types::v2::{
    WEBHOOK_API_BUCKET_SERVICE, WEBHOOK_API_CRD_CONVERSION, WEBHOOK_API_GETENV, WEBHOOK_API_UPDATE,
};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use snafu::{ResultExt, Snafu};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

pub mod auth;
pub mod bucketsrv;
pub mod cert_manager;
pub mod conversion;
pub mod directory;
pub mod error;
pub mod getenv;
pub mod sts;

use cert_manager::CertManager;
use directory::TenantDirectory;

#[derive(Debug, Snafu)]
pub enum ServeError {
    #[snafu(display("unable to bind {}: {}", addr, source))]
    Bind { addr: SocketAddr, source: std::io::Error },

    #[snafu(display("invalid TLS configuration: {}", source))]
    TlsConfig { source: rustls::Error },

    #[snafu(display("server failed: {}", source))]
    Serve { source: std::io::Error },
}

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn TenantDirectory>,
    pub config: Arc<OperatorConfig>,
    pub admin: Arc<dyn AdminConnector>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route(
            &format!("{WEBHOOK_API_GETENV}/{{namespace}}/{{name}}"),
            get(getenv::get_env),
        )
        .route(
            &format!("{WEBHOOK_API_BUCKET_SERVICE}/{{namespace}}/{{name}}"),
            post(bucketsrv::bucket_service),
        )
        .route(WEBHOOK_API_CRD_CONVERSION, post(conversion::crd_conversion))
        .route(
            "/sts/{tenant_namespace}",
            post(sts::assume_role_with_web_identity).layer(DefaultBodyLimit::max(sts::MAX_FORM_BYTES)),
        )
        .nest_service(WEBHOOK_API_UPDATE, ServeDir::new(UPDATE_DIR))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves until `cancel` fires. With `tls` set every connection is TLS and
/// picks up certificate rotations on its next handshake.
pub async fn run(
    state: AppState,
    tls: Option<Arc<CertManager>>,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
    let app = router(state);

    let Some(tls) = tls else {
        info!(%addr, "webhook server listening on http");
        return axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .context(ServeSnafu);
    };

    let acceptor = TlsAcceptor::from(tls.server_config().context(TlsConfigSnafu)?);
    info!(%addr, "webhook server listening on https");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "error accepting webhook connection");
                        continue;
                    }
                };
                let (acceptor, app) = (acceptor.clone(), app.clone());
                tokio::spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(%peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let service = TowerToHyperService::new(app);
                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "webhook connection closed with error");
                    }
                });
            }
            _ = cancel.cancelled() => break,
        }
    }
    info!("webhook server stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{MockAdmin, MockDirectory, test_state, webhook_token};
    use crate::types::v2::WEBHOOK_SECRET;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn directory_with_webhook_secret() -> Arc<MockDirectory> {
        let tenant = crate::tests::create_test_tenant();
        let mut secret = tenant.new_webhook_secret(&OperatorConfig::default(), "webhookuser", "webhookpass");
        secret.metadata.name = Some(WEBHOOK_SECRET.to_owned());
        secret.metadata.namespace = Some("t1".to_owned());
        Arc::new(MockDirectory {
            tenants: vec![tenant],
            secrets: vec![secret],
            ..Default::default()
        })
    }

    async fn send(directory: Arc<MockDirectory>, request: Request<Body>) -> (StatusCode, String) {
        let app = router(test_state(directory, Arc::new(MockAdmin::default())));
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", webhook_token("webhookuser", "webhookpass")),
            )
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_getenv() {
        let directory = directory_with_webhook_secret();

        let (status, body) = send(
            directory.clone(),
            authed("GET", "/webhook/v1/getenv/t1/acme?key=MINIO_ARGS"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("acme-p0-{0...3}.acme-hl.t1.svc.cluster.local"));

        let (status, _) = send(
            directory.clone(),
            authed("GET", "/webhook/v1/getenv/t1/missing?key=MINIO_ARGS"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            directory.clone(),
            authed("GET", "/webhook/v1/getenv/t1/acme?key=HOME"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unauthenticated = Request::get("/webhook/v1/getenv/t1/acme?key=MINIO_ARGS")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(directory, unauthenticated).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bucket_service() {
        let directory = directory_with_webhook_secret();

        let (status, _) = send(
            directory.clone(),
            authed("POST", "/webhook/v1/bucketsrv/t1/acme?bucket=photos"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(*directory.services.lock().unwrap(), vec!["photos".to_owned()]);

        let (status, _) = send(
            directory.clone(),
            authed("POST", "/webhook/v1/bucketsrv/t1/acme?bucket=my.photos"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            directory.clone(),
            authed("POST", "/webhook/v1/bucketsrv/t1/acme?bucket=photos&delete=true"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(directory.services.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crd_conversion() {
        let review = serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "ConversionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "desiredAPIVersion": "minio.min.io/v2",
                "objects": [{
                    "apiVersion": "minio.min.io/v1",
                    "kind": "Tenant",
                    "metadata": {"name": "acme", "namespace": "t1"},
                    "spec": {"zones": [{"name": "z0", "servers": 4, "volumesPerServer": 4, "volumeClaimTemplate": {}}]}
                }]
            }
        });
        let request = Request::post(WEBHOOK_API_CRD_CONVERSION)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(review.to_string()))
            .unwrap();
        let (status, body) = send(Arc::new(MockDirectory::default()), request).await;
        assert_eq!(status, StatusCode::OK);

        let response: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(response["response"]["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(response["response"]["result"]["status"], "Success");
        let converted = &response["response"]["convertedObjects"][0];
        assert_eq!(converted["apiVersion"], "minio.min.io/v2");
        assert_eq!(converted["spec"]["pools"][0]["servers"], 4);
    }
}

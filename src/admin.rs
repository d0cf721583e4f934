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

//! Client for a tenant's admin, S3 and STS APIs.
//!
//! Reconcile and the STS handler only see the [`AdminClient`] trait so tests
//! can substitute an in-memory fake.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub mod crypto;
pub mod sigv4;

use sigv4::Credentials;

const ADMIN_PREFIX: &str = "/minio/admin/v3";
const HEALTH_CLUSTER_PATH: &str = "/minio/health/cluster";
const HEALING_DRIVES_HEADER: &str = "x-minio-healing-drives";
const WRITE_QUORUM_HEADER: &str = "x-minio-write-quorum";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
const STS_VERSION: &str = "2011-06-15";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid endpoint '{}': {}", endpoint, source))]
    Endpoint {
        endpoint: String,
        source: url::ParseError,
    },

    #[snafu(display("request to {} failed: {}", path, source))]
    Request { path: String, source: reqwest::Error },

    #[snafu(display("{} returned {}: {}", path, status, body))]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[snafu(display("could not decode response of {}: {}", path, msg))]
    Decode { path: String, msg: String },

    #[snafu(display("payload encryption failed: {}", source))]
    Encrypt { source: crypto::Error },
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Request { source, .. } if source.is_timeout() || source.is_connect())
    }

    /// The server refused the call, as it does for updates when `MINIO_UPDATE=off`.
    pub fn is_method_not_allowed(&self) -> bool {
        matches!(self, Error::Status { status, body, .. } if *status == 405 || body.contains("<Code>MethodNotAllowed</Code>"))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUpdateStatus {
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub updated_version: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriveCounts {
    pub online: i32,
    pub offline: i32,
}

/// Result of `GET /minio/health/cluster`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterHealth {
    pub status: u16,
    pub healing_drives: i32,
    pub write_quorum: i32,
}

impl ClusterHealth {
    pub fn healthy(&self) -> bool {
        self.status == 200
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssumedCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiration: Option<String>,
}

#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn service_restart(&self) -> Result<(), Error>;

    async fn server_update(&self, update_url: &str) -> Result<ServerUpdateStatus, Error>;

    /// Policy document of a canned policy.
    async fn info_canned_policy(&self, name: &str) -> Result<serde_json::Value, Error>;

    async fn storage_info(&self) -> Result<DriveCounts, Error>;

    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<(), Error>;

    async fn set_policy(&self, policy: &str, user: &str) -> Result<(), Error>;

    /// Returns false when the bucket already existed.
    async fn make_bucket(&self, name: &str, region: Option<&str>, object_lock: bool) -> Result<bool, Error>;

    async fn assume_role(&self, policy: Option<&str>, duration_seconds: u32) -> Result<AssumedCredentials, Error>;

    async fn cluster_health(&self) -> Result<ClusterHealth, Error>;
}

/// Creates admin clients for a tenant endpoint and its root credentials.
pub trait AdminConnector: Send + Sync {
    fn connect(&self, endpoint: &str, access_key: &str, secret_key: &str) -> Result<Arc<dyn AdminClient>, Error>;
}

#[derive(Clone)]
pub struct HttpAdminConnector {
    http: reqwest::Client,
}

impl HttpAdminConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl AdminConnector for HttpAdminConnector {
    fn connect(&self, endpoint: &str, access_key: &str, secret_key: &str) -> Result<Arc<dyn AdminClient>, Error> {
        let endpoint = Url::parse(endpoint).context(EndpointSnafu { endpoint })?;
        Ok(Arc::new(HttpAdminClient {
            http: self.http.clone(),
            endpoint,
            credentials: Credentials {
                access_key: access_key.to_owned(),
                secret_key: secret_key.to_owned(),
            },
        }))
    }
}

pub struct HttpAdminClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
}

#[derive(Deserialize)]
struct StorageInfo {
    #[serde(rename = "Disks", default)]
    disks: Vec<Disk>,
}

#[derive(Deserialize)]
struct Disk {
    #[serde(default)]
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    assume_role_result: AssumeRoleResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResult {
    credentials: StsCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    #[serde(default)]
    expiration: Option<String>,
}

fn parse_storage_info(path: &str, body: &[u8]) -> Result<DriveCounts, Error> {
    let info: StorageInfo = serde_json::from_slice(body).map_err(|e| Error::Decode {
        path: path.to_owned(),
        msg: e.to_string(),
    })?;
    let online = info.disks.iter().filter(|d| d.state == "ok").count();
    Ok(DriveCounts {
        online: i32::try_from(online).unwrap_or(i32::MAX),
        offline: i32::try_from(info.disks.len() - online).unwrap_or(i32::MAX),
    })
}

fn parse_assume_role(path: &str, body: &str) -> Result<AssumedCredentials, Error> {
    let response: AssumeRoleResponse = quick_xml::de::from_str(body).map_err(|e| Error::Decode {
        path: path.to_owned(),
        msg: e.to_string(),
    })?;
    let creds = response.assume_role_result.credentials;
    Ok(AssumedCredentials {
        access_key: creds.access_key_id,
        secret_key: creds.secret_access_key,
        session_token: creds.session_token,
        expiration: creds.expiration,
    })
}

/// Newer servers wrap the document as `{"PolicyName": .., "Policy": {..}}`.
fn unwrap_policy(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) if map.contains_key("Policy") && map.contains_key("PolicyName") => {
            map.remove("Policy").unwrap_or_default()
        }
        other => other,
    }
}

fn header_i32(headers: &reqwest::header::HeaderMap, name: &str) -> i32 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}

fn create_bucket_body(region: Option<&str>) -> Vec<u8> {
    match region.filter(|r| !r.is_empty() && *r != sigv4::DEFAULT_REGION) {
        Some(region) => format!(
            r#"<CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><LocationConstraint>{region}</LocationConstraint></CreateBucketConfiguration>"#
        )
        .into_bytes(),
        None => Vec::new(),
    }
}

impl HttpAdminClient {
    fn url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(path);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Vec<u8>,
        service: &str,
        extra_headers: &[(&'static str, &str)],
    ) -> Result<(StatusCode, reqwest::header::HeaderMap, Vec<u8>), Error> {
        let path = url.path().to_owned();
        let headers = sigv4::sign(
            method.as_str(),
            &url,
            &body,
            &self.credentials,
            sigv4::DEFAULT_REGION,
            service,
            chrono::Utc::now(),
        );

        let mut request = self.http.request(method, url).timeout(REQUEST_TIMEOUT);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.context(RequestSnafu { path: path.clone() })?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.context(RequestSnafu { path: path.clone() })?;
        debug!(%path, status = status.as_u16(), "tenant API call");
        Ok((status, headers, bytes.to_vec()))
    }

    async fn admin(&self, method: Method, action: &str, query: &[(&str, &str)], body: Vec<u8>) -> Result<Vec<u8>, Error> {
        let path = format!("{ADMIN_PREFIX}/{action}");
        let url = self.url(&path, query);
        let (status, _, body) = self.send(method, url, body, sigv4::SERVICE_S3, &[]).await?;
        if !status.is_success() {
            return StatusSnafu {
                path,
                status: status.as_u16(),
                body: text(&body),
            }
            .fail();
        }
        Ok(body)
    }
}

fn text(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

#[async_trait]
impl AdminClient for HttpAdminClient {
    async fn service_restart(&self) -> Result<(), Error> {
        self.admin(Method::POST, "service", &[("action", "restart")], Vec::new())
            .await
            .map(|_| ())
    }

    async fn server_update(&self, update_url: &str) -> Result<ServerUpdateStatus, Error> {
        let body = self
            .admin(Method::POST, "update", &[("updateURL", update_url)], Vec::new())
            .await?;
        serde_json::from_slice(&body).map_err(|e| Error::Decode {
            path: "update".to_owned(),
            msg: e.to_string(),
        })
    }

    async fn info_canned_policy(&self, name: &str) -> Result<serde_json::Value, Error> {
        let body = self
            .admin(Method::GET, "info-canned-policy", &[("name", name), ("v", "2")], Vec::new())
            .await?;
        let value = serde_json::from_slice(&body).map_err(|e| Error::Decode {
            path: "info-canned-policy".to_owned(),
            msg: e.to_string(),
        })?;
        Ok(unwrap_policy(value))
    }

    async fn storage_info(&self) -> Result<DriveCounts, Error> {
        let body = self.admin(Method::GET, "storageinfo", &[], Vec::new()).await?;
        parse_storage_info("storageinfo", &body)
    }

    async fn add_user(&self, access_key: &str, secret_key: &str) -> Result<(), Error> {
        let payload = serde_json::json!({"secretKey": secret_key, "status": "enabled"});
        let sealed = crypto::encrypt_data(&self.credentials.secret_key, payload.to_string().as_bytes())
            .context(EncryptSnafu)?;
        self.admin(Method::PUT, "add-user", &[("accessKey", access_key)], sealed)
            .await
            .map(|_| ())
    }

    async fn set_policy(&self, policy: &str, user: &str) -> Result<(), Error> {
        self.admin(
            Method::PUT,
            "set-user-or-group-policy",
            &[("policyName", policy), ("userOrGroup", user), ("isGroup", "false")],
            Vec::new(),
        )
        .await
        .map(|_| ())
    }

    async fn make_bucket(&self, name: &str, region: Option<&str>, object_lock: bool) -> Result<bool, Error> {
        let path = format!("/{name}");
        let url = self.url(&path, &[]);
        let extra: &[(&'static str, &str)] = if object_lock {
            &[("x-amz-bucket-object-lock-enabled", "true")]
        } else {
            &[]
        };
        let (status, _, body) = self
            .send(Method::PUT, url, create_bucket_body(region), sigv4::SERVICE_S3, extra)
            .await?;
        if status.is_success() {
            return Ok(true);
        }
        let message = text(&body);
        if status == StatusCode::CONFLICT && message.contains("BucketAlreadyOwnedByYou") {
            return Ok(false);
        }
        StatusSnafu {
            path,
            status: status.as_u16(),
            body: message,
        }
        .fail()
    }

    async fn assume_role(&self, policy: Option<&str>, duration_seconds: u32) -> Result<AssumedCredentials, Error> {
        let duration = duration_seconds.to_string();
        let mut form: Vec<(&str, &str)> = vec![
            ("Action", "AssumeRole"),
            ("Version", STS_VERSION),
            ("DurationSeconds", &duration),
        ];
        if let Some(policy) = policy {
            form.push(("Policy", policy));
        }
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&form)
            .finish()
            .into_bytes();

        let url = self.url("/", &[]);
        let (status, _, response) = self
            .send(
                Method::POST,
                url,
                body,
                sigv4::SERVICE_STS,
                &[("content-type", "application/x-www-form-urlencoded")],
            )
            .await?;
        if !status.is_success() {
            return StatusSnafu {
                path: "/".to_owned(),
                status: status.as_u16(),
                body: text(&response),
            }
            .fail();
        }
        parse_assume_role("AssumeRole", &text(&response))
    }

    async fn cluster_health(&self) -> Result<ClusterHealth, Error> {
        let url = self.url(HEALTH_CLUSTER_PATH, &[]);
        let response = self
            .http
            .get(url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .context(RequestSnafu {
                path: HEALTH_CLUSTER_PATH,
            })?;
        let headers = response.headers();
        Ok(ClusterHealth {
            status: response.status().as_u16(),
            healing_drives: header_i32(headers, HEALING_DRIVES_HEADER),
            write_quorum: header_i32(headers, WRITE_QUORUM_HEADER),
        })
    }
}

/// HTTP client trusting the cluster CA, used for every tenant call.
pub fn http_client(extra_roots: &[Vec<u8>]) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().use_rustls_tls();
    for pem in extra_roots {
        match reqwest::Certificate::from_pem(pem) {
            Ok(cert) => builder = builder.add_root_certificate(cert),
            Err(e) => tracing::warn!(error = %e, "ignoring unparsable CA certificate"),
        }
    }
    builder.build()
}

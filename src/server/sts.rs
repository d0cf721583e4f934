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

//! `AssumeRoleWithWebIdentity` for workloads holding a Kubernetes service
//! account token.
//!
//! The token is checked with a TokenReview, the caller's PolicyBindings name
//! the policies it may use, and the tenant's own STS issues credentials
//! restricted to the union of those policies.

use super::AppState;
use crate::admin::AssumedCredentials;
use crate::types::policy_binding::PolicyBinding;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu, ensure};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub const STS_XML_NAMESPACE: &str = "https://sts.amazonaws.com/doc/2011-06-15/";
pub const AMZ_REQUEST_ID: &str = "x-amz-request-id";
pub const STS_API_VERSION: &str = "2011-06-15";
pub const WEB_IDENTITY_ACTION: &str = "AssumeRoleWithWebIdentity";
/// Largest accepted form body.
pub const MAX_FORM_BYTES: usize = 10 << 20;
/// Largest session or merged policy, compacted.
pub const MAX_POLICY_LEN: usize = 2048;

pub const MIN_DURATION_SECONDS: u32 = 900;
pub const MAX_DURATION_SECONDS: u32 = 31_536_000;
pub const DEFAULT_DURATION_SECONDS: u32 = 3600;

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";
const DEFAULT_POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StsError {
    #[snafu(display("{}", message))]
    AccessDenied { message: String },

    #[snafu(display("{}", message))]
    InvalidIdentityToken { message: String },

    #[snafu(display("{}", message))]
    MissingParameter { message: String },

    #[snafu(display("{}", message))]
    InvalidParameterValue { message: String },

    #[snafu(display("{}", message))]
    ExpiredToken { message: String },

    #[snafu(display("{}", message))]
    MalformedPolicyDocument { message: String },

    #[snafu(display("{}", message))]
    PackedPolicyTooLarge { message: String },

    #[snafu(display("{}", message))]
    IdpCommunication { message: String },

    #[snafu(display("{}", message))]
    NotInitialized { message: String },

    #[snafu(display("{}", message))]
    Internal { message: String },
}

impl StsError {
    pub fn code(&self) -> &'static str {
        match self {
            StsError::AccessDenied { .. } => "AccessDenied",
            StsError::InvalidIdentityToken { .. } => "InvalidIdentityToken",
            StsError::MissingParameter { .. } => "MissingParameter",
            StsError::InvalidParameterValue { .. } => "InvalidParameterValue",
            StsError::ExpiredToken { .. } => "ExpiredToken",
            StsError::MalformedPolicyDocument { .. } => "MalformedPolicyDocument",
            StsError::PackedPolicyTooLarge { .. } => "PackedPolicyTooLarge",
            StsError::IdpCommunication { .. } => "IDPCommunicationError",
            StsError::NotInitialized { .. } => "STSNotInitialized",
            StsError::Internal { .. } => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StsError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            StsError::NotInitialized { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StsError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Pairs the error with the request it answers.
    pub fn for_request(self, request_id: &str) -> StsFailure {
        StsFailure {
            request_id: request_id.to_owned(),
            error: self,
        }
    }
}

#[derive(Debug)]
pub struct StsFailure {
    request_id: String,
    error: StsError,
}

#[derive(Serialize)]
struct XmlError<'a> {
    #[serde(rename = "Type")]
    type_: &'a str,
    #[serde(rename = "Code")]
    code: &'a str,
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct XmlErrorResponse<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'a str,
    #[serde(rename = "Error")]
    error: XmlError<'a>,
    #[serde(rename = "RequestId")]
    request_id: &'a str,
}

#[derive(Serialize)]
struct XmlCredentials<'a> {
    #[serde(rename = "AccessKeyId")]
    access_key_id: &'a str,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: &'a str,
    #[serde(rename = "SessionToken")]
    session_token: &'a str,
    #[serde(rename = "Expiration", skip_serializing_if = "Option::is_none")]
    expiration: Option<&'a str>,
}

#[derive(Serialize)]
struct XmlResult<'a> {
    #[serde(rename = "Credentials")]
    credentials: XmlCredentials<'a>,
}

#[derive(Serialize)]
struct XmlMetadata<'a> {
    #[serde(rename = "RequestId")]
    request_id: &'a str,
}

#[derive(Serialize)]
struct XmlAssumeRoleResponse<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'a str,
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: XmlResult<'a>,
    #[serde(rename = "ResponseMetadata")]
    metadata: XmlMetadata<'a>,
}

fn xml_response(status: StatusCode, request_id: &str, body: String) -> Response {
    let mut response = (
        status,
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response();
    if let Ok(id) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(AMZ_REQUEST_ID, id);
    }
    response
}

fn to_xml<T: Serialize>(root: &str, value: &T) -> String {
    match quick_xml::se::to_string_with_root(root, value) {
        Ok(xml) => format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{xml}"),
        Err(e) => {
            warn!(error = %e, "unable to encode STS response");
            String::new()
        }
    }
}

impl IntoResponse for StsFailure {
    fn into_response(self) -> Response {
        let code = self.error.code();
        if matches!(self.error, StsError::Internal { .. } | StsError::NotInitialized { .. }) {
            warn!(code = %code, request_id = %self.request_id, error = %self.error, "STS request failed");
        } else {
            debug!(code = %code, request_id = %self.request_id, error = %self.error, "STS request rejected");
        }
        let body = XmlErrorResponse {
            xmlns: STS_XML_NAMESPACE,
            error: XmlError {
                type_: "Sender",
                code,
                message: self.error.to_string(),
            },
            request_id: &self.request_id,
        };
        xml_response(
            self.error.status(),
            &self.request_id,
            to_xml("ErrorResponse", &body),
        )
    }
}

fn success(request_id: &str, credentials: &AssumedCredentials) -> Response {
    let body = XmlAssumeRoleResponse {
        xmlns: STS_XML_NAMESPACE,
        result: XmlResult {
            credentials: XmlCredentials {
                access_key_id: &credentials.access_key,
                secret_access_key: &credentials.secret_key,
                session_token: &credentials.session_token,
                expiration: credentials.expiration.as_deref(),
            },
        },
        metadata: XmlMetadata { request_id },
    };
    xml_response(
        StatusCode::OK,
        request_id,
        to_xml("AssumeRoleWithWebIdentityResponse", &body),
    )
}

/// 16 upper-case hex characters, like the servers' own request IDs.
pub fn new_request_id() -> String {
    hex::encode_upper(rand::random::<[u8; 8]>())
}

/// Validated form of an `AssumeRoleWithWebIdentity` call.
#[derive(Debug, PartialEq, Eq)]
pub struct WebIdentityRequest {
    pub token: String,
    pub duration_seconds: u32,
    pub session_policy: Option<String>,
}

/// Parses and validates the form body.
pub fn parse_request(body: &[u8]) -> Result<WebIdentityRequest, StsError> {
    let form: BTreeMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
    let field = |k: &'static str| form.get(k).map(|v| v.trim()).unwrap_or_default();

    let version = field("Version");
    ensure!(
        version == STS_API_VERSION,
        MissingParameterSnafu {
            message: format!("invalid STS API version '{version}', expecting {STS_API_VERSION}"),
        }
    );
    let action = field("Action");
    ensure!(
        action == WEB_IDENTITY_ACTION,
        InvalidParameterValueSnafu {
            message: format!("unsupported action '{action}'"),
        }
    );
    let token = field("WebIdentityToken");
    ensure!(
        !token.is_empty(),
        MissingParameterSnafu {
            message: "missing WebIdentityToken",
        }
    );

    let duration_seconds = match field("DurationSeconds") {
        "" => DEFAULT_DURATION_SECONDS,
        raw => raw.parse::<u32>().ok().context(InvalidParameterValueSnafu {
            message: "invalid token expiry",
        })?,
    };
    ensure!(
        (MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&duration_seconds),
        InvalidParameterValueSnafu {
            message: format!(
                "invalid token expiry: min {MIN_DURATION_SECONDS}s, max {MAX_DURATION_SECONDS}s"
            ),
        }
    );

    let session_policy = Some(field("Policy"))
        .filter(|p| !p.is_empty())
        .map(str::to_owned);

    Ok(WebIdentityRequest {
        token: token.to_owned(),
        duration_seconds,
        session_policy,
    })
}

/// `(namespace, name)` of a `system:serviceaccount:<ns>:<name>` user.
pub fn service_account(username: &str) -> Option<(&str, &str)> {
    let (namespace, name) = username
        .strip_prefix(SERVICE_ACCOUNT_PREFIX)?
        .split_once(':')?;
    (!namespace.is_empty() && !name.is_empty() && !name.contains(':')).then_some((namespace, name))
}

fn statements(policy: &Value) -> Vec<Value> {
    match policy.get("Statement") {
        Some(Value::Array(statements)) => statements.clone(),
        Some(statement @ Value::Object(_)) => vec![statement.clone()],
        _ => Vec::new(),
    }
}

/// Parses the session policy. It must carry a version and stay within
/// [`MAX_POLICY_LEN`] once compacted.
pub fn parse_session_policy(raw: &str) -> Result<Value, StsError> {
    let policy: Value = serde_json::from_str(raw).map_err(|e| StsError::MalformedPolicyDocument {
        message: e.to_string(),
    })?;
    ensure!(
        policy.is_object(),
        MalformedPolicyDocumentSnafu {
            message: "policy is not a JSON object",
        }
    );
    let compacted = serde_json::to_string(&policy).map_err(|e| StsError::MalformedPolicyDocument {
        message: e.to_string(),
    })?;
    ensure!(
        compacted.len() <= MAX_POLICY_LEN,
        PackedPolicyTooLargeSnafu {
            message: format!("session policy should not exceed {MAX_POLICY_LEN} characters"),
        }
    );
    let version = policy
        .get("Version")
        .and_then(Value::as_str)
        .unwrap_or_default();
    ensure!(
        !version.is_empty(),
        InvalidParameterValueSnafu {
            message: "invalid session policy version",
        }
    );
    Ok(policy)
}

/// Union of the statements of `session` and `policies`, with duplicates
/// removed. Returns `None` when nothing grants anything.
pub fn merge_policies(session: Option<&Value>, policies: &[Value]) -> Option<Value> {
    let version = session
        .and_then(|p| p.get("Version"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_POLICY_VERSION)
        .to_owned();

    let mut seen = BTreeSet::new();
    let mut merged = Vec::new();
    for statement in session
        .into_iter()
        .chain(policies.iter())
        .flat_map(statements)
    {
        if seen.insert(statement.to_string()) {
            merged.push(statement);
        }
    }
    if merged.is_empty() {
        return None;
    }

    let mut policy = Map::new();
    policy.insert("Version".to_owned(), Value::String(version));
    policy.insert("Statement".to_owned(), Value::Array(merged));
    Some(Value::Object(policy))
}

/// Distinct policy names of `bindings`, sorted.
pub fn policy_names(bindings: &[PolicyBinding]) -> BTreeSet<String> {
    bindings
        .iter()
        .flat_map(|b| b.spec.policies.iter())
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

async fn assume(state: &AppState, namespace: &str, body: &[u8]) -> Result<AssumedCredentials, StsError> {
    let request = parse_request(body)?;

    let identity = state
        .directory
        .review_token(&request.token)
        .await
        .map_err(|e| StsError::IdpCommunication {
            message: format!("token review failed: {e}"),
        })?;
    ensure!(
        identity.authenticated,
        AccessDeniedSnafu {
            message: "access denied: invalid token",
        }
    );
    let (sa_namespace, sa_name) =
        service_account(&identity.username).context(InvalidIdentityTokenSnafu {
            message: format!("'{}' is not a service account", identity.username),
        })?;

    let mut bindings: Vec<PolicyBinding> = state
        .directory
        .policy_bindings(namespace)
        .await
        .map_err(|e| StsError::Internal {
            message: format!("error obtaining PolicyBindings: {e}"),
        })?
        .into_iter()
        .filter(|b| b.applies_to(sa_namespace, sa_name))
        .collect();
    ensure!(
        !bindings.is_empty(),
        AccessDeniedSnafu {
            message: format!(
                "service account '{}' is not granted to AssumeRole in any tenant",
                identity.username
            ),
        }
    );
    bindings.sort_by_key(|b| b.metadata.name.clone());
    bindings.dedup_by_key(|b| b.metadata.name.clone());

    let tenant = state
        .directory
        .tenants(namespace)
        .await
        .map_err(|e| StsError::Internal {
            message: format!("error listing tenants: {e}"),
        })?
        .into_iter()
        .next()
        .context(InvalidParameterValueSnafu {
            message: format!("no tenants available in the namespace '{namespace}'"),
        })?;

    let session = request
        .session_policy
        .as_deref()
        .map(parse_session_policy)
        .transpose()?;

    let configuration = state
        .directory
        .configuration(&tenant)
        .await
        .map_err(|e| StsError::Internal {
            message: format!("error reading tenant configuration: {e}"),
        })?;
    let (access_key, secret_key) = configuration
        .root_credentials()
        .context(NotInitializedSnafu {
            message: format!("tenant '{}' has no root credentials yet", tenant.name()),
        })?;
    let admin = state
        .admin
        .connect(
            &tenant.service_url(&state.config.cluster_domain),
            &access_key,
            &secret_key,
        )
        .map_err(|e| StsError::Internal {
            message: e.to_string(),
        })?;

    let mut policies = Vec::new();
    for name in policy_names(&bindings) {
        match admin.info_canned_policy(&name).await {
            Ok(policy) => policies.push(policy),
            Err(e) => warn!(tenant = %tenant.name(), policy = %name, error = %e, "skipping policy"),
        }
    }
    let merged = merge_policies(session.as_ref(), &policies).context(AccessDeniedSnafu {
        message: "none of the bound policies could be resolved",
    })?;
    let merged = serde_json::to_string(&merged).map_err(|e| StsError::Internal {
        message: e.to_string(),
    })?;
    ensure!(
        merged.len() <= MAX_POLICY_LEN,
        PackedPolicyTooLargeSnafu {
            message: format!("merged policy should not exceed {MAX_POLICY_LEN} characters"),
        }
    );

    let credentials = admin
        .assume_role(Some(&merged), request.duration_seconds)
        .await
        .map_err(|e| StsError::Internal {
            message: e.to_string(),
        })?;
    info!(
        tenant = %tenant.name(),
        service_account = %identity.username,
        duration = request.duration_seconds,
        "issued temporary credentials"
    );

    for binding in &bindings {
        if let Err(e) = state.directory.record_authorization(binding).await {
            warn!(binding = %binding.metadata.name.as_deref().unwrap_or_default(), error = %e, "unable to record authorization");
        }
    }
    Ok(credentials)
}

pub async fn assume_role_with_web_identity(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = new_request_id();
    let result = match body {
        Ok(body) => assume(&state, &namespace, &body).await,
        Err(e) => Err(StsError::InvalidParameterValue {
            message: e.body_text(),
        }),
    };
    match result {
        Ok(credentials) => success(&request_id, &credentials),
        Err(e) => e.for_request(&request_id).into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{MockAdmin, MockDirectory, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn binding(name: &str, namespace: &str, sa: &str, policies: &[&str]) -> PolicyBinding {
        serde_json::from_value(json!({
            "apiVersion": "sts.min.io/v1alpha1",
            "kind": "PolicyBinding",
            "metadata": {"name": name, "namespace": "t1"},
            "spec": {
                "application": {"namespace": namespace, "serviceaccount": sa},
                "policies": policies
            }
        }))
        .unwrap()
    }

    fn form(pairs: &[(&str, &str)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    }

    fn web_identity_form(duration: &str) -> String {
        form(&[
            ("Version", STS_API_VERSION),
            ("Action", WEB_IDENTITY_ACTION),
            ("WebIdentityToken", "sa-token"),
            ("DurationSeconds", duration),
        ])
    }

    async fn post(admin: Arc<MockAdmin>, directory: Arc<MockDirectory>, body: String) -> (StatusCode, String, bool) {
        let app = super::super::router(test_state(directory, admin));
        let response = app
            .oneshot(
                Request::post("/sts/t1")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let has_request_id = response.headers().contains_key(AMZ_REQUEST_ID);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap(), has_request_id)
    }

    #[test]
    fn test_parse_request() {
        let parsed = parse_request(web_identity_form("900").as_bytes()).unwrap();
        assert_eq!(parsed.duration_seconds, 900);
        assert_eq!(parsed.token, "sa-token");
        assert_eq!(parsed.session_policy, None);

        let parsed = parse_request(web_identity_form("").as_bytes()).unwrap();
        assert_eq!(parsed.duration_seconds, DEFAULT_DURATION_SECONDS);

        for bad in ["899", "31536001", "soon"] {
            let err = parse_request(web_identity_form(bad).as_bytes()).unwrap_err();
            assert_eq!(err.code(), "InvalidParameterValue");
        }

        let err = parse_request(form(&[("Action", WEB_IDENTITY_ACTION)]).as_bytes()).unwrap_err();
        assert_eq!(err.code(), "MissingParameter");

        let err = parse_request(
            form(&[("Version", STS_API_VERSION), ("Action", "AssumeRole")]).as_bytes(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "InvalidParameterValue");
    }

    #[test]
    fn test_service_account() {
        assert_eq!(service_account("system:serviceaccount:app:robot"), Some(("app", "robot")));
        assert_eq!(service_account("system:serviceaccount:app"), None);
        assert_eq!(service_account("admin"), None);
    }

    #[test]
    fn test_session_policy_checks() {
        let ok = r#"{"Version":"2012-10-17","Statement":[]}"#;
        assert!(parse_session_policy(ok).is_ok());
        assert_eq!(
            parse_session_policy(r#"{"Statement":[]}"#).unwrap_err().code(),
            "InvalidParameterValue"
        );
        assert_eq!(
            parse_session_policy("{not json").unwrap_err().code(),
            "MalformedPolicyDocument"
        );
        let huge = format!(
            r#"{{"Version":"2012-10-17","Statement":[{{"Resource":"{}"}}]}}"#,
            "x".repeat(MAX_POLICY_LEN)
        );
        assert_eq!(
            parse_session_policy(&huge).unwrap_err().code(),
            "PackedPolicyTooLarge"
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let read = json!({"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": ["s3:GetObject"]}]});
        let write = json!({"Version": "2012-10-17", "Statement": {"Effect": "Allow", "Action": ["s3:PutObject"]}});
        let a = merge_policies(None, &[read.clone(), write.clone(), read.clone()]).unwrap();
        let b = merge_policies(None, &[read, write]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["Statement"].as_array().unwrap().len(), 2);
        assert_eq!(merge_policies(None, &[]), None);
    }

    #[test]
    fn test_policy_names_sorted_and_unique() {
        let bindings = [
            binding("b", "app", "robot", &["writeonly", "readonly"]),
            binding("a", "app", "robot", &["readonly", " "]),
        ];
        let names: Vec<String> = policy_names(&bindings).into_iter().collect();
        assert_eq!(names, vec!["readonly", "writeonly"]);
    }

    #[tokio::test]
    async fn test_assume_role_happy_path() {
        let admin = Arc::new(MockAdmin::default());
        let directory = Arc::new(MockDirectory::with_identity("system:serviceaccount:app:robot"));
        directory
            .bindings
            .lock()
            .unwrap()
            .push(binding("robot", "app", "robot", &["readonly"]));

        let (status, body, has_request_id) = post(admin.clone(), directory.clone(), web_identity_form("900")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(has_request_id);
        assert!(body.contains(r#"xmlns="https://sts.amazonaws.com/doc/2011-06-15/""#));
        assert!(body.contains("<AccessKeyId>TEMPACCESS</AccessKeyId>"));
        assert!(body.contains("<SecretAccessKey>TEMPSECRET</SecretAccessKey>"));
        assert!(body.contains("<SessionToken>TEMPTOKEN</SessionToken>"));

        let issued = admin.assumed.lock().unwrap().clone();
        let (policy, duration) = issued.first().cloned().unwrap();
        assert_eq!(duration, 900);
        assert!(policy.unwrap().len() <= MAX_POLICY_LEN);
        assert_eq!(directory.authorizations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_assume_role_denied_without_binding() {
        let admin = Arc::new(MockAdmin::default());
        let directory = Arc::new(MockDirectory::with_identity("system:serviceaccount:app:robot"));
        directory
            .bindings
            .lock()
            .unwrap()
            .push(binding("other", "app", "someone-else", &["readonly"]));

        let (status, body, _) = post(admin.clone(), directory, web_identity_form("900")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>AccessDenied</Code>"));
        assert_eq!(admin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_assume_role_rejects_bad_duration() {
        let admin = Arc::new(MockAdmin::default());
        let directory = Arc::new(MockDirectory::with_identity("system:serviceaccount:app:robot"));
        let (status, body, _) = post(admin, directory, web_identity_form("60")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("<Code>InvalidParameterValue</Code>"));
    }

    #[tokio::test]
    async fn test_assume_role_tenant_lookup_failure_is_internal() {
        let admin = Arc::new(MockAdmin::default());
        let mut directory = MockDirectory::with_identity("system:serviceaccount:app:robot");
        directory.tenant_lookup_fails = true;
        directory
            .bindings
            .lock()
            .unwrap()
            .push(binding("robot", "app", "robot", &["readonly"]));

        let (status, body, _) = post(admin.clone(), Arc::new(directory), web_identity_form("900")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("<Code>InternalError</Code>"));
        assert_eq!(admin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_assume_role_unauthenticated_token() {
        let admin = Arc::new(MockAdmin::default());
        let directory = Arc::new(MockDirectory::default());
        let (status, body, _) = post(admin, directory, web_identity_form("900")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("<Code>AccessDenied</Code>"));
    }
}

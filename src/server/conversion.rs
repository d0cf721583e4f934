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

//! Tenant conversion between `minio.min.io/v1` and `minio.min.io/v2`.
//!
//! The objects stay untyped so fields this operator does not model survive the
//! round trip. Only `spec.zones` and the tenant-level security context change
//! shape.

use axum::Json;
use kube::core::Status;
use kube::core::conversion::{ConversionRequest, ConversionResponse, ConversionReview};
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu};
use tracing::{info, warn};

pub const API_V1: &str = "minio.min.io/v1";
pub const API_V2: &str = "minio.min.io/v2";

/// Fields a v1 zone shares with a v2 pool.
const ZONE_FIELDS: &[&str] = &[
    "name",
    "servers",
    "volumesPerServer",
    "volumeClaimTemplate",
    "resources",
    "nodeSelector",
    "affinity",
    "tolerations",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object is not a JSON object"))]
    NotAnObject,

    #[snafu(display("unsupported apiVersion '{}'", api_version))]
    UnsupportedVersion { api_version: String },
}

fn copy_zone_fields(from: &Map<String, Value>) -> Map<String, Value> {
    ZONE_FIELDS
        .iter()
        .filter_map(|k| from.get(*k).map(|v| ((*k).to_owned(), v.clone())))
        .collect()
}

fn take_spec(object: &mut Map<String, Value>) -> Map<String, Value> {
    match object.remove("spec") {
        Some(Value::Object(spec)) => spec,
        _ => Map::new(),
    }
}

/// `spec.zones` become `spec.pools`, each carrying the tenant's security context.
fn v1_to_v2(object: &mut Map<String, Value>) {
    let mut spec = take_spec(object);
    let security_context = spec.remove("securityContext");
    let pools: Vec<Value> = match spec.remove("zones") {
        Some(Value::Array(zones)) => zones
            .iter()
            .filter_map(Value::as_object)
            .map(|zone| {
                let mut pool = copy_zone_fields(zone);
                if let Some(sc) = &security_context {
                    pool.insert("securityContext".to_owned(), sc.clone());
                }
                Value::Object(pool)
            })
            .collect(),
        _ => Vec::new(),
    };
    spec.insert("pools".to_owned(), Value::Array(pools));
    object.insert("spec".to_owned(), Value::Object(spec));
    object.insert("apiVersion".to_owned(), Value::String(API_V2.to_owned()));
}

/// `spec.pools` become `spec.zones`; the first pool's security context moves
/// up to the tenant.
fn v2_to_v1(object: &mut Map<String, Value>) {
    let mut spec = take_spec(object);
    let pools = match spec.remove("pools") {
        Some(Value::Array(pools)) => pools,
        _ => Vec::new(),
    };
    let security_context = pools
        .first()
        .and_then(|p| p.get("securityContext"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let zones = pools
        .iter()
        .filter_map(Value::as_object)
        .map(|pool| Value::Object(copy_zone_fields(pool)))
        .collect();
    spec.insert("zones".to_owned(), Value::Array(zones));
    spec.insert("securityContext".to_owned(), security_context);
    object.insert("spec".to_owned(), Value::Object(spec));
    object.insert("apiVersion".to_owned(), Value::String(API_V1.to_owned()));
}

/// Converts one Tenant to `desired` apiVersion.
pub fn convert(mut object: Value, desired: &str) -> Result<Value, Error> {
    let map = object.as_object_mut().context(NotAnObjectSnafu)?;
    let current = map
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    match (current.as_str(), desired) {
        (c, d) if c == d && (d == API_V1 || d == API_V2) => {}
        (API_V1, API_V2) => v1_to_v2(map),
        (API_V2, API_V1) => v2_to_v1(map),
        (API_V1 | API_V2, other) => {
            return UnsupportedVersionSnafu { api_version: other }.fail();
        }
        (other, _) => return UnsupportedVersionSnafu { api_version: other }.fail(),
    }
    Ok(object)
}

fn respond(request: ConversionRequest) -> ConversionResponse {
    let desired = request.desired_api_version.clone();
    let mut converted = Vec::with_capacity(request.objects.len());
    for object in &request.objects {
        match convert(object.clone(), &desired) {
            Ok(object) => converted.push(object),
            Err(e) => {
                warn!(desired = %desired, error = %e, "tenant conversion failed");
                return ConversionResponse::for_request(request)
                    .failure(Status::failure(&e.to_string(), "ConversionFailed"));
            }
        }
    }
    info!(desired = %desired, count = converted.len(), "converted tenants");
    ConversionResponse::for_request(request).success(converted)
}

pub async fn crd_conversion(Json(review): Json<ConversionReview>) -> Json<ConversionReview> {
    let response = match ConversionRequest::try_from(review) {
        Ok(request) => respond(request),
        Err(e) => {
            warn!(error = %e, "invalid conversion review");
            ConversionResponse::invalid(Status::failure(&e.to_string(), "InvalidRequest"))
        }
    };
    Json(response.into_review())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_tenant() -> Value {
        json!({
            "apiVersion": API_V1,
            "kind": "Tenant",
            "metadata": { "name": "acme", "namespace": "t1" },
            "spec": {
                "image": "minio/minio:RELEASE.2021-06-07T21-40-51Z",
                "securityContext": { "runAsUser": 1000 },
                "zones": [
                    { "name": "z0", "servers": 4, "volumesPerServer": 2, "volumeClaimTemplate": {} },
                    { "name": "z1", "servers": 2, "volumesPerServer": 2, "volumeClaimTemplate": {} }
                ]
            }
        })
    }

    #[test]
    fn test_v1_to_v2_moves_security_context_into_pools() {
        let v2 = convert(v1_tenant(), API_V2).unwrap();
        assert_eq!(v2["apiVersion"], API_V2);
        assert!(v2["spec"].get("zones").is_none());
        assert!(v2["spec"].get("securityContext").is_none());
        let pools = v2["spec"]["pools"].as_array().unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[1]["servers"], 2);
        assert!(pools.iter().all(|p| p["securityContext"]["runAsUser"] == 1000));
        assert_eq!(v2["spec"]["image"], v1_tenant()["spec"]["image"]);
    }

    #[test]
    fn test_round_trip_preserves_v1() {
        let back = convert(convert(v1_tenant(), API_V2).unwrap(), API_V1).unwrap();
        assert_eq!(back, v1_tenant());
    }

    #[test]
    fn test_v2_without_pools_gets_empty_security_context() {
        let v2 = json!({ "apiVersion": API_V2, "kind": "Tenant", "spec": { "pools": [] } });
        let v1 = convert(v2, API_V1).unwrap();
        assert_eq!(v1["spec"]["securityContext"], json!({}));
        assert_eq!(v1["spec"]["zones"], json!([]));
    }

    #[test]
    fn test_unsupported_versions() {
        assert!(convert(v1_tenant(), "minio.min.io/v3").is_err());
        assert!(convert(json!({ "apiVersion": "v9" }), API_V2).is_err());
        assert!(convert(json!("x"), API_V2).is_err());
        let same = convert(v1_tenant(), API_V1).unwrap();
        assert_eq!(same, v1_tenant());
    }
}

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

//! AWS Signature Version 4 for the tenant's admin, S3 and STS endpoints.

use chrono::{DateTime, Utc};
use ring::hmac;
use sha2::{Digest, Sha256};
use url::Url;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const SERVICE_S3: &str = "s3";
pub const SERVICE_STS: &str = "sts";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding as S3 expects it. `/` is kept for paths.
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, false), uri_encode(&v, false)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// `Url` keeps the path percent-encoded, so it is used as is.
pub fn canonical_request(method: &str, url: &Url, payload_hash: &str, amz_date: &str) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    format!(
        "{method}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}",
        path,
        canonical_query(url),
        host_header(url),
    )
}

/// Headers to attach to a request so the server accepts it. The body must be
/// sent exactly as hashed.
pub fn sign(
    method: &str,
    url: &Url,
    body: &[u8],
    credentials: &Credentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(body);

    let request = canonical_request(method, url, &payload_hash, &amz_date);
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!("{ALGORITHM}\n{amz_date}\n{scope}\n{}", sha256_hex(request.as_bytes()));

    let key = signing_key(&credentials.secret_key, &date, region, service);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    vec![
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash),
        (
            "authorization",
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
                credentials.access_key
            ),
        ),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_vector() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c~", true), "a%20b/c~");
        assert_eq!(uri_encode("a b/c", false), "a%20b%2Fc");
    }

    #[test]
    fn test_canonical_request() {
        let url = Url::parse("https://minio.t1.svc.cluster.local:9000/minio/admin/v3/update?updateURL=http%3A%2F%2Fx&b=1").unwrap();
        let request = canonical_request("POST", &url, "e3b0", "20240101T000000Z");
        let lines: Vec<&str> = request.lines().collect();
        assert_eq!(lines[0], "POST");
        assert_eq!(lines[1], "/minio/admin/v3/update");
        assert_eq!(lines[2], "b=1&updateURL=http%3A%2F%2Fx");
        assert_eq!(lines[3], "host:minio.t1.svc.cluster.local:9000");
    }

    #[test]
    fn test_sign_headers() {
        let url = Url::parse("http://minio.t1.svc.cluster.local/bucket").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let creds = Credentials {
            access_key: "AKIA".to_owned(),
            secret_key: "secret".to_owned(),
        };
        let headers = sign("PUT", &url, b"", &creds, DEFAULT_REGION, SERVICE_S3, now);
        assert_eq!(headers[0], ("x-amz-date", "20240102T030405Z".to_owned()));
        assert_eq!(
            headers[1].1,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(headers[2].1.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIA/20240102/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        assert_eq!(headers, sign("PUT", &url, b"", &creds, DEFAULT_REGION, SERVICE_S3, now));
    }
}

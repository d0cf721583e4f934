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

//! Pulls a MinIO image from its registry and stages the server binary, its
//! checksum and its signature for the update endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory served under `/webhook/v1/update`.
pub const UPDATE_DIR: &str = "/tmp/webhook/v1/update";

pub const RELEASE_PREFIX: &str = "RELEASE";
const RELEASE_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

const DOCKER_HUB: &str = "registry-1.docker.io";
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io"];

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json";

const BINARY: &str = "minio";
const ASSETS: [&str; 3] = ["minio", "minio.sha256sum", "minio.minisig"];
const ASSET_DIRS: [&str; 2] = ["opt/bin", "usr/bin"];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid image reference {}", image))]
    InvalidReference { image: String },

    #[snafu(display("{} is not a valid release tag", tag))]
    InvalidReleaseTag { tag: String },

    #[snafu(display("registry request failed: {}", source))]
    Registry { source: reqwest::Error },

    #[snafu(display("registry answered {} for {}", status, url))]
    RegistryStatus { status: u16, url: String },

    #[snafu(display("registry requires an unsupported authentication scheme"))]
    Unauthorized,

    #[snafu(display("image {} has no layer for {}", image, platform))]
    NoLayers { image: String, platform: String },

    #[snafu(display("update assets not found in image layer"))]
    MissingAssets,

    #[snafu(display("unexpected `minio --version` output: {}", output))]
    VersionOutput { output: String },

    #[snafu(display("artifact I/O error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("extraction task failed: {}", source))]
    Join { source: tokio::task::JoinError },
}

/// Time encoded in a `RELEASE.<time>[.<suffix>]` tag.
pub fn release_time(tag: &str) -> Result<DateTime<Utc>, Error> {
    let fields: Vec<&str> = tag.split('.').collect();
    ensure!(
        (2..=3).contains(&fields.len()) && fields[0] == RELEASE_PREFIX,
        InvalidReleaseTagSnafu { tag }
    );
    NaiveDateTime::parse_from_str(fields[1], RELEASE_TIME_FORMAT)
        .map(|t| t.and_utc())
        .ok()
        .context(InvalidReleaseTagSnafu { tag })
}

/// Canonical release tag for a release time.
pub fn release_tag(time: DateTime<Utc>) -> String {
    format!("{RELEASE_PREFIX}.{}", time.format(RELEASE_TIME_FORMAT))
}

/// `registry/repository:tag` or `registry/repository@digest`, split the way
/// the Docker CLI does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, Error> {
        ensure!(
            !image.is_empty() && !image.contains(char::is_whitespace),
            InvalidReferenceSnafu { image }
        );

        let (registry, rest) = match image.split_once('/') {
            Some((first, rest)) if first.contains(['.', ':']) || first == "localhost" => {
                (first.to_owned(), rest.to_owned())
            }
            _ => (DOCKER_HUB.to_owned(), image.to_owned()),
        };
        let registry = if DOCKER_HUB_ALIASES.contains(&registry.as_str()) {
            DOCKER_HUB.to_owned()
        } else {
            registry
        };

        let (repository, reference) = if let Some((repo, digest)) = rest.split_once('@') {
            (repo.to_owned(), digest.to_owned())
        } else {
            match rest.rsplit_once(':') {
                Some((repo, tag)) if !tag.contains('/') => (repo.to_owned(), tag.to_owned()),
                _ => (rest.clone(), "latest".to_owned()),
            }
        };
        ensure!(!repository.is_empty(), InvalidReferenceSnafu { image });

        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// Host under which pull secrets list this registry.
    pub fn auth_key(&self) -> &str {
        if self.registry == DOCKER_HUB {
            "https://index.docker.io/v1/"
        } else {
            &self.registry
        }
    }

    fn url(&self, kind: &str, reference: &str) -> String {
        format!(
            "https://{}/v2/{}/{}/{}",
            self.registry, self.repository, kind, reference
        )
    }
}

/// Registry login taken from a `.dockerconfigjson` pull secret.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuth>,
}

#[derive(Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

/// Credentials for `reference` in a `.dockerconfigjson` document, if listed.
pub fn credentials_from_docker_config(config: &[u8], reference: &ImageReference) -> Option<RegistryCredentials> {
    let config: DockerConfig = serde_json::from_slice(config).ok()?;
    let auth = config
        .auths
        .get(reference.auth_key())
        .or_else(|| config.auths.get(&reference.registry))?;

    if let (Some(username), Some(password)) = (&auth.username, &auth.password) {
        return Some(RegistryCredentials {
            username: username.clone(),
            password: password.clone(),
        });
    }
    let decoded = STANDARD.decode(auth.auth.as_deref()?).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(RegistryCredentials {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// The layer carrying the server: the largest one, not counting the base
/// layer when there is more than one.
pub fn update_layer(layers: &[Descriptor]) -> Option<&Descriptor> {
    let skip = usize::from(layers.len() >= 2);
    layers
        .iter()
        .skip(skip)
        .reduce(|best, layer| if layer.size > best.size { layer } else { best })
}

fn current_platform() -> Platform {
    let architecture = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    };
    Platform {
        architecture: architecture.to_owned(),
        os: "linux".to_owned(),
    }
}

/// Parses the `Bearer realm=..,service=..,scope=..` challenge of a registry.
pub fn bearer_challenge(header: &str) -> Option<BTreeMap<String, String>> {
    let params = header.strip_prefix("Bearer ")?;
    let mut out = BTreeMap::new();
    for part in params.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        out.insert(key.to_owned(), value.trim_matches('"').to_owned());
    }
    out.contains_key("realm").then_some(out)
}

struct Registry<'a> {
    http: &'a reqwest::Client,
    image: ImageReference,
    credentials: Option<RegistryCredentials>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl Registry<'_> {
    async fn authenticate(&mut self, challenge: &str) -> Result<(), Error> {
        let params = bearer_challenge(challenge).context(UnauthorizedSnafu)?;
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(service) = params.get("service") {
            query.push(("service", service.clone()));
        }
        query.push((
            "scope",
            params
                .get("scope")
                .cloned()
                .unwrap_or_else(|| format!("repository:{}:pull", self.image.repository)),
        ));

        let mut request = self
            .http
            .get(params.get("realm").context(UnauthorizedSnafu)?)
            .query(&query);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let response = request.send().await.context(RegistrySnafu)?;
        let url = response.url().to_string();
        ensure!(
            response.status().is_success(),
            RegistryStatusSnafu {
                status: response.status().as_u16(),
                url
            }
        );
        let token: TokenResponse = response.json().await.context(RegistrySnafu)?;
        self.token = Some(token.token.or(token.access_token).context(UnauthorizedSnafu)?);
        Ok(())
    }

    async fn get(&mut self, url: &str, accept: Option<&str>) -> Result<reqwest::Response, Error> {
        for attempt in 0..2 {
            let mut request = self.http.get(url);
            if let Some(accept) = accept {
                request = request.header(http::header::ACCEPT, accept);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.context(RegistrySnafu)?;
            if response.status() == http::StatusCode::UNAUTHORIZED && attempt == 0 {
                let challenge = response
                    .headers()
                    .get(http::header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .context(UnauthorizedSnafu)?
                    .to_owned();
                self.authenticate(&challenge).await?;
                continue;
            }
            ensure!(
                response.status().is_success(),
                RegistryStatusSnafu {
                    status: response.status().as_u16(),
                    url
                }
            );
            return Ok(response);
        }
        UnauthorizedSnafu.fail()
    }

    async fn manifest(&mut self, reference: &str) -> Result<Manifest, Error> {
        let url = self.image.url("manifests", reference);
        self.get(&url, Some(MANIFEST_ACCEPT))
            .await?
            .json()
            .await
            .context(RegistrySnafu)
    }

    /// Layers of the image for the platform the operator runs on.
    async fn layers(&mut self) -> Result<Vec<Descriptor>, Error> {
        let reference = self.image.reference.clone();
        let manifest = self.manifest(&reference).await?;
        if manifest.manifests.is_empty() {
            return Ok(manifest.layers);
        }

        let platform = current_platform();
        let entry = manifest
            .manifests
            .iter()
            .find(|m| m.platform.as_ref() == Some(&platform))
            .with_context(|| NoLayersSnafu {
                image: self.image.repository.clone(),
                platform: format!("{}/{}", platform.os, platform.architecture),
            })?;
        let digest = entry.digest.clone();
        Ok(self.manifest(&digest).await?.layers)
    }

    async fn blob(&mut self, digest: &str) -> Result<Vec<u8>, Error> {
        let url = self.image.url("blobs", digest);
        let body = self
            .get(&url, None)
            .await?
            .bytes()
            .await
            .context(RegistrySnafu)?;
        Ok(body.to_vec())
    }
}

/// Writes the update assets found in a gzip'd layer tarball into `dir`.
pub fn extract_assets(layer: &[u8], dir: &Path) -> Result<(), Error> {
    let mut archive = tar::Archive::new(GzDecoder::new(layer));
    let mut found: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for entry in archive.entries().context(IoSnafu)? {
        let mut entry = entry.context(IoSnafu)?;
        let path = entry.path().context(IoSnafu)?.to_string_lossy().into_owned();
        let path = path.trim_start_matches("./");
        let Some((parent, file)) = path.rsplit_once('/') else {
            continue;
        };
        if !ASSET_DIRS.contains(&parent) || !ASSETS.contains(&file) {
            continue;
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content).context(IoSnafu)?;
        found.insert(path.to_owned(), content);
    }

    let dir_with_assets = ASSET_DIRS
        .iter()
        .find(|d| ASSETS.iter().all(|a| found.contains_key(&format!("{d}/{a}"))))
        .context(MissingAssetsSnafu)?;

    std::fs::create_dir_all(dir).context(IoSnafu)?;
    for asset in ASSETS {
        let content = found
            .remove(&format!("{dir_with_assets}/{asset}"))
            .context(MissingAssetsSnafu)?;
        let target = dir.join(asset);
        std::fs::write(&target, content).context(IoSnafu)?;
        if asset == BINARY {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).context(IoSnafu)?;
        }
    }
    Ok(())
}

/// Release tag reported by `minio --version`, the third field of its output.
pub fn version_tag(output: &str) -> Result<String, Error> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    ensure!(fields.len() == 3, VersionOutputSnafu { output });
    Ok(fields[2].to_owned())
}

async fn binary_tag(binary: &Path) -> Result<String, Error> {
    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .output()
        .await
        .context(IoSnafu)?;
    version_tag(&String::from_utf8_lossy(&output.stdout))
}

/// Stages the update assets of `image` in [`UPDATE_DIR`] as
/// `minio.<tag>{,.sha256sum,.minisig}` and returns the release time.
pub async fn fetch(
    http: &reqwest::Client,
    image: &str,
    credentials: Option<RegistryCredentials>,
) -> Result<DateTime<Utc>, Error> {
    let reference = ImageReference::parse(image)?;
    info!(image = %image, registry = %reference.registry, "fetching update artifacts");

    let mut registry = Registry {
        http,
        image: reference,
        credentials,
        token: None,
    };
    let layers = registry.layers().await?;
    let layer = update_layer(&layers).with_context(|| NoLayersSnafu {
        image: image.to_owned(),
        platform: "any".to_owned(),
    })?;
    debug!(digest = %layer.digest, size = layer.size, "selected update layer");
    let blob = registry.blob(&layer.digest).await?;

    let dir = PathBuf::from(UPDATE_DIR);
    let target = dir.clone();
    tokio::task::spawn_blocking(move || extract_assets(&blob, &target))
        .await
        .context(JoinSnafu)??;

    let tag = binary_tag(&dir.join(BINARY)).await?;
    let latest = release_time(&tag)?;
    for asset in ASSETS {
        let renamed = asset.replacen(BINARY, &format!("{BINARY}.{tag}"), 1);
        tokio::fs::rename(dir.join(asset), dir.join(renamed))
            .await
            .context(IoSnafu)?;
    }
    info!(image = %image, tag = %tag, "update artifacts ready");
    Ok(latest)
}

/// Removes every staged asset.
pub async fn remove() -> Result<(), Error> {
    match tokio::fs::remove_dir_all(UPDATE_DIR).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e).context(IoSnafu),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn layer(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn descriptor(digest: &str, size: u64) -> Descriptor {
        Descriptor {
            media_type: String::new(),
            digest: digest.to_owned(),
            size,
            platform: None,
        }
    }

    #[test]
    fn test_release_tags() {
        let time = release_time("RELEASE.2021-07-27T02-40-15Z").unwrap();
        assert_eq!(release_tag(time), "RELEASE.2021-07-27T02-40-15Z");
        assert!(release_time("RELEASE.2021-07-27T02-40-15Z.hotfix.1").is_err());
        assert!(release_time("RELEASE.2021-07-27T02-40-15Z.fips").is_ok());
        assert!(release_time("v2.0.1").is_err());
        assert!(release_time("RELEASE.garbage").is_err());
    }

    #[test]
    fn test_parse_reference() {
        let r = ImageReference::parse("minio/minio:RELEASE.2021-06-07T21-40-51Z").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "minio/minio");
        assert_eq!(r.reference, "RELEASE.2021-06-07T21-40-51Z");

        let r = ImageReference::parse("postgres").unwrap();
        assert_eq!(r.repository, "library/postgres");
        assert_eq!(r.reference, "latest");

        let r = ImageReference::parse("quay.io/minio/minio@sha256:abc").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "minio/minio");
        assert_eq!(r.reference, "sha256:abc");

        let r = ImageReference::parse("localhost:5000/minio").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "minio");
        assert_eq!(r.reference, "latest");

        assert!(ImageReference::parse("").is_err());
    }

    #[test]
    fn test_update_layer_skips_base() {
        let layers = vec![descriptor("base", 500), descriptor("a", 10), descriptor("b", 40)];
        assert_eq!(update_layer(&layers).unwrap().digest, "b");

        let single = vec![descriptor("only", 1)];
        assert_eq!(update_layer(&single).unwrap().digest, "only");
        assert!(update_layer(&[]).is_none());
    }

    #[test]
    fn test_docker_config_credentials() {
        let reference = ImageReference::parse("minio/minio:latest").unwrap();
        let config = serde_json::json!({
            "auths": { "https://index.docker.io/v1/": { "auth": STANDARD.encode("bob:secret") } }
        });
        let creds = credentials_from_docker_config(config.to_string().as_bytes(), &reference).unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password, "secret");

        let other = ImageReference::parse("quay.io/minio/minio:latest").unwrap();
        assert!(credentials_from_docker_config(config.to_string().as_bytes(), &other).is_none());
    }

    #[test]
    fn test_bearer_challenge() {
        let params = bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:minio/minio:pull""#,
        )
        .unwrap();
        assert_eq!(params["realm"], "https://auth.docker.io/token");
        assert_eq!(params["scope"], "repository:minio/minio:pull");
        assert!(bearer_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn test_version_tag() {
        assert_eq!(
            version_tag("minio version RELEASE.2021-08-05T22-01-19Z\n").unwrap(),
            "RELEASE.2021-08-05T22-01-19Z"
        );
        assert!(version_tag("minio version RELEASE.x (commit-id=abc)").is_err());
    }

    #[test]
    fn test_extract_assets() {
        let dir = std::env::temp_dir().join(format!("artifacts-{}", crate::utils::random_alphanumeric(8)));
        let data = layer(&[
            ("opt/bin/minio", b"binary"),
            ("opt/bin/minio.sha256sum", b"sum"),
            ("opt/bin/minio.minisig", b"sig"),
            ("etc/passwd", b"root"),
        ]);
        extract_assets(&data, &dir).unwrap();
        assert_eq!(std::fs::read(dir.join("minio")).unwrap(), b"binary");
        assert_eq!(std::fs::read(dir.join("minio.minisig")).unwrap(), b"sig");
        assert!(!dir.join("passwd").exists());
        std::fs::remove_dir_all(&dir).unwrap();

        let legacy = layer(&[
            ("usr/bin/minio", b"binary"),
            ("usr/bin/minio.sha256sum", b"sum"),
            ("usr/bin/minio.minisig", b"sig"),
        ]);
        extract_assets(&legacy, &dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let incomplete = layer(&[("opt/bin/minio", b"binary")]);
        assert!(matches!(extract_assets(&incomplete, &dir), Err(Error::MissingAssets)));
    }
}

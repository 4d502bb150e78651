//! OCI registry client.
//!
//! Speaks just enough of the Distribution API for the engine: manifest
//! resolution (including image-index → platform manifest indirection),
//! Bearer token authentication with a per-repository token cache, and
//! blob access — streamed bodies for the whole-layer fallbacks and
//! range readers for the seekable strategies.

use std::collections::HashMap;

use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ocipeek_core::{PeekError, Result};

use crate::reference::ImageReference;
use crate::remote::RangeReader;

/// Accept header for manifest requests.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Anonymous access (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`,
    /// falling back to anonymous.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();
        match (username, password) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }
}

/// Content descriptor as it appears in manifests and indexes.
#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
}

/// Image manifest (the leaf document listing layers).
#[derive(Debug, Clone, Deserialize)]
pub struct ImageManifest {
    pub layers: Vec<Descriptor>,
}

/// Image index / manifest list.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexManifest {
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// One layer of a resolved image.
#[derive(Debug, Clone)]
pub struct LayerDescriptor {
    /// Content digest (e.g., "sha256:...").
    pub digest: String,
    /// Compressed size in bytes.
    pub size: u64,
    /// Manifest media type.
    pub media_type: String,
    /// Direct blob URL.
    pub blob_url: String,
}

/// A resolved image: manifest digest plus its layers in manifest order
/// (lower index = deeper layer).
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub reference: ImageReference,
    pub manifest_digest: String,
    pub layers: Vec<LayerDescriptor>,
}

/// Registry client with a per-repository Bearer token cache.
pub struct RegistryClient {
    http: reqwest::Client,
    auth: RegistryAuth,
    tokens: Mutex<HashMap<String, String>>,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    /// Client with anonymous authentication.
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    /// Client with the given credentials.
    pub fn with_auth(auth: RegistryAuth) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ocipeek/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            http,
            auth,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an image to its manifest digest and layer descriptors.
    pub async fn get_enhanced_layers(&self, image: &ImageReference) -> Result<ResolvedImage> {
        let (bytes, digest) = self
            .fetch_manifest(image, image.manifest_reference())
            .await?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| PeekError::Serialization(format!("manifest: {e}")))?;

        // An index points at per-platform manifests; follow the one for
        // this host.
        let (value, digest) = if value.get("manifests").is_some() {
            let index: IndexManifest = serde_json::from_value(value)
                .map_err(|e| PeekError::Serialization(format!("image index: {e}")))?;
            let target = select_platform_manifest(&index)?;
            debug!(digest = %target.digest, "following image index to platform manifest");
            let (bytes, digest) = self.fetch_manifest(image, &target.digest).await?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| PeekError::Serialization(format!("manifest: {e}")))?;
            (value, digest)
        } else {
            (value, digest)
        };

        let manifest: ImageManifest = serde_json::from_value(value)
            .map_err(|e| PeekError::Serialization(format!("manifest: {e}")))?;

        let layers = manifest
            .layers
            .iter()
            .map(|layer| LayerDescriptor {
                digest: layer.digest.clone(),
                size: layer.size,
                media_type: layer.media_type.clone(),
                blob_url: self.blob_url(image, &layer.digest),
            })
            .collect::<Vec<_>>();

        debug!(
            image = %image,
            digest = %digest,
            layers = layers.len(),
            "resolved image"
        );

        Ok(ResolvedImage {
            reference: image.clone(),
            manifest_digest: digest,
            layers,
        })
    }

    /// Direct blob URL: `{scheme}://{host}/v2/{repository}/blobs/{digest}`.
    pub fn blob_url(&self, image: &ImageReference, digest: &str) -> String {
        format!(
            "{}://{}/v2/{}/blobs/{}",
            scheme_for(image.api_host()),
            image.api_host(),
            image.repository,
            digest
        )
    }

    /// Fetch a manifest document (by tag or digest), returning the raw
    /// bytes and the manifest digest.
    pub async fn fetch_manifest(
        &self,
        image: &ImageReference,
        reference: &str,
    ) -> Result<(Vec<u8>, String)> {
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            scheme_for(image.api_host()),
            image.api_host(),
            image.repository,
            reference
        );
        let resp = self.authed_get(image, &url, Some(MANIFEST_ACCEPT)).await?;
        ensure_success(&resp, "manifest fetch")?;

        let header_digest = resp
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PeekError::Transport(format!("GET {url}: {e}")))?
            .to_vec();

        let digest = header_digest
            .unwrap_or_else(|| format!("sha256:{:x}", Sha256::digest(&bytes)));

        Ok((bytes, digest))
    }

    /// Query the OCI 1.1 Referrers API for artifacts referencing
    /// `digest`.
    pub async fn fetch_referrers(
        &self,
        image: &ImageReference,
        digest: &str,
    ) -> Result<IndexManifest> {
        let url = format!(
            "{}://{}/v2/{}/referrers/{}",
            scheme_for(image.api_host()),
            image.api_host(),
            image.repository,
            digest
        );
        let resp = self
            .authed_get(image, &url, Some("application/vnd.oci.image.index.v1+json"))
            .await?;
        ensure_success(&resp, "referrers query")?;
        resp.json::<IndexManifest>()
            .await
            .map_err(|e| PeekError::Serialization(format!("referrers index: {e}")))
    }

    /// Download a blob fully into memory (zTOCs and other small
    /// artifacts).
    pub async fn fetch_blob_bytes(
        &self,
        image: &ImageReference,
        digest: &str,
    ) -> Result<Vec<u8>> {
        let url = self.blob_url(image, digest);
        let resp = self.authed_get(image, &url, None).await?;
        ensure_success(&resp, "blob fetch")?;
        Ok(resp
            .bytes()
            .await
            .map_err(|e| PeekError::Transport(format!("GET {url}: {e}")))?
            .to_vec())
    }

    /// Open a layer blob as a sequential byte stream.
    pub async fn open_blob(
        &self,
        image: &ImageReference,
        digest: &str,
    ) -> Result<impl tokio::io::AsyncRead + Send + Unpin + 'static> {
        use futures::TryStreamExt;

        let url = self.blob_url(image, digest);
        let resp = self.authed_get(image, &url, None).await?;
        ensure_success(&resp, "blob stream")?;
        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(StreamReader::new(Box::pin(stream)))
    }

    /// Build a range reader over a layer blob, reusing the credentials
    /// established when the manifest was fetched.
    pub async fn range_reader(
        &self,
        image: &ImageReference,
        layer: &LayerDescriptor,
        cancel: CancellationToken,
    ) -> Result<RangeReader> {
        let auth = self.cached_token(image).await;
        RangeReader::new(self.http.clone(), layer.blob_url.clone(), auth, cancel).await
    }

    async fn cached_token(&self, image: &ImageReference) -> Option<String> {
        let key = token_key(image);
        self.tokens.lock().await.get(&key).cloned()
    }

    /// GET with Bearer token handling: reuse a cached token, and on 401
    /// run the challenge/response dance once and retry.
    async fn authed_get(
        &self,
        image: &ImageReference,
        url: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response> {
        let key = token_key(image);
        let cached = self.tokens.lock().await.get(&key).cloned();

        let resp = self.send_get(url, accept, cached.as_deref()).await?;
        if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge)
            .ok_or_else(|| PeekError::HttpStatus {
                context: format!("GET {url}"),
                status: 401,
            })?;

        let token = self.fetch_token(&challenge).await?;
        let header = format!("Bearer {token}");
        self.tokens.lock().await.insert(key, header.clone());
        debug!(url = %url, "authenticated with registry token");

        self.send_get(url, accept, Some(&header)).await
    }

    async fn send_get(
        &self,
        url: &str,
        accept: Option<&str>,
        auth: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut req = self.http.get(url);
        if let Some(accept) = accept {
            req = req.header(ACCEPT, accept);
        }
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        req.send()
            .await
            .map_err(|e| PeekError::Transport(format!("GET {url}: {e}")))
    }

    /// Fetch a token from the challenge's realm endpoint.
    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(default)]
            token: Option<String>,
            #[serde(default)]
            access_token: Option<String>,
        }

        let mut req = self.http.get(&challenge.realm);
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(ref service) = challenge.service {
            query.push(("service", service));
        }
        if let Some(ref scope) = challenge.scope {
            query.push(("scope", scope));
        }
        req = req.query(&query);
        if let (Some(u), Some(p)) = (&self.auth.username, &self.auth.password) {
            req = req.basic_auth(u, Some(p));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PeekError::Transport(format!("token request: {e}")))?;
        ensure_success(&resp, "token request")?;

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PeekError::Serialization(format!("token response: {e}")))?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| PeekError::Registry("token endpoint returned no token".to_string()))
    }
}

fn token_key(image: &ImageReference) -> String {
    format!("{}/{}", image.api_host(), image.repository)
}

/// Plain HTTP for loopback registries, HTTPS everywhere else.
fn scheme_for(host: &str) -> &'static str {
    if host == "localhost" || host.starts_with("localhost:") || host.starts_with("127.") {
        "http"
    } else {
        "https"
    }
}

fn ensure_success(resp: &reqwest::Response, context: &str) -> Result<()> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(PeekError::HttpStatus {
            context: context.to_string(),
            status: resp.status().as_u16(),
        })
    }
}

/// A parsed `WWW-Authenticate: Bearer` challenge.
#[derive(Debug, Clone, PartialEq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.trim().strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"').to_string();
        match key {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}

/// Pick the manifest for this host from an image index: `linux` plus
/// the host architecture, falling back to the first entry.
fn select_platform_manifest(index: &IndexManifest) -> Result<&Descriptor> {
    let arch = host_architecture();
    index
        .manifests
        .iter()
        .find(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .or_else(|| index.manifests.first())
        .ok_or_else(|| PeekError::Registry("image index lists no manifests".to_string()))
}

/// OCI architecture name for the host.
fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

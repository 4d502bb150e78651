//! OCI image reference parsing.
//!
//! Parses references like `nginx:1.25` or `ghcr.io/org/app@sha256:...`
//! into structured components, applying the Docker conventions for
//! defaults (`docker.io` registry, `library/` namespace, `latest` tag).

use ocipeek_core::{PeekError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "docker.io", "ghcr.io", "localhost:5000").
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app").
    pub repository: String,
    /// Tag, if present (e.g., "latest", "1.25").
    pub tag: Option<String>,
    /// Digest, if present (e.g., "sha256:abc...").
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supported forms:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `user/app` → docker.io/user/app:latest
    /// - `ghcr.io/org/app:v1` → ghcr.io/org/app:v1
    /// - `ghcr.io/org/app@sha256:...` → digest reference
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PeekError::InvalidReference("empty reference".to_string()));
        }

        // Digest comes after '@' and always contains "algorithm:hex".
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((head, digest)) => {
                if !digest.contains(':') {
                    return Err(PeekError::InvalidReference(format!(
                        "digest in '{reference}' must be algorithm:hex"
                    )));
                }
                (head, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag — unless it looks
        // like a registry port (digits only, no '/' follows).
        let (name, tag) = match name_tag.rsplit_once(':') {
            Some((head, tail)) if !tail.contains('/') => {
                let is_port = !head.contains('/') && tail.chars().all(|c| c.is_ascii_digit());
                if is_port {
                    (name_tag, None)
                } else {
                    (head, Some(tail.to_string()))
                }
            }
            _ => (name_tag, None),
        };

        let (registry, repository) = split_registry_repository(name)?;

        // Default tag only applies to tag-less, digest-less references.
        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Hostname to use for Registry API requests. Docker Hub aliases
    /// (`docker.io`, `index.docker.io`) are served by
    /// `registry-1.docker.io`; every other host is used verbatim.
    pub fn api_host(&self) -> &str {
        match self.registry.as_str() {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            other => other,
        }
    }

    /// Tag or digest to request the manifest with.
    pub fn manifest_reference(&self) -> &str {
        if let Some(ref digest) = self.digest {
            digest
        } else if let Some(ref tag) = self.tag {
            tag
        } else {
            DEFAULT_TAG
        }
    }

    /// The full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

/// Split `name` into registry and repository. The first component is a
/// registry if it contains a dot or a port, or is `localhost`;
/// otherwise the whole name is a Docker Hub repository, with bare names
/// mapped into the `library/` namespace.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(PeekError::InvalidReference(format!(
                    "empty repository in '{name}'"
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{name}")
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

impl std::str::FromStr for ImageReference {
    type Err = PeekError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

//! SOCI index discovery.
//!
//! SOCI stores its index out of band, as a registry artifact referring
//! to the image by digest. Discovery first asks the OCI 1.1 Referrers
//! API, then falls back to the `sha256-{hex}.soci` tag convention used
//! by registries without referrers support. Absence of an index is not
//! an error: the orchestrator simply drops the SOCI strategy.

use serde::Deserialize;
use tracing::debug;

use ocipeek_core::Result;

use crate::reference::ImageReference;
use crate::registry::{Descriptor, RegistryClient};

/// Artifact type of a SOCI index.
pub const SOCI_INDEX_ARTIFACT_TYPE: &str = "application/vnd.aws.soci.index.v1+json";

/// Annotation linking a zTOC descriptor to its layer digest.
pub const SOCI_LAYER_DIGEST_ANNOTATION: &str = "com.amazon.aws.soci.layer.digest";

/// SOCI index manifest: zTOC descriptors appear under `layers` (image
/// manifest shape) or `manifests` (index shape), depending on how the
/// producer serialised it.
#[derive(Debug, Clone, Deserialize)]
pub struct SociIndexManifest {
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl SociIndexManifest {
    /// All sub-descriptors, whichever field they were carried in.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.manifests.iter().chain(self.layers.iter())
    }
}

/// A discovered SOCI index for one image.
#[derive(Debug, Clone)]
pub struct SociIndexInfo {
    /// Digest of the index manifest.
    pub digest: String,
    /// The parsed index manifest.
    pub manifest: SociIndexManifest,
}

/// Find the SOCI index for an image, if any.
pub async fn discover_soci_index(
    client: &RegistryClient,
    image: &ImageReference,
    manifest_digest: &str,
) -> Result<Option<SociIndexInfo>> {
    // Referrers API first.
    match client.fetch_referrers(image, manifest_digest).await {
        Ok(referrers) => {
            let found = referrers.manifests.iter().find(|d| {
                d.artifact_type.as_deref() == Some(SOCI_INDEX_ARTIFACT_TYPE)
                    || d.media_type == SOCI_INDEX_ARTIFACT_TYPE
            });
            if let Some(descriptor) = found {
                debug!(digest = %descriptor.digest, "found SOCI index via referrers");
                let (bytes, digest) = client.fetch_manifest(image, &descriptor.digest).await?;
                return Ok(Some(SociIndexInfo {
                    digest,
                    manifest: parse_index(&bytes)?,
                }));
            }
        }
        Err(e) => {
            debug!(error = %e, "referrers API unavailable");
        }
    }

    // Tag convention fallback.
    let Some(hex) = manifest_digest.strip_prefix("sha256:") else {
        return Ok(None);
    };
    let tag = format!("sha256-{hex}.soci");
    match client.fetch_manifest(image, &tag).await {
        Ok((bytes, digest)) => {
            debug!(tag = %tag, "found SOCI index via tag convention");
            Ok(Some(SociIndexInfo {
                digest,
                manifest: parse_index(&bytes)?,
            }))
        }
        Err(e) => {
            debug!(error = %e, "no SOCI index for image");
            Ok(None)
        }
    }
}

fn parse_index(bytes: &[u8]) -> Result<SociIndexManifest> {
    serde_json::from_slice(bytes).map_err(|e| {
        ocipeek_core::PeekError::Serialization(format!("SOCI index manifest: {e}"))
    })
}

/// Fetch the zTOC blob for `layer_digest`, scanning the index's
/// sub-descriptors for the layer-digest annotation. First match wins;
/// layers without a zTOC yield `None`.
pub async fn ztoc_for_layer(
    client: &RegistryClient,
    image: &ImageReference,
    index: &SociIndexInfo,
    layer_digest: &str,
) -> Result<Option<Vec<u8>>> {
    let descriptor = index.manifest.descriptors().find(|d| {
        d.annotations
            .get(SOCI_LAYER_DIGEST_ANNOTATION)
            .is_some_and(|v| v == layer_digest)
    });
    let Some(descriptor) = descriptor else {
        debug!(layer = %layer_digest, "no zTOC for layer");
        return Ok(None);
    };

    let bytes = client.fetch_blob_bytes(image, &descriptor.digest).await?;
    debug!(
        layer = %layer_digest,
        ztoc = %descriptor.digest,
        size = bytes.len(),
        "fetched zTOC"
    );
    Ok(Some(bytes))
}

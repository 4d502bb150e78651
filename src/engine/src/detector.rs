//! Layer format detection.
//!
//! Classification is advisory: it combines the manifest media type with
//! an optional probe of the blob's final bytes, but the orchestrator
//! still walks the full strategy chain. Proving a format up front costs
//! the same round-trip as simply attempting it.

use ocipeek_core::Result;

use crate::estargz;
use crate::remote::RangeReader;

/// OCI/Docker gzip layer media types.
pub const MEDIA_TYPE_OCI_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_DOCKER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// OCI/Docker zstd layer media types.
pub const MEDIA_TYPE_OCI_TAR_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
pub const MEDIA_TYPE_DOCKER_TAR_ZSTD: &str = "application/vnd.docker.image.rootfs.diff.tar.zstd";

/// Detected (or forced) layer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFormat {
    /// Plain gzip-compressed tar layer.
    StandardGzip,
    /// eStargz: gzip-compatible with an embedded TOC and footer.
    EStargz,
    /// SOCI: standard layer indexed by an out-of-band zTOC artifact.
    Soci,
    /// Plain zstd-compressed tar layer.
    Zstd,
    /// zstd:chunked: zstd-compatible with an embedded TOC and footer.
    ZstdChunked,
    /// Could not be determined; the orchestrator tries everything.
    Unknown,
}

impl std::fmt::Display for LayerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LayerFormat::StandardGzip => "standard-gzip",
            LayerFormat::EStargz => "estargz",
            LayerFormat::Soci => "soci",
            LayerFormat::Zstd => "zstd",
            LayerFormat::ZstdChunked => "zstd-chunked",
            LayerFormat::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LayerFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" | "standard-gzip" => Ok(LayerFormat::StandardGzip),
            "estargz" => Ok(LayerFormat::EStargz),
            "soci" => Ok(LayerFormat::Soci),
            "zstd" => Ok(LayerFormat::Zstd),
            "zstd-chunked" => Ok(LayerFormat::ZstdChunked),
            _ => Err(format!(
                "unknown format '{s}' (supported: standard, estargz, soci, zstd, zstd-chunked)"
            )),
        }
    }
}

impl LayerFormat {
    /// Whether the layer's outer compression is zstd.
    pub fn is_zstd(&self) -> bool {
        matches!(self, LayerFormat::Zstd | LayerFormat::ZstdChunked)
    }
}

/// Classify a layer from its manifest media type alone.
pub fn detect_media_type(media_type: &str) -> LayerFormat {
    match media_type {
        MEDIA_TYPE_OCI_TAR_ZSTD | MEDIA_TYPE_DOCKER_TAR_ZSTD => LayerFormat::Zstd,
        MEDIA_TYPE_OCI_TAR_GZIP | MEDIA_TYPE_DOCKER_TAR_GZIP => LayerFormat::StandardGzip,
        _ => LayerFormat::Unknown,
    }
}

/// Refine a media-type guess with a footer probe over a range reader.
/// Upgrades gzip layers to eStargz when the blob ends with the eStargz
/// footer. Blobs shorter than the footer are never probed.
pub async fn detect(media_type: &str, reader: &RangeReader) -> Result<LayerFormat> {
    let base = detect_media_type(media_type);
    match base {
        LayerFormat::StandardGzip | LayerFormat::Unknown => {
            if estargz::has_footer(reader).await? {
                Ok(LayerFormat::EStargz)
            } else {
                Ok(base)
            }
        }
        other => Ok(other),
    }
}

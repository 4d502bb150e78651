//! Extraction orchestrator.
//!
//! Walks an image's layers in reverse manifest order (upper layers
//! shadow lower ones), attempts an ordered list of per-layer strategies
//! with graceful fallback, and stops at the first success. Errors
//! between strategies and between layers are advisory; only local I/O
//! failures and cancellation abort the call.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ocipeek_core::{PeekError, Result};

use crate::detector::{self, LayerFormat};
use crate::estargz::EstargzReader;
use crate::reference::ImageReference;
use crate::registry::{LayerDescriptor, RegistryClient, ResolvedImage};
use crate::remote::RangeReader;
use crate::soci::{self, SociExtractor, SociIndexInfo};
use crate::stream::{self, StreamCodec};
use crate::zstd_chunked::ZstdChunkedReader;

/// Outcome of one strategy attempt against one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The file was found and written; the call is done.
    Extracted,
    /// The strategy parsed the layer but the file is not there.
    Absent,
}

/// One per-layer extraction method, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    EStargz,
    Soci,
    ZstdChunked,
    ZstdStream,
    GzipStream,
}

impl Strategy {
    /// Seekable strategies need a working range reader.
    fn is_seekable(self) -> bool {
        matches!(self, Strategy::EStargz | Strategy::Soci | Strategy::ZstdChunked)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::EStargz => "estargz",
            Strategy::Soci => "soci",
            Strategy::ZstdChunked => "zstd-chunked",
            Strategy::ZstdStream => "zstd-stream",
            Strategy::GzipStream => "gzip-stream",
        };
        write!(f, "{s}")
    }
}

/// Options for a single extraction.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Image reference string (e.g., `alpine:latest`).
    pub image: String,
    /// Path inside the image.
    pub path: String,
    /// Local output path.
    pub output: PathBuf,
    /// Force a single format instead of auto-detection.
    pub format: Option<LayerFormat>,
}

/// The extraction engine.
pub struct Orchestrator {
    client: RegistryClient,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::with_client(RegistryClient::new())
    }

    pub fn with_client(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Extract one file from the image, trying layers top to bottom.
    pub async fn extract(&self, req: &ExtractRequest, cancel: &CancellationToken) -> Result<()> {
        let image = ImageReference::parse(&req.image)?;
        let resolved = self.client.get_enhanced_layers(&image).await?;
        info!(
            image = %image,
            layers = resolved.layers.len(),
            path = %req.path,
            "starting extraction"
        );

        let soci_index = self.maybe_discover_soci(&image, &resolved, req.format).await;

        // A symlink/directory match is a better diagnostic than a bare
        // not-found if no deeper layer has a regular file.
        let mut non_regular: Option<PeekError> = None;

        for (index, layer) in resolved.layers.iter().enumerate().rev() {
            if cancel.is_cancelled() {
                return Err(PeekError::Cancelled);
            }
            debug!(index, digest = %layer.digest, "checking layer");

            match self
                .extract_from_layer(&image, layer, soci_index.as_ref(), req, cancel)
                .await
            {
                Ok(StrategyOutcome::Extracted) => {
                    info!(digest = %layer.digest, output = %req.output.display(), "extracted");
                    return Ok(());
                }
                Ok(StrategyOutcome::Absent) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e @ (PeekError::LinkTarget { .. } | PeekError::NotRegularFile { .. })) => {
                    debug!(digest = %layer.digest, error = %e, "matched a non-regular entry");
                    non_regular = Some(e);
                }
                Err(e) => {
                    debug!(digest = %layer.digest, error = %e, "layer failed");
                }
            }
        }

        Err(non_regular.unwrap_or_else(|| PeekError::FileNotFound {
            image: req.image.clone(),
            path: req.path.clone(),
        }))
    }

    /// List regular files across all layers, upper layers first, each
    /// path exactly once.
    pub async fn list(
        &self,
        image_ref: &str,
        format: Option<LayerFormat>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let image = ImageReference::parse(image_ref)?;
        let resolved = self.client.get_enhanced_layers(&image).await?;
        info!(image = %image, layers = resolved.layers.len(), "listing files");

        let soci_index = self.maybe_discover_soci(&image, &resolved, format).await;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (index, layer) in resolved.layers.iter().enumerate().rev() {
            if cancel.is_cancelled() {
                return Err(PeekError::Cancelled);
            }
            debug!(index, digest = %layer.digest, "listing layer");

            match self
                .list_layer(&image, layer, soci_index.as_ref(), format, cancel)
                .await
            {
                Ok(files) => {
                    for file in files {
                        if seen.insert(file.clone()) {
                            out.push(file);
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(digest = %layer.digest, error = %e, "layer listing failed");
                }
            }
        }
        Ok(out)
    }

    /// Discover the SOCI index unless a non-SOCI format is forced.
    async fn maybe_discover_soci(
        &self,
        image: &ImageReference,
        resolved: &ResolvedImage,
        format: Option<LayerFormat>,
    ) -> Option<SociIndexInfo> {
        if !matches!(format, None | Some(LayerFormat::Soci)) {
            return None;
        }
        match soci::discover_soci_index(&self.client, image, &resolved.manifest_digest).await {
            Ok(Some(info)) => {
                info!(digest = %info.digest, "found SOCI index");
                Some(info)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "SOCI discovery failed");
                None
            }
        }
    }

    /// Try every applicable strategy against one layer.
    async fn extract_from_layer(
        &self,
        image: &ImageReference,
        layer: &LayerDescriptor,
        soci_index: Option<&SociIndexInfo>,
        req: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<StrategyOutcome> {
        let range_reader = self.layer_range_reader(image, layer, cancel).await;
        if let Some(ref reader) = range_reader {
            if let Ok(format) = detector::detect(&layer.media_type, reader).await {
                debug!(digest = %layer.digest, format = %format, "detected format");
            }
        }

        let strategies = strategies_for(layer, req.format, soci_index.is_some());
        let mut non_regular: Option<PeekError> = None;

        for strategy in strategies {
            if cancel.is_cancelled() {
                return Err(PeekError::Cancelled);
            }
            if strategy.is_seekable() && range_reader.is_none() {
                debug!(strategy = %strategy, "skipped: no range support");
                continue;
            }
            debug!(strategy = %strategy, "attempting strategy");

            let attempt = self
                .run_strategy(strategy, image, layer, soci_index, range_reader.as_ref(), req)
                .await;

            match attempt {
                Ok(StrategyOutcome::Extracted) => return Ok(StrategyOutcome::Extracted),
                Ok(StrategyOutcome::Absent) => {
                    debug!(strategy = %strategy, "file absent");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e @ (PeekError::LinkTarget { .. } | PeekError::NotRegularFile { .. })) => {
                    debug!(strategy = %strategy, error = %e, "non-regular match");
                    non_regular = Some(e);
                }
                Err(e) => {
                    debug!(strategy = %strategy, error = %e, "strategy failed");
                }
            }
        }

        match non_regular {
            Some(e) => Err(e),
            None => Ok(StrategyOutcome::Absent),
        }
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        image: &ImageReference,
        layer: &LayerDescriptor,
        soci_index: Option<&SociIndexInfo>,
        range_reader: Option<&Arc<RangeReader>>,
        req: &ExtractRequest,
    ) -> Result<StrategyOutcome> {
        // Seekable strategies are only dispatched when the caller has a
        // range reader for the layer.
        let seekable = || {
            range_reader.cloned().ok_or_else(|| {
                PeekError::RangeUnsupported {
                    url: layer.blob_url.clone(),
                }
            })
        };

        match strategy {
            Strategy::EStargz => {
                let estargz = EstargzReader::open(seekable()?).await?;
                estargz.extract_to(&req.path, &req.output).await
            }
            Strategy::Soci => {
                let Some(index) = soci_index else {
                    return Ok(StrategyOutcome::Absent);
                };
                let Some(ztoc) =
                    soci::ztoc_for_layer(&self.client, image, index, &layer.digest).await?
                else {
                    // Layer not covered by the index; fall through.
                    return Ok(StrategyOutcome::Absent);
                };
                let extractor = SociExtractor::new(seekable()?, &ztoc)?;
                extractor.extract_to(&req.path, &req.output).await
            }
            Strategy::ZstdChunked => {
                let chunked = ZstdChunkedReader::open(seekable()?).await?;
                chunked.extract_to(&req.path, &req.output).await
            }
            Strategy::ZstdStream => {
                let source = self.client.open_blob(image, &layer.digest).await?;
                stream::extract_from_stream(source, StreamCodec::Zstd, &req.path, &req.output)
                    .await
            }
            Strategy::GzipStream => {
                let source = self.client.open_blob(image, &layer.digest).await?;
                stream::extract_from_stream(source, StreamCodec::Gzip, &req.path, &req.output)
                    .await
            }
        }
    }

    /// Produce a listing for one layer via the first strategy that can
    /// enumerate it.
    async fn list_layer(
        &self,
        image: &ImageReference,
        layer: &LayerDescriptor,
        soci_index: Option<&SociIndexInfo>,
        format: Option<LayerFormat>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let range_reader = self.layer_range_reader(image, layer, cancel).await;
        let strategies = strategies_for(layer, format, soci_index.is_some());
        let mut last_err: Option<PeekError> = None;

        for strategy in strategies {
            if cancel.is_cancelled() {
                return Err(PeekError::Cancelled);
            }
            if strategy.is_seekable() && range_reader.is_none() {
                continue;
            }

            let attempt: Result<Vec<String>> = match strategy {
                Strategy::EStargz => {
                    let Some(reader) = range_reader.clone() else { continue };
                    match EstargzReader::open(reader).await {
                        Ok(estargz) => estargz.list().await,
                        Err(e) => Err(e),
                    }
                }
                Strategy::Soci => {
                    let Some(index) = soci_index else { continue };
                    let Some(reader) = range_reader.clone() else { continue };
                    match soci::ztoc_for_layer(&self.client, image, index, &layer.digest).await? {
                        Some(ztoc) => SociExtractor::new(reader, &ztoc).map(|ex| ex.list()),
                        None => continue,
                    }
                }
                // Enumeration of a zstd:chunked layer is the plain
                // tar.zst walk.
                Strategy::ZstdChunked | Strategy::ZstdStream => {
                    match self.client.open_blob(image, &layer.digest).await {
                        Ok(source) => stream::list_from_stream(source, StreamCodec::Zstd).await,
                        Err(e) => Err(e),
                    }
                }
                Strategy::GzipStream => {
                    match self.client.open_blob(image, &layer.digest).await {
                        Ok(source) => stream::list_from_stream(source, StreamCodec::Gzip).await,
                        Err(e) => Err(e),
                    }
                }
            };

            match attempt {
                Ok(files) => return Ok(files),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(strategy = %strategy, error = %e, "listing strategy failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            PeekError::FormatMismatch("no strategy could enumerate layer".to_string())
        }))
    }

    /// Build the per-layer range reader; `None` disables the seekable
    /// strategies for this layer while streaming remains possible.
    async fn layer_range_reader(
        &self,
        image: &ImageReference,
        layer: &LayerDescriptor,
        cancel: &CancellationToken,
    ) -> Option<Arc<RangeReader>> {
        match self.client.range_reader(image, layer, cancel.clone()).await {
            Ok(reader) => Some(Arc::new(reader)),
            Err(e) => {
                debug!(digest = %layer.digest, error = %e, "range reader unavailable");
                None
            }
        }
    }
}

/// Ordered strategy list for one layer. A forced format pins a single
/// strategy; otherwise the fixed order eStargz → SOCI → zstd-chunked →
/// zstd-stream → gzip-stream applies, filtered down to the strategies
/// applicable to the layer's media type.
fn strategies_for(
    layer: &LayerDescriptor,
    force: Option<LayerFormat>,
    has_soci: bool,
) -> Vec<Strategy> {
    let hint = detector::detect_media_type(&layer.media_type);

    if let Some(format) = force {
        return match format {
            LayerFormat::EStargz => vec![Strategy::EStargz],
            LayerFormat::Soci => vec![Strategy::Soci],
            LayerFormat::ZstdChunked => vec![Strategy::ZstdChunked],
            LayerFormat::Zstd => vec![Strategy::ZstdStream],
            LayerFormat::StandardGzip if hint.is_zstd() => vec![Strategy::ZstdStream],
            LayerFormat::StandardGzip => vec![Strategy::GzipStream],
            LayerFormat::Unknown => full_chain(has_soci),
        };
    }

    match hint {
        LayerFormat::Zstd | LayerFormat::ZstdChunked => {
            vec![Strategy::ZstdChunked, Strategy::ZstdStream]
        }
        LayerFormat::StandardGzip | LayerFormat::EStargz => {
            let mut out = vec![Strategy::EStargz];
            if has_soci {
                out.push(Strategy::Soci);
            }
            out.push(Strategy::GzipStream);
            out
        }
        _ => full_chain(has_soci),
    }
}

fn full_chain(has_soci: bool) -> Vec<Strategy> {
    let mut out = vec![Strategy::EStargz];
    if has_soci {
        out.push(Strategy::Soci);
    }
    out.extend([
        Strategy::ZstdChunked,
        Strategy::ZstdStream,
        Strategy::GzipStream,
    ]);
    out
}

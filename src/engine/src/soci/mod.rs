//! SOCI (zTOC-indexed) layer extraction.
//!
//! The index lives out of band as a registry artifact; given a layer's
//! zTOC and a range reader over the layer blob, a file is materialised
//! by fetching only the compressed spans covering it and decompressing
//! from the nearest checkpoint.

pub mod discovery;
pub mod ztoc;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use tracing::debug;

use ocipeek_core::{PeekError, Result};

use crate::orchestrator::StrategyOutcome;
use crate::output;
use crate::remote::RangeReader;

pub use discovery::{discover_soci_index, ztoc_for_layer, SociIndexInfo};
pub use ztoc::Ztoc;

/// Extractor over one SOCI-indexed layer.
pub struct SociExtractor {
    reader: Arc<RangeReader>,
    ztoc: Ztoc,
}

impl SociExtractor {
    /// Unmarshal the zTOC and bind it to the layer blob.
    pub fn new(reader: Arc<RangeReader>, ztoc_blob: &[u8]) -> Result<Self> {
        let ztoc = Ztoc::unmarshal(ztoc_blob)?;
        debug!(
            files = ztoc.toc.file_metadata.len(),
            spans = ztoc.compression_info.checkpoints.len(),
            "parsed zTOC"
        );
        Ok(Self { reader, ztoc })
    }

    /// Extract `path` to `output`; `Absent` when the zTOC lacks it.
    pub async fn extract_to(&self, path: &str, output: &Path) -> Result<StrategyOutcome> {
        let Some(file) = self.ztoc.file_metadata(path) else {
            return Ok(StrategyOutcome::Absent);
        };

        match file.kind.as_str() {
            "reg" => {}
            "symlink" | "hardlink" => {
                return Err(PeekError::LinkTarget {
                    path: path.to_string(),
                    target: file.link_name.clone().unwrap_or_default(),
                });
            }
            other => {
                return Err(PeekError::NotRegularFile {
                    path: path.to_string(),
                    kind: other.to_string(),
                });
            }
        }

        let bounds = self.ztoc.span_bounds(file)?;
        let span = self
            .reader
            .read_range(
                bounds.compressed_start,
                (bounds.compressed_end - bounds.compressed_start) as usize,
            )
            .await?;

        // Checkpoints sit on member boundaries, so the fetched run is a
        // self-contained multi-member gzip stream.
        let mut uncompressed = Vec::new();
        MultiGzDecoder::new(span.as_slice())
            .read_to_end(&mut uncompressed)
            .map_err(|e| PeekError::FormatMismatch(format!("ztoc span decompress: {e}")))?;

        let skip = (file.uncompressed_offset - bounds.uncompressed_start) as usize;
        let size = file.uncompressed_size as usize;
        if uncompressed.len() < skip + size {
            return Err(PeekError::FormatMismatch(format!(
                "ztoc span decompressed to {} bytes, need {}",
                uncompressed.len(),
                skip + size
            )));
        }

        output::write_bytes(output, &uncompressed[skip..skip + size])?;
        debug!(path = %path, bytes = size, "extracted via zTOC");
        Ok(StrategyOutcome::Extracted)
    }

    /// Display paths of the zTOC's regular files.
    pub fn list(&self) -> Vec<String> {
        self.ztoc.regular_files()
    }
}

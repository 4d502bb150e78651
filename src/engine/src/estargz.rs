//! eStargz layer reader.
//!
//! eStargz is a gzip-compatible archive: every entry's content sits in
//! its own gzip member, a JSON TOC member follows the archive, and a
//! fixed 47-byte footer at the end of the blob locates the TOC. A file
//! is served by reading only the compressed spans its chunks occupy.
//!
//! Footer layout: `tocOffset` (22 ASCII digits) ∥ `footerSize`
//! (10 ASCII digits) ∥ magic (15 bytes, `estargz.footer\0`).

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::debug;

use ocipeek_core::{PeekError, Result};

use crate::orchestrator::StrategyOutcome;
use crate::output;
use crate::pathutil;
use crate::remote::{sequential_stream, RangeReader};
use crate::stream::{self, StreamCodec};
use crate::toc::{Toc, TocEntryKind, TocFile, TocIndex};

/// Size of the eStargz footer.
pub const FOOTER_SIZE: u64 = 47;

/// Magic bytes terminating the footer.
const FOOTER_MAGIC: &[u8; 15] = b"estargz.footer\0";

/// Check whether a blob ends with the eStargz footer. Blobs shorter
/// than the footer are rejected without issuing a range read.
pub async fn has_footer(reader: &RangeReader) -> Result<bool> {
    Ok(read_footer(reader).await?.is_some())
}

/// Read and parse the footer; `None` when the magic does not match.
async fn read_footer(reader: &RangeReader) -> Result<Option<u64>> {
    if reader.size() < FOOTER_SIZE {
        return Ok(None);
    }
    let mut footer = [0u8; FOOTER_SIZE as usize];
    reader
        .read_exact_at(&mut footer, reader.size() - FOOTER_SIZE)
        .await?;
    Ok(parse_footer(&footer))
}

/// Parse the 47-byte footer, returning the TOC offset.
fn parse_footer(footer: &[u8; FOOTER_SIZE as usize]) -> Option<u64> {
    if &footer[32..] != FOOTER_MAGIC {
        return None;
    }
    let toc_offset = std::str::from_utf8(&footer[..22]).ok()?.parse::<u64>().ok()?;
    let footer_size = std::str::from_utf8(&footer[22..32]).ok()?.parse::<u64>().ok()?;
    if footer_size != FOOTER_SIZE {
        return None;
    }
    Some(toc_offset)
}

/// Open eStargz reader over one layer blob.
#[derive(Debug)]
pub struct EstargzReader {
    reader: Arc<RangeReader>,
    index: TocIndex,
}

impl EstargzReader {
    /// Open the blob: read the footer, then read and parse the TOC.
    /// Fails with `FormatMismatch` when the blob is not eStargz.
    pub async fn open(reader: Arc<RangeReader>) -> Result<Self> {
        let toc_offset = read_footer(&reader).await?.ok_or_else(|| {
            PeekError::FormatMismatch("blob has no estargz footer".to_string())
        })?;

        let toc_end = reader.size() - FOOTER_SIZE;
        if toc_offset >= toc_end {
            return Err(PeekError::FormatMismatch(format!(
                "estargz TOC offset {toc_offset} out of bounds"
            )));
        }

        let compressed = reader
            .read_range(toc_offset, (toc_end - toc_offset) as usize)
            .await?;
        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| PeekError::FormatMismatch(format!("estargz TOC decompress: {e}")))?;
        let toc: Toc = serde_json::from_slice(&json)
            .map_err(|e| PeekError::FormatMismatch(format!("estargz TOC parse: {e}")))?;

        debug!(entries = toc.entries.len(), toc_offset, "opened estargz TOC");

        Ok(Self {
            index: TocIndex::build(&toc, toc_offset),
            reader,
        })
    }

    /// Look up a path in the TOC.
    pub fn lookup(&self, path: &str) -> Option<&TocFile> {
        self.index.lookup(pathutil::entry_key(path))
    }

    /// Extract `path` to `output`. Returns `Absent` when the TOC has no
    /// such entry.
    pub async fn extract_to(&self, path: &str, output: &Path) -> Result<StrategyOutcome> {
        let Some(file) = self.lookup(path) else {
            return Ok(StrategyOutcome::Absent);
        };

        match file.kind {
            TocEntryKind::Reg => {}
            TocEntryKind::Symlink | TocEntryKind::Hardlink => {
                return Err(PeekError::LinkTarget {
                    path: path.to_string(),
                    target: file.link_name.clone().unwrap_or_default(),
                });
            }
            other => {
                return Err(PeekError::NotRegularFile {
                    path: path.to_string(),
                    kind: format!("{other:?}").to_lowercase(),
                });
            }
        }

        let bytes = self.file_bytes(file).await?;
        output::write_bytes(output, &bytes)?;
        Ok(StrategyOutcome::Extracted)
    }

    /// Materialise a regular file from its chunk spans.
    async fn file_bytes(&self, file: &TocFile) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(file.size as usize);
        for chunk in &file.chunks {
            let end = self.index.next_offset(chunk.offset);
            if end <= chunk.offset {
                return Err(PeekError::FormatMismatch(format!(
                    "estargz chunk span at {} has no extent",
                    chunk.offset
                )));
            }
            let span = self
                .reader
                .read_range(chunk.offset, (end - chunk.offset) as usize)
                .await?;

            let mut piece = Vec::new();
            GzDecoder::new(span.as_slice())
                .read_to_end(&mut piece)
                .map_err(|e| {
                    PeekError::FormatMismatch(format!("estargz chunk decompress: {e}"))
                })?;

            let want = if chunk.chunk_size == 0 {
                (file.size - chunk.chunk_offset) as usize
            } else {
                chunk.chunk_size as usize
            };
            if piece.len() < want {
                return Err(PeekError::FormatMismatch(format!(
                    "estargz chunk at {} decompressed to {} of {} bytes",
                    chunk.offset,
                    piece.len(),
                    want
                )));
            }
            out.extend_from_slice(&piece[..want]);
        }

        if out.len() != file.size as usize {
            return Err(PeekError::FormatMismatch(format!(
                "estargz file assembled to {} of {} bytes",
                out.len(),
                file.size
            )));
        }
        Ok(out)
    }

    /// List regular files. The TOC's chunk entries make direct
    /// enumeration lossy, so the blob is re-read from offset zero as a
    /// plain gzip+tar archive through the range reader — typically one
    /// large sequential fetch.
    pub async fn list(&self) -> Result<Vec<String>> {
        let source = sequential_stream(Arc::clone(&self.reader));
        stream::list_from_stream(source, StreamCodec::Gzip).await
    }
}

//! zstd:chunked layer reader.
//!
//! The zstd twin of eStargz: entry contents live in independent zstd
//! frames, a zstd-compressed JSON TOC follows the archive, and a
//! 40-byte skippable frame at the end of the blob locates the TOC.
//! Because the footer is a legal skippable frame, the whole blob still
//! decodes as a plain tar.zst stream, which is what the orchestrator's
//! zstd-stream fallback relies on when the TOC is unusable.
//!
//! Footer layout (little-endian): skippable-frame magic `0x184D2A50`,
//! payload size 32, TOC offset (u64), TOC compressed length (u64),
//! marker `GnUlInUx`, 8 reserved bytes.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use ocipeek_core::{PeekError, Result};

use crate::orchestrator::StrategyOutcome;
use crate::output;
use crate::pathutil;
use crate::remote::RangeReader;
use crate::toc::{Toc, TocEntryKind, TocFile, TocIndex};

/// Size of the footer frame.
pub const FOOTER_SIZE: u64 = 40;

/// zstd skippable frame magic (low nibble variant 0).
const SKIPPABLE_MAGIC: u32 = 0x184D2A50;

/// Format marker inside the footer payload.
const FOOTER_MARKER: &[u8; 8] = b"GnUlInUx";

/// Parsed footer: where the TOC frame lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Footer {
    toc_offset: u64,
    toc_length: u64,
}

fn parse_footer(raw: &[u8; FOOTER_SIZE as usize]) -> Option<Footer> {
    let magic = u32::from_le_bytes(raw[0..4].try_into().ok()?);
    let payload = u32::from_le_bytes(raw[4..8].try_into().ok()?);
    if magic != SKIPPABLE_MAGIC || payload != 32 || &raw[24..32] != FOOTER_MARKER {
        return None;
    }
    Some(Footer {
        toc_offset: u64::from_le_bytes(raw[8..16].try_into().ok()?),
        toc_length: u64::from_le_bytes(raw[16..24].try_into().ok()?),
    })
}

async fn read_footer(reader: &RangeReader) -> Result<Option<Footer>> {
    if reader.size() < FOOTER_SIZE {
        return Ok(None);
    }
    let mut raw = [0u8; FOOTER_SIZE as usize];
    reader
        .read_exact_at(&mut raw, reader.size() - FOOTER_SIZE)
        .await?;
    Ok(parse_footer(&raw))
}

/// Open zstd:chunked reader over one layer blob.
#[derive(Debug)]
pub struct ZstdChunkedReader {
    reader: Arc<RangeReader>,
    index: TocIndex,
}

impl ZstdChunkedReader {
    /// Open the blob: read the footer frame, then the TOC. Fails with
    /// `FormatMismatch` when the blob carries no TOC.
    pub async fn open(reader: Arc<RangeReader>) -> Result<Self> {
        let footer = read_footer(&reader).await?.ok_or_else(|| {
            PeekError::FormatMismatch("blob has no zstd:chunked footer".to_string())
        })?;

        match footer.toc_offset.checked_add(footer.toc_length) {
            Some(end) if end <= reader.size() - FOOTER_SIZE => {}
            _ => {
                return Err(PeekError::FormatMismatch(format!(
                    "zstd:chunked TOC span {}+{} out of bounds",
                    footer.toc_offset, footer.toc_length
                )));
            }
        }

        let compressed = reader
            .read_range(footer.toc_offset, footer.toc_length as usize)
            .await?;
        let json = zstd::stream::decode_all(compressed.as_slice())
            .map_err(|e| PeekError::FormatMismatch(format!("zstd:chunked TOC decompress: {e}")))?;
        let toc: Toc = serde_json::from_slice(&json)
            .map_err(|e| PeekError::FormatMismatch(format!("zstd:chunked TOC parse: {e}")))?;

        debug!(
            entries = toc.entries.len(),
            toc_offset = footer.toc_offset,
            "opened zstd:chunked TOC"
        );

        Ok(Self {
            index: TocIndex::build(&toc, footer.toc_offset),
            reader,
        })
    }

    /// Look up a path in the TOC.
    pub fn lookup(&self, path: &str) -> Option<&TocFile> {
        self.index.lookup(pathutil::entry_key(path))
    }

    /// Extract `path` to `output`; `Absent` when the TOC lacks it.
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

    async fn file_bytes(&self, file: &TocFile) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(file.size as usize);
        for chunk in &file.chunks {
            let end = self.index.next_offset(chunk.offset);
            if end <= chunk.offset {
                return Err(PeekError::FormatMismatch(format!(
                    "zstd:chunked span at {} has no extent",
                    chunk.offset
                )));
            }
            let span = self
                .reader
                .read_range(chunk.offset, (end - chunk.offset) as usize)
                .await?;
            let piece = zstd::stream::decode_all(span.as_slice()).map_err(|e| {
                PeekError::FormatMismatch(format!("zstd:chunked chunk decompress: {e}"))
            })?;

            let want = if chunk.chunk_size == 0 {
                (file.size - chunk.chunk_offset) as usize
            } else {
                chunk.chunk_size as usize
            };
            if piece.len() < want {
                return Err(PeekError::FormatMismatch(format!(
                    "zstd:chunked chunk at {} decompressed to {} of {} bytes",
                    chunk.offset,
                    piece.len(),
                    want
                )));
            }
            out.extend_from_slice(&piece[..want]);
        }

        if out.len() != file.size as usize {
            return Err(PeekError::FormatMismatch(format!(
                "zstd:chunked file assembled to {} of {} bytes",
                out.len(),
                file.size
            )));
        }
        Ok(out)
    }
}

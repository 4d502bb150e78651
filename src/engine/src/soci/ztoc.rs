//! zTOC document model.
//!
//! A zTOC describes one gzip layer: a checkpoint table marking offsets
//! where decompression can start (here: independent gzip member
//! boundaries), and per-file metadata locating each file inside the
//! uncompressed archive. Field names mirror the SOCI structures; the
//! document itself is JSON.

use serde::{Deserialize, Serialize};

use ocipeek_core::{PeekError, Result};

use crate::pathutil;

/// Parsed zTOC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ztoc {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "buildToolIdentifier", default)]
    pub build_tool_identifier: String,
    #[serde(rename = "compressedArchiveSize", default)]
    pub compressed_archive_size: u64,
    #[serde(rename = "uncompressedArchiveSize", default)]
    pub uncompressed_archive_size: u64,
    pub toc: ZtocToc,
    #[serde(rename = "compressionInfo")]
    pub compression_info: CompressionInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZtocToc {
    #[serde(rename = "fileMetadata", default)]
    pub file_metadata: Vec<FileMetadata>,
}

/// Per-file metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "uncompressedOffset", default)]
    pub uncompressed_offset: u64,
    #[serde(rename = "uncompressedSize", default)]
    pub uncompressed_size: u64,
    #[serde(rename = "spanStart", default)]
    pub span_start: u32,
    #[serde(rename = "spanEnd", default)]
    pub span_end: u32,
    #[serde(rename = "linkName", default, skip_serializing_if = "Option::is_none")]
    pub link_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionInfo {
    #[serde(rename = "maxSpanId", default)]
    pub max_span_id: u32,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

/// A decompression checkpoint: an independent gzip member begins at
/// `compressed_offset`, whose payload continues the archive at
/// `uncompressed_offset`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "spanId")]
    pub span_id: u32,
    #[serde(rename = "compressedOffset")]
    pub compressed_offset: u64,
    #[serde(rename = "uncompressedOffset")]
    pub uncompressed_offset: u64,
}

/// Compressed and uncompressed coordinates of a file's span run.
#[derive(Debug, Clone, Copy)]
pub struct SpanBounds {
    /// First compressed byte to fetch.
    pub compressed_start: u64,
    /// One past the last compressed byte to fetch.
    pub compressed_end: u64,
    /// Uncompressed offset the fetched run decompresses from.
    pub uncompressed_start: u64,
}

impl Ztoc {
    /// Parse a zTOC blob.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PeekError::FormatMismatch(format!("ztoc parse: {e}")))
    }

    /// Find a file by canonical path key.
    pub fn file_metadata(&self, path: &str) -> Option<&FileMetadata> {
        let key = pathutil::entry_key(path);
        self.toc
            .file_metadata
            .iter()
            .find(|f| pathutil::entry_key(&f.name) == key)
    }

    fn checkpoint(&self, span_id: u32) -> Option<&Checkpoint> {
        self.compression_info
            .checkpoints
            .iter()
            .find(|cp| cp.span_id == span_id)
    }

    /// Compressed interval covering `file`, bounded by the checkpoint
    /// after its last span (or the end of the archive).
    pub fn span_bounds(&self, file: &FileMetadata) -> Result<SpanBounds> {
        let start = self.checkpoint(file.span_start).ok_or_else(|| {
            PeekError::FormatMismatch(format!(
                "ztoc has no checkpoint for span {}",
                file.span_start
            ))
        })?;
        let compressed_end = match self.checkpoint(file.span_end + 1) {
            Some(cp) => cp.compressed_offset,
            None => self.compressed_archive_size,
        };
        if compressed_end <= start.compressed_offset {
            return Err(PeekError::FormatMismatch(format!(
                "ztoc span run {}..{} is empty",
                file.span_start, file.span_end
            )));
        }
        Ok(SpanBounds {
            compressed_start: start.compressed_offset,
            compressed_end,
            uncompressed_start: start.uncompressed_offset,
        })
    }

    /// Display paths of all regular files.
    pub fn regular_files(&self) -> Vec<String> {
        self.toc
            .file_metadata
            .iter()
            .filter(|f| f.kind == "reg" && !pathutil::entry_key(&f.name).is_empty())
            .map(|f| pathutil::display_path(&f.name))
            .collect()
    }
}

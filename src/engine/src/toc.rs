//! Embedded table-of-contents model shared by the eStargz and
//! zstd:chunked readers.
//!
//! Both formats append a JSON TOC to the layer blob; the entry schema
//! follows the eStargz specification (camelCase field names, `chunk`
//! continuation entries for files split across compression members).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pathutil;

/// Table of contents embedded in a seekable layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toc {
    /// TOC format version (currently 1).
    pub version: u32,
    /// All entries, in blob order.
    pub entries: Vec<TocEntry>,
}

/// Type of a TOC entry. Matches the eStargz specification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TocEntryKind {
    /// Regular file.
    Reg,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Hard link.
    Hardlink,
    /// Character device.
    Char,
    /// Block device.
    Block,
    /// FIFO (named pipe).
    Fifo,
    /// Continuation chunk of a regular file.
    Chunk,
}

/// A single entry in the TOC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocEntry {
    /// Path in the layer, as written by the builder.
    pub name: String,

    /// Entry type.
    #[serde(rename = "type")]
    pub kind: TocEntryKind,

    /// Uncompressed size for regular files.
    #[serde(default)]
    pub size: u64,

    /// Offset in the compressed blob of the compression member holding
    /// this entry's (or chunk's) content.
    #[serde(default)]
    pub offset: u64,

    /// Offset of this chunk within the file's uncompressed contents.
    #[serde(rename = "chunkOffset", default)]
    pub chunk_offset: u64,

    /// Uncompressed length of this chunk. Zero means "to end of file".
    #[serde(rename = "chunkSize", default)]
    pub chunk_size: u64,

    /// Link target for symlinks and hardlinks.
    #[serde(rename = "linkName", default, skip_serializing_if = "Option::is_none")]
    pub link_name: Option<String>,
}

impl TocEntry {
    /// Canonical lookup key for this entry.
    pub fn key(&self) -> &str {
        pathutil::entry_key(&self.name)
    }
}

/// One contiguous chunk of a regular file: where its compression member
/// starts in the blob, and which slice of the file it decompresses to.
#[derive(Debug, Clone, Copy)]
pub struct FileChunk {
    /// Blob offset of the compression member.
    pub offset: u64,
    /// Offset within the file's uncompressed contents.
    pub chunk_offset: u64,
    /// Uncompressed chunk length (zero = rest of file).
    pub chunk_size: u64,
}

/// A file (or link, or directory) resolved from the TOC, with its
/// chunk list assembled from `reg` + `chunk` entries.
#[derive(Debug, Clone)]
pub struct TocFile {
    pub kind: TocEntryKind,
    pub size: u64,
    pub link_name: Option<String>,
    pub chunks: Vec<FileChunk>,
}

/// Index over a parsed TOC: per-path file records plus the sorted list
/// of member offsets used to bound compressed spans.
#[derive(Debug)]
pub struct TocIndex {
    files: HashMap<String, TocFile>,
    /// Sorted offsets of every content member plus the TOC terminator.
    offsets: Vec<u64>,
}

impl TocIndex {
    /// Build an index from TOC entries. `end_offset` is the blob offset
    /// where content members end (the TOC's own member).
    pub fn build(toc: &Toc, end_offset: u64) -> Self {
        let mut files: HashMap<String, TocFile> = HashMap::new();
        let mut offsets = vec![end_offset];

        for entry in &toc.entries {
            let key = entry.key().to_string();
            if key.is_empty() {
                continue;
            }
            match entry.kind {
                TocEntryKind::Chunk => {
                    offsets.push(entry.offset);
                    if let Some(file) = files.get_mut(&key) {
                        file.chunks.push(FileChunk {
                            offset: entry.offset,
                            chunk_offset: entry.chunk_offset,
                            chunk_size: entry.chunk_size,
                        });
                    }
                }
                TocEntryKind::Reg => {
                    let mut chunks = Vec::new();
                    if entry.size > 0 {
                        offsets.push(entry.offset);
                        chunks.push(FileChunk {
                            offset: entry.offset,
                            chunk_offset: 0,
                            chunk_size: entry.chunk_size,
                        });
                    }
                    files.insert(
                        key,
                        TocFile {
                            kind: entry.kind,
                            size: entry.size,
                            link_name: entry.link_name.clone(),
                            chunks,
                        },
                    );
                }
                _ => {
                    files.insert(
                        key,
                        TocFile {
                            kind: entry.kind,
                            size: 0,
                            link_name: entry.link_name.clone(),
                            chunks: Vec::new(),
                        },
                    );
                }
            }
        }

        offsets.sort_unstable();
        offsets.dedup();
        Self { files, offsets }
    }

    /// Look up a file by canonical key.
    pub fn lookup(&self, key: &str) -> Option<&TocFile> {
        self.files.get(key)
    }

    /// The first member offset strictly greater than `offset`, bounding
    /// the compressed span of the member starting at `offset`.
    pub fn next_offset(&self, offset: u64) -> u64 {
        match self.offsets.binary_search(&(offset + 1)) {
            Ok(i) => self.offsets[i],
            Err(i) if i < self.offsets.len() => self.offsets[i],
            // Only the terminal offset itself can land here.
            Err(_) => *self.offsets.last().unwrap_or(&offset),
        }
    }
}

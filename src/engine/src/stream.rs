//! Whole-layer streaming fallback.
//!
//! When no seekable format applies, the blob is consumed as an opaque
//! byte stream: decompress on the fly (gzip or zstd), walk tar entries
//! in order, and stop at the first match. The async body is bridged
//! into the blocking decompress/tar walk on the blocking thread pool.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tar::EntryType;
use tokio::io::AsyncRead;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use ocipeek_core::{PeekError, Result};

use crate::orchestrator::StrategyOutcome;
use crate::output;
use crate::pathutil;

/// Outer decompressor for the streaming walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    Gzip,
    Zstd,
}

impl std::fmt::Display for StreamCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamCodec::Gzip => write!(f, "gzip"),
            StreamCodec::Zstd => write!(f, "zstd"),
        }
    }
}

fn decoder<'a>(codec: StreamCodec, reader: impl Read + 'a) -> Result<Box<dyn Read + 'a>> {
    match codec {
        // Multi-member aware: eStargz blobs are valid multi-member
        // gzip streams and must walk like plain tar.gz.
        StreamCodec::Gzip => Ok(Box::new(MultiGzDecoder::new(reader))),
        StreamCodec::Zstd => {
            let dec = zstd::stream::read::Decoder::new(reader)
                .map_err(|e| PeekError::FormatMismatch(format!("zstd stream: {e}")))?;
            Ok(Box::new(dec))
        }
    }
}

/// Walk the stream looking for `request_path`; write the match to
/// `output`. Returns `Absent` when the archive ends without a match.
pub async fn extract_from_stream(
    source: impl AsyncRead + Send + Unpin + 'static,
    codec: StreamCodec,
    request_path: &str,
    output: &Path,
) -> Result<StrategyOutcome> {
    let bridge = SyncIoBridge::new(source);
    let request = request_path.to_string();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || walk_extract(bridge, codec, &request, &output))
        .await
        .map_err(|e| PeekError::Other(format!("streaming walk aborted: {e}")))?
}

/// Collect the display paths of every regular file in the stream.
pub async fn list_from_stream(
    source: impl AsyncRead + Send + Unpin + 'static,
    codec: StreamCodec,
) -> Result<Vec<String>> {
    let bridge = SyncIoBridge::new(source);

    tokio::task::spawn_blocking(move || walk_list(bridge, codec))
        .await
        .map_err(|e| PeekError::Other(format!("streaming walk aborted: {e}")))?
}

fn walk_extract(
    reader: impl Read,
    codec: StreamCodec,
    request_path: &str,
    output: &PathBuf,
) -> Result<StrategyOutcome> {
    let target = pathutil::entry_key(request_path);
    let mut archive = tar::Archive::new(decoder(codec, reader)?);

    let entries = archive
        .entries()
        .map_err(|e| PeekError::FormatMismatch(format!("{codec} tar walk: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| PeekError::FormatMismatch(format!("{codec} tar entry: {e}")))?;
        let name = entry.path().map_or_else(
            |_| String::new(),
            |p| p.to_string_lossy().into_owned(),
        );
        if name.is_empty() || pathutil::entry_key(&name) != target {
            continue;
        }

        let kind = entry.header().entry_type();
        match kind {
            EntryType::Regular | EntryType::Continuous => {}
            EntryType::Symlink | EntryType::Link => {
                let link = entry
                    .link_name()
                    .ok()
                    .flatten()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                return Err(PeekError::LinkTarget {
                    path: request_path.to_string(),
                    target: link,
                });
            }
            other => {
                return Err(PeekError::NotRegularFile {
                    path: request_path.to_string(),
                    kind: entry_kind_name(other).to_string(),
                });
            }
        }

        // Copy manually so decode-side failures stay recoverable
        // (Transport) while local write failures stay fatal (Io).
        let mut out = output::create_file(output)?;
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = entry
                .read(&mut buf)
                .map_err(|e| PeekError::Transport(format!("layer stream read: {e}")))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).map_err(PeekError::Io)?;
        }
        out.flush().map_err(PeekError::Io)?;

        debug!(path = %request_path, output = %output.display(), "extracted from stream");
        return Ok(StrategyOutcome::Extracted);
    }

    Ok(StrategyOutcome::Absent)
}

fn walk_list(reader: impl Read, codec: StreamCodec) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(decoder(codec, reader)?);
    let entries = archive
        .entries()
        .map_err(|e| PeekError::FormatMismatch(format!("{codec} tar walk: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| PeekError::FormatMismatch(format!("{codec} tar entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Ok(path) = entry.path() else { continue };
        let name = path.to_string_lossy();
        if name.is_empty() {
            continue;
        }
        files.push(pathutil::display_path(&name));
    }
    Ok(files)
}

fn entry_kind_name(kind: EntryType) -> &'static str {
    match kind {
        EntryType::Directory => "directory",
        EntryType::Fifo => "fifo",
        EntryType::Char => "character device",
        EntryType::Block => "block device",
        _ => "special entry",
    }
}

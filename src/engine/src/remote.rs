//! Random-access reads over a remote blob URL via HTTP range requests.
//!
//! A `RangeReader` is created per strategy attempt against a single
//! layer. Construction probes the URL with a `HEAD` request to learn
//! the blob size and confirm range support; reads are served with
//! `GET` + `Range: bytes=A-B`, backed by a single contiguous cached
//! segment. The access pattern is footer read, TOC read, then a handful
//! of chunk reads, so one hot segment is enough.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{ACCEPT_RANGES, AUTHORIZATION, CONTENT_LENGTH, RANGE};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ocipeek_core::{PeekError, Result};

/// Capacity of the cached segment.
pub const CACHE_CAPACITY: usize = 1024 * 1024;

/// Chunk size used when draining the blob sequentially.
const SEQUENTIAL_CHUNK: usize = 256 * 1024;

/// Single contiguous cached segment. Invariant: `data` is a verbatim
/// copy of the blob bytes at `[start, start + data.len())`.
#[derive(Default, Debug)]
struct SegmentCache {
    start: u64,
    data: Vec<u8>,
}

impl SegmentCache {
    fn contains(&self, start: u64, len: usize) -> bool {
        !self.data.is_empty()
            && start >= self.start
            && start + len as u64 <= self.start + self.data.len() as u64
    }
}

/// Random-access reader over a blob URL.
#[derive(Debug)]
pub struct RangeReader {
    url: String,
    client: reqwest::Client,
    auth: Option<String>,
    size: u64,
    cancel: CancellationToken,
    cache: RwLock<SegmentCache>,
}

impl RangeReader {
    /// Probe `url` with a `HEAD` request and build a reader.
    ///
    /// Fails with `RangeUnsupported` when the server does not advertise
    /// `Accept-Ranges: bytes`; seekable strategies are then abandoned
    /// for the layer while streaming strategies remain possible.
    pub async fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        auth: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let url = url.into();
        if cancel.is_cancelled() {
            return Err(PeekError::Cancelled);
        }

        let mut req = client.head(&url);
        if let Some(ref auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PeekError::Transport(format!("HEAD {url}: {e}")))?;

        if !resp.status().is_success() {
            return Err(PeekError::HttpStatus {
                context: format!("HEAD {url}"),
                status: resp.status().as_u16(),
            });
        }

        let supports_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        if !supports_ranges {
            return Err(PeekError::RangeUnsupported { url });
        }

        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| PeekError::Transport(format!("HEAD {url}: missing Content-Length")))?;

        trace!(url = %url, size, "range reader ready");

        Ok(Self {
            url,
            client,
            auth,
            size,
            cancel,
            cache: RwLock::new(SegmentCache::default()),
        })
    }

    /// Total size of the remote blob in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Blob URL this reader is bound to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Returns `Ok(0)` at or past end of blob, and never requests an
    /// offset `>= size` or more than `size - offset` bytes. An empty
    /// buffer returns zero without touching the network. Short reads at
    /// end of blob are not an error.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(self.size - offset) as usize;

        {
            let cache = self.cache.read().await;
            if cache.contains(offset, want) {
                let from = (offset - cache.start) as usize;
                buf[..want].copy_from_slice(&cache.data[from..from + want]);
                trace!(offset, len = want, "cache hit");
                return Ok(want);
            }
        }

        let n = self.fetch_range(&mut buf[..want], offset).await?;

        if n > 0 && n <= CACHE_CAPACITY {
            let mut cache = self.cache.write().await;
            cache.start = offset;
            cache.data.clear();
            cache.data.extend_from_slice(&buf[..n]);
        }

        Ok(n)
    }

    /// Read exactly `buf.len()` bytes at `offset`, or fail.
    pub async fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let n = self.read_at(&mut buf[done..], offset + done as u64).await?;
            if n == 0 {
                return Err(PeekError::Transport(format!(
                    "unexpected end of blob at offset {} ({} of {} bytes)",
                    offset,
                    done,
                    buf.len()
                )));
            }
            done += n;
        }
        Ok(())
    }

    /// Read the exact compressed span `[start, start + len)`.
    pub async fn read_range(&self, start: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(&mut buf, start).await?;
        Ok(buf)
    }

    /// Issue a ranged `GET` and fill `buf` from the response body.
    async fn fetch_range(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(PeekError::Cancelled);
        }

        let end = offset + buf.len() as u64 - 1;
        let mut req = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-{end}"));
        if let Some(ref auth) = self.auth {
            req = req.header(AUTHORIZATION, auth);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PeekError::Transport(format!("GET {}: {e}", self.url)))?;

        let status = resp.status();
        if status != reqwest::StatusCode::PARTIAL_CONTENT && status != reqwest::StatusCode::OK {
            return Err(PeekError::HttpStatus {
                context: format!("range request {}-{} {}", offset, end, self.url),
                status: status.as_u16(),
            });
        }

        // The body is drained only as far as the caller's buffer; a 200
        // (full content) response is cut short the same way.
        let mut stream = resp.bytes_stream();
        let mut n = 0usize;
        while n < buf.len() {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    let take = chunk.len().min(buf.len() - n);
                    buf[n..n + take].copy_from_slice(&chunk[..take]);
                    n += take;
                }
                Some(Err(e)) => {
                    return Err(PeekError::Transport(format!("GET {}: {e}", self.url)));
                }
                None => break,
            }
        }

        debug!(offset, requested = buf.len(), received = n, "range fetch");
        Ok(n)
    }
}

/// Drain a blob sequentially from offset zero through the range reader,
/// exposing it as an `AsyncRead`. Used by the eStargz `list` fallback,
/// which re-reads the layer as a plain gzip+tar archive.
pub fn sequential_stream(reader: Arc<RangeReader>) -> DuplexStream {
    let (mut tx, rx) = tokio::io::duplex(SEQUENTIAL_CHUNK);
    tokio::spawn(async move {
        let mut offset = 0u64;
        let mut buf = vec![0u8; SEQUENTIAL_CHUNK];
        loop {
            match reader.read_at(&mut buf, offset).await {
                Ok(0) => break,
                Ok(n) => {
                    offset += n as u64;
                    if tx.write_all(&buf[..n]).await.is_err() {
                        // Consumer hung up (e.g. early tar walk exit).
                        break;
                    }
                }
                Err(e) => {
                    debug!(offset, error = %e, "sequential blob drain failed");
                    break;
                }
            }
        }
    });
    rx
}

//! Test fixtures: a minimal HTTP/1.1 server, layer blob builders for
//! every supported format, and a fake registry.
//!
//! Blobs are fabricated the same way the layer tests build tar.gz
//! fixtures (`tar::Builder` + `flate2`), extended with the member
//! layout the seekable formats need.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::soci::ztoc::{Checkpoint, CompressionInfo, FileMetadata, Ztoc, ZtocToc};

// ---------------------------------------------------------------------
// Minimal HTTP server
// ---------------------------------------------------------------------

/// A parsed incoming request.
pub struct TestRequest {
    pub method: String,
    pub path: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
}

impl TestRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Parse a `Range: bytes=a-b` header, clamped to `total`.
    pub fn byte_range(&self, total: usize) -> Option<(usize, usize)> {
        let spec = self.header("range")?.strip_prefix("bytes=")?;
        let (a, b) = spec.split_once('-')?;
        let start: usize = a.parse().ok()?;
        let end: usize = match b {
            "" => total.saturating_sub(1),
            b => b.parse().ok()?,
        };
        if start >= total {
            return None;
        }
        Some((start, end.min(total - 1)))
    }
}

/// Response returned by a handler.
pub struct TestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200)
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(value).unwrap())
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }
}

type Handler = dyn Fn(&TestRequest) -> TestResponse + Send + Sync;

/// One-thread-per-connection HTTP server bound to an ephemeral port.
pub struct TestHttpServer {
    addr: String,
    requests: Arc<AtomicUsize>,
}

impl TestHttpServer {
    pub fn start(handler: Arc<Handler>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let handler = Arc::clone(&handler);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    let _ = serve_connection(stream, &handler, &counter);
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Host:port, usable as a registry hostname in an image reference.
    pub fn host(&self) -> &str {
        &self.addr
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn serve_connection(
    stream: TcpStream,
    handler: &Arc<Handler>,
    counter: &AtomicUsize,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let mut parts = line.split_whitespace();
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();
        if method.is_empty() {
            return Ok(());
        }

        let mut headers = HashMap::new();
        loop {
            let mut h = String::new();
            reader.read_line(&mut h)?;
            let h = h.trim_end();
            if h.is_empty() {
                break;
            }
            if let Some((name, value)) = h.split_once(':') {
                headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
            }
        }

        counter.fetch_add(1, Ordering::SeqCst);
        let req = TestRequest {
            method: method.clone(),
            path,
            headers,
        };
        let resp = handler(&req);

        let mut out = stream.try_clone()?;
        write!(
            out,
            "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n",
            resp.status,
            resp.body.len()
        )?;
        for (name, value) in &resp.headers {
            write!(out, "{name}: {value}\r\n")?;
        }
        write!(out, "\r\n")?;
        if method != "HEAD" {
            out.write_all(&resp.body)?;
        }
        out.flush()?;
        return Ok(());
    }
}

// ---------------------------------------------------------------------
// Single-blob server (range reader tests)
// ---------------------------------------------------------------------

/// Serves one blob at `/blob` with HEAD + ranged GET.
pub struct BlobServer {
    inner: TestHttpServer,
}

impl BlobServer {
    pub fn start(data: Vec<u8>) -> Self {
        Self::start_inner(data, true)
    }

    /// Variant whose HEAD response omits `Accept-Ranges`.
    pub fn start_without_ranges(data: Vec<u8>) -> Self {
        Self::start_inner(data, false)
    }

    fn start_inner(data: Vec<u8>, ranges: bool) -> Self {
        let handler: Arc<Handler> = Arc::new(move |req: &TestRequest| {
            if req.path != "/blob" {
                return TestResponse::not_found();
            }
            serve_blob(req, &data, ranges)
        });
        Self {
            inner: TestHttpServer::start(handler),
        }
    }

    pub fn url(&self, path: &str) -> String {
        self.inner.url(path)
    }

    pub fn request_count(&self) -> usize {
        self.inner.request_count()
    }
}

/// Blob semantics shared by `BlobServer` and the registry fixture.
pub fn serve_blob(req: &TestRequest, data: &[u8], ranges: bool) -> TestResponse {
    let mut resp = TestResponse::new(200);
    if ranges {
        resp = resp.header("Accept-Ranges", "bytes");
    }
    if req.method == "HEAD" {
        // Content-Length is written by the server from the body; give
        // it the real body so the advertised size is right.
        return resp.body(data.to_vec());
    }
    match req.byte_range(data.len()) {
        Some((start, end)) => TestResponse::new(206)
            .header("Accept-Ranges", "bytes")
            .header("Content-Range", format!("bytes {start}-{end}/{}", data.len()))
            .body(data[start..=end].to_vec()),
        None => resp.body(data.to_vec()),
    }
}

// ---------------------------------------------------------------------
// Tar / layer builders
// ---------------------------------------------------------------------

/// An entry in a fabricated layer.
#[derive(Clone)]
pub enum Entry {
    File { name: &'static str, content: Vec<u8> },
    Dir { name: &'static str },
    Symlink { name: &'static str, target: &'static str },
    Hardlink { name: &'static str, target: &'static str },
    Fifo { name: &'static str },
}

pub fn file(name: &'static str, content: &[u8]) -> Entry {
    Entry::File {
        name,
        content: content.to_vec(),
    }
}

/// Raw (uncompressed) tar archive for the given entries.
pub fn tar_bytes(entries: &[Entry]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        match entry {
            Entry::File { name, content } => {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, content.as_slice()).unwrap();
            }
            Entry::Dir { name } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_cksum();
                builder.append_data(&mut header, name, &[][..]).unwrap();
            }
            Entry::Symlink { name, target } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                header.set_cksum();
                builder.append_link(&mut header, name, target).unwrap();
            }
            Entry::Hardlink { name, target } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Link);
                header.set_size(0);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_link(&mut header, name, target).unwrap();
            }
            Entry::Fifo { name } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Fifo);
                header.set_size(0);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, &[][..]).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn zstd_bytes(data: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(data, 3).unwrap()
}

/// Plain tar.gz layer.
pub fn gzip_tar(entries: &[Entry]) -> Vec<u8> {
    gzip_bytes(&tar_bytes(entries))
}

/// Plain tar.zst layer.
pub fn zstd_tar(entries: &[Entry]) -> Vec<u8> {
    zstd_bytes(&tar_bytes(entries))
}

/// Compression flavor for the seekable builders.
#[derive(Clone, Copy, PartialEq)]
enum Codec {
    Gzip,
    Zstd,
}

fn compress(codec: Codec, data: &[u8]) -> Vec<u8> {
    match codec {
        Codec::Gzip => gzip_bytes(data),
        Codec::Zstd => zstd_bytes(data),
    }
}

/// Pad tar content to the 512-byte block boundary.
fn pad512(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % 512;
    if rem != 0 {
        out.resize(out.len() + 512 - rem, 0);
    }
    out
}

fn tar_header_block(entry: &Entry) -> Vec<u8> {
    // A one-entry archive minus content and terminator blocks is
    // exactly the entry's header block(s).
    let full = tar_bytes(std::slice::from_ref(entry));
    let content_len = match entry {
        Entry::File { content, .. } => pad512(content).len(),
        _ => 0,
    };
    full[..full.len() - 1024 - content_len].to_vec()
}

/// Build a seekable layer: every entry header and every content chunk
/// is its own compression member, a TOC member follows the terminator
/// blocks, and the format footer closes the blob. `chunk_size` splits
/// file contents into multiple chunk members when set.
fn build_seekable(codec: Codec, entries: &[Entry], chunk_size: Option<usize>) -> Vec<u8> {
    let mut blob = Vec::new();
    let mut toc_entries = Vec::new();

    for entry in entries {
        blob.extend_from_slice(&compress(codec, &tar_header_block(entry)));
        match entry {
            Entry::File { name, content } => {
                let padded = pad512(content);
                let split = chunk_size.unwrap_or(usize::MAX).max(1);
                if content.is_empty() {
                    toc_entries.push(serde_json::json!({
                        "name": name, "type": "reg", "size": 0,
                    }));
                    blob.extend_from_slice(&compress(codec, &padded));
                    continue;
                }
                let mut pos = 0usize;
                let mut first = true;
                while pos < content.len() {
                    let take = split.min(content.len() - pos);
                    // The final chunk member carries the tar padding.
                    let piece = if pos + take == content.len() {
                        padded[pos..].to_vec()
                    } else {
                        content[pos..pos + take].to_vec()
                    };
                    let offset = blob.len() as u64;
                    blob.extend_from_slice(&compress(codec, &piece));
                    if first {
                        toc_entries.push(serde_json::json!({
                            "name": name, "type": "reg",
                            "size": content.len(),
                            "offset": offset,
                            "chunkSize": if chunk_size.is_some() { take } else { 0 },
                        }));
                        first = false;
                    } else {
                        toc_entries.push(serde_json::json!({
                            "name": name, "type": "chunk",
                            "offset": offset,
                            "chunkOffset": pos,
                            "chunkSize": take,
                        }));
                    }
                    pos += take;
                }
            }
            Entry::Dir { name } => {
                toc_entries.push(serde_json::json!({"name": name, "type": "dir"}));
            }
            Entry::Symlink { name, target } => {
                toc_entries.push(serde_json::json!({
                    "name": name, "type": "symlink", "linkName": target,
                }));
            }
            Entry::Hardlink { name, target } => {
                toc_entries.push(serde_json::json!({
                    "name": name, "type": "hardlink", "linkName": target,
                }));
            }
            Entry::Fifo { name } => {
                toc_entries.push(serde_json::json!({"name": name, "type": "fifo"}));
            }
        }
    }

    // Archive terminator, so the whole blob still streams as plain tar.
    blob.extend_from_slice(&compress(codec, &[0u8; 1024]));

    let toc_offset = blob.len() as u64;
    let toc = serde_json::json!({"version": 1, "entries": toc_entries});
    let toc_compressed = compress(codec, &serde_json::to_vec(&toc).unwrap());
    let toc_len = toc_compressed.len() as u64;
    blob.extend_from_slice(&toc_compressed);

    match codec {
        Codec::Gzip => {
            // 47-byte eStargz footer: tocOffset (22 ASCII) + footerSize
            // (10 ASCII) + magic (15 bytes).
            blob.extend_from_slice(format!("{toc_offset:022}{footer_size:010}", footer_size = 47).as_bytes());
            blob.extend_from_slice(b"estargz.footer\0");
        }
        Codec::Zstd => {
            // 40-byte skippable frame: magic, payload size, TOC offset
            // and length, format marker, reserved.
            blob.extend_from_slice(&0x184D2A50u32.to_le_bytes());
            blob.extend_from_slice(&32u32.to_le_bytes());
            blob.extend_from_slice(&toc_offset.to_le_bytes());
            blob.extend_from_slice(&toc_len.to_le_bytes());
            blob.extend_from_slice(b"GnUlInUx");
            blob.extend_from_slice(&[0u8; 8]);
        }
    }
    blob
}

/// eStargz layer blob.
pub fn build_estargz(entries: &[Entry]) -> Vec<u8> {
    build_seekable(Codec::Gzip, entries, None)
}

/// eStargz layer blob with file contents split into `chunk_size` chunks.
pub fn build_estargz_chunked(entries: &[Entry], chunk_size: usize) -> Vec<u8> {
    build_seekable(Codec::Gzip, entries, Some(chunk_size))
}

/// zstd:chunked layer blob.
pub fn build_zstd_chunked(entries: &[Entry]) -> Vec<u8> {
    build_seekable(Codec::Zstd, entries, None)
}

// ---------------------------------------------------------------------
// SOCI fixtures
// ---------------------------------------------------------------------

/// Build a gzip layer cut into independent members every `span_size`
/// uncompressed bytes, plus the matching zTOC document.
pub fn build_soci_layer(entries: &[Entry], span_size: usize) -> (Vec<u8>, Vec<u8>) {
    let raw = tar_bytes(entries);

    let mut blob = Vec::new();
    let mut checkpoints = Vec::new();
    let mut pos = 0usize;
    let mut span_id = 0u32;
    while pos < raw.len() {
        let take = span_size.min(raw.len() - pos);
        checkpoints.push(Checkpoint {
            span_id,
            compressed_offset: blob.len() as u64,
            uncompressed_offset: pos as u64,
        });
        blob.extend_from_slice(&gzip_bytes(&raw[pos..pos + take]));
        pos += take;
        span_id += 1;
    }

    let span_of = |offset: u64| -> u32 {
        checkpoints
            .iter()
            .rev()
            .find(|cp| cp.uncompressed_offset <= offset)
            .map(|cp| cp.span_id)
            .unwrap_or(0)
    };

    // Walk the raw archive to learn each entry's data offset.
    let mut files = Vec::new();
    let mut archive = tar::Archive::new(std::io::Cursor::new(&raw));
    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        let header = entry.header();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let size = header.size().unwrap();
        let kind = match header.entry_type() {
            tar::EntryType::Regular => "reg",
            tar::EntryType::Directory => "dir",
            tar::EntryType::Symlink => "symlink",
            tar::EntryType::Link => "hardlink",
            tar::EntryType::Fifo => "fifo",
            _ => "other",
        };
        let data_offset = entry.raw_file_position();
        let end = data_offset + size.saturating_sub(1);
        files.push(FileMetadata {
            name,
            kind: kind.to_string(),
            uncompressed_offset: data_offset,
            uncompressed_size: size,
            span_start: span_of(data_offset),
            span_end: span_of(end),
            link_name: header
                .link_name()
                .ok()
                .flatten()
                .map(|p| p.to_string_lossy().into_owned()),
        });
    }

    let ztoc = Ztoc {
        version: "1.0".to_string(),
        build_tool_identifier: "ocipeek test fixture".to_string(),
        compressed_archive_size: blob.len() as u64,
        uncompressed_archive_size: raw.len() as u64,
        toc: ZtocToc { file_metadata: files },
        compression_info: CompressionInfo {
            max_span_id: span_id.saturating_sub(1),
            checkpoints,
        },
    };

    (blob, serde_json::to_vec(&ztoc).unwrap())
}

// ---------------------------------------------------------------------
// Fake registry
// ---------------------------------------------------------------------

/// A layer registered in the fixture.
#[derive(Clone)]
pub struct FixtureLayer {
    pub media_type: String,
    pub blob: Vec<u8>,
}

impl FixtureLayer {
    pub fn gzip(entries: &[Entry]) -> Self {
        Self {
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            blob: gzip_tar(entries),
        }
    }

    pub fn zstd(entries: &[Entry]) -> Self {
        Self {
            media_type: "application/vnd.docker.image.rootfs.diff.tar.zstd".to_string(),
            blob: zstd_tar(entries),
        }
    }

    pub fn estargz(entries: &[Entry]) -> Self {
        Self {
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            blob: build_estargz(entries),
        }
    }

    pub fn zstd_chunked(entries: &[Entry]) -> Self {
        Self {
            media_type: "application/vnd.oci.image.layer.v1.tar+zstd".to_string(),
            blob: build_zstd_chunked(entries),
        }
    }
}

fn fake_digest(data: &[u8]) -> String {
    // Content-addressed enough for a fixture: FNV-1a over the bytes.
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("sha256:{:016x}{:048}", hash, 0)
}

struct FixtureState {
    repo: String,
    layers: Vec<FixtureLayer>,
    manifest: Vec<u8>,
    manifest_digest: String,
    soci_manifest: Option<(String, Vec<u8>)>,
    ztocs: HashMap<String, Vec<u8>>,
    require_token: bool,
    blob_ranges: bool,
}

/// Fake registry serving one image under `repo`, with optional SOCI
/// artifacts and optional Bearer token auth.
pub struct RegistryFixture {
    server: TestHttpServer,
    repo: String,
    layer_digests: Vec<String>,
}

pub struct RegistryFixtureBuilder {
    repo: String,
    layers: Vec<FixtureLayer>,
    soci_span: usize,
    require_token: bool,
    blob_ranges: bool,
}

impl RegistryFixture {
    pub fn builder(repo: &str) -> RegistryFixtureBuilder {
        RegistryFixtureBuilder {
            repo: repo.to_string(),
            layers: Vec::new(),
            soci_span: 4096,
            require_token: false,
            blob_ranges: true,
        }
    }

    /// Image reference string pointing at this fixture.
    pub fn image_ref(&self) -> String {
        format!("{}/{}:latest", self.server.host(), self.repo)
    }

    pub fn layer_digest(&self, index: usize) -> &str {
        &self.layer_digests[index]
    }
}

impl RegistryFixtureBuilder {
    pub fn layer(mut self, layer: FixtureLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn require_token(mut self) -> Self {
        self.require_token = true;
        self
    }

    pub fn without_blob_ranges(mut self) -> Self {
        self.blob_ranges = false;
        self
    }

    pub fn build(self) -> RegistryFixture {
        self.build_with_soci_entries(&[])
    }

    /// Build; `soci_sources` pairs a layer index with the entries its
    /// zTOC should describe (the layer blob itself is replaced by the
    /// span-cut SOCI build of those entries).
    pub fn build_with_soci_entries(mut self, soci_sources: &[(usize, Vec<Entry>)]) -> RegistryFixture {
        let mut ztocs_by_layer: HashMap<usize, Vec<u8>> = HashMap::new();
        for (index, entries) in soci_sources {
            let (blob, ztoc) = build_soci_layer(entries, self.soci_span);
            self.layers[*index].blob = blob;
            ztocs_by_layer.insert(*index, ztoc);
        }

        let layer_digests: Vec<String> =
            self.layers.iter().map(|l| fake_digest(&l.blob)).collect();

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:0000000000000000000000000000000000000000000000000000000000000000",
                "size": 2,
            },
            "layers": self.layers.iter().zip(&layer_digests).map(|(l, d)| {
                serde_json::json!({
                    "mediaType": l.media_type,
                    "digest": d,
                    "size": l.blob.len(),
                })
            }).collect::<Vec<_>>(),
        });
        let manifest = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = fake_digest(&manifest);

        // SOCI index manifest: one zTOC descriptor per indexed layer.
        let mut ztocs = HashMap::new();
        let soci_manifest = if ztocs_by_layer.is_empty() {
            None
        } else {
            let mut descriptors = Vec::new();
            for (index, ztoc) in &ztocs_by_layer {
                let digest = fake_digest(ztoc);
                descriptors.push(serde_json::json!({
                    "mediaType": "application/octet-stream",
                    "digest": digest,
                    "size": ztoc.len(),
                    "annotations": {
                        "com.amazon.aws.soci.layer.digest": layer_digests[*index],
                    },
                }));
                ztocs.insert(digest, ztoc.clone());
            }
            let doc = serde_json::json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "artifactType": "application/vnd.aws.soci.index.v1+json",
                "layers": descriptors,
            });
            let doc = serde_json::to_vec(&doc).unwrap();
            let digest = fake_digest(&doc);
            Some((digest, doc))
        };

        let state = Arc::new(FixtureState {
            repo: self.repo.clone(),
            layers: self.layers,
            manifest,
            manifest_digest,
            soci_manifest,
            ztocs,
            require_token: self.require_token,
            blob_ranges: self.blob_ranges,
        });

        let host_holder: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let handler_host = Arc::clone(&host_holder);
        let handler: Arc<Handler> = Arc::new(move |req: &TestRequest| {
            route_registry(req, &state, &handler_host.lock().unwrap())
        });
        let server = TestHttpServer::start(handler);
        *host_holder.lock().unwrap() = server.host().to_string();

        RegistryFixture {
            server,
            repo: self.repo,
            layer_digests,
        }
    }
}

fn route_registry(req: &TestRequest, state: &FixtureState, host: &str) -> TestResponse {
    let repo = &state.repo;

    if req.path.starts_with("/token") {
        return TestResponse::json(&serde_json::json!({"token": "fixture-token"}));
    }

    if state.require_token {
        let authed = req.header("authorization") == Some("Bearer fixture-token");
        if !authed {
            return TestResponse::new(401).header(
                "WWW-Authenticate",
                format!(
                    "Bearer realm=\"http://{host}/token\",service=\"fixture\",scope=\"repository:{repo}:pull\""
                ),
            );
        }
    }

    // Manifests: by tag, by image digest, or by SOCI index digest.
    if let Some(reference) = req.path.strip_prefix(&format!("/v2/{repo}/manifests/")) {
        if reference == "latest" || reference == state.manifest_digest {
            return TestResponse::new(200)
                .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
                .header("Docker-Content-Digest", &state.manifest_digest)
                .body(state.manifest.clone());
        }
        if let Some((digest, doc)) = &state.soci_manifest {
            if reference == digest {
                return TestResponse::new(200)
                    .header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
                    .header("Docker-Content-Digest", digest)
                    .body(doc.clone());
            }
        }
        return TestResponse::not_found();
    }

    // Referrers API.
    if let Some(digest) = req.path.strip_prefix(&format!("/v2/{repo}/referrers/")) {
        let digest = digest.split('?').next().unwrap_or(digest);
        let manifests = match (&state.soci_manifest, digest == state.manifest_digest) {
            (Some((soci_digest, doc)), true) => vec![serde_json::json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "artifactType": "application/vnd.aws.soci.index.v1+json",
                "digest": soci_digest,
                "size": doc.len(),
            })],
            _ => Vec::new(),
        };
        return TestResponse::json(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": manifests,
        }));
    }

    // Blobs: layers and zTOCs.
    if let Some(digest) = req.path.strip_prefix(&format!("/v2/{repo}/blobs/")) {
        for layer in &state.layers {
            if digest == fake_digest(&layer.blob) {
                return serve_blob(req, &layer.blob, state.blob_ranges);
            }
        }
        if let Some(ztoc) = state.ztocs.get(digest) {
            return serve_blob(req, ztoc, true);
        }
        return TestResponse::not_found();
    }

    TestResponse::not_found()
}

//! ocipeek extraction engine.
//!
//! Extracts single files from (or lists the contents of) remote
//! OCI/Docker images without pulling them. A container layer is treated
//! as a remotely-addressable byte stream: seekable layer formats
//! (eStargz, SOCI zTOC, zstd:chunked) let the engine download only the
//! bytes covering the requested file, and a streaming tar walk covers
//! everything else.
//!
//! # Architecture
//!
//! ```text
//!   Orchestrator ── walks layers top→bottom, picks a strategy per
//!        │          layer, falls back on failure
//!        ├── Detector     media-type + footer classification (advisory)
//!        ├── RangeReader  HTTP range requests + 1 MiB segment cache
//!        ├── Seekable     estargz / zstd_chunked / soci readers
//!        └── Streaming    gzip+tar and zstd+tar whole-layer walks
//! ```

pub mod detector;
pub mod estargz;
pub mod orchestrator;
mod output;
pub mod pathutil;
pub mod reference;
pub mod registry;
pub mod remote;
pub mod soci;
pub mod stream;
pub mod toc;
pub mod zstd_chunked;

#[cfg(test)]
pub(crate) mod testutil;

pub use detector::LayerFormat;
pub use orchestrator::{ExtractRequest, Orchestrator};
pub use reference::ImageReference;
pub use registry::{LayerDescriptor, RegistryAuth, RegistryClient, ResolvedImage};
pub use remote::RangeReader;

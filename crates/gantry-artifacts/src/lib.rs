//! Artifact stores for Gantry.
//!
//! Artifacts are named blobs scoped to one job run of one invocation. Two
//! backends implement [`gantry_core::ports::ArtifactStore`]: an in-memory map
//! and a zstd-compressed, checksum-verified directory tree.

pub mod compression;
pub mod filesystem;
pub mod keys;
pub mod memory;

pub use compression::{Compression, compress, decompress};
pub use filesystem::FilesystemArtifactStore;
pub use keys::{checksum, sanitize_name};
pub use memory::InMemoryArtifactStore;

//! Narrow interfaces over the external stores (blob, progress/metadata,
//! fingerprint) plus local implementations for tests and the CLI.

pub mod blob;
pub mod fingerprint;
pub mod progress;

pub use blob::{BlobStore, FsBlobStore, fetch_to_scratch};
pub use fingerprint::{
    FingerprintService, FingerprintStats, FingerprintStore, InMemoryFingerprintStore,
    JsonFingerprintStore,
};
pub use progress::{InMemoryProgressStore, JsonProgressStore, ProgressReporter, ProgressStore};

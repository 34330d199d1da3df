//! Tile cache and source fingerprinting for the extraction core.
//!
//! A rendering request consults the [`TileCache`] before doing any
//! resampling work: a hit returns the previously extracted data array
//! and skips the pixel map and all I/O. Keys embed a
//! [`SourceFingerprint`] of the file actually read, so a modified
//! source file invalidates old entries lazily: keys built against the
//! stale fingerprint simply never match freshly built ones.

pub mod error;
pub mod fingerprint;
pub mod tile_cache;

pub use error::{StorageError, StorageResult};
pub use fingerprint::{FingerprintProvider, FsFingerprintProvider, SourceFingerprint};
pub use tile_cache::{TileCache, TileCacheKey, TileCacheStats};

//! Source file fingerprints for cache staleness detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// Identity of a source file at a moment in time: absolute path,
/// last-modified timestamp and byte size.
///
/// A fingerprint participates in [`TileCacheKey`](crate::TileCacheKey)
/// equality. When the underlying file changes, freshly built keys carry
/// the new fingerprint and stop matching cached entries; no eager
/// invalidation is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub len_bytes: u64,
}

impl SourceFingerprint {
    pub fn new(path: impl Into<String>, last_modified: DateTime<Utc>, len_bytes: u64) -> Self {
        Self {
            path: path.into(),
            last_modified,
            len_bytes,
        }
    }
}

/// Produces a [`SourceFingerprint`] for a source location.
///
/// Pure metadata lookup: implementations must not open or read the file
/// contents.
pub trait FingerprintProvider: Send + Sync {
    fn fingerprint(&self, location: &str) -> StorageResult<SourceFingerprint>;
}

/// Fingerprints local files via `std::fs::metadata`.
#[derive(Debug, Default, Clone)]
pub struct FsFingerprintProvider;

impl FingerprintProvider for FsFingerprintProvider {
    fn fingerprint(&self, location: &str) -> StorageResult<SourceFingerprint> {
        let path = Path::new(location);
        let meta = std::fs::metadata(path)
            .map_err(|e| StorageError::fingerprint(location, e.to_string()))?;
        if !meta.is_file() {
            return Err(StorageError::fingerprint(location, "not a regular file"));
        }
        let modified = meta
            .modified()
            .map_err(|e| StorageError::fingerprint(location, e.to_string()))?;
        Ok(SourceFingerprint::new(
            location,
            DateTime::<Utc>::from(modified),
            meta.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.nc");
        std::fs::write(&path, b"abcd").unwrap();

        let provider = FsFingerprintProvider;
        let fp = provider.fingerprint(path.to_str().unwrap()).unwrap();
        assert_eq!(fp.len_bytes, 4);

        // Growing the file must produce a different fingerprint.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"efgh").unwrap();
        f.sync_all().unwrap();
        drop(f);

        let fp2 = provider.fingerprint(path.to_str().unwrap()).unwrap();
        assert_eq!(fp2.len_bytes, 8);
        assert_ne!(fp, fp2);
    }

    #[test]
    fn test_json_round_trip() {
        use chrono::TimeZone;
        let fp = SourceFingerprint::new(
            "/data/gfs/t2m.nc",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            1024,
        );
        let json = serde_json::to_string(&fp).unwrap();
        let back: SourceFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let provider = FsFingerprintProvider;
        assert!(provider.fingerprint("/no/such/file.nc").is_err());
    }

    #[test]
    fn test_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsFingerprintProvider;
        assert!(provider.fingerprint(dir.path().to_str().unwrap()).is_err());
    }
}

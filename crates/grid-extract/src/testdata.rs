//! In-memory source fixtures.
//!
//! Backends used by the integration tests: an [`ArrayReader`] over
//! in-process arrays with open/read counters and fault injection, a
//! settable fingerprint provider, and a static metadata loader. Kept
//! in the library so downstream crates can drive the extraction path
//! without touching real storage.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeZone, Utc};

use storage::{FingerprintProvider, SourceFingerprint, StorageError, StorageResult};

use crate::dataset::{LayerRecord, MetadataLoader};
use crate::error::Result;
use crate::reader::{ArrayReader, ArraySource, ReadError};

/// One in-memory variable's raw values, row-major (j then i), one
/// plane per (t, z) combination.
#[derive(Debug, Clone)]
pub struct InMemoryGrid {
    pub ni: usize,
    pub nj: usize,
    pub nt: usize,
    pub nz: usize,
    /// Indexed `((t * nz + z) * nj + j) * ni + i`.
    pub values: Vec<f64>,
}

impl InMemoryGrid {
    /// Single-plane grid filled from a function of (i, j).
    pub fn from_fn(ni: usize, nj: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut values = Vec::with_capacity(ni * nj);
        for j in 0..nj {
            for i in 0..ni {
                values.push(f(i, j));
            }
        }
        Self {
            ni,
            nj,
            nt: 1,
            nz: 1,
            values,
        }
    }

    fn value(&self, t: usize, z: usize, j: usize, i: usize) -> f64 {
        self.values[((t * self.nz + z) * self.nj + j) * self.ni + i]
    }
}

/// In-memory [`ArrayReader`] keyed by location string.
pub struct InMemoryReader {
    grids: HashMap<String, Arc<InMemoryGrid>>,
    opens: AtomicUsize,
    reads: AtomicUsize,
    fail_opens: AtomicBool,
}

impl InMemoryReader {
    pub fn new() -> Self {
        Self {
            grids: HashMap::new(),
            opens: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            fail_opens: AtomicBool::new(false),
        }
    }

    pub fn with_grid(mut self, location: impl Into<String>, grid: InMemoryGrid) -> Self {
        self.grids.insert(location.into(), Arc::new(grid));
        self
    }

    /// Number of times a source was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of slab reads issued across all opened sources.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every subsequent open fail.
    pub fn fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayReader for InMemoryReader {
    fn open(&self, location: &str) -> std::result::Result<Box<dyn ArraySource + '_>, ReadError> {
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(ReadError::backend("injected open failure"));
        }
        let grid = self
            .grids
            .get(location)
            .ok_or_else(|| ReadError::NotFound(location.to_string()))?
            .clone();
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySource {
            grid,
            reads: &self.reads,
        }))
    }
}

struct InMemorySource<'a> {
    grid: Arc<InMemoryGrid>,
    reads: &'a AtomicUsize,
}

impl ArraySource for InMemorySource<'_> {
    fn read_slab(
        &mut self,
        _variable: &str,
        t_index: Option<usize>,
        z_index: Option<usize>,
        j_range: RangeInclusive<usize>,
        i_range: RangeInclusive<usize>,
    ) -> std::result::Result<Vec<f64>, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let t = t_index.unwrap_or(0);
        let z = z_index.unwrap_or(0);
        if t >= self.grid.nt
            || z >= self.grid.nz
            || *j_range.end() >= self.grid.nj
            || *i_range.end() >= self.grid.ni
        {
            return Err(ReadError::SliceOutOfRange(format!(
                "t={} z={} j={:?} i={:?}",
                t, z, j_range, i_range
            )));
        }
        let mut out =
            Vec::with_capacity(j_range.clone().count() * i_range.clone().count());
        for j in j_range {
            for i in i_range.clone() {
                out.push(self.grid.value(t, z, j, i));
            }
        }
        Ok(out)
    }
}

/// Fingerprint provider whose answers are set by the test.
#[derive(Default)]
pub struct InMemoryFingerprints {
    map: Mutex<HashMap<String, SourceFingerprint>>,
}

impl InMemoryFingerprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, location: impl Into<String>, fingerprint: SourceFingerprint) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.into(), fingerprint);
    }

    /// Simulate the source being rewritten: bump its size and mtime.
    pub fn touch(&self, location: &str) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fp) = map.get(location) {
            let bumped = SourceFingerprint::new(
                location,
                fp.last_modified + chrono::Duration::seconds(1),
                fp.len_bytes + 1,
            );
            map.insert(location.to_string(), bumped);
        }
    }
}

impl FingerprintProvider for InMemoryFingerprints {
    fn fingerprint(&self, location: &str) -> StorageResult<SourceFingerprint> {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::fingerprint(location, "no fingerprint registered"))
    }
}

/// A fingerprint with fixed, arbitrary contents.
pub fn stable_fingerprint(location: &str) -> SourceFingerprint {
    SourceFingerprint::new(
        location,
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        4096,
    )
}

/// Metadata loader returning a fixed layer list.
pub struct StaticLoader {
    layers: Vec<LayerRecord>,
}

impl StaticLoader {
    pub fn new(layers: Vec<LayerRecord>) -> Self {
        Self { layers }
    }
}

impl MetadataLoader for StaticLoader {
    fn load(&self, _dataset_id: &str, _location: &str) -> Result<Vec<LayerRecord>> {
        Ok(self.layers.clone())
    }
}

//! Dataset metadata lifecycle.
//!
//! A dataset's metadata (layer list, axes, dimension values) is loaded
//! and periodically refreshed in the background of request handling.
//! Requests never see half-loaded metadata: each successful load
//! publishes a complete immutable [`DatasetSnapshot`] behind an `Arc`,
//! and requests keep serving the previous snapshot while a refresh is
//! in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::coordsys::HorizontalCoordSys;
use crate::error::{GridExtractError, Result};
use crate::reader::VariableSpec;

/// Relative tolerance for matching a requested vertical value against
/// a layer's declared levels.
const Z_MATCH_TOLERANCE: f64 = 1e-5;

/// Time source. Injected so lifecycle timing is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lifecycle state of a dataset's metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetState {
    /// Declared but never loaded.
    ToBeLoaded,
    /// First load in progress; no snapshot exists yet.
    Loading,
    /// A snapshot is published and current.
    Ready,
    /// A snapshot is published; a refresh is replacing it.
    Updating,
    /// The last load failed. Any published snapshot stays servable.
    Error { message: String, at: DateTime<Utc> },
}

impl DatasetState {
    fn is_load_in_flight(&self) -> bool {
        matches!(self, Self::Loading | Self::Updating)
    }
}

/// One displayable layer of a dataset.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub id: String,
    pub title: String,
    pub variable: VariableSpec,
    pub coordsys: Arc<HorizontalCoordSys>,
    /// Source location that reads of this layer open.
    pub location: String,
    /// Declared vertical levels, empty when the layer has none.
    pub z_values: Vec<f64>,
    /// Declared time steps, ascending; empty when the layer is static.
    pub t_values: Vec<DateTime<Utc>>,
}

impl LayerRecord {
    /// Find the index of a requested vertical value. Exact matches win;
    /// otherwise a value within a small relative tolerance of a level
    /// matches, so values that survived a text round-trip still hit.
    pub fn find_z_index(&self, value: f64) -> Result<usize> {
        if let Some(pos) = self.z_values.iter().position(|&z| z == value) {
            return Ok(pos);
        }
        let matched = self.z_values.iter().position(|&z| {
            let scale = z.abs().max(value.abs());
            scale > 0.0 && (z - value).abs() / scale <= Z_MATCH_TOLERANCE
        });
        matched.ok_or_else(|| {
            GridExtractError::invalid_dimension_value("elevation", value.to_string())
        })
    }

    /// Find the index of an exact requested time step.
    pub fn find_t_index(&self, value: DateTime<Utc>) -> Result<usize> {
        self.t_values
            .iter()
            .position(|&t| t == value)
            .ok_or_else(|| {
                GridExtractError::invalid_dimension_value("time", value.to_rfc3339())
            })
    }

    /// Default time index: the most recent step.
    pub fn latest_t_index(&self) -> Option<usize> {
        self.t_values.len().checked_sub(1)
    }
}

/// Complete, immutable result of one successful metadata load.
#[derive(Debug)]
pub struct DatasetSnapshot {
    pub layers: HashMap<String, LayerRecord>,
    pub loaded_at: DateTime<Utc>,
}

impl DatasetSnapshot {
    pub fn layer(&self, id: &str) -> Result<&LayerRecord> {
        self.layers
            .get(id)
            .ok_or_else(|| GridExtractError::layer_not_found(id))
    }
}

/// Produces a dataset's layer records from its location. Implemented
/// per metadata backend (and by in-memory fixtures in tests).
pub trait MetadataLoader: Send + Sync {
    fn load(&self, dataset_id: &str, location: &str) -> Result<Vec<LayerRecord>>;
}

/// One configured dataset and its metadata lifecycle.
pub struct Dataset {
    id: String,
    location: String,
    /// `None` disables periodic refresh; the dataset still loads once.
    refresh_interval: Option<Duration>,
    loader: Arc<dyn MetadataLoader>,
    clock: Arc<dyn Clock>,
    state: RwLock<DatasetState>,
    snapshot: RwLock<Option<Arc<DatasetSnapshot>>>,
    /// Serializes loads; `try_lock` failure means a load is in flight.
    load_gate: Mutex<()>,
    force_pending: AtomicBool,
}

impl Dataset {
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        refresh_interval: Option<Duration>,
        loader: Arc<dyn MetadataLoader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            refresh_interval,
            loader,
            clock,
            state: RwLock::new(DatasetState::ToBeLoaded),
            snapshot: RwLock::new(None),
            load_gate: Mutex::new(()),
            force_pending: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> DatasetState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark the dataset for reload on the next access. While a load is
    /// already in flight this is a no-op: the in-flight load will
    /// publish fresh metadata anyway.
    pub fn force_reload(&self) {
        if self.state().is_load_in_flight() {
            debug!(dataset = %self.id, "force_reload ignored, load already in flight");
            return;
        }
        self.force_pending.store(true, Ordering::SeqCst);
    }

    /// Current snapshot, refreshing first when the metadata is stale.
    ///
    /// Concurrent callers during a refresh keep the previous snapshot;
    /// only when no snapshot exists yet do they wait for the first
    /// load. A failed load surfaces its error only to callers with no
    /// snapshot to fall back on.
    pub fn snapshot(&self) -> Result<Arc<DatasetSnapshot>> {
        if self.needs_refresh() {
            let load_result = match self.load_gate.try_lock() {
                Ok(guard) => self.run_load(&guard),
                Err(std::sync::TryLockError::WouldBlock) => {
                    // Another thread is loading. Serve the old
                    // snapshot if one exists, else wait our turn.
                    if self.current_snapshot().is_none() {
                        let guard = self
                            .load_gate
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        if self.needs_refresh() {
                            self.run_load(&guard)
                        } else {
                            Ok(())
                        }
                    } else {
                        Ok(())
                    }
                }
                Err(std::sync::TryLockError::Poisoned(p)) => {
                    let guard = p.into_inner();
                    self.run_load(&guard)
                }
            };
            // A failed load keeps the previous snapshot in service;
            // only callers with nothing to fall back on see the error.
            if let Err(e) = load_result {
                if self.current_snapshot().is_none() {
                    return Err(e);
                }
            }
        }
        self.current_snapshot().ok_or_else(|| match self.state() {
            DatasetState::Error { message, .. } => {
                GridExtractError::metadata_load(self.location.clone(), message)
            }
            _ => GridExtractError::metadata_load(
                self.location.clone(),
                "dataset has no loaded metadata".to_string(),
            ),
        })
    }

    fn current_snapshot(&self) -> Option<Arc<DatasetSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn needs_refresh(&self) -> bool {
        if self.force_pending.load(Ordering::SeqCst) {
            return true;
        }
        match self.state() {
            DatasetState::ToBeLoaded => true,
            DatasetState::Loading | DatasetState::Updating => false,
            DatasetState::Error { .. } => true,
            DatasetState::Ready => match (self.refresh_interval, self.current_snapshot()) {
                (Some(interval), Some(snap)) => {
                    let age = self.clock.now() - snap.loaded_at;
                    age >= chrono::Duration::from_std(interval)
                        .unwrap_or_else(|_| chrono::Duration::MAX)
                }
                _ => false,
            },
        }
    }

    /// Run one load under the gate. The guard transitions state on
    /// every exit path, including panics in the loader.
    fn run_load(&self, _gate: &std::sync::MutexGuard<'_, ()>) -> Result<()> {
        let had_snapshot = self.current_snapshot().is_some();
        self.set_state(if had_snapshot {
            DatasetState::Updating
        } else {
            DatasetState::Loading
        });
        self.force_pending.store(false, Ordering::SeqCst);

        let mut guard = LoadGuard {
            dataset: self,
            outcome: None,
        };
        let result = self.loader.load(&self.id, &self.location);
        match result {
            Ok(layers) => {
                let snap = Arc::new(DatasetSnapshot {
                    layers: layers.into_iter().map(|l| (l.id.clone(), l)).collect(),
                    loaded_at: self.clock.now(),
                });
                info!(
                    dataset = %self.id,
                    layers = snap.layers.len(),
                    refreshed = had_snapshot,
                    "dataset metadata loaded"
                );
                *self
                    .snapshot
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(snap);
                guard.outcome = Some(DatasetState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!(dataset = %self.id, error = %e, "dataset metadata load failed");
                guard.outcome = Some(DatasetState::Error {
                    message: e.to_string(),
                    at: self.clock.now(),
                });
                Err(e)
            }
        }
    }

    /// Non-blocking refresh attempt for background sweeps. Returns
    /// true when a load ran (successfully or not); false when the
    /// metadata is fresh or another thread holds the gate. Load
    /// failures are logged and left for the state machine, never
    /// propagated to the sweeper.
    pub fn try_refresh(&self) -> bool {
        if !self.needs_refresh() {
            return false;
        }
        let guard = match self.load_gate.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::WouldBlock) => return false,
            Err(std::sync::TryLockError::Poisoned(p)) => p.into_inner(),
        };
        let _ = self.run_load(&guard);
        true
    }

    fn set_state(&self, state: DatasetState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Background sweeper over a set of datasets.
///
/// Each sweep makes one non-blocking refresh attempt per dataset, so a
/// slow load on one dataset never delays the others and never blocks
/// request threads, which keep serving the previous snapshots.
#[derive(Default)]
pub struct MetadataRefresher {
    datasets: Vec<Arc<Dataset>>,
}

impl MetadataRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dataset: Arc<Dataset>) {
        self.datasets.push(dataset);
    }

    /// One pass over all registered datasets. Returns how many loads
    /// were run.
    pub fn sweep(&self) -> usize {
        let mut refreshed = 0;
        for dataset in &self.datasets {
            if dataset.try_refresh() {
                refreshed += 1;
            }
        }
        if refreshed > 0 {
            debug!(refreshed, total = self.datasets.len(), "metadata sweep");
        }
        refreshed
    }
}

/// Transitions state when a load ends. Drop runs even when the loader
/// panics, so a dataset can never stay wedged in Loading/Updating.
struct LoadGuard<'a> {
    dataset: &'a Dataset,
    outcome: Option<DatasetState>,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let state = self.outcome.take().unwrap_or_else(|| DatasetState::Error {
            message: "metadata load aborted".to_string(),
            at: self.dataset.clock.now(),
        });
        self.dataset.set_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordsys::AxisData;
    use std::sync::atomic::AtomicUsize;
    use wms_common::CrsCode;

    fn test_coordsys() -> Arc<HorizontalCoordSys> {
        Arc::new(
            HorizontalCoordSys::from_axis_data(
                AxisData::Separable1d {
                    x: vec![0.0, 90.0, 180.0, 270.0],
                    y: vec![-45.0, 0.0, 45.0],
                },
                CrsCode::Epsg4326,
                3.0,
            )
            .unwrap(),
        )
    }

    fn test_layer(id: &str) -> LayerRecord {
        LayerRecord {
            id: id.to_string(),
            title: id.to_string(),
            variable: VariableSpec::new(id),
            coordsys: test_coordsys(),
            location: "mem://grid".to_string(),
            z_values: vec![1000.0, 500.0, 250.0],
            t_values: vec![],
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingLoader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    impl MetadataLoader for CountingLoader {
        fn load(&self, _id: &str, location: &str) -> Result<Vec<LayerRecord>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(GridExtractError::metadata_load(
                    location.to_string(),
                    "injected".to_string(),
                ));
            }
            Ok(vec![test_layer("temp")])
        }
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ))
    }

    #[test]
    fn test_first_access_loads() {
        let loader = CountingLoader::new();
        let ds = Dataset::new(
            "gfs",
            "mem://gfs",
            None,
            loader.clone(),
            Arc::new(SystemClock),
        );
        assert_eq!(ds.state(), DatasetState::ToBeLoaded);

        let snap = ds.snapshot().unwrap();
        assert_eq!(ds.state(), DatasetState::Ready);
        assert!(snap.layer("temp").is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        // A second access with no interval configured reuses the
        // snapshot.
        ds.snapshot().unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refresh_after_interval() {
        let loader = CountingLoader::new();
        let clock = manual_clock();
        let ds = Dataset::new(
            "gfs",
            "mem://gfs",
            Some(Duration::from_secs(600)),
            loader.clone(),
            clock.clone(),
        );

        ds.snapshot().unwrap();
        clock.advance(Duration::from_secs(599));
        ds.snapshot().unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(2));
        ds.snapshot().unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(ds.state(), DatasetState::Ready);
    }

    #[test]
    fn test_failed_refresh_keeps_old_snapshot() {
        let loader = CountingLoader::new();
        let clock = manual_clock();
        let ds = Dataset::new(
            "gfs",
            "mem://gfs",
            Some(Duration::from_secs(60)),
            loader.clone(),
            clock.clone(),
        );
        ds.snapshot().unwrap();

        loader.fail.store(true, Ordering::SeqCst);
        clock.advance(Duration::from_secs(61));
        // Refresh fails, but the old snapshot is still served.
        let snap = ds.snapshot().unwrap();
        assert!(snap.layer("temp").is_ok());
        assert!(matches!(ds.state(), DatasetState::Error { .. }));

        // Recovery: the next access retries.
        loader.fail.store(false, Ordering::SeqCst);
        ds.snapshot().unwrap();
        assert_eq!(ds.state(), DatasetState::Ready);
    }

    #[test]
    fn test_failed_first_load_is_an_error() {
        let loader = CountingLoader::new();
        loader.fail.store(true, Ordering::SeqCst);
        let ds = Dataset::new(
            "gfs",
            "mem://gfs",
            None,
            loader.clone(),
            Arc::new(SystemClock),
        );
        assert!(ds.snapshot().is_err());
        assert!(matches!(ds.state(), DatasetState::Error { .. }));
    }

    #[test]
    fn test_force_reload() {
        let loader = CountingLoader::new();
        let ds = Dataset::new(
            "gfs",
            "mem://gfs",
            None,
            loader.clone(),
            Arc::new(SystemClock),
        );
        ds.snapshot().unwrap();
        ds.force_reload();
        ds.snapshot().unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_refresher_sweep_only_touches_stale_datasets() {
        let loader = CountingLoader::new();
        let clock = manual_clock();
        let fresh = Arc::new(Dataset::new(
            "fresh",
            "mem://fresh",
            Some(Duration::from_secs(3600)),
            loader.clone(),
            clock.clone(),
        ));
        let stale = Arc::new(Dataset::new(
            "stale",
            "mem://stale",
            Some(Duration::from_secs(60)),
            loader.clone(),
            clock.clone(),
        ));

        let mut refresher = MetadataRefresher::new();
        refresher.register(fresh.clone());
        refresher.register(stale.clone());

        // First sweep loads both (never loaded).
        assert_eq!(refresher.sweep(), 2);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);

        clock.advance(Duration::from_secs(120));
        // Only the short-interval dataset is stale now.
        assert_eq!(refresher.sweep(), 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 3);
        assert_eq!(fresh.state(), DatasetState::Ready);
        assert_eq!(stale.state(), DatasetState::Ready);
    }

    #[test]
    fn test_find_z_index_fuzzy() {
        let layer = test_layer("temp");
        assert_eq!(layer.find_z_index(500.0).unwrap(), 1);
        // Within relative tolerance of 250.
        assert_eq!(layer.find_z_index(250.001).unwrap(), 2);
        assert!(layer.find_z_index(300.0).is_err());
    }

    #[test]
    fn test_find_t_index_exact_only() {
        let mut layer = test_layer("temp");
        let t0 = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t1 = t0 + chrono::Duration::hours(6);
        layer.t_values = vec![t0, t1];
        assert_eq!(layer.find_t_index(t1).unwrap(), 1);
        assert_eq!(layer.latest_t_index(), Some(1));
        assert!(layer
            .find_t_index(t0 + chrono::Duration::hours(3))
            .is_err());
    }
}

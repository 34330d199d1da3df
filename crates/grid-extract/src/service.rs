//! Request-facing extraction service.
//!
//! Glues the pieces together for one request: resolve the layer from
//! the dataset snapshot, check the tile cache, and on a miss build the
//! pixel map, run the configured read strategy and publish the result.
//! Identical concurrent misses are collapsed so the source is read
//! once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use wms_common::TargetGrid;

use storage::{FingerprintProvider, TileCache, TileCacheKey};

use crate::config::ExtractConfig;
use crate::dataset::{Dataset, LayerRecord};
use crate::error::Result;
use crate::pixel_map::PixelMap;
use crate::reader::ArrayReader;
use crate::strategy::ReadStrategy;
use crate::transform;

/// Output value for pixels with no source datum: unmapped, missing or
/// outside the variable's valid range.
const FILL_VALUE: f32 = f32::NAN;

/// One extraction request.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub layer_id: String,
    pub grid: TargetGrid,
    /// Requested time step; `None` selects the layer's latest.
    pub time: Option<DateTime<Utc>>,
    /// Requested vertical level; `None` for layers without one.
    pub elevation: Option<f64>,
}

/// Thread-safe extraction front end, shared across request threads.
pub struct ExtractionService {
    reader: Arc<dyn ArrayReader>,
    fingerprints: Arc<dyn FingerprintProvider>,
    strategy: ReadStrategy,
    cache: Option<TileCache>,
    /// Per-key gates collapsing identical concurrent cache misses.
    in_flight: Mutex<HashMap<TileCacheKey, Arc<Mutex<()>>>>,
}

impl ExtractionService {
    pub fn new(
        config: &ExtractConfig,
        reader: Arc<dyn ArrayReader>,
        fingerprints: Arc<dyn FingerprintProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = (config.tile_cache_size_mb > 0)
            .then(|| TileCache::new(config.tile_cache_size_mb));
        Ok(Self {
            reader,
            fingerprints,
            strategy: config.read_strategy()?,
            cache,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Run one extraction against a dataset. The returned buffer is
    /// row-major over the request grid, NaN where no source value
    /// applies.
    pub fn extract(&self, dataset: &Dataset, request: &ExtractRequest) -> Result<Arc<Vec<f32>>> {
        let snapshot = dataset.snapshot()?;
        let layer = snapshot.layer(&request.layer_id)?;

        let t_index = match request.time {
            Some(t) => Some(layer.find_t_index(t)?),
            None => layer.latest_t_index(),
        };
        let z_index = match request.elevation {
            Some(z) => Some(layer.find_z_index(z)?),
            None => None,
        };

        // The fingerprint in the key makes cached tiles from an older
        // generation of the source unreachable.
        let fingerprint = self.fingerprints.fingerprint(&layer.location)?;
        let key = TileCacheKey::new(
            layer.id.clone(),
            request.grid.crs(),
            request.grid.bbox(),
            request.grid.width(),
            request.grid.height(),
            t_index,
            z_index,
            fingerprint,
        );

        if let Some(cache) = &self.cache {
            if let Some(tile) = cache.get(&key) {
                debug!(layer = %layer.id, "tile cache hit");
                return Ok(tile);
            }
            return self.extract_single_flight(layer, request, &key, t_index, z_index, cache);
        }
        self.read_tile(layer, request, t_index, z_index).map(Arc::new)
    }

    /// Serialize identical cache misses: the first caller reads the
    /// source, the rest find the tile in the cache when they get the
    /// gate.
    fn extract_single_flight(
        &self,
        layer: &LayerRecord,
        request: &ExtractRequest,
        key: &TileCacheKey,
        t_index: Option<usize>,
        z_index: Option<usize>,
        cache: &TileCache,
    ) -> Result<Arc<Vec<f32>>> {
        let gate = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            in_flight.entry(key.clone()).or_default().clone()
        };
        let _held = gate.lock().unwrap_or_else(PoisonError::into_inner);

        // No `?` before the gate entry is removed below: a failed read
        // must not leave its entry in the map.
        let result = match cache.get(key) {
            Some(tile) => Ok(tile),
            None => match self.read_tile_tagged(layer, request, t_index, z_index) {
                Ok((tile, cacheable)) => {
                    let tile = Arc::new(tile);
                    // An all-NaN tile from an empty footprint is cheap
                    // to recompute and would only crowd out useful
                    // entries.
                    if cacheable {
                        cache.put(key.clone(), tile.clone());
                    }
                    Ok(tile)
                }
                Err(e) => Err(e),
            },
        };

        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.remove(key);
        result
    }

    fn read_tile(
        &self,
        layer: &LayerRecord,
        request: &ExtractRequest,
        t_index: Option<usize>,
        z_index: Option<usize>,
    ) -> Result<Vec<f32>> {
        self.read_tile_tagged(layer, request, t_index, z_index)
            .map(|(tile, _)| tile)
    }

    /// Read one tile from the source. The bool is false when the pixel
    /// map was empty and the tile is all NaN.
    fn read_tile_tagged(
        &self,
        layer: &LayerRecord,
        request: &ExtractRequest,
        t_index: Option<usize>,
        z_index: Option<usize>,
    ) -> Result<(Vec<f32>, bool)> {
        let xform = transform::for_request(request.grid.crs(), layer.coordsys.native_crs())?;
        let map = PixelMap::build(&request.grid, &layer.coordsys, &xform)?;
        if map.is_empty() {
            info!(layer = %layer.id, "request footprint misses the source grid");
            return Ok((vec![FILL_VALUE; request.grid.pixel_count()], false));
        }

        let mut source = self.reader.open(&layer.location)?;
        let tile = self.strategy.extract(
            source.as_mut(),
            &layer.variable,
            &map,
            request.grid.pixel_count(),
            t_index,
            z_index,
            FILL_VALUE,
        )?;
        Ok((tile, true))
    }

    /// Cache statistics, when caching is enabled.
    pub fn cache(&self) -> Option<&TileCache> {
        self.cache.as_ref()
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordsys::{AxisData, HorizontalCoordSys};
    use crate::dataset::SystemClock;
    use crate::reader::VariableSpec;
    use crate::testdata::{
        stable_fingerprint, InMemoryFingerprints, InMemoryGrid, InMemoryReader, StaticLoader,
    };
    use wms_common::BoundingBox;
    use wms_common::CrsCode;

    const LOCATION: &str = "mem://gate/grid";

    fn fixture() -> (ExtractionService, Dataset, Arc<InMemoryReader>) {
        let reader = Arc::new(
            InMemoryReader::new()
                .with_grid(LOCATION, InMemoryGrid::from_fn(4, 4, |i, j| (j * 4 + i) as f64)),
        );
        let fingerprints = Arc::new(InMemoryFingerprints::new());
        fingerprints.set(LOCATION, stable_fingerprint(LOCATION));
        let coordsys = HorizontalCoordSys::from_axis_data(
            AxisData::Separable1d {
                x: vec![0.0, 30.0, 60.0, 90.0],
                y: vec![0.0, 30.0, 60.0, 90.0],
            },
            CrsCode::Epsg4326,
            3.0,
        )
        .unwrap();
        let layer = LayerRecord {
            id: "temp".to_string(),
            title: "temp".to_string(),
            variable: VariableSpec::new("temp"),
            coordsys: Arc::new(coordsys),
            location: LOCATION.to_string(),
            z_values: vec![],
            t_values: vec![],
        };
        let dataset = Dataset::new(
            "gate",
            LOCATION,
            None,
            Arc::new(StaticLoader::new(vec![layer])),
            Arc::new(SystemClock),
        );
        let service = ExtractionService::new(
            &ExtractConfig::default(),
            reader.clone(),
            fingerprints,
        )
        .unwrap();
        (service, dataset, reader)
    }

    #[test]
    fn test_failed_extraction_releases_its_gate() {
        let (service, dataset, reader) = fixture();
        let request = ExtractRequest {
            layer_id: "temp".to_string(),
            grid: TargetGrid::new(
                CrsCode::Epsg4326,
                BoundingBox::new(-15.0, -15.0, 105.0, 105.0),
                4,
                4,
            )
            .unwrap(),
            time: None,
            elevation: None,
        };

        reader.fail_opens(true);
        assert!(service.extract(&dataset, &request).is_err());
        // The per-key gate entry must not outlive the failed attempt.
        assert_eq!(service.in_flight_len(), 0);

        // A later attempt against the same key succeeds normally.
        reader.fail_opens(false);
        service.extract(&dataset, &request).unwrap();
        assert_eq!(service.in_flight_len(), 0);
    }
}

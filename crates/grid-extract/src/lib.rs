//! Raster Extraction Core for Multidimensional Scientific Grids
//!
//! This crate turns a rendered-map request (CRS + bounding box + pixel
//! dimensions) into a row-major buffer of display values sampled from
//! a gridded source by nearest neighbour. It provides:
//!
//! - **Coordinate axes**: O(1) regular and O(log n) irregular 1-D axis
//!   lookups with longitude normalization and wrap-around
//! - **Curvilinear grids**: precomputed dense lookup tables for meshes
//!   with per-cell coordinates
//! - **Pixel maps**: sparse target-pixel to source-cell mappings walked
//!   in source-storage order
//! - **Read strategies**: bounding-box, row-by-row and point-by-point
//!   I/O batching with identical output
//! - **Dataset lifecycle**: background metadata refresh behind
//!   immutable snapshots, so requests never block on reloads
//!
//! # Architecture
//!
//! ```text
//! Extraction request
//!      │
//!      ▼
//! ExtractionService::extract
//!      │
//!      ├─► Dataset snapshot ──► LayerRecord (axes, packing, levels)
//!      │
//!      ├─► TileCacheKey (bbox bits + source fingerprint)
//!      │         │
//!      │         ├─► Cache hit: return cached tile
//!      │         │
//!      │         └─► Cache miss: build PixelMap
//!      │                    │
//!      │                    └─► ReadStrategy over ArraySource
//!      │
//!      └─► Row-major f32 buffer, NaN where unmapped
//! ```
//!
//! # Example
//!
//! ```ignore
//! use grid_extract::{ExtractConfig, ExtractRequest, ExtractionService};
//!
//! let config = ExtractConfig::from_env()?;
//! let service = ExtractionService::new(&config, reader, fingerprints)?;
//!
//! let tile = service.extract(&dataset, &ExtractRequest {
//!     layer_id: "temperature_2m".into(),
//!     grid,
//!     time: None,
//!     elevation: Some(500.0),
//! })?;
//! ```

pub mod axis;
pub mod config;
pub mod coordsys;
pub mod dataset;
pub mod error;
pub mod lut;
pub mod pixel_map;
pub mod reader;
pub mod service;
pub mod strategy;
pub mod testdata;
pub mod transform;

// Re-export commonly used types at crate root
pub use axis::{CoordAxis1d, IrregularAxis, RegularAxis};
pub use config::ExtractConfig;
pub use coordsys::{AxisData, HorizontalCoordSys};
pub use dataset::{
    Clock, Dataset, DatasetSnapshot, DatasetState, LayerRecord, ManualClock, MetadataLoader,
    MetadataRefresher, SystemClock,
};
pub use error::{GridExtractError, Result};
pub use lut::{CurvilinearMesh, LookupTable2d};
pub use pixel_map::PixelMap;
pub use reader::{ArrayReader, ArraySource, ReadError, VariableSpec};
pub use service::{ExtractRequest, ExtractionService};
pub use strategy::ReadStrategy;
pub use transform::{IdentityTransform, PointTransform};

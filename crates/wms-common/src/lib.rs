//! Common types shared across the scigrid-wms extraction crates.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod grid;

pub use bbox::BoundingBox;
pub use crs::CrsCode;
pub use error::{WmsError, WmsResult};
pub use grid::TargetGrid;

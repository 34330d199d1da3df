//! Output raster (target grid) description.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::error::WmsError;

/// Description of the raster a rendering request wants back: a CRS, a
/// bounding box in that CRS, and pixel dimensions.
///
/// Pixels are addressed row-major with pixel 0 at the top-left corner
/// (row 0 is the northernmost row for geographic CRS). Sample points are
/// pixel centres: column `i` samples at `min_x + (i + 0.5) * dx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    crs: CrsCode,
    bbox: BoundingBox,
    width: usize,
    height: usize,
}

impl TargetGrid {
    /// Create a target grid, validating the bbox and dimensions.
    pub fn new(
        crs: CrsCode,
        bbox: BoundingBox,
        width: usize,
        height: usize,
    ) -> Result<Self, WmsError> {
        if !bbox.is_valid() {
            return Err(WmsError::InvalidBbox(format!("{:?}", bbox)));
        }
        if width == 0 || height == 0 {
            return Err(WmsError::InvalidDimensions { width, height });
        }
        Ok(Self {
            crs,
            bbox,
            width,
            height,
        })
    }

    pub fn crs(&self) -> CrsCode {
        self.crs
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total number of output pixels.
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True if the request CRS is plain geographic lat/lon.
    pub fn is_geographic(&self) -> bool {
        self.crs.is_geographic()
    }

    /// X coordinate of each pixel column's centre, left to right.
    pub fn x_values(&self) -> Vec<f64> {
        let dx = self.bbox.width() / self.width as f64;
        (0..self.width)
            .map(|i| self.bbox.min_x + (i as f64 + 0.5) * dx)
            .collect()
    }

    /// Y coordinate of each pixel row's centre, top to bottom.
    ///
    /// Row 0 is the row with the largest y, matching image layout.
    pub fn y_values(&self) -> Vec<f64> {
        let dy = self.bbox.height() / self.height as f64;
        (0..self.height)
            .map(|j| self.bbox.max_y - (j as f64 + 0.5) * dy)
            .collect()
    }

    /// Flat pixel index for a (column, row) pair.
    pub fn pixel_index(&self, col: usize, row: usize) -> usize {
        row * self.width + col
    }
}

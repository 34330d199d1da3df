//! Horizontal coordinate systems for source grids.
//!
//! A grid's horizontal geometry is one of three shapes: separable 1-D
//! lat/lon axes, separable 1-D projected axes, or a full curvilinear
//! mesh. All three answer the same question: which source (i, j) holds
//! the value nearest a given horizontal point.

use std::sync::Arc;

use wms_common::CrsCode;

use crate::axis::CoordAxis1d;
use crate::error::{GridExtractError, Result};
use crate::lut::{CurvilinearMesh, LookupTable2d};

/// Raw per-dimension coordinate data as read from a source's metadata,
/// before classification.
#[derive(Debug, Clone)]
pub enum AxisData {
    /// Separable 1-D axes: x (or lon) values and y (or lat) values.
    Separable1d { x: Vec<f64>, y: Vec<f64> },
    /// Full 2-D mesh: one lon and lat per cell.
    Curvilinear2d(CurvilinearMesh),
}

/// A grid's horizontal coordinate system after classification.
#[derive(Debug, Clone)]
pub enum HorizontalCoordSys {
    /// Geographic 1-D axes; longitude handling (normalization, wrap)
    /// is live on the x axis.
    LatLon1d { lon: CoordAxis1d, lat: CoordAxis1d },
    /// Projected 1-D axes in some planar CRS; no longitude semantics.
    Projected1d {
        crs: CrsCode,
        x: CoordAxis1d,
        y: CoordAxis1d,
    },
    /// Curvilinear mesh answered through a precomputed lookup table.
    Curvilinear2d(Arc<LookupTable2d>),
}

impl HorizontalCoordSys {
    /// Classify raw axis data into a coordinate system.
    ///
    /// `lut_multiplier` only matters for the curvilinear case, where
    /// the lookup table is built eagerly so request-time lookups never
    /// pay construction cost.
    pub fn from_axis_data(
        data: AxisData,
        crs: CrsCode,
        lut_multiplier: f64,
    ) -> Result<Self> {
        match data {
            AxisData::Separable1d { x, y } => {
                if x.is_empty() || y.is_empty() {
                    return Err(GridExtractError::mismatched_axes(
                        "separable grid requires non-empty x and y axes",
                    ));
                }
                if crs.is_geographic() {
                    Ok(Self::LatLon1d {
                        lon: CoordAxis1d::from_values(&x, true)?,
                        lat: CoordAxis1d::from_values(&y, false)?,
                    })
                } else {
                    Ok(Self::Projected1d {
                        crs,
                        x: CoordAxis1d::from_values(&x, false)?,
                        y: CoordAxis1d::from_values(&y, false)?,
                    })
                }
            }
            AxisData::Curvilinear2d(mesh) => {
                let lut = LookupTable2d::build(&mesh, lut_multiplier)?;
                Ok(Self::Curvilinear2d(Arc::new(lut)))
            }
        }
    }

    /// Native CRS of points fed to [`Self::index`].
    pub fn native_crs(&self) -> CrsCode {
        match self {
            Self::LatLon1d { .. } | Self::Curvilinear2d(_) => CrsCode::Epsg4326,
            Self::Projected1d { crs, .. } => *crs,
        }
    }

    /// Nearest source (i, j) for a native-CRS point, or `None` when the
    /// point falls outside the grid.
    pub fn index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        match self {
            Self::LatLon1d { lon, lat } => match (lon.index(x), lat.index(y)) {
                (Some(i), Some(j)) => Some((i, j)),
                _ => None,
            },
            Self::Projected1d { x: ax, y: ay, .. } => match (ax.index(x), ay.index(y)) {
                (Some(i), Some(j)) => Some((i, j)),
                _ => None,
            },
            Self::Curvilinear2d(lut) => lut.index(x, y),
        }
    }

    /// Column lookup alone, for separable systems. `None` for
    /// curvilinear systems, whose coordinates are not separable.
    pub fn index_x(&self, x: f64) -> Option<usize> {
        match self {
            Self::LatLon1d { lon, .. } => lon.index(x),
            Self::Projected1d { x: ax, .. } => ax.index(x),
            Self::Curvilinear2d(_) => None,
        }
    }

    /// Row lookup alone, for separable systems.
    pub fn index_y(&self, y: f64) -> Option<usize> {
        match self {
            Self::LatLon1d { lat, .. } => lat.index(y),
            Self::Projected1d { y: ay, .. } => ay.index(y),
            Self::Curvilinear2d(_) => None,
        }
    }

    /// True when both axes are regularly spaced 1-D axes, which lets
    /// the pixel mapper separate the column and row lookups.
    pub fn is_separable(&self) -> bool {
        !matches!(self, Self::Curvilinear2d(_))
    }
}

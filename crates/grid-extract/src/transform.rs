//! Point transforms between the request CRS and a grid's native
//! horizontal coordinate system.

use wms_common::CrsCode;

use crate::error::{GridExtractError, Result};

/// Coordinate oracle for the general pixel-mapping path.
///
/// Supplied by the caller: the extraction core carries no projection
/// library. Implementations must be pure, stateless and cheap per
/// call; the mapper invokes them for every target pixel.
pub trait PointTransform: Send + Sync {
    /// Geographic (lon, lat) of a target-CRS point, or `None` when the
    /// point is invalid in the target CRS (e.g. outside a polar
    /// projection's domain). `None` drops the pixel.
    fn target_to_geographic(&self, x: f64, y: f64) -> Option<(f64, f64)>;

    /// Source-projection coordinates of a geographic point. Identity
    /// for sources with geographic axes.
    fn geographic_to_source(&self, lon: f64, lat: f64) -> (f64, f64);

    /// True when both directions are the identity, which lets the
    /// mapper use the separable fast path.
    fn is_identity(&self) -> bool {
        false
    }
}

/// No-op oracle for requests already in the grid's native CRS.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl PointTransform for IdentityTransform {
    fn target_to_geographic(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        Some((x, y))
    }

    fn geographic_to_source(&self, lon: f64, lat: f64) -> (f64, f64) {
        (lon, lat)
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Pick the oracle for a request CRS against a grid's native CRS.
/// Matching systems need no conversion; anything else requires a
/// caller-supplied transform, which the service does not carry.
pub fn for_request(request_crs: CrsCode, native_crs: CrsCode) -> Result<IdentityTransform> {
    if request_crs == native_crs {
        Ok(IdentityTransform)
    } else {
        Err(GridExtractError::invalid_metadata(format!(
            "no transform available from {} to {}",
            request_crs, native_crs
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_round_trip() {
        let t = IdentityTransform;
        assert_eq!(t.target_to_geographic(12.5, -3.25), Some((12.5, -3.25)));
        assert_eq!(t.geographic_to_source(12.5, -3.25), (12.5, -3.25));
        assert!(t.is_identity());
    }

    #[test]
    fn test_mismatched_crs_is_error() {
        assert!(for_request(CrsCode::Epsg3857, CrsCode::Epsg4326).is_err());
    }
}

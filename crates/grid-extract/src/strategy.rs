//! I/O batching strategies.
//!
//! All three strategies produce identical output for a given pixel map;
//! they differ only in how many source reads they issue and how much
//! surplus data each read drags in. The right choice depends on the
//! backend's seek cost versus transfer cost, so it is configuration,
//! not a per-request decision.

use std::fmt;

use tracing::debug;

use crate::error::{GridExtractError, Result};
use crate::pixel_map::PixelMap;
use crate::reader::{ArraySource, VariableSpec};

/// How a pixel map's source cells are batched into reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// One read of the minimal rectangle covering the whole map.
    /// Fewest seeks, most surplus data.
    BoundingBox,
    /// One read per source row, spanning that row's column bounds.
    RowByRow,
    /// One read per touched source cell. No surplus data, most seeks.
    PointByPoint,
}

impl ReadStrategy {
    /// Parse a configuration key. Keys are case-insensitive.
    pub fn from_key(key: &str) -> Result<Self> {
        match key.to_ascii_lowercase().as_str() {
            "bounding-box" | "boundingbox" => Ok(Self::BoundingBox),
            "row-by-row" | "scanline" => Ok(Self::RowByRow),
            "point-by-point" | "pixel" => Ok(Self::PointByPoint),
            other => Err(GridExtractError::Config(format!(
                "unknown read strategy '{}' (expected bounding-box, row-by-row or point-by-point)",
                other
            ))),
        }
    }

    /// Run the extraction: read the source cells the map names and
    /// scatter their unpacked values into a target-pixel buffer.
    /// Unmapped pixels keep `fill_value`.
    pub fn extract(
        &self,
        source: &mut dyn ArraySource,
        spec: &VariableSpec,
        map: &PixelMap,
        pixel_count: usize,
        t_index: Option<usize>,
        z_index: Option<usize>,
        fill_value: f32,
    ) -> Result<Vec<f32>> {
        let mut out = vec![fill_value; pixel_count];
        if map.is_empty() {
            return Ok(out);
        }
        let reads = match self {
            Self::BoundingBox => {
                self.extract_bbox(source, spec, map, t_index, z_index, fill_value, &mut out)?
            }
            Self::RowByRow => {
                self.extract_rows(source, spec, map, t_index, z_index, fill_value, &mut out)?
            }
            Self::PointByPoint => {
                self.extract_points(source, spec, map, t_index, z_index, fill_value, &mut out)?
            }
        };
        debug!(
            strategy = %self,
            reads,
            cells = map.cell_count(),
            row_span_cells = map.sum_row_lengths(),
            bbox_cells = map.bounding_box_size(),
            "extraction reads issued"
        );
        Ok(out)
    }

    fn extract_bbox(
        &self,
        source: &mut dyn ArraySource,
        spec: &VariableSpec,
        map: &PixelMap,
        t_index: Option<usize>,
        z_index: Option<usize>,
        fill_value: f32,
        out: &mut [f32],
    ) -> Result<usize> {
        // Bounds exist: the caller already handled the empty map.
        let (min_i, max_i) = map.i_bounds().unwrap_or((0, 0));
        let (min_j, max_j) = map.j_bounds().unwrap_or((0, 0));
        let slab = source.read_slab(
            &spec.name,
            t_index,
            z_index,
            min_j..=max_j,
            min_i..=max_i,
        )?;
        let slab_width = max_i - min_i + 1;

        for (j, entries) in map.rows() {
            for (&i, pixels) in entries.iter() {
                let raw = slab[(j - min_j) * slab_width + (i - min_i)];
                scatter(out, pixels, unpack_or_fill(spec, raw, fill_value));
            }
        }
        Ok(1)
    }

    fn extract_rows(
        &self,
        source: &mut dyn ArraySource,
        spec: &VariableSpec,
        map: &PixelMap,
        t_index: Option<usize>,
        z_index: Option<usize>,
        fill_value: f32,
        out: &mut [f32],
    ) -> Result<usize> {
        let mut reads = 0;
        for (j, entries) in map.rows() {
            let Some((min_i, max_i)) = map.row_i_bounds(j) else {
                continue;
            };
            let slab = source.read_slab(&spec.name, t_index, z_index, j..=j, min_i..=max_i)?;
            reads += 1;
            for (&i, pixels) in entries.iter() {
                scatter(out, pixels, unpack_or_fill(spec, slab[i - min_i], fill_value));
            }
        }
        Ok(reads)
    }

    fn extract_points(
        &self,
        source: &mut dyn ArraySource,
        spec: &VariableSpec,
        map: &PixelMap,
        t_index: Option<usize>,
        z_index: Option<usize>,
        fill_value: f32,
        out: &mut [f32],
    ) -> Result<usize> {
        let mut reads = 0;
        for (j, entries) in map.rows() {
            for (&i, pixels) in entries.iter() {
                let slab = source.read_slab(&spec.name, t_index, z_index, j..=j, i..=i)?;
                reads += 1;
                scatter(out, pixels, unpack_or_fill(spec, slab[0], fill_value));
            }
        }
        Ok(reads)
    }
}

/// Missing, out-of-range and NaN raw values all resolve to the caller's
/// fill value, whatever it is.
fn unpack_or_fill(spec: &VariableSpec, raw: f64, fill_value: f32) -> f32 {
    let value = spec.unpack(raw);
    if value.is_nan() {
        fill_value
    } else {
        value
    }
}

fn scatter(out: &mut [f32], pixels: &[usize], value: f32) {
    for &p in pixels {
        out[p] = value;
    }
}

impl Default for ReadStrategy {
    fn default() -> Self {
        Self::RowByRow
    }
}

impl fmt::Display for ReadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            Self::BoundingBox => "bounding-box",
            Self::RowByRow => "row-by-row",
            Self::PointByPoint => "point-by-point",
        };
        write!(f, "{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordsys::{AxisData, HorizontalCoordSys};
    use crate::pixel_map::PixelMap;
    use crate::reader::ArrayReader;
    use crate::testdata::{InMemoryGrid, InMemoryReader};
    use crate::transform::IdentityTransform;
    use wms_common::{BoundingBox, CrsCode, TargetGrid};

    #[test]
    fn test_missing_datum_gets_the_caller_fill_value() {
        // Raw 7 (cell i=3, j=1) is the missing sentinel; the caller's
        // fill value, not NaN, must end up in the output.
        let reader = InMemoryReader::new()
            .with_grid("mem://g", InMemoryGrid::from_fn(4, 4, |i, j| (j * 4 + i) as f64));
        let sys = HorizontalCoordSys::from_axis_data(
            AxisData::Separable1d {
                x: vec![0.0, 30.0, 60.0, 90.0],
                y: vec![0.0, 30.0, 60.0, 90.0],
            },
            CrsCode::Epsg4326,
            3.0,
        )
        .unwrap();
        let grid = TargetGrid::new(
            CrsCode::Epsg4326,
            BoundingBox::new(-15.0, -15.0, 105.0, 105.0),
            4,
            4,
        )
        .unwrap();
        let map = PixelMap::build(&grid, &sys, &IdentityTransform).unwrap();
        let spec = VariableSpec::new("temp").with_missing_value(7.0);

        let mut source = reader.open("mem://g").unwrap();
        let tile = ReadStrategy::RowByRow
            .extract(
                source.as_mut(),
                &spec,
                &map,
                grid.pixel_count(),
                None,
                None,
                -999.0,
            )
            .unwrap();

        // Output row 2 is source row j=1.
        assert_eq!(tile[10], 6.0);
        assert_eq!(tile[11], -999.0);
    }

    #[test]
    fn test_from_key() {
        assert_eq!(
            ReadStrategy::from_key("Bounding-Box").unwrap(),
            ReadStrategy::BoundingBox
        );
        assert_eq!(
            ReadStrategy::from_key("scanline").unwrap(),
            ReadStrategy::RowByRow
        );
        assert_eq!(
            ReadStrategy::from_key("point-by-point").unwrap(),
            ReadStrategy::PointByPoint
        );
        assert!(ReadStrategy::from_key("column-major").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for s in [
            ReadStrategy::BoundingBox,
            ReadStrategy::RowByRow,
            ReadStrategy::PointByPoint,
        ] {
            assert_eq!(ReadStrategy::from_key(&s.to_string()).unwrap(), s);
        }
    }
}

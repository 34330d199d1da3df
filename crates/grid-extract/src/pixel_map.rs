//! Target-pixel to source-cell mapping.
//!
//! A [`PixelMap`] is built once per request. It records, for every
//! source cell the request touches, which target pixels that cell
//! paints. Reading strategies then walk the map in source-storage
//! order (rows ascending, columns ascending within a row) so file
//! access is as sequential as the request allows.

use std::collections::BTreeMap;

use tracing::debug;
use wms_common::TargetGrid;

use crate::coordsys::HorizontalCoordSys;
use crate::error::Result;
use crate::transform::PointTransform;

/// One source row's mapping: column index to the target pixels that
/// sample it, columns kept sorted by the BTreeMap.
type RowEntries = BTreeMap<usize, Vec<usize>>;

/// Sparse mapping from source (i, j) cells to target pixel indices.
#[derive(Debug, Default)]
pub struct PixelMap {
    rows: BTreeMap<usize, RowEntries>,
    min_i: usize,
    max_i: usize,
    mapped_pixels: usize,
}

impl PixelMap {
    /// Build the map for one request.
    ///
    /// When the transform is the identity and the coordinate system is
    /// separable, each target column resolves to one source column and
    /// each target row to one source row, so the build is O(W + H)
    /// axis lookups. Otherwise every pixel centre is transformed and
    /// looked up individually.
    pub fn build(
        grid: &TargetGrid,
        coordsys: &HorizontalCoordSys,
        transform: &dyn PointTransform,
    ) -> Result<Self> {
        let mut map = Self::default();
        if transform.is_identity() && coordsys.is_separable() {
            map.build_separable(grid, coordsys);
        } else {
            map.build_general(grid, coordsys, transform);
        }
        debug!(
            source_rows = map.rows.len(),
            mapped_pixels = map.mapped_pixels,
            width = grid.width(),
            height = grid.height(),
            "built pixel map"
        );
        Ok(map)
    }

    fn build_separable(&mut self, grid: &TargetGrid, coordsys: &HorizontalCoordSys) {
        // One axis lookup per target column and per target row; the
        // cross product fills the map.
        let cols: Vec<Option<usize>> = grid
            .x_values()
            .iter()
            .map(|&x| coordsys.index_x(x))
            .collect();
        let row_lookup: Vec<Option<usize>> = grid
            .y_values()
            .iter()
            .map(|&y| coordsys.index_y(y))
            .collect();

        for (row, j) in row_lookup.iter().enumerate() {
            let Some(j) = *j else { continue };
            for (col, i) in cols.iter().enumerate() {
                if let Some(i) = *i {
                    self.insert(i, j, grid.pixel_index(col, row));
                }
            }
        }
    }

    fn build_general(
        &mut self,
        grid: &TargetGrid,
        coordsys: &HorizontalCoordSys,
        transform: &dyn PointTransform,
    ) {
        let xs = grid.x_values();
        for (row, y) in grid.y_values().into_iter().enumerate() {
            for (col, &x) in xs.iter().enumerate() {
                // Invalid in the target CRS: the pixel stays unmapped.
                let Some((lon, lat)) = transform.target_to_geographic(x, y) else {
                    continue;
                };
                let (sx, sy) = transform.geographic_to_source(lon, lat);
                if let Some((i, j)) = coordsys.index(sx, sy) {
                    self.insert(i, j, grid.pixel_index(col, row));
                }
            }
        }
    }

    fn insert(&mut self, i: usize, j: usize, pixel: usize) {
        if self.mapped_pixels == 0 {
            self.min_i = i;
            self.max_i = i;
        } else {
            self.min_i = self.min_i.min(i);
            self.max_i = self.max_i.max(i);
        }
        self.rows.entry(j).or_default().entry(i).or_default().push(pixel);
        self.mapped_pixels += 1;
    }

    /// True when no target pixel landed inside the source grid.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of (pixel, source cell) pairs recorded.
    pub fn mapped_pixel_count(&self) -> usize {
        self.mapped_pixels
    }

    /// Number of distinct source cells touched.
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(|r| r.len()).sum()
    }

    /// Total cells a row-by-row read plan would fetch: the column span
    /// of each touched row, summed.
    pub fn sum_row_lengths(&self) -> usize {
        self.rows
            .values()
            .map(|row| match (row.keys().next(), row.keys().next_back()) {
                (Some(&lo), Some(&hi)) => hi - lo + 1,
                _ => 0,
            })
            .sum()
    }

    /// Cells a single bounding-box read would fetch.
    pub fn bounding_box_size(&self) -> usize {
        match (self.i_bounds(), self.j_bounds()) {
            (Some((min_i, max_i)), Some((min_j, max_j))) => {
                (max_i - min_i + 1) * (max_j - min_j + 1)
            }
            _ => 0,
        }
    }

    /// Inclusive source-column bounds over the whole map. `None` when
    /// the map is empty.
    pub fn i_bounds(&self) -> Option<(usize, usize)> {
        (!self.is_empty()).then_some((self.min_i, self.max_i))
    }

    /// Inclusive source-row bounds. `None` when the map is empty.
    pub fn j_bounds(&self) -> Option<(usize, usize)> {
        match (self.rows.keys().next(), self.rows.keys().next_back()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        }
    }

    /// Source rows in ascending order with their column entries.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &RowEntries)> {
        self.rows.iter().map(|(&j, entries)| (j, entries))
    }

    /// Column bounds of a single source row.
    pub fn row_i_bounds(&self, j: usize) -> Option<(usize, usize)> {
        let row = self.rows.get(&j)?;
        match (row.keys().next(), row.keys().next_back()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        }
    }
}

//! Precomputed lookup table for curvilinear (2-D) source grids.
//!
//! A curvilinear mesh carries a full longitude and latitude value per
//! cell, so there is no per-axis arithmetic that turns a geographic
//! point into an (i, j) pair. Instead, a dense table over the mesh's
//! lat/lon bounding box is built once at metadata-load time; each table
//! cell stores the nearest source (i, j), making request-time lookups
//! O(1). The table is oversampled relative to the native mesh density
//! to avoid systematic nearest-neighbour bias.

use tracing::{debug, info};

use crate::error::{GridExtractError, Result};

/// Per-cell coordinates of a curvilinear mesh, row-major (j then i).
#[derive(Debug, Clone)]
pub struct CurvilinearMesh {
    pub ni: usize,
    pub nj: usize,
    /// Longitude of each cell, `nj * ni` values.
    pub lons: Vec<f64>,
    /// Latitude of each cell, `nj * ni` values.
    pub lats: Vec<f64>,
    /// Cells whose source data were missing when metadata was read.
    /// These cells never appear in the table.
    pub missing: Option<Vec<bool>>,
}

impl CurvilinearMesh {
    pub fn new(ni: usize, nj: usize, lons: Vec<f64>, lats: Vec<f64>) -> Result<Self> {
        if lons.len() != ni * nj || lats.len() != ni * nj {
            return Err(GridExtractError::invalid_metadata(format!(
                "curvilinear mesh arrays must hold {} values, got {} lons / {} lats",
                ni * nj,
                lons.len(),
                lats.len()
            )));
        }
        Ok(Self {
            ni,
            nj,
            lons,
            lats,
            missing: None,
        })
    }

    pub fn with_missing(mut self, missing: Vec<bool>) -> Result<Self> {
        if missing.len() != self.ni * self.nj {
            return Err(GridExtractError::invalid_metadata(
                "missing mask length does not match mesh".to_string(),
            ));
        }
        self.missing = Some(missing);
        Ok(self)
    }

    fn is_missing(&self, cell: usize) -> bool {
        self.missing.as_ref().map_or(false, |m| m[cell])
    }
}

/// Dense geographic-cell to source-index table for one curvilinear
/// grid. Immutable once built; shared across requests via `Arc`.
#[derive(Debug, Clone)]
pub struct LookupTable2d {
    min_lon: f64,
    min_lat: f64,
    cell_width: f64,
    cell_height: f64,
    nx: usize,
    ny: usize,
    /// Row-major nearest source (i, j) per table cell; `None` where the
    /// cell is outside the mesh or the source cell was missing.
    entries: Vec<Option<(u32, u32)>>,
}

impl LookupTable2d {
    /// Build a table covering the mesh's lat/lon bounding box.
    ///
    /// The table holds roughly `mesh cell count * multiplier` cells,
    /// split between rows and columns to preserve the bounding box's
    /// aspect ratio. `multiplier` must be at least 1 so the table is
    /// never coarser than the mesh itself.
    pub fn build(mesh: &CurvilinearMesh, multiplier: f64) -> Result<Self> {
        if multiplier < 1.0 || !multiplier.is_finite() {
            return Err(GridExtractError::Config(format!(
                "LUT resolution multiplier must be >= 1, got {}",
                multiplier
            )));
        }

        let (min_lon, min_lat, max_lon, max_lat) = mesh_bounds(mesh)?;
        let width = max_lon - min_lon;
        let height = max_lat - min_lat;
        if width <= 0.0 || height <= 0.0 {
            return Err(GridExtractError::invalid_metadata(
                "curvilinear mesh has a degenerate bounding box".to_string(),
            ));
        }

        // Table size: total cells = mesh cells * multiplier, with the
        // rows/columns split preserving the box's aspect ratio.
        let total = (mesh.ni * mesh.nj) as f64 * multiplier;
        let aspect = width / height;
        let nx = ((total * aspect).sqrt().round() as usize).max(1);
        let ny = ((total / aspect).sqrt().round() as usize).max(1);
        let cell_width = width / nx as f64;
        let cell_height = height / ny as f64;

        let mut table = Self {
            min_lon,
            min_lat,
            cell_width,
            cell_height,
            nx,
            ny,
            entries: vec![None; nx * ny],
        };

        table.splat(mesh);
        let seeded = table.entries.iter().filter(|e| e.is_some()).count();
        table.dilate(mesh, dilation_passes(multiplier));
        let filled = table.entries.iter().filter(|e| e.is_some()).count();

        info!(
            nx,
            ny,
            seeded,
            filled,
            mesh_cells = mesh.ni * mesh.nj,
            "built curvilinear lookup table"
        );
        Ok(table)
    }

    /// Nearest source (i, j) for a geographic point, or `None` if the
    /// point falls outside the mesh bounds or on an unmapped/missing
    /// cell.
    pub fn index(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let (tx, ty) = self.table_cell(lon, lat)?;
        self.entries[ty * self.nx + tx].map(|(i, j)| (i as usize, j as usize))
    }

    pub fn table_size(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    // The max edge of the box is inclusive: points sitting exactly on
    // it land in the last row/column rather than outside.
    fn table_cell(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        let fx = (lon - self.min_lon) / self.cell_width;
        let fy = (lat - self.min_lat) / self.cell_height;
        if fx < 0.0 || fy < 0.0 || fx > self.nx as f64 || fy > self.ny as f64 {
            return None;
        }
        Some(((fx as usize).min(self.nx - 1), (fy as usize).min(self.ny - 1)))
    }

    fn cell_center(&self, tx: usize, ty: usize) -> (f64, f64) {
        (
            self.min_lon + (tx as f64 + 0.5) * self.cell_width,
            self.min_lat + (ty as f64 + 0.5) * self.cell_height,
        )
    }

    /// First pass: drop every valid mesh cell into its containing table
    /// cell, keeping the candidate closest to the table cell's centre.
    fn splat(&mut self, mesh: &CurvilinearMesh) {
        let mut best_dist = vec![f64::INFINITY; self.nx * self.ny];
        for j in 0..mesh.nj {
            for i in 0..mesh.ni {
                let cell = j * mesh.ni + i;
                let (lon, lat) = (mesh.lons[cell], mesh.lats[cell]);
                if !lon.is_finite() || !lat.is_finite() || mesh.is_missing(cell) {
                    continue;
                }
                if let Some((tx, ty)) = self.table_cell(lon, lat) {
                    let slot = ty * self.nx + tx;
                    let (cx, cy) = self.cell_center(tx, ty);
                    let d = (lon - cx).powi(2) + (lat - cy).powi(2);
                    if d < best_dist[slot] {
                        best_dist[slot] = d;
                        self.entries[slot] = Some((i as u32, j as u32));
                    }
                }
            }
        }
    }

    /// Later passes: fill holes left by oversampling from mapped
    /// neighbours, choosing the neighbour whose source coordinates are
    /// nearest the empty cell's centre. Fills a few cells past the mesh
    /// hull inside the bounding box, which matches the behaviour of a
    /// true nearest-neighbour table.
    fn dilate(&mut self, mesh: &CurvilinearMesh, passes: usize) {
        for pass in 0..passes {
            let snapshot = self.entries.clone();
            let mut changed = 0usize;
            for ty in 0..self.ny {
                for tx in 0..self.nx {
                    let slot = ty * self.nx + tx;
                    if snapshot[slot].is_some() {
                        continue;
                    }
                    let (cx, cy) = self.cell_center(tx, ty);
                    let mut best: Option<((u32, u32), f64)> = None;
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let (nx, ny) = (tx as i64 + dx, ty as i64 + dy);
                            if nx < 0 || ny < 0 || nx >= self.nx as i64 || ny >= self.ny as i64 {
                                continue;
                            }
                            if let Some((si, sj)) = snapshot[ny as usize * self.nx + nx as usize] {
                                let cell = sj as usize * mesh.ni + si as usize;
                                let d = (mesh.lons[cell] - cx).powi(2)
                                    + (mesh.lats[cell] - cy).powi(2);
                                if best.map_or(true, |(_, bd)| d < bd) {
                                    best = Some(((si, sj), d));
                                }
                            }
                        }
                    }
                    if let Some((ij, _)) = best {
                        self.entries[slot] = Some(ij);
                        changed += 1;
                    }
                }
            }
            debug!(pass, changed, "lookup table dilation pass");
            if changed == 0 {
                break;
            }
        }
    }
}

fn mesh_bounds(mesh: &CurvilinearMesh) -> Result<(f64, f64, f64, f64)> {
    let mut min_lon = f64::INFINITY;
    let mut min_lat = f64::INFINITY;
    let mut max_lon = f64::NEG_INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    for cell in 0..mesh.ni * mesh.nj {
        let (lon, lat) = (mesh.lons[cell], mesh.lats[cell]);
        if !lon.is_finite() || !lat.is_finite() {
            continue;
        }
        min_lon = min_lon.min(lon);
        max_lon = max_lon.max(lon);
        min_lat = min_lat.min(lat);
        max_lat = max_lat.max(lat);
    }
    if !min_lon.is_finite() {
        return Err(GridExtractError::invalid_metadata(
            "curvilinear mesh has no finite coordinates".to_string(),
        ));
    }
    Ok((min_lon, min_lat, max_lon, max_lat))
}

/// Oversampling leaves roughly sqrt(multiplier) empty cells between
/// seeded ones, so dilation depth scales with it.
fn dilation_passes(multiplier: f64) -> usize {
    multiplier.sqrt().ceil() as usize + 1
}

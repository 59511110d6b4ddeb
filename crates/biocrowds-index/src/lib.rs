//! Uniform-grid spatial indexing for marker neighborhood queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by marker index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot produce a usable grid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Indicates a marker whose position maps outside the grid at build time.
    #[error("marker {marker} at ({x}, {z}) lies outside the indexed plane")]
    OutOfBounds { marker: usize, x: f32, z: f32 },
}

/// Common behaviour exposed by marker neighborhood indices.
pub trait MarkerIndex {
    /// Rebuild internal buckets from marker plane positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit every marker bucketed within `radius_cells` of `center`,
    /// passing the marker's index and its planar distance to `center`.
    fn markers_near(
        &self,
        center: (f32, f32),
        radius_cells: u32,
        visitor: &mut dyn FnMut(u32, OrderedFloat<f32>),
    );
}

/// Uniform grid bucketing markers by discretized plane coordinates.
///
/// Cell size is one plane unit. The plane is centered on the origin and
/// spans `±extent / 2` on both axes; coordinates are shifted into a
/// non-negative index range, with one slack cell on every side absorbing
/// ceiling rounding at the plane boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerGrid {
    extent: f32,
    offset: i32,
    side: usize,
    #[serde(skip)]
    cells: Vec<Vec<u32>>,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
}

impl MarkerGrid {
    /// Create an empty grid covering a square plane of the given extent.
    pub fn new(extent: f32) -> Result<Self, IndexError> {
        if !extent.is_finite() || extent <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "plane extent must be positive and finite",
            ));
        }
        let half = (extent / 2.0).ceil() as i32;
        let side = (2 * half + 3) as usize;
        Ok(Self {
            extent,
            offset: half + 1,
            side,
            cells: vec![Vec::new(); side * side],
            positions: Vec::new(),
        })
    }

    /// Plane extent the grid was sized for.
    #[must_use]
    pub const fn extent(&self) -> f32 {
        self.extent
    }

    /// Number of cells along each axis.
    #[must_use]
    pub const fn side(&self) -> usize {
        self.side
    }

    /// Number of markers currently bucketed.
    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.positions.len()
    }

    /// Grid cell for a plane position, or `None` outside the grid.
    #[must_use]
    pub fn cell_of(&self, x: f32, z: f32) -> Option<(usize, usize)> {
        let col = x.ceil() as i32 + self.offset;
        let row = z.ceil() as i32 + self.offset;
        if col < 0 || row < 0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        (col < self.side && row < self.side).then_some((col, row))
    }

    /// Nearest in-bounds cell for a plane position.
    fn clamped_cell_of(&self, x: f32, z: f32) -> (usize, usize) {
        let bound = (self.side - 1) as i32;
        let col = (x.ceil() as i32 + self.offset).clamp(0, bound);
        let row = (z.ceil() as i32 + self.offset).clamp(0, bound);
        (col as usize, row as usize)
    }

    #[inline]
    fn bucket(&self, col: usize, row: usize) -> &[u32] {
        &self.cells[row * self.side + col]
    }
}

impl MarkerIndex for MarkerGrid {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        let mut mapped = Vec::with_capacity(positions.len());
        for (marker, &(x, z)) in positions.iter().enumerate() {
            if !x.is_finite() || !z.is_finite() {
                return Err(IndexError::OutOfBounds { marker, x, z });
            }
            let (col, row) =
                self.cell_of(x, z)
                    .ok_or(IndexError::OutOfBounds { marker, x, z })?;
            mapped.push((col, row));
        }

        for cell in &mut self.cells {
            cell.clear();
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        for (marker, (col, row)) in mapped.into_iter().enumerate() {
            self.cells[row * self.side + col].push(marker as u32);
        }
        Ok(())
    }

    fn markers_near(
        &self,
        center: (f32, f32),
        radius_cells: u32,
        visitor: &mut dyn FnMut(u32, OrderedFloat<f32>),
    ) {
        let (center_col, center_row) = self.clamped_cell_of(center.0, center.1);
        let radius = radius_cells as i64;
        // Half-open [center - r, center + r) on both axes, clamped on both
        // ends so edge and corner queries stay inside the grid.
        let col_lo = (center_col as i64 - radius).max(0) as usize;
        let col_hi = (center_col as i64 + radius).min(self.side as i64) as usize;
        let row_lo = (center_row as i64 - radius).max(0) as usize;
        let row_hi = (center_row as i64 + radius).min(self.side as i64) as usize;

        for row in row_lo..row_hi {
            for col in col_lo..col_hi {
                for &marker in self.bucket(col, row) {
                    let (x, z) = self.positions[marker as usize];
                    let (dx, dz) = (x - center.0, z - center.1);
                    let distance = (dx * dx + dz * dz).sqrt();
                    visitor(marker, OrderedFloat(distance));
                }
            }
        }
    }
}

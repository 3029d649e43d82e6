//! Spatial indexing abstractions for colony neighborhood queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from entity positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit every indexed entry within the squared radius of `point`.
    ///
    /// Visit order is unspecified; callers that pick a single entry must break
    /// ties on the entry index.
    fn neighbors_within(
        &self,
        point: (f32, f32),
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );

    /// Closest accepted entry strictly inside the squared radius, lowest index on ties.
    fn nearest_within(
        &self,
        point: (f32, f32),
        radius_sq: f32,
        accept: &mut dyn FnMut(usize) -> bool,
    ) -> Option<(usize, OrderedFloat<f32>)> {
        let mut best: Option<(usize, OrderedFloat<f32>)> = None;
        self.neighbors_within(point, radius_sq, &mut |idx, dist_sq| {
            if dist_sq.into_inner() >= radius_sq || !accept(idx) {
                return;
            }
            let better = match best {
                None => true,
                Some((best_idx, best_dist)) => (dist_sq, idx) < (best_dist, best_idx),
            };
            if better {
                best = Some((idx, dist_sq));
            }
        });
        best
    }
}

/// Uniform bucket grid over a bounded rectangle.
///
/// Entries are stored in compressed rows: `cell_starts[c]..cell_starts[c + 1]`
/// indexes `entries` for cell `c`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing entries.
    pub cell_size: f32,
    width: f32,
    height: f32,
    cols: usize,
    rows: usize,
    #[serde(skip)]
    cell_starts: Vec<usize>,
    #[serde(skip)]
    entries: Vec<usize>,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
}

impl UniformGridIndex {
    /// Create a new uniform grid covering `width × height` with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f32, width: f32, height: f32) -> Self {
        let (cols, rows) = Self::dimensions(cell_size, width, height);
        Self {
            cell_size,
            width,
            height,
            cols,
            rows,
            cell_starts: Vec::new(),
            entries: Vec::new(),
            positions: Vec::new(),
        }
    }

    fn dimensions(cell_size: f32, width: f32, height: f32) -> (usize, usize) {
        if cell_size <= 0.0 || !cell_size.is_finite() {
            return (0, 0);
        }
        let cols = (width / cell_size).ceil().max(1.0) as usize;
        let rows = (height / cell_size).ceil().max(1.0) as usize;
        (cols, rows)
    }

    /// Number of entries indexed by the last rebuild.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the last rebuild indexed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    fn cell_coord(&self, value: f32, count: usize) -> usize {
        let raw = (value / self.cell_size).floor();
        if raw.is_nan() || raw < 0.0 {
            0
        } else {
            (raw as usize).min(count - 1)
        }
    }

    #[inline]
    fn cell_of(&self, (x, y): (f32, f32)) -> usize {
        self.cell_coord(y, self.rows) * self.cols + self.cell_coord(x, self.cols)
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(16.0, 128.0, 128.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if self.cell_size <= 0.0 || !self.cell_size.is_finite() {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(IndexError::InvalidConfig("grid extent must be positive"));
        }
        let cell_count = self.cols * self.rows;
        self.positions.clear();
        self.positions.extend_from_slice(positions);

        let mut counts = vec![0usize; cell_count];
        for &pos in positions {
            counts[self.cell_of(pos)] += 1;
        }
        self.cell_starts.clear();
        self.cell_starts.reserve(cell_count + 1);
        let mut running = 0;
        self.cell_starts.push(0);
        for count in &counts {
            running += count;
            self.cell_starts.push(running);
        }

        // Fill in ascending entry order so each bucket stays sorted.
        let mut cursor: Vec<usize> = self.cell_starts[..cell_count].to_vec();
        self.entries.clear();
        self.entries.resize(positions.len(), 0);
        for (idx, &pos) in positions.iter().enumerate() {
            let cell = self.cell_of(pos);
            self.entries[cursor[cell]] = idx;
            cursor[cell] += 1;
        }
        Ok(())
    }

    fn neighbors_within(
        &self,
        point: (f32, f32),
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if self.positions.is_empty() || radius_sq < 0.0 || radius_sq.is_nan() {
            return;
        }
        let radius = radius_sq.sqrt();
        let min_col = self.cell_coord(point.0 - radius, self.cols);
        let max_col = self.cell_coord(point.0 + radius, self.cols);
        let min_row = self.cell_coord(point.1 - radius, self.rows);
        let max_row = self.cell_coord(point.1 + radius, self.rows);
        for row in min_row..=max_row {
            for col in min_col..=max_col {
                let cell = row * self.cols + col;
                for &idx in &self.entries[self.cell_starts[cell]..self.cell_starts[cell + 1]] {
                    let (x, y) = self.positions[idx];
                    let dx = x - point.0;
                    let dy = y - point.1;
                    let dist_sq = dx * dx + dy * dy;
                    if dist_sq <= radius_sq {
                        visitor(idx, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}

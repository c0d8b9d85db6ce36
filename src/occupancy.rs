//! Kernel density occupancy map over the calibrated plane.
//!
//! Each track with at least two path points contributes a Gaussian KDE that
//! integrates to one over the whole plane; the surface is the sum of those
//! contributions sampled at grid-cell centres inside [`PlaneBounds`].

use crate::error::TrackError;
use crate::trajectory::TrackPath;
use nalgebra::Point2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, info};

/* -----------------------------------------------------------------------------
 * Plane bounds
 * ----------------------------------------------------------------------------- */
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl PlaneBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, TrackError> {
        let bounds = Self {
            min_x,
            min_y,
            max_x,
            max_y,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.max_x <= self.min_x || self.max_y <= self.min_y {
            return Err(TrackError::InvalidConfig(format!(
                "plane bounds must be finite with max > min, got {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, point: &Point2<f64>) -> bool {
        (self.min_x..=self.max_x).contains(&point.x) && (self.min_y..=self.max_y).contains(&point.y)
    }
}

/* -----------------------------------------------------------------------------
 * Configuration
 * ----------------------------------------------------------------------------- */
/// Kernel bandwidth selection, in plane units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// Same bandwidth on both axes for every track.
    Fixed(f64),
    /// Scott's rule per track and axis: `n^(-1/6) * sigma`.
    #[default]
    Scott,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyConfig {
    #[serde(default = "default_grid_width")]
    pub grid_width: usize,
    #[serde(default = "default_grid_height")]
    pub grid_height: usize,
    #[serde(default)]
    pub bandwidth: Bandwidth,
    /// Lower bound applied to every bandwidth, also used for stationary tracks.
    #[serde(default = "default_min_bandwidth")]
    pub min_bandwidth: f64,
    /// Cells below this fraction of the peak are cleared in
    /// [`AnalysisReport::heatmap`](crate::pipeline::AnalysisReport::heatmap).
    #[serde(default = "default_threshold_fraction")]
    pub threshold_fraction: f64,
}

/// Upper bound on `grid_width * grid_height`.
pub const MAX_GRID_CELLS: usize = 1 << 24;

fn default_grid_width() -> usize {
    105
}

fn default_grid_height() -> usize {
    68
}

fn default_min_bandwidth() -> f64 {
    0.5
}

fn default_threshold_fraction() -> f64 {
    0.05
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            grid_width: default_grid_width(),
            grid_height: default_grid_height(),
            bandwidth: Bandwidth::default(),
            min_bandwidth: default_min_bandwidth(),
            threshold_fraction: default_threshold_fraction(),
        }
    }
}

impl OccupancyConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(TrackError::InvalidConfig(
                "occupancy grid must have at least one cell".to_string(),
            ));
        }
        match self.grid_width.checked_mul(self.grid_height) {
            Some(cells) if cells <= MAX_GRID_CELLS => {}
            _ => {
                return Err(TrackError::InvalidConfig(format!(
                    "occupancy grid {}x{} exceeds {} cells",
                    self.grid_width, self.grid_height, MAX_GRID_CELLS
                )));
            }
        }
        if !(self.min_bandwidth.is_finite() && self.min_bandwidth > 0.0) {
            return Err(TrackError::InvalidConfig(format!(
                "min_bandwidth must be positive, got {}",
                self.min_bandwidth
            )));
        }
        if let Bandwidth::Fixed(h) = self.bandwidth {
            if !(h.is_finite() && h > 0.0) {
                return Err(TrackError::InvalidConfig(format!(
                    "fixed bandwidth must be positive, got {}",
                    h
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.threshold_fraction) {
            return Err(TrackError::InvalidConfig(format!(
                "threshold_fraction must be in [0, 1], got {}",
                self.threshold_fraction
            )));
        }
        Ok(())
    }
}

/* -----------------------------------------------------------------------------
 * Density surface
 * ----------------------------------------------------------------------------- */
/// Density sampled on a `width x height` grid, row-major with row 0 at
/// `bounds.min_y`.
#[derive(Debug, Clone, PartialEq)]
pub struct DensitySurface {
    pub width: usize,
    pub height: usize,
    pub bounds: PlaneBounds,
    pub values: Vec<f64>,
    /// Tracks left out for having fewer than two path points, ascending.
    pub skipped: Vec<usize>,
}

impl DensitySurface {
    fn zeros(width: usize, height: usize, bounds: PlaneBounds) -> Self {
        Self {
            width,
            height,
            bounds,
            values: vec![0.0; width * height],
            skipped: Vec::new(),
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.values.get(row * self.width + col).copied()
    }

    pub fn cell_size(&self) -> (f64, f64) {
        (
            self.bounds.width() / self.width as f64,
            self.bounds.height() / self.height as f64,
        )
    }

    /// Centre of the given cell in plane coordinates.
    pub fn cell_center(&self, col: usize, row: usize) -> Point2<f64> {
        let (dx, dy) = self.cell_size();
        Point2::new(
            self.bounds.min_x + (col as f64 + 0.5) * dx,
            self.bounds.min_y + (row as f64 + 0.5) * dy,
        )
    }

    /// Density of the cell containing `point`, `None` outside the bounds.
    pub fn value_at(&self, point: &Point2<f64>) -> Option<f64> {
        if !self.bounds.contains(point) {
            return None;
        }
        let (dx, dy) = self.cell_size();
        let col = (((point.x - self.bounds.min_x) / dx) as usize).min(self.width - 1);
        let row = (((point.y - self.bounds.min_y) / dy) as usize).min(self.height - 1);
        self.get(col, row)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Approximate integral over the bounds (sum times cell area).
    pub fn total(&self) -> f64 {
        let (dx, dy) = self.cell_size();
        self.values.iter().sum::<f64>() * dx * dy
    }

    /// Values scaled into `[0, 1]` by the peak; an all-zero surface is
    /// returned unchanged.
    pub fn normalized(&self) -> Self {
        let peak = self.max();
        let mut out = self.clone();
        if peak > 0.0 {
            out.values.iter_mut().for_each(|v| *v /= peak);
        }
        out
    }

    /// Copy with every cell below `fraction * max()` set to zero.
    pub fn thresholded(&self, fraction: f64) -> Self {
        let cutoff = fraction * self.max();
        let mut out = self.clone();
        out.values
            .iter_mut()
            .filter(|v| **v < cutoff)
            .for_each(|v| *v = 0.0);
        out
    }
}

/* -----------------------------------------------------------------------------
 * Estimator
 * ----------------------------------------------------------------------------- */
#[derive(Debug, Clone)]
pub struct OccupancyEstimator {
    config: OccupancyConfig,
}

impl OccupancyEstimator {
    pub fn new(config: OccupancyConfig) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OccupancyConfig {
        &self.config
    }

    /// Build the combined density surface from every finished path.
    ///
    /// Per-track densities are computed in parallel and summed in ascending
    /// track id order, so the result does not depend on thread scheduling.
    pub fn estimate(
        &self,
        paths: &HashMap<usize, TrackPath>,
        bounds: &PlaneBounds,
    ) -> Result<DensitySurface, TrackError> {
        bounds.validate()?;
        let mut surface =
            DensitySurface::zeros(self.config.grid_width, self.config.grid_height, *bounds);

        let mut ids: Vec<usize> = paths.keys().copied().collect();
        ids.sort_unstable();

        let mut eligible = Vec::with_capacity(ids.len());
        for id in ids {
            match paths.get(&id) {
                Some(path) if path.len() >= 2 => eligible.push(path),
                Some(path) => {
                    debug!(track_id = id, points = path.len(), "track skipped for density");
                    surface.skipped.push(id);
                }
                None => {}
            }
        }

        let contributions: Vec<Vec<f64>> = eligible
            .par_iter()
            .map(|path| self.track_density(path, &surface))
            .collect();

        for contribution in &contributions {
            for (acc, v) in surface.values.iter_mut().zip(contribution) {
                *acc += v;
            }
        }

        info!(
            tracks = contributions.len(),
            skipped = surface.skipped.len(),
            "occupancy density estimated"
        );
        Ok(surface)
    }

    /// Per-axis bandwidths for one path.
    pub fn bandwidths(&self, path: &TrackPath) -> (f64, f64) {
        let floor = self.config.min_bandwidth;
        match self.config.bandwidth {
            Bandwidth::Fixed(h) => (h.max(floor), h.max(floor)),
            Bandwidth::Scott => {
                let n = path.len() as f64;
                let factor = n.powf(-1.0 / 6.0);
                let (sx, sy) = sample_std(path);
                ((factor * sx).max(floor), (factor * sy).max(floor))
            }
        }
    }

    fn track_density(&self, path: &TrackPath, grid: &DensitySurface) -> Vec<f64> {
        let (hx, hy) = self.bandwidths(path);
        let norm = 1.0 / (2.0 * PI * hx * hy * path.len() as f64);

        let xs: Vec<f64> = (0..grid.width).map(|c| grid.cell_center(c, 0).x).collect();
        let ys: Vec<f64> = (0..grid.height).map(|r| grid.cell_center(0, r).y).collect();

        // The kernel is separable, so each point costs one pass per axis
        // plus the outer product.
        let mut values = vec![0.0; grid.width * grid.height];
        let mut kx = vec![0.0; grid.width];
        for p in path.positions() {
            for (k, x) in kx.iter_mut().zip(&xs) {
                let u = (x - p.x) / hx;
                *k = (-0.5 * u * u).exp();
            }
            for (row, y) in ys.iter().enumerate() {
                let v = (y - p.y) / hy;
                let ky = (-0.5 * v * v).exp() * norm;
                if ky == 0.0 {
                    continue;
                }
                let cells = &mut values[row * grid.width..(row + 1) * grid.width];
                for (cell, k) in cells.iter_mut().zip(&kx) {
                    *cell += ky * k;
                }
            }
        }
        values
    }
}

/// Sample standard deviation (n - 1) of x and y.
fn sample_std(path: &TrackPath) -> (f64, f64) {
    let n = path.len() as f64;
    if n < 2.0 {
        return (0.0, 0.0);
    }
    let (sum_x, sum_y) = path
        .positions()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (mx, my) = (sum_x / n, sum_y / n);
    let (vx, vy) = path.positions().fold((0.0, 0.0), |(vx, vy), p| {
        (vx + (p.x - mx).powi(2), vy + (p.y - my).powi(2))
    });
    ((vx / (n - 1.0)).sqrt(), (vy / (n - 1.0)).sqrt())
}

//! Erosion and deposition kernels
//!
//! Implements the geomorphic processes that reshape the grid each step:
//! - **Stream power**: detachment-limited bedrock incision, `E = K Q^m S^n`
//! - **Sediment transport**: flux routed downstream under a transport capacity
//! - **Hillslope diffusion**: linear soil creep smoothing
//! - **Overbank deposition**: floodplain sediment beside overflowing channels
//! - **Lateral erosion**: outer-bank cutting and point-bar growth in bends
//! - **Mass movement**: failure of slopes steeper than the friction angle

pub mod lateral;
pub mod mass_movement;
pub mod overbank;
pub mod params;
pub mod transport;
pub mod utils;

pub use lateral::LateralErosionKernel;
pub use mass_movement::MassMovementKernel;
pub use overbank::OverbankParams;
pub use params::{ErosionParams, ErosionPreset};

use crate::grid::Grid;
use crate::tilemap::Tilemap;
use serde::Serialize;
use tracing::debug;

/// Statistics from one erosion call
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErosionStats {
    /// Total material eroded (height units summed over cells)
    pub total_eroded: f64,
    /// Total material deposited
    pub total_deposited: f64,
    /// Maximum erosion at any single cell
    pub max_erosion: f64,
    /// Maximum deposition at any single cell
    pub max_deposition: f64,
}

impl ErosionStats {
    /// Summarise a signed change field (negative = erosion).
    pub fn from_change(change: &Tilemap<f64>) -> Self {
        let mut stats = Self::default();
        for &c in change.as_slice() {
            if c < 0.0 {
                stats.total_eroded -= c;
                stats.max_erosion = stats.max_erosion.max(-c);
            } else if c > 0.0 {
                stats.total_deposited += c;
                stats.max_deposition = stats.max_deposition.max(c);
            }
        }
        stats
    }

    /// Fold another call's statistics into this one.
    pub fn merge(&mut self, other: &ErosionStats) {
        self.total_eroded += other.total_eroded;
        self.total_deposited += other.total_deposited;
        self.max_erosion = self.max_erosion.max(other.max_erosion);
        self.max_deposition = self.max_deposition.max(other.max_deposition);
    }
}

/// Fluvial and hillslope erosion over a [`Grid`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErosionKernel {
    pub params: ErosionParams,
}

impl ErosionKernel {
    pub fn new(params: ErosionParams) -> Self {
        Self { params }
    }

    /// Stream-power incision potential at one cell, before any clamp.
    #[inline]
    pub(crate) fn incision(&self, discharge: f64, slope: f64, underwater: bool, dt: f64) -> f64 {
        let p = &self.params;
        let e = p.k * discharge.max(0.0).powf(p.m) * slope.max(p.min_slope).powf(p.n) * dt;
        if underwater {
            e * p.underwater_erosion_factor
        } else {
            e
        }
    }

    /// Detachment-limited erosion `E = K Q^m S^n dt`, removed from bedrock.
    ///
    /// Returns the (non-negative) eroded depth per cell.
    pub fn stream_power_erode(&self, grid: &mut Grid, discharge: &Tilemap<f64>, dt: f64) -> Tilemap<f64> {
        let erosion = {
            let view: &Grid = grid;
            Tilemap::par_from_fn(view.width(), view.height(), |x, y| {
                let e = self.incision(
                    *discharge.get(x, y),
                    view.slope_at(x, y),
                    view.is_underwater_at(x, y),
                    dt,
                );
                self.params.clamp_change(e)
            })
        };
        grid.lower_bedrock(&erosion);
        debug!(total = erosion.sum(), "Stream power erosion");
        erosion
    }

    /// Explicit linear diffusion `dz = D laplacian(z) dt` on a 4-neighbour stencil.
    ///
    /// Edge rows and columns are pinned (zero change). Stability needs
    /// `D dt / cell_size^2 <= 0.25`; that is the caller's choice of `dt`.
    /// The change is applied to the grid and returned.
    pub fn hillslope_diffuse(&self, grid: &mut Grid, dt: f64) -> Tilemap<f64> {
        let width = grid.width();
        let height = grid.height();
        let dx2 = grid.cell_size() * grid.cell_size();
        let scale = self.params.diffusivity * dt / dx2;

        let change = {
            let z = grid.elevation();
            Tilemap::par_from_fn(width, height, |x, y| {
                if x == 0 || y == 0 || x + 1 >= width || y + 1 >= height {
                    return 0.0;
                }
                let center = *z.get(x, y);
                let laplacian = *z.get(x + 1, y) + *z.get(x - 1, y) + *z.get(x, y + 1) + *z.get(x, y - 1)
                    - 4.0 * center;
                self.params.clamp_change(scale * laplacian)
            })
        };

        grid.apply_change(&change);
        debug!(max_change = change.min_max().1, "Hillslope diffusion");
        change
    }
}

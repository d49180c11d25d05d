//! Overbank (floodplain) deposition.
//!
//! When any cell carries more than bankfull discharge the channel floods and
//! fine sediment settles on the surrounding floodplain, thickest beside the
//! channel (levees) and thinning with distance.

use super::ErosionKernel;
use crate::grid::Grid;
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverbankParams {
    /// Discharge a channel holds before flooding
    pub bankfull_discharge: f64,
    /// Exponential decay of deposition per cell of distance from the channel
    pub decay_rate: f64,
    /// Deposition next to the channel per unit time
    pub rate: f64,
    /// Floodwater reach in cells
    pub max_distance: f64,
}

impl Default for OverbankParams {
    fn default() -> Self {
        Self {
            bankfull_discharge: 100.0,
            decay_rate: 0.1,
            rate: 0.1,
            max_distance: 50.0,
        }
    }
}

/// Two-pass chamfer distance (in cells) to the nearest `true` cell.
/// Cells are `f64::INFINITY` when the mask is empty.
pub fn chamfer_distance(mask: &Tilemap<bool>) -> Tilemap<f64> {
    let width = mask.width;
    let height = mask.height;
    let mut dist = mask.map(|&m| if m { 0.0 } else { f64::INFINITY });

    // Forward pass: neighbours above and to the left.
    for y in 0..height {
        for x in 0..width {
            let mut d = *dist.get(x, y);
            for (dx, dy, w) in [(-1, 0, 1.0), (-1, -1, SQRT_2), (0, -1, 1.0), (1, -1, SQRT_2)] {
                if let Some((nx, ny)) = dist.offset(x, y, dx, dy) {
                    d = d.min(*dist.get(nx, ny) + w);
                }
            }
            dist.set(x, y, d);
        }
    }

    // Backward pass: neighbours below and to the right.
    for y in (0..height).rev() {
        for x in (0..width).rev() {
            let mut d = *dist.get(x, y);
            for (dx, dy, w) in [(1, 0, 1.0), (1, 1, SQRT_2), (0, 1, 1.0), (-1, 1, SQRT_2)] {
                if let Some((nx, ny)) = dist.offset(x, y, dx, dy) {
                    d = d.min(*dist.get(nx, ny) + w);
                }
            }
            dist.set(x, y, d);
        }
    }

    dist
}

impl ErosionKernel {
    /// Deposit floodplain sediment around channels that exceed bankfull.
    ///
    /// Channel cells carry more than half of bankfull; everything else within
    /// `max_distance` cells receives `rate * exp(-decay * d) * dt`. Channel and
    /// underwater cells receive nothing. Returns the deposited thickness.
    pub fn overbank_deposition(
        &self,
        grid: &mut Grid,
        discharge: &Tilemap<f64>,
        params: &OverbankParams,
        dt: f64,
    ) -> Tilemap<f64> {
        let width = grid.width();
        let height = grid.height();
        let flooding = discharge.iter().any(|(_, _, &q)| q > params.bankfull_discharge);
        if !flooding {
            return Tilemap::new_with(width, height, 0.0);
        }

        let channel = discharge.map(|&q| q > params.bankfull_discharge * 0.5);
        let distance = chamfer_distance(&channel);
        let underwater = grid.is_underwater();

        let deposition = Tilemap::from_fn(width, height, |x, y| {
            let d = *distance.get(x, y);
            if *channel.get(x, y) || *underwater.get(x, y) || d > params.max_distance {
                return 0.0;
            }
            params.rate * (-params.decay_rate * d).exp() * dt
        });

        grid.add_sediment(&deposition);
        debug!(total = deposition.sum(), "Overbank deposition");
        deposition
    }
}

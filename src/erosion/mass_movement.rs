//! Gravity-driven mass movement (landslides).
//!
//! One relaxation sweep per call: every cell steeper than the critical slope
//! sheds part of its loose material to its lowest neighbour. Repeated calls
//! relax slopes toward the friction angle rather than enforcing it at once.

use crate::grid::Grid;
use crate::hydrology::{lowest_neighbor, neighbor};
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MassMovementKernel {
    /// Steepest stable slope (rise over run)
    pub critical_slope: f64,
    /// Fraction of the excess that fails per unit time
    pub efficiency: f64,
    /// Failure volume per unit of excess slope
    pub excess_scale: f64,
    /// Share of bedrock that can be mobilised alongside sediment
    pub bedrock_fraction: f64,
    /// Share of moved material lost in transit
    pub transit_loss: f64,
}

impl Default for MassMovementKernel {
    fn default() -> Self {
        Self::from_friction_angle(35.0)
    }
}

impl MassMovementKernel {
    /// Kernel for an internal friction angle in degrees.
    pub fn from_friction_angle(degrees: f64) -> Self {
        Self::with_critical_slope(degrees.to_radians().tan())
    }

    pub fn with_critical_slope(critical_slope: f64) -> Self {
        Self {
            critical_slope,
            efficiency: 0.5,
            excess_scale: 5.0,
            bedrock_fraction: 0.1,
            transit_loss: 0.1,
        }
    }

    /// Friction angle in degrees equivalent to the critical slope.
    pub fn friction_angle(&self) -> f64 {
        self.critical_slope.atan().to_degrees()
    }

    /// Move material off over-steep cells. The change is computed against the
    /// state at the start of the sweep, applied to the grid and returned.
    pub fn relax(&self, grid: &mut Grid, dt: f64) -> Tilemap<f64> {
        let critical = self.critical_slope;
        let efficiency = (self.efficiency * dt).min(1.0);
        let slope = grid.slope();
        let elevation = grid.elevation();

        let mut change = Tilemap::new_with(grid.width(), grid.height(), 0.0);
        let mut failures = 0usize;
        for (x, y, &s) in slope.iter() {
            let excess = s - critical;
            if excess <= 0.0 {
                continue;
            }
            let available = (*grid.sediment().get(x, y) + *grid.bedrock().get(x, y) * self.bedrock_fraction).max(0.0);
            let amount = (excess * efficiency * self.excess_scale).min(available);
            if amount <= 0.0 {
                continue;
            }
            let Some((tx, ty)) = lowest_neighbor(elevation, x, y).and_then(|dir| neighbor(elevation, x, y, dir)) else {
                continue;
            };
            *change.get_mut(x, y) -= amount;
            *change.get_mut(tx, ty) += amount * (1.0 - self.transit_loss);
            failures += 1;
        }

        grid.apply_change(&change);
        debug!(failures, critical, "Mass movement");
        change
    }
}

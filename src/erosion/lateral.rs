//! Lateral (bank) erosion driven by channel curvature.
//!
//! A bend is detected by comparing a cell's outgoing flow direction with the
//! mean direction of the cells draining into it. The outer bank of the bend is
//! cut and most of that material builds a point bar on the inner bank, so
//! channels slowly migrate sideways.

use super::utils::{direction_angle, rotate, upstream_directions, wrap_angle};
use crate::grid::Grid;
use crate::hydrology::{neighbor, NO_FLOW};
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LateralErosionKernel {
    /// Bank erodibility k_lateral
    pub coefficient: f64,
    /// Fraction of the cut bank rebuilt as a point bar
    pub deposit_fraction: f64,
    /// Bends sharper than this (radians) migrate
    pub min_curvature: f64,
    /// Reaches with less discharge than this are left alone
    pub min_discharge: f64,
}

impl Default for LateralErosionKernel {
    fn default() -> Self {
        Self {
            coefficient: 0.01,
            deposit_fraction: 0.8,
            min_curvature: 0.01,
            min_discharge: 1.0,
        }
    }
}

impl LateralErosionKernel {
    pub fn new(coefficient: f64) -> Self {
        Self {
            coefficient,
            ..Default::default()
        }
    }

    /// Signed channel curvature per cell in radians, positive for a left turn.
    ///
    /// Cells without an outgoing direction or without upstream donors have
    /// zero curvature.
    pub fn curvature(&self, flow_dir: &Tilemap<u8>) -> Tilemap<f64> {
        Tilemap::par_from_fn(flow_dir.width, flow_dir.height, |x, y| {
            let dir = *flow_dir.get(x, y);
            if dir == NO_FLOW {
                return 0.0;
            }
            let (mut sin_sum, mut cos_sum, mut count) = (0.0, 0.0, 0usize);
            for upstream in upstream_directions(flow_dir, x, y) {
                let angle = direction_angle(upstream);
                sin_sum += angle.sin();
                cos_sum += angle.cos();
                count += 1;
            }
            // Opposing donors cancel out; no meaningful mean direction.
            if count == 0 || (sin_sum.abs() < 1e-12 && cos_sum.abs() < 1e-12) {
                return 0.0;
            }
            wrap_angle(direction_angle(dir) - sin_sum.atan2(cos_sum))
        })
    }

    /// Shift material from outer to inner banks of curving channels.
    ///
    /// Erosion at the outer bank is `k sqrt(Q) |curvature| dt`; the inner bank
    /// receives `deposit_fraction` of it and the rest leaves with the flood
    /// plain. Only interior cells migrate. The change is applied to the grid
    /// and returned.
    pub fn migrate(&self, grid: &mut Grid, discharge: &Tilemap<f64>, dt: f64) -> Tilemap<f64> {
        let width = grid.width();
        let height = grid.height();
        let flow_dir = grid.flow_direction();
        let curvature = self.curvature(flow_dir);

        let mut change = Tilemap::new_with(width, height, 0.0);
        let mut active = 0usize;
        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let dir = *flow_dir.get(x, y);
                if dir == NO_FLOW {
                    continue;
                }
                let curv = *curvature.get(x, y);
                let q = *discharge.get(x, y);
                if curv.abs() < self.min_curvature || q < self.min_discharge {
                    continue;
                }
                // Left turn: the outer bank is on the right (clockwise).
                let (outer, inner) = if curv > 0.0 {
                    (rotate(dir, 1), rotate(dir, 3))
                } else {
                    (rotate(dir, 3), rotate(dir, 1))
                };
                let amount = self.coefficient * q.sqrt() * curv.abs() * dt;
                if let Some((ox, oy)) = neighbor(flow_dir, x, y, outer) {
                    *change.get_mut(ox, oy) -= amount;
                }
                if let Some((ix, iy)) = neighbor(flow_dir, x, y, inner) {
                    *change.get_mut(ix, iy) += amount * self.deposit_fraction;
                }
                active += 1;
            }
        }

        grid.apply_change(&change);
        debug!(active, "Lateral erosion");
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn flat_grid(width: usize, height: usize) -> Grid {
        let mut grid = Grid::new(width, height, 1.0, -100.0).unwrap();
        grid.seed(Tilemap::new_with(width, height, 10.0), Some(Tilemap::new_with(width, height, 1.0)))
            .unwrap();
        grid
    }

    #[test]
    fn test_straight_channel_does_not_migrate() {
        let mut grid = flat_grid(6, 6);
        grid.flow_direction_mut().fill(4);
        let discharge = Tilemap::new_with(6, 6, 100.0);

        let kernel = LateralErosionKernel::default();
        assert!(kernel.curvature(grid.flow_direction()).iter().all(|(_, _, &c)| c.abs() < 1e-12));
        let change = kernel.migrate(&mut grid, &discharge, 1.0);
        assert!(change.iter().all(|(_, _, &c)| c == 0.0));
    }

    #[test]
    fn test_left_bend_cuts_right_bank() {
        // Flow arrives heading south and leaves heading east: a left turn.
        let mut grid = flat_grid(5, 5);
        let flow = grid.flow_direction_mut();
        flow.fill(NO_FLOW);
        flow.set(2, 1, 4);
        flow.set(2, 2, 2);
        let discharge = Tilemap::new_with(5, 5, 4.0);

        let kernel = LateralErosionKernel::default();
        let curvature = kernel.curvature(grid.flow_direction());
        assert_relative_eq!(*curvature.get(2, 2), FRAC_PI_2, epsilon = 1e-12);

        let change = kernel.migrate(&mut grid, &discharge, 1.0);
        let amount = 0.01 * 2.0 * FRAC_PI_2;
        // Right of east is south (2, 3); left is north (2, 1).
        assert_relative_eq!(*change.get(2, 3), -amount, epsilon = 1e-12);
        assert_relative_eq!(*change.get(2, 1), amount * 0.8, epsilon = 1e-12);
        assert_relative_eq!(*grid.sediment().get(2, 3), 1.0 - amount, epsilon = 1e-12);
    }

    #[test]
    fn test_cells_without_direction_are_skipped() {
        let mut grid = flat_grid(5, 5);
        grid.flow_direction_mut().fill(NO_FLOW);
        let discharge = Tilemap::new_with(5, 5, 100.0);

        let kernel = LateralErosionKernel {
            min_curvature: 0.0,
            ..Default::default()
        };
        let change = kernel.migrate(&mut grid, &discharge, 1.0);
        assert!(change.iter().all(|(_, _, &c)| c == 0.0));
        assert!(grid.sediment().iter().all(|(_, _, &s)| s == 1.0));
    }

    #[test]
    fn test_dry_reach_is_skipped() {
        let mut grid = flat_grid(5, 5);
        let flow = grid.flow_direction_mut();
        flow.fill(NO_FLOW);
        flow.set(2, 1, 4);
        flow.set(2, 2, 2);
        let discharge = Tilemap::new_with(5, 5, 0.5);

        let change = LateralErosionKernel::default().migrate(&mut grid, &discharge, 1.0);
        assert!(change.iter().all(|(_, _, &c)| c == 0.0));
    }
}

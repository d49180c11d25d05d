//! Utility functions shared by the erosion kernels
//!
//! Provides steepest-descent lookup, direction angles and delta-field splitting.

use crate::hydrology::{neighbor, DX, DY, NO_FLOW};
use crate::tilemap::Tilemap;

/// Direction angle in radians, counter-clockwise from east (north is +pi/2).
#[inline]
pub fn direction_angle(dir: u8) -> f64 {
    let i = dir as usize;
    (-DY[i] as f64).atan2(DX[i] as f64)
}

/// Wrap an angle into (-pi, pi].
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Rotate a D8 direction by `quarter_turns` * 90 degrees clockwise.
///
/// Inputs are reduced modulo 8 first, so any `u8` is accepted. Callers
/// must filter out [`NO_FLOW`] themselves.
#[inline]
pub fn rotate(dir: u8, quarter_turns: u8) -> u8 {
    (dir % 8 + 2 * (quarter_turns % 4)) % 8
}

/// Directions of the neighbours whose recorded flow points into `(x, y)`.
pub fn upstream_directions(flow_dir: &Tilemap<u8>, x: usize, y: usize) -> impl Iterator<Item = u8> + '_ {
    (0..8u8).filter_map(move |dir| {
        let (nx, ny) = neighbor(flow_dir, x, y, dir)?;
        let theirs = *flow_dir.get(nx, ny);
        // The neighbour sits in direction `dir`; it drains here if it points back.
        (theirs != NO_FLOW && theirs == rotate(dir, 2)).then_some(theirs)
    })
}

/// Split a signed change field into (erosion, deposition), both non-negative.
pub fn split_change(change: &Tilemap<f64>) -> (Tilemap<f64>, Tilemap<f64>) {
    (change.map(|&c| (-c).max(0.0)), change.map(|&c| c.max(0.0)))
}

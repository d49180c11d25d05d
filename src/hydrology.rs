//! Flow routing and water depth.
//!
//! Discharge is accumulated in one pass over the cells sorted from highest to
//! lowest. Every accepted flow edge drops strictly in elevation, so by the time
//! a cell is visited all of its donors have already been visited and its
//! discharge is final. No iterative relaxation is needed.
//!
//! Two routing schemes are provided:
//! - **D8**: each cell hands its whole discharge to the single lowest neighbour
//!   and records that neighbour's direction on the grid.
//! - **MFD**: discharge is split across all lower neighbours in proportion to
//!   `slope^p`. Used for braided or distributed flow; it leaves the recorded
//!   flow directions alone.

use crate::grid::Grid;
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Direction encoding for D8 flow, clockwise from north:
/// 7 0 1
/// 6 X 2
/// 5 4 3
/// Adding 2 (mod 8) rotates a direction 90° clockwise.
pub const DX: [i32; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
pub const DY: [i32; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];

/// Special value indicating no downhill neighbour (sink, flat, or sea).
pub const NO_FLOW: u8 = 255;

/// Neighbour distance in cell units for each direction.
pub const D8_DISTANCE: [f64; 8] = [
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
    1.0,
    std::f64::consts::SQRT_2,
];

/// Neighbour scan order: cardinals before diagonals. Combined with a strict
/// `<` comparison this makes the lowest cardinal neighbour win a tie, then the
/// lowest direction index.
const SCAN_ORDER: [u8; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

/// Smallest slope used as an exponent base or divisor.
pub const MIN_SLOPE: f64 = 0.001;

/// Cell reached by stepping once in `dir`, if it lies inside the map.
#[inline]
pub fn neighbor<T: Clone>(map: &Tilemap<T>, x: usize, y: usize, dir: u8) -> Option<(usize, usize)> {
    if dir >= 8 {
        return None;
    }
    map.offset(x, y, DX[dir as usize], DY[dir as usize])
}

/// Linear indices sorted by descending `surface`, ties by ascending index.
pub fn descending_order(surface: &Tilemap<f64>) -> Vec<usize> {
    let values = surface.as_slice();
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    order
}

/// Direction of the lowest neighbour strictly below `(x, y)`, if any.
pub fn lowest_neighbor(surface: &Tilemap<f64>, x: usize, y: usize) -> Option<u8> {
    let mut lowest = *surface.get(x, y);
    let mut best = None;
    for &dir in &SCAN_ORDER {
        if let Some((nx, ny)) = neighbor(surface, x, y, dir) {
            let z = *surface.get(nx, ny);
            if z < lowest {
                lowest = z;
                best = Some(dir);
            }
        }
    }
    best
}

/// Precipitation input to routing, in depth per unit time.
#[derive(Clone, Copy, Debug)]
pub enum Rainfall<'a> {
    Uniform(f64),
    Field(&'a Tilemap<f64>),
}

impl Rainfall<'_> {
    #[inline]
    pub fn rate_at(&self, x: usize, y: usize) -> f64 {
        match self {
            Rainfall::Uniform(rate) => *rate,
            Rainfall::Field(field) => *field.get(x, y),
        }
    }
}

/// Flow routing scheme.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum FlowRouting {
    /// Single receiver per cell.
    #[default]
    D8,
    /// Multiple receivers weighted by `slope^exponent`.
    Mfd { exponent: f64 },
}

/// Result of pit filling.
#[derive(Clone, Debug)]
pub struct SinkFill {
    /// Terrain plus ponded water.
    pub surface: Tilemap<f64>,
    /// Ponded water depth per cell.
    pub depth: Tilemap<f64>,
    /// Sweeps actually performed.
    pub iterations: usize,
    /// False when the sweep limit was reached with pits remaining.
    pub converged: bool,
}

/// Hydrology coefficients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrologyKernel {
    /// Manning roughness coefficient
    pub manning_n: f64,
    /// Channel width = coefficient * sqrt(discharge)
    pub width_coefficient: f64,
    /// Narrowest channel considered (m)
    pub min_channel_width: f64,
    /// Floor applied to slope before it is used as a divisor
    pub min_slope: f64,
    /// Height added above the lowest neighbour when a pit is filled
    pub fill_tolerance: f64,
    /// Upper bound on pit-filling sweeps
    pub fill_max_iterations: usize,
}

impl Default for HydrologyKernel {
    fn default() -> Self {
        Self {
            manning_n: 0.03,
            width_coefficient: 5.0,
            min_channel_width: 1.0,
            min_slope: MIN_SLOPE,
            fill_tolerance: 0.001,
            fill_max_iterations: 100,
        }
    }
}

impl HydrologyKernel {
    /// D8 flow routing over the grid's elevation.
    ///
    /// Seeds every cell with `rate * cell_area`, then passes each cell's total
    /// to its lowest neighbour. Records receivers in the grid's flow-direction
    /// field. Underwater cells absorb what reaches them.
    pub fn route_flow(&self, grid: &mut Grid, rainfall: Rainfall<'_>) -> Tilemap<f64> {
        let surface = grid.elevation().clone();
        self.route_flow_on(grid, &surface, rainfall)
    }

    /// D8 routing over an arbitrary routing surface (e.g. a pit-filled one).
    pub fn route_flow_on(&self, grid: &mut Grid, surface: &Tilemap<f64>, rainfall: Rainfall<'_>) -> Tilemap<f64> {
        let area = grid.cell_area();
        let underwater = grid.is_underwater();
        let mut discharge = Tilemap::from_fn(grid.width(), grid.height(), |x, y| rainfall.rate_at(x, y) * area);

        let order = descending_order(surface);
        let flow_dir = grid.flow_direction_mut();
        flow_dir.fill(NO_FLOW);

        let mut sinks = 0usize;
        for idx in order {
            let (x, y) = surface.coords(idx);
            if *underwater.get(x, y) {
                continue;
            }
            let Some(dir) = lowest_neighbor(surface, x, y) else {
                sinks += 1;
                continue;
            };
            flow_dir.set(x, y, dir);
            if let Some((nx, ny)) = neighbor(surface, x, y, dir) {
                let q = *discharge.get(x, y);
                *discharge.get_mut(nx, ny) += q;
            }
        }

        debug!(sinks, total = discharge.sum(), "D8 routing complete");
        discharge
    }

    /// Record D8 receivers without accumulating discharge.
    pub fn assign_flow_directions(&self, grid: &mut Grid, surface: &Tilemap<f64>) {
        let underwater = grid.is_underwater();
        let flow_dir = grid.flow_direction_mut();
        for (x, y, dir) in flow_dir.iter_mut() {
            *dir = if *underwater.get(x, y) {
                NO_FLOW
            } else {
                lowest_neighbor(surface, x, y).unwrap_or(NO_FLOW)
            };
        }
    }

    /// Multiple-flow-direction routing.
    ///
    /// Each cell's discharge is split across every lower neighbour in
    /// proportion to `(drop / distance)^exponent`. Flow directions on the grid
    /// are not touched.
    pub fn route_flow_mfd(&self, grid: &Grid, rainfall: Rainfall<'_>, exponent: f64) -> Tilemap<f64> {
        let surface = grid.elevation();
        let area = grid.cell_area();
        let cell_size = grid.cell_size();
        let underwater = grid.is_underwater();
        let mut discharge = Tilemap::from_fn(grid.width(), grid.height(), |x, y| rainfall.rate_at(x, y) * area);

        let mut receivers: Vec<((usize, usize), f64)> = Vec::with_capacity(8);
        for idx in descending_order(surface) {
            let (x, y) = surface.coords(idx);
            if *underwater.get(x, y) {
                continue;
            }
            let q = *discharge.get(x, y);
            if q <= 0.0 {
                continue;
            }

            let z = *surface.get(x, y);
            receivers.clear();
            let mut total_weight = 0.0;
            for dir in 0..8u8 {
                if let Some((nx, ny)) = neighbor(surface, x, y, dir) {
                    let drop = z - *surface.get(nx, ny);
                    if drop > 0.0 {
                        let slope = drop / (D8_DISTANCE[dir as usize] * cell_size);
                        let weight = slope.powf(exponent);
                        total_weight += weight;
                        receivers.push(((nx, ny), weight));
                    }
                }
            }
            if receivers.is_empty() || total_weight <= 0.0 {
                continue;
            }
            for &((nx, ny), weight) in &receivers {
                *discharge.get_mut(nx, ny) += q * weight / total_weight;
            }
        }

        debug!(total = discharge.sum(), exponent, "MFD routing complete");
        discharge
    }

    /// Normal-flow water depth from discharge.
    ///
    /// Width grows as `sqrt(Q)`; depth solves Manning's relation for a wide
    /// rectangular channel: `D = (Q n / (W sqrt(S)))^0.6`.
    pub fn water_depth(&self, grid: &Grid, discharge: &Tilemap<f64>) -> Tilemap<f64> {
        Tilemap::par_from_fn(grid.width(), grid.height(), |x, y| {
            let q = discharge.get(x, y).max(0.0);
            if q == 0.0 {
                return 0.0;
            }
            let slope = grid.slope_at(x, y).max(self.min_slope);
            let width = (self.width_coefficient * q.sqrt()).max(self.min_channel_width);
            (q * self.manning_n / (width * slope.sqrt())).powf(0.6)
        })
    }

    /// Flood cells below sea level: their water depth becomes the sea depth.
    pub fn simulate_inundation(&self, grid: &mut Grid) {
        let sea_level = grid.sea_level();
        let elevation = grid.elevation().clone();
        for (x, y, depth) in grid.water_depth_mut().iter_mut() {
            let z = *elevation.get(x, y);
            if z < sea_level {
                *depth = sea_level - z;
            }
        }
    }

    /// Fill pits so water can spill out of them, forming lakes.
    ///
    /// Every interior cell lower than all eight neighbours is raised to the
    /// lowest neighbour plus `fill_tolerance`; sweeps repeat until nothing
    /// changes or `fill_max_iterations` is hit. The raised amount is added to
    /// the grid's water depth; the terrain itself is untouched. Nested or
    /// multi-cell depressions may need more sweeps than allowed, so the result
    /// is best-effort.
    pub fn fill_sinks(&self, grid: &mut Grid) -> SinkFill {
        let width = grid.width();
        let height = grid.height();
        let elevation = grid.elevation().clone();
        let mut surface = elevation.clone();
        let mut iterations = 0;
        let mut converged = width < 3 || height < 3;

        while !converged && iterations < self.fill_max_iterations {
            iterations += 1;
            let previous = surface.clone();
            let mut changed = false;

            for y in 1..height - 1 {
                for x in 1..width - 1 {
                    let current = *previous.get(x, y);
                    let mut min_neighbor = f64::MAX;
                    for dir in 0..8u8 {
                        if let Some((nx, ny)) = neighbor(&previous, x, y, dir) {
                            min_neighbor = min_neighbor.min(*previous.get(nx, ny));
                        }
                    }
                    if current < min_neighbor {
                        surface.set(x, y, min_neighbor + self.fill_tolerance);
                        changed = true;
                    }
                }
            }

            if !changed {
                converged = true;
            }
        }

        if !converged {
            warn!(iterations, "Sink filling stopped before all pits were filled");
        }

        let depth = Tilemap::from_fn(width, height, |x, y| (*surface.get(x, y) - *elevation.get(x, y)).max(0.0));
        grid.water_depth_mut().add_assign(&depth);

        SinkFill {
            surface,
            depth,
            iterations,
            converged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// 5x5 ramp falling from the top row (40 m) to the bottom row (0 m).
    fn ramp_grid() -> Grid {
        let mut grid = Grid::new(5, 5, 10.0, 0.0).unwrap();
        grid.seed(Tilemap::from_fn(5, 5, |_, y| (4 - y) as f64 * 10.0), None).unwrap();
        grid
    }

    fn bumpy_grid(width: usize, height: usize) -> Grid {
        let mut grid = Grid::new(width, height, 1.0, -1000.0).unwrap();
        let bedrock = Tilemap::from_fn(width, height, |x, y| {
            let (fx, fy) = (x as f64, y as f64);
            100.0 - 2.0 * fy + 3.0 * (0.7 * fx).sin() + 2.0 * (0.45 * fy + 0.3 * fx).cos()
        });
        grid.seed(bedrock, None).unwrap();
        grid
    }

    #[test]
    fn test_discharge_conservation_on_ramp() {
        let mut grid = ramp_grid();
        let discharge = HydrologyKernel::default().route_flow(&mut grid, Rainfall::Uniform(1.0));

        for x in 0..5 {
            assert_relative_eq!(*discharge.get(x, 0), 100.0);
        }
        let bottom: f64 = (0..5).map(|x| *discharge.get(x, 4)).sum();
        assert_relative_eq!(bottom, 2500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ramp_flows_straight_down() {
        let mut grid = ramp_grid();
        HydrologyKernel::default().route_flow(&mut grid, Rainfall::Uniform(1.0));

        for y in 0..4 {
            for x in 0..5 {
                assert_eq!(*grid.flow_direction().get(x, y), 4, "cell ({}, {})", x, y);
            }
        }
        for x in 0..5 {
            assert_eq!(*grid.flow_direction().get(x, 4), NO_FLOW);
        }
    }

    #[test]
    fn test_accumulation_is_monotonic_along_edges() {
        let mut grid = bumpy_grid(24, 18);
        let discharge = HydrologyKernel::default().route_flow(&mut grid, Rainfall::Uniform(0.5));

        for (x, y, &dir) in grid.flow_direction().iter() {
            if let Some((nx, ny)) = neighbor(grid.flow_direction(), x, y, dir) {
                assert!(*grid.elevation().get(nx, ny) < *grid.elevation().get(x, y));
                assert!(
                    *discharge.get(nx, ny) >= *discharge.get(x, y),
                    "receiver ({}, {}) has less discharge than donor ({}, {})",
                    nx, ny, x, y
                );
            }
        }

        // Nothing leaves the domain through D8 edges, so the sinks hold all rain.
        let sinks: f64 = grid
            .flow_direction()
            .iter()
            .filter(|(_, _, &d)| d == NO_FLOW)
            .map(|(x, y, _)| *discharge.get(x, y))
            .sum();
        assert_relative_eq!(sinks, 0.5 * 24.0 * 18.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_terrain_has_no_flow() {
        let mut grid = Grid::new(4, 4, 2.0, -1.0).unwrap();
        let discharge = HydrologyKernel::default().route_flow(&mut grid, Rainfall::Uniform(1.0));
        assert!(grid.flow_direction().iter().all(|(_, _, &d)| d == NO_FLOW));
        assert!(discharge.iter().all(|(_, _, &q)| q == 4.0));
    }

    #[test]
    fn test_underwater_cells_absorb_flow() {
        let mut grid = ramp_grid();
        grid.set_sea_level(15.0);
        let discharge = HydrologyKernel::default().route_flow(&mut grid, Rainfall::Uniform(1.0));

        // Rows 3 and 4 (10 m and 0 m) are under the sea.
        for x in 0..5 {
            assert_eq!(*grid.flow_direction().get(x, 3), NO_FLOW);
            assert_relative_eq!(*discharge.get(x, 3), 400.0);
            assert_relative_eq!(*discharge.get(x, 4), 100.0);
        }
    }

    #[test]
    fn test_rain_field_is_honoured() {
        let mut grid = ramp_grid();
        let mut rain = Tilemap::new_with(5, 5, 0.0);
        rain.set(2, 0, 2.0);
        let discharge = HydrologyKernel::default().route_flow(&mut grid, Rainfall::Field(&rain));
        assert_relative_eq!(*discharge.get(2, 4), 200.0);
        assert_relative_eq!(discharge.sum(), 200.0 * 5.0);
    }

    #[test]
    fn test_mfd_conserves_and_spreads() {
        let mut grid = ramp_grid();
        let kernel = HydrologyKernel::default();
        kernel.route_flow(&mut grid, Rainfall::Uniform(1.0));
        let directions_before = grid.flow_direction().clone();

        let discharge = kernel.route_flow_mfd(&grid, Rainfall::Uniform(1.0), 1.1);
        let bottom: f64 = (0..5).map(|x| *discharge.get(x, 4)).sum();
        assert_relative_eq!(bottom, 2500.0, epsilon = 1e-9);
        assert_eq!(grid.flow_direction(), &directions_before);

        // Edge cells lose part of their flow to the interior.
        assert!(*discharge.get(0, 1) < 200.0);
        assert!(*discharge.get(2, 1) > 100.0);
    }

    #[test]
    fn test_water_depth() {
        let mut grid = ramp_grid();
        let kernel = HydrologyKernel::default();
        let discharge = kernel.route_flow(&mut grid, Rainfall::Uniform(1.0));
        let depth = kernel.water_depth(&grid, &discharge);
        assert!(depth.iter().all(|(_, _, &d)| d > 0.0));
        assert!(*depth.get(2, 3) > *depth.get(2, 0));

        let dry = kernel.water_depth(&grid, &Tilemap::new_with(5, 5, 0.0));
        assert!(dry.iter().all(|(_, _, &d)| d == 0.0));
    }

    #[test]
    fn test_inundation_sets_sea_depth() {
        let mut grid = ramp_grid();
        grid.set_sea_level(15.0);
        HydrologyKernel::default().simulate_inundation(&mut grid);
        assert_relative_eq!(*grid.water_depth().get(0, 4), 15.0);
        assert_relative_eq!(*grid.water_depth().get(0, 3), 5.0);
        assert_eq!(*grid.water_depth().get(0, 0), 0.0);
    }

    #[test]
    fn test_fill_single_pit() {
        let mut grid = Grid::new(5, 5, 1.0, -100.0).unwrap();
        let mut bedrock = Tilemap::new_with(5, 5, 10.0);
        bedrock.set(2, 2, 5.0);
        grid.seed(bedrock, None).unwrap();

        let kernel = HydrologyKernel::default();
        let fill = kernel.fill_sinks(&mut grid);
        assert!(fill.converged);
        assert_abs_diff_eq!(*fill.surface.get(2, 2), 10.0 + kernel.fill_tolerance, epsilon = 1e-12);
        assert_abs_diff_eq!(*grid.water_depth().get(2, 2), 5.0 + kernel.fill_tolerance, epsilon = 1e-12);
        assert_eq!(*grid.water_depth().get(1, 1), 0.0);
        assert_eq!(*grid.elevation().get(2, 2), 5.0);
    }

    #[test]
    fn test_descending_order_breaks_ties_by_index() {
        let surface = Tilemap::from_vec(4, 1, vec![1.0, 3.0, 1.0, 3.0]).unwrap();
        assert_eq!(descending_order(&surface), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_tie_prefers_cardinal_neighbor() {
        // Centre at 5, south and south-east both at 1.
        let mut surface = Tilemap::new_with(3, 3, 5.0);
        surface.set(1, 2, 1.0);
        surface.set(2, 2, 1.0);
        assert_eq!(lowest_neighbor(&surface, 1, 1), Some(4));
    }
}

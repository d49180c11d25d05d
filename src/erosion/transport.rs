//! Flux-routed sediment transport.
//!
//! Cells are visited once from highest to lowest. Each cell receives the
//! sediment flux of its donors, compares it with the local transport capacity
//! `Kf Q^m S^n`, and either drops the excess or picks up more material by
//! stream-power erosion. Whatever it carries is handed to its D8 receiver.
//! Sinks, the sea, and receivers already visited keep the flux locally, so the
//! sum of `bedrock + sediment` changes only by the external influx.

use super::ErosionKernel;
use crate::grid::Grid;
use crate::hydrology::{descending_order, neighbor};
use crate::tilemap::Tilemap;
use tracing::debug;

impl ErosionKernel {
    /// Route sediment downstream and apply the resulting erosion/deposition.
    ///
    /// `influx` is extra material entering at each cell before routing. The
    /// signed change (positive = deposition) is applied to the grid through
    /// [`Grid::apply_change`] and returned.
    pub fn transport_sediment(
        &self,
        grid: &mut Grid,
        discharge: &Tilemap<f64>,
        dt: f64,
        influx: Option<&Tilemap<f64>>,
    ) -> Tilemap<f64> {
        let p = &self.params;
        let width = grid.width();
        let height = grid.height();

        let slope = grid.slope();
        let underwater = grid.is_underwater();
        let flow_dir = grid.flow_direction();
        let order = descending_order(grid.elevation());

        let mut flux = match influx {
            Some(field) if field.same_shape(&slope) => field.map(|&v| v.max(0.0)),
            _ => Tilemap::new_with(width, height, 0.0),
        };
        let mut change = Tilemap::new_with(width, height, 0.0);
        let mut processed = vec![false; width * height];
        let mut trapped = 0.0;

        for idx in order {
            let (x, y) = slope.coords(idx);
            let q = discharge.get(x, y).max(0.0);
            let s = slope.get(x, y).max(p.min_slope);
            let wet = *underwater.get(x, y);
            let effective_slope = if wet { s * p.underwater_slope_factor } else { s };

            let capacity = p.kf * q.powf(p.m) * effective_slope.powf(p.n);
            let qs_in = *flux.get(x, y);

            let qs_out = if qs_in > capacity {
                *change.get_mut(x, y) += qs_in - capacity;
                capacity
            } else {
                // Underwater cells are already limited through the capacity.
                let potential = p.clamp_change(self.incision(q, s, false, dt));
                let eroded = potential.min(capacity - qs_in);
                *change.get_mut(x, y) -= eroded;
                qs_in + eroded
            };

            let receiver = neighbor(flow_dir, x, y, *flow_dir.get(x, y))
                .filter(|&(nx, ny)| !processed[slope.index(nx, ny)]);
            match receiver {
                Some((nx, ny)) => *flux.get_mut(nx, ny) += qs_out,
                None => {
                    *change.get_mut(x, y) += qs_out;
                    trapped += qs_out;
                }
            }
            processed[idx] = true;
        }

        grid.apply_change(&change);
        debug!(net = change.sum(), trapped, "Sediment transport");
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erosion::ErosionParams;
    use crate::hydrology::{HydrologyKernel, Rainfall};
    use approx::assert_abs_diff_eq;

    /// Tilted, bumpy surface that drains into interior pits and the low edge.
    fn landscape(sea_level: f64) -> Grid {
        let mut grid = Grid::new(20, 16, 10.0, sea_level).unwrap();
        let bedrock = Tilemap::from_fn(20, 16, |x, y| {
            let (fx, fy) = (x as f64, y as f64);
            50.0 - 2.5 * fy + 4.0 * (0.6 * fx).sin() * (0.4 * fy).cos()
        });
        let sediment = Tilemap::from_fn(20, 16, |x, y| if (x + y) % 3 == 0 { 0.5 } else { 0.0 });
        grid.seed(bedrock, Some(sediment)).unwrap();
        grid
    }

    fn route(grid: &mut Grid) -> Tilemap<f64> {
        HydrologyKernel::default().route_flow(grid, Rainfall::Uniform(0.5))
    }

    #[test]
    fn test_transport_conserves_mass() {
        let mut grid = landscape(5.0);
        let discharge = route(&mut grid);
        let before = grid.total_material();

        let params = ErosionParams { k: 1e-3, kf: 0.5, ..Default::default() };
        let change = ErosionKernel::new(params).transport_sediment(&mut grid, &discharge, 1.0, None);

        assert!(change.iter().any(|(_, _, &c)| c < 0.0), "nothing was eroded");
        assert_abs_diff_eq!(grid.total_material(), before, epsilon = 1e-9);
        assert_abs_diff_eq!(change.sum(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_transport_conserves_mass_on_filled_surface() {
        // Routing over a pit-filled surface sends some flux to cells that come
        // earlier in elevation order; that flux must stay where it is.
        let mut grid = landscape(-100.0);
        let hydrology = HydrologyKernel::default();
        let fill = hydrology.fill_sinks(&mut grid);
        let discharge = hydrology.route_flow_on(&mut grid, &fill.surface, Rainfall::Uniform(0.5));
        let before = grid.total_material();

        let params = ErosionParams { k: 1e-3, kf: 0.5, ..Default::default() };
        let kernel = ErosionKernel::new(params);
        for _ in 0..3 {
            kernel.transport_sediment(&mut grid, &discharge, 1.0, None);
        }

        assert_abs_diff_eq!(grid.total_material(), before, epsilon = 1e-9);
        assert!(grid.sediment().iter().all(|(_, _, &s)| s >= 0.0));
    }

    #[test]
    fn test_underwater_erosion_uses_plain_stream_power() {
        // A single wet cell with no donors erodes K Q^m S^n dt, not a tenth of it.
        let mut grid = Grid::new(3, 1, 1.0, 100.0).unwrap();
        grid.seed(Tilemap::from_vec(3, 1, vec![3.0, 2.0, 1.0]).unwrap(), None).unwrap();
        grid.flow_direction_mut().fill(2);
        let discharge = Tilemap::new_with(3, 1, 4.0);
        let params = ErosionParams { k: 1e-3, kf: 10.0, ..Default::default() };

        let change = ErosionKernel::new(params).transport_sediment(&mut grid, &discharge, 1.0, None);
        // Slope at the first cell is one-sided: (2 - 3) / 1 in x.
        let expected = 1e-3 * 4.0f64.sqrt() * 1.0;
        assert_abs_diff_eq!(*change.get(0, 0), -expected, epsilon = 1e-12);
    }

    #[test]
    fn test_transport_adds_influx() {
        let mut grid = landscape(-100.0);
        let discharge = route(&mut grid);
        let before = grid.total_material();

        let mut influx = Tilemap::new_with(20, 16, 0.0);
        influx.set(10, 0, 3.0);
        influx.set(4, 2, 1.5);
        ErosionKernel::default().transport_sediment(&mut grid, &discharge, 1.0, Some(&influx));

        assert_abs_diff_eq!(grid.total_material(), before + 4.5, epsilon = 1e-9);
    }

    #[test]
    fn test_excess_influx_deposits() {
        // A dry ramp has no capacity at zero discharge, so influx drops where it lands.
        let mut grid = Grid::new(3, 3, 1.0, -100.0).unwrap();
        grid.seed(Tilemap::from_fn(3, 3, |_, y| (2 - y) as f64), None).unwrap();
        route(&mut grid);
        let dry = Tilemap::new_with(3, 3, 0.0);
        let mut influx = Tilemap::new_with(3, 3, 0.0);
        influx.set(1, 0, 2.0);

        let change = ErosionKernel::default().transport_sediment(&mut grid, &dry, 1.0, Some(&influx));
        assert_abs_diff_eq!(*change.get(1, 0), 2.0);
        assert_abs_diff_eq!(*grid.sediment().get(1, 0), 2.0);
        assert_abs_diff_eq!(change.sum(), 2.0);
    }

    #[test]
    fn test_sediment_never_negative() {
        let mut grid = landscape(8.0);
        let params = ErosionParams { k: 0.05, kf: 5.0, ..Default::default() };
        let kernel = ErosionKernel::new(params);
        for _ in 0..5 {
            let discharge = route(&mut grid);
            kernel.transport_sediment(&mut grid, &discharge, 1.0, None);
            kernel.hillslope_diffuse(&mut grid, 1.0);
        }
        assert!(grid.sediment().iter().all(|(_, _, &s)| s >= 0.0));
    }
}

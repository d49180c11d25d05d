//! The landscape-evolution orchestrator.
//!
//! `EarthSystem` owns one [`Grid`] and one instance of every kernel and
//! composes them into a single time step:
//!
//! 1. tectonic uplift or subsidence
//! 2. precipitation synthesis (baseline, sources, optional climate modifier)
//! 3. flow routing and water depth
//! 4. sediment transport (plus optional overbank deposition)
//! 5. lateral erosion
//! 6. hillslope diffusion
//! 7. mass movement
//! 8. clock advance
//!
//! Steps are deterministic: the same initial grid and configurations give
//! bit-identical results.

use crate::climate::{source_field, ClimateKernel};
use crate::config::StepConfig;
use crate::erosion::utils::split_change;
use crate::erosion::{ErosionKernel, ErosionStats, LateralErosionKernel, MassMovementKernel};
use crate::error::EngineError;
use crate::grid::{Grid, Uplift};
use crate::hydrology::{FlowRouting, HydrologyKernel, Rainfall, NO_FLOW};
use crate::tilemap::Tilemap;
use serde::Serialize;
use tracing::{debug, info};

/// Read-only copy of the engine state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub elevation: Tilemap<f64>,
    pub water_depth: Tilemap<f64>,
    pub discharge: Tilemap<f64>,
    pub sediment: Tilemap<f64>,
    pub time: f64,
}

/// Summary of one step.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepStats {
    /// Simulation time after the step
    pub time: f64,
    /// Transport erosion and deposition
    pub transport: ErosionStats,
    /// Every kernel combined
    pub total: ErosionStats,
    /// Land cells with no downhill receiver
    pub sinks: usize,
    /// Largest discharge this step
    pub max_discharge: f64,
    pub mean_elevation: f64,
    /// Pit-filling sweeps, when sink filling ran
    pub fill_iterations: Option<usize>,
}

/// Per-kernel change fields from the most recent step, for visualisation.
#[derive(Clone, Debug)]
struct Diagnostics {
    precipitation: Tilemap<f64>,
    transport: Tilemap<f64>,
    overbank: Tilemap<f64>,
    lateral: Tilemap<f64>,
    diffusion: Tilemap<f64>,
    mass_movement: Tilemap<f64>,
    dt: f64,
}

impl Diagnostics {
    fn zeros(width: usize, height: usize) -> Self {
        let zeros = Tilemap::new_with(width, height, 0.0);
        Self {
            precipitation: zeros.clone(),
            transport: zeros.clone(),
            overbank: zeros.clone(),
            lateral: zeros.clone(),
            diffusion: zeros.clone(),
            mass_movement: zeros,
            dt: 0.0,
        }
    }

    /// Sum of every kernel's signed change.
    fn net_change(&self) -> Tilemap<f64> {
        let mut net = self.transport.clone();
        net.add_assign(&self.overbank);
        net.add_assign(&self.lateral);
        net.add_assign(&self.diffusion);
        net.add_assign(&self.mass_movement);
        net
    }
}

/// A terrain grid plus the process kernels that evolve it.
#[derive(Clone, Debug)]
pub struct EarthSystem {
    grid: Grid,
    hydrology: HydrologyKernel,
    erosion: ErosionKernel,
    lateral: LateralErosionKernel,
    mass_movement: MassMovementKernel,
    climate: ClimateKernel,
    time: f64,
    diagnostics: Diagnostics,
}

impl EarthSystem {
    /// Flat engine at height zero. Sea level defaults to 0.
    pub fn new(width: usize, height: usize, cell_size: f64, sea_level: Option<f64>) -> Result<Self, EngineError> {
        let grid = Grid::new(width, height, cell_size, sea_level.unwrap_or(0.0))?;
        info!(width, height, cell_size, "Created earth system");
        Ok(Self::from_grid(grid))
    }

    /// Engine around an already seeded grid.
    pub fn from_grid(grid: Grid) -> Self {
        let diagnostics = Diagnostics::zeros(grid.width(), grid.height());
        Self {
            grid,
            hydrology: HydrologyKernel::default(),
            erosion: ErosionKernel::default(),
            lateral: LateralErosionKernel::default(),
            mass_movement: MassMovementKernel::default(),
            climate: ClimateKernel::default(),
            time: 0.0,
            diagnostics,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Mutable grid access for scenario setup between steps.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Take the kernel coefficients from `config`.
    fn configure(&mut self, config: &StepConfig) {
        self.erosion.params = config.erosion.clone();
        self.lateral.coefficient = config.lateral_coefficient;
        self.mass_movement.critical_slope = config.friction_angle.to_radians().tan();
        self.climate.orographic_factor = config.orographic_factor;
    }

    /// Advance the simulation by `dt`.
    ///
    /// `config` is not range-checked here; use [`StepConfig::validate`] at the
    /// configuration boundary. Stability of diffusion (`D dt / cell_size^2`)
    /// is the caller's choice of `dt`.
    pub fn step(&mut self, dt: f64, config: &StepConfig) -> StepStats {
        self.configure(config);
        let width = self.grid.width();
        let height = self.grid.height();

        // 1. Tectonics
        if config.uplift_rate != 0.0 {
            let uplift = match &config.uplift_mask {
                Some(mask) => Uplift::Field(mask.map(|&m| m * config.uplift_rate)),
                None => Uplift::Uniform(config.uplift_rate),
            };
            self.grid.apply_uplift(&uplift, dt);
        }

        // 2. Precipitation
        let mut precipitation = source_field(width, height, config.precipitation, &config.rain_sources);
        if config.orographic_factor != 0.0 {
            let multiplier = self.climate.precipitation_multiplier(&self.grid);
            for (p, m) in precipitation.as_mut_slice().iter_mut().zip(multiplier.as_slice()) {
                *p *= m;
            }
        }

        // 3. Hydrology
        self.grid.set_water_depth(Tilemap::new_with(width, height, 0.0));
        let (surface, fill_iterations) = if config.fill_sinks {
            let fill = self.hydrology.fill_sinks(&mut self.grid);
            (fill.surface, Some(fill.iterations))
        } else {
            (self.grid.elevation().clone(), None)
        };
        let rainfall = Rainfall::Field(&precipitation);
        let discharge = match config.routing {
            FlowRouting::D8 => self.hydrology.route_flow_on(&mut self.grid, &surface, rainfall),
            FlowRouting::Mfd { exponent } => {
                self.hydrology.assign_flow_directions(&mut self.grid, &surface);
                self.hydrology.route_flow_mfd(&self.grid, rainfall, exponent)
            }
        };
        let depth = self.hydrology.water_depth(&self.grid, &discharge);
        self.grid.water_depth_mut().add_assign(&depth);
        if config.inundation {
            self.hydrology.simulate_inundation(&mut self.grid);
        }
        self.grid.set_discharge(discharge.clone());

        let underwater = self.grid.is_underwater();
        let sinks = self
            .grid
            .flow_direction()
            .iter()
            .filter(|&(x, y, &d)| d == NO_FLOW && !*underwater.get(x, y))
            .count();

        // 4. Transport
        let influx = (!config.sediment_sources.is_empty())
            .then(|| source_field(width, height, 0.0, &config.sediment_sources).map(|&v| v * dt));
        let transport = self.erosion.transport_sediment(&mut self.grid, &discharge, dt, influx.as_ref());
        let overbank = match &config.overbank {
            Some(params) => self.erosion.overbank_deposition(&mut self.grid, &discharge, params, dt),
            None => Tilemap::new_with(width, height, 0.0),
        };

        // 5. Lateral erosion
        let lateral = if config.lateral_erosion {
            self.lateral.migrate(&mut self.grid, &discharge, dt)
        } else {
            Tilemap::new_with(width, height, 0.0)
        };

        // 6. Diffusion
        let diffusion = if config.diffusion_rate > 0.0 {
            self.erosion.hillslope_diffuse(&mut self.grid, dt * config.diffusion_rate)
        } else {
            Tilemap::new_with(width, height, 0.0)
        };

        // 7. Mass movement
        let mass_movement = if config.mass_movement {
            self.mass_movement.relax(&mut self.grid, dt)
        } else {
            Tilemap::new_with(width, height, 0.0)
        };

        // 8. Clock
        self.time += dt;

        self.diagnostics = Diagnostics {
            precipitation,
            transport,
            overbank,
            lateral,
            diffusion,
            mass_movement,
            dt,
        };

        let stats = StepStats {
            time: self.time,
            transport: ErosionStats::from_change(&self.diagnostics.transport),
            total: ErosionStats::from_change(&self.diagnostics.net_change()),
            sinks,
            max_discharge: discharge.min_max().1,
            mean_elevation: self.grid.elevation().mean(),
            fill_iterations,
        };
        debug!(
            time = stats.time,
            eroded = stats.total.total_eroded,
            deposited = stats.total.total_deposited,
            sinks,
            "Step complete"
        );
        stats
    }

    /// Copies of the state arrays; mutating them does not touch the engine.
    pub fn get_state(&self) -> StateSnapshot {
        StateSnapshot {
            elevation: self.grid.elevation().clone(),
            water_depth: self.grid.water_depth().clone(),
            discharge: self.grid.discharge().clone(),
            sediment: self.grid.sediment().clone(),
            time: self.time,
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn slope(&self) -> Tilemap<f64> {
        self.grid.slope()
    }

    /// Direction of steepest ascent, `atan2(dz/dy, dz/dx)` in radians.
    pub fn aspect(&self) -> Tilemap<f64> {
        self.grid.gradient().1
    }

    /// Mean annual temperature of the current surface.
    pub fn temperature(&self) -> Tilemap<f64> {
        self.climate.temperature(&self.grid)
    }

    /// Precipitation field used by the last step.
    pub fn precipitation(&self) -> &Tilemap<f64> {
        &self.diagnostics.precipitation
    }

    fn per_unit_time(&self, field: Tilemap<f64>) -> Tilemap<f64> {
        let dt = self.diagnostics.dt;
        if dt > 0.0 {
            field.map(|&v| v / dt)
        } else {
            field
        }
    }

    /// Material removed per unit time during the last step, all kernels.
    pub fn erosion_rate(&self) -> Tilemap<f64> {
        let (eroded, _) = split_change(&self.diagnostics.net_change());
        self.per_unit_time(eroded)
    }

    /// Material added per unit time during the last step, all kernels.
    pub fn deposition_rate(&self) -> Tilemap<f64> {
        let (_, deposited) = split_change(&self.diagnostics.net_change());
        self.per_unit_time(deposited)
    }

    /// Signed change from sediment transport in the last step.
    pub fn transport_change(&self) -> &Tilemap<f64> {
        &self.diagnostics.transport
    }

    pub fn overbank_change(&self) -> &Tilemap<f64> {
        &self.diagnostics.overbank
    }

    pub fn lateral_change(&self) -> &Tilemap<f64> {
        &self.diagnostics.lateral
    }

    pub fn diffusion_change(&self) -> &Tilemap<f64> {
        &self.diagnostics.diffusion
    }

    pub fn mass_movement_change(&self) -> &Tilemap<f64> {
        &self.diagnostics.mass_movement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PointSource, SourceShape};
    use crate::erosion::ErosionPreset;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn valley(seed_offset: f64) -> EarthSystem {
        let mut system = EarthSystem::new(24, 20, 25.0, Some(0.0)).unwrap();
        let bedrock = Tilemap::from_fn(24, 20, |x, y| {
            let (fx, fy) = (x as f64, y as f64);
            120.0 - 5.0 * fy + 0.4 * (fx - 11.5).powi(2) + 3.0 * (0.9 * fx + seed_offset).sin()
        });
        system.grid_mut().seed(bedrock, None).unwrap();
        system
    }

    #[test]
    fn test_invalid_construction_fails() {
        assert!(matches!(
            EarthSystem::new(0, 5, 1.0, None),
            Err(EngineError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            EarthSystem::new(5, 5, 0.0, None),
            Err(EngineError::InvalidCellSize(_))
        ));
    }

    #[test]
    fn test_steps_are_deterministic() {
        let config = StepConfig {
            uplift_rate: 0.001,
            fill_sinks: true,
            rain_sources: vec![PointSource { row: 2.0, col: 12.0, radius: 2.0, amount: 0.05, shape: SourceShape::Circle }],
            ..StepConfig::from_preset(ErosionPreset::Aggressive)
        };
        let mut a = valley(0.3);
        let mut b = valley(0.3);
        for _ in 0..5 {
            a.step(1.0, &config);
            b.step(1.0, &config);
        }
        assert_eq!(a.get_state(), b.get_state());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut system = valley(0.0);
        system.step(1.0, &StepConfig::default());
        let mut snapshot = system.get_state();
        snapshot.elevation.fill(-1.0);
        snapshot.sediment.fill(99.0);
        assert_ne!(system.grid().elevation(), &snapshot.elevation);
        assert!(system.grid().sediment().iter().all(|(_, _, &s)| s != 99.0));
    }

    #[test]
    fn test_clock_and_hydrology_outputs() {
        let mut system = valley(0.0);
        let stats = system.step(0.5, &StepConfig::default());
        system.step(0.5, &StepConfig::default());
        assert_relative_eq!(system.time(), 1.0);
        assert_relative_eq!(stats.time, 0.5);

        let state = system.get_state();
        assert!(state.discharge.iter().all(|(_, _, &q)| q > 0.0));
        assert!(state.water_depth.iter().all(|(_, _, &d)| d >= 0.0));
        assert!(state.sediment.iter().all(|(_, _, &s)| s >= 0.0));
    }

    #[test]
    fn test_transport_only_step_conserves_material() {
        let mut system = valley(1.0);
        let before = system.grid().total_material();
        let config = StepConfig {
            lateral_erosion: false,
            mass_movement: false,
            diffusion_rate: 0.0,
            ..Default::default()
        };
        let stats = system.step(1.0, &config);
        assert!(stats.transport.total_eroded > 0.0);
        assert_abs_diff_eq!(system.grid().total_material(), before, epsilon = 1e-8);
    }

    #[test]
    fn test_uplift_mask() {
        let mut system = EarthSystem::new(3, 3, 1.0, Some(-10.0)).unwrap();
        let mut mask = Tilemap::new_with(3, 3, 0.0);
        mask.set(1, 1, 2.0);
        let config = StepConfig {
            uplift_rate: 0.5,
            uplift_mask: Some(mask),
            precipitation: 0.0,
            lateral_erosion: false,
            mass_movement: false,
            diffusion_rate: 0.0,
            erosion: crate::erosion::ErosionParams::from_preset(ErosionPreset::None),
            ..Default::default()
        };
        system.step(2.0, &config);
        assert_relative_eq!(*system.grid().bedrock().get(1, 1), 2.0);
        assert_eq!(*system.grid().bedrock().get(0, 0), 0.0);
    }

    #[test]
    fn test_inundation_and_diagnostics() {
        let mut system = valley(0.0);
        system.grid_mut().set_sea_level(40.0);
        let config = StepConfig { inundation: true, ..Default::default() };
        system.step(1.0, &config);

        let grid = system.grid();
        for (x, y, &z) in grid.elevation().iter() {
            // Later kernels move the surface slightly after flooding.
            if z < 40.0 {
                assert!((*grid.water_depth().get(x, y) - (40.0 - z)).abs() < 0.05);
            }
        }
        assert!(system.erosion_rate().iter().all(|(_, _, &e)| e >= 0.0));
        assert!(system.deposition_rate().iter().all(|(_, _, &d)| d >= 0.0));
        assert_eq!(system.slope().width, 24);
        assert_eq!(system.aspect().height, 20);
        assert_eq!(system.precipitation().min_max(), (0.01, 0.01));
    }

    #[test]
    fn test_mfd_routing_step() {
        let mut system = valley(0.0);
        let config = StepConfig { routing: FlowRouting::Mfd { exponent: 1.1 }, ..Default::default() };
        system.step(1.0, &config);
        // Accumulated discharge exceeds the local rain alone.
        assert!(system.get_state().discharge.sum() > 0.01 * 625.0 * 480.0);
    }
}

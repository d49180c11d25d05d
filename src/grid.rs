//! Per-cell terrain state shared by every process kernel.
//!
//! The grid owns bedrock height, loose sediment thickness, and the transient
//! hydrology outputs of the current step. Elevation is derived
//! (`bedrock + sediment`) and is recomputed after every mutation; nothing
//! outside this module writes it.

use crate::error::EngineError;
use crate::hydrology::NO_FLOW;
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tectonic forcing applied to bedrock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Uplift {
    /// Same rate everywhere (negative = subsidence).
    Uniform(f64),
    /// Per-cell rate.
    Field(Tilemap<f64>),
}

/// Terrain and hydrology state for a rectangular domain.
#[derive(Clone, Debug)]
pub struct Grid {
    width: usize,
    height: usize,
    cell_size: f64,
    sea_level: f64,
    bedrock: Tilemap<f64>,
    sediment: Tilemap<f64>,
    elevation: Tilemap<f64>,
    water_depth: Tilemap<f64>,
    discharge: Tilemap<f64>,
    flow_direction: Tilemap<u8>,
}

impl Grid {
    /// Create a flat grid at height zero.
    ///
    /// Fails when either dimension is zero or `cell_size` is not a positive
    /// finite number.
    pub fn new(width: usize, height: usize, cell_size: f64, sea_level: f64) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimensions { width, height });
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(EngineError::InvalidCellSize(cell_size));
        }
        if !sea_level.is_finite() {
            return Err(EngineError::InvalidConfig(format!("sea level must be finite, got {}", sea_level)));
        }

        let zeros = Tilemap::new_with(width, height, 0.0f64);
        Ok(Self {
            width,
            height,
            cell_size,
            sea_level,
            bedrock: zeros.clone(),
            sediment: zeros.clone(),
            elevation: zeros.clone(),
            water_depth: zeros.clone(),
            discharge: zeros,
            flow_direction: Tilemap::new_with(width, height, NO_FLOW),
        })
    }

    /// Replace bedrock (and optionally sediment) with scenario-built layers.
    pub fn seed(&mut self, bedrock: Tilemap<f64>, sediment: Option<Tilemap<f64>>) -> Result<(), EngineError> {
        let shape_ok = |m: &Tilemap<f64>| m.width == self.width && m.height == self.height && m.is_consistent();
        if !shape_ok(&bedrock) {
            return Err(EngineError::InvalidConfig(format!(
                "bedrock is {}x{}, grid is {}x{}",
                bedrock.width, bedrock.height, self.width, self.height
            )));
        }
        if let Some(sed) = &sediment {
            if !shape_ok(sed) {
                return Err(EngineError::InvalidConfig(format!(
                    "sediment is {}x{}, grid is {}x{}",
                    sed.width, sed.height, self.width, self.height
                )));
            }
        }

        self.bedrock = bedrock;
        self.sediment = match sediment {
            Some(sed) => sed.map(|&s| s.max(0.0)),
            None => Tilemap::new_with(self.width, self.height, 0.0),
        };
        self.update_elevation();
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Plan-view area of one cell.
    pub fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }

    pub fn sea_level(&self) -> f64 {
        self.sea_level
    }

    pub fn set_sea_level(&mut self, sea_level: f64) {
        self.sea_level = sea_level;
    }

    pub fn bedrock(&self) -> &Tilemap<f64> {
        &self.bedrock
    }

    pub fn sediment(&self) -> &Tilemap<f64> {
        &self.sediment
    }

    pub fn elevation(&self) -> &Tilemap<f64> {
        &self.elevation
    }

    pub fn water_depth(&self) -> &Tilemap<f64> {
        &self.water_depth
    }

    pub fn discharge(&self) -> &Tilemap<f64> {
        &self.discharge
    }

    /// D8 receiver index per cell, or [`NO_FLOW`].
    pub fn flow_direction(&self) -> &Tilemap<u8> {
        &self.flow_direction
    }

    /// Set one bedrock cell.
    pub fn set_bedrock(&mut self, x: usize, y: usize, value: f64) {
        self.bedrock.set(x, y, value);
        self.refresh_cell(x, y);
    }

    /// Set one sediment cell (clamped to be non-negative).
    pub fn set_sediment(&mut self, x: usize, y: usize, value: f64) {
        self.sediment.set(x, y, value.max(0.0));
        self.refresh_cell(x, y);
    }

    /// Elevation of the water surface (terrain plus standing/flowing water).
    pub fn water_surface(&self) -> Tilemap<f64> {
        Tilemap::par_from_fn(self.width, self.height, |x, y| {
            *self.elevation.get(x, y) + *self.water_depth.get(x, y)
        })
    }

    /// Sum of bedrock and sediment over the whole domain.
    pub fn total_material(&self) -> f64 {
        self.bedrock.sum() + self.sediment.sum()
    }

    /// Elevation derivatives at a cell, `(dz/dx, dz/dy)`.
    ///
    /// Centered differences in the interior, one-sided at the edges, zero
    /// along an axis that is a single cell wide.
    pub fn gradient_at(&self, x: usize, y: usize) -> (f64, f64) {
        let z = &self.elevation;
        let h = self.cell_size;

        let dzdx = if self.width < 2 {
            0.0
        } else if x == 0 {
            (*z.get(1, y) - *z.get(0, y)) / h
        } else if x == self.width - 1 {
            (*z.get(x, y) - *z.get(x - 1, y)) / h
        } else {
            (*z.get(x + 1, y) - *z.get(x - 1, y)) / (2.0 * h)
        };

        let dzdy = if self.height < 2 {
            0.0
        } else if y == 0 {
            (*z.get(x, 1) - *z.get(x, 0)) / h
        } else if y == self.height - 1 {
            (*z.get(x, y) - *z.get(x, y - 1)) / h
        } else {
            (*z.get(x, y + 1) - *z.get(x, y - 1)) / (2.0 * h)
        };

        (dzdx, dzdy)
    }

    /// Slope magnitude (m/m) at a cell.
    pub fn slope_at(&self, x: usize, y: usize) -> f64 {
        let (dzdx, dzdy) = self.gradient_at(x, y);
        (dzdx * dzdx + dzdy * dzdy).sqrt()
    }

    /// Slope magnitude (m/m) and aspect (radians, `atan2(dz/dy, dz/dx)`).
    pub fn gradient(&self) -> (Tilemap<f64>, Tilemap<f64>) {
        let grads = Tilemap::par_from_fn(self.width, self.height, |x, y| self.gradient_at(x, y));
        let slope = grads.map(|&(gx, gy)| (gx * gx + gy * gy).sqrt());
        let aspect = grads.map(|&(gx, gy)| gy.atan2(gx));
        (slope, aspect)
    }

    /// Slope magnitude only.
    pub fn slope(&self) -> Tilemap<f64> {
        Tilemap::par_from_fn(self.width, self.height, |x, y| self.slope_at(x, y))
    }

    #[inline]
    pub fn is_underwater_at(&self, x: usize, y: usize) -> bool {
        *self.elevation.get(x, y) < self.sea_level
    }

    /// Cells whose surface lies strictly below sea level.
    pub fn is_underwater(&self) -> Tilemap<bool> {
        self.elevation.map(|&z| z < self.sea_level)
    }

    /// Raise (or lower) bedrock by `rate * dt`.
    pub fn apply_uplift(&mut self, uplift: &Uplift, dt: f64) {
        match uplift {
            Uplift::Uniform(rate) => {
                let dz = rate * dt;
                for (_, _, b) in self.bedrock.iter_mut() {
                    *b += dz;
                }
            }
            Uplift::Field(rates) => {
                if !(rates.same_shape(&self.bedrock) && rates.is_consistent()) {
                    warn!(
                        mask_width = rates.width,
                        mask_height = rates.height,
                        "Uplift field does not match the grid; skipping uplift"
                    );
                    return;
                }
                for (b, r) in self.bedrock.as_mut_slice().iter_mut().zip(rates.as_slice()) {
                    *b += r * dt;
                }
            }
        }
        self.update_elevation();
    }

    /// Add `delta` to sediment, clamping thickness at zero.
    pub fn add_sediment(&mut self, delta: &Tilemap<f64>) {
        debug_assert!(delta.same_shape(&self.sediment));
        for (s, d) in self.sediment.as_mut_slice().iter_mut().zip(delta.as_slice()) {
            *s = (*s + d).max(0.0);
        }
        self.update_elevation();
    }

    /// Apply a signed surface change.
    ///
    /// Positive amounts are laid down as sediment. Negative amounts strip the
    /// sediment layer first and cut into bedrock for the remainder, so the
    /// change in `bedrock + sediment` equals `change` exactly.
    pub fn apply_change(&mut self, change: &Tilemap<f64>) {
        debug_assert!(change.same_shape(&self.sediment));
        let sediment = self.sediment.as_mut_slice();
        let bedrock = self.bedrock.as_mut_slice();
        for (i, &dz) in change.as_slice().iter().enumerate() {
            if dz > 0.0 {
                sediment[i] += dz;
            } else if dz < 0.0 {
                let loss = -dz;
                let from_sediment = loss.min(sediment[i]);
                sediment[i] -= from_sediment;
                bedrock[i] -= loss - from_sediment;
            }
        }
        self.update_elevation();
    }

    /// Lower bedrock directly (detachment-limited incision).
    pub(crate) fn lower_bedrock(&mut self, amount: &Tilemap<f64>) {
        for (b, a) in self.bedrock.as_mut_slice().iter_mut().zip(amount.as_slice()) {
            *b -= a;
        }
        self.update_elevation();
    }

    pub(crate) fn set_discharge(&mut self, discharge: Tilemap<f64>) {
        debug_assert!(discharge.same_shape(&self.elevation));
        self.discharge = discharge;
    }

    pub(crate) fn set_water_depth(&mut self, depth: Tilemap<f64>) {
        debug_assert!(depth.same_shape(&self.elevation));
        self.water_depth = depth;
    }

    pub(crate) fn water_depth_mut(&mut self) -> &mut Tilemap<f64> {
        &mut self.water_depth
    }

    pub(crate) fn flow_direction_mut(&mut self) -> &mut Tilemap<u8> {
        &mut self.flow_direction
    }

    fn refresh_cell(&mut self, x: usize, y: usize) {
        let z = *self.bedrock.get(x, y) + *self.sediment.get(x, y);
        self.elevation.set(x, y, z);
    }

    fn update_elevation(&mut self) {
        for ((z, b), s) in self
            .elevation
            .as_mut_slice()
            .iter_mut()
            .zip(self.bedrock.as_slice())
            .zip(self.sediment.as_slice())
        {
            *z = b + s;
        }
    }
}

//! Precipitation synthesis and a simple climate modifier
//! Based on latitude, windward slope, and elevation

use crate::config::{PointSource, SourceShape};
use crate::grid::Grid;
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};

// =============================================================================
// LOCALISED SOURCES
// =============================================================================

/// Add `source.amount` to every cell the source covers.
pub fn stamp_source(field: &mut Tilemap<f64>, source: &PointSource) {
    let (width, height) = (field.width, field.height);
    if width == 0 || height == 0 || source.amount == 0.0 {
        return;
    }
    let r = source.radius.max(0.0);
    let row_lo = (source.row - r).floor().max(0.0) as usize;
    let col_lo = (source.col - r).floor().max(0.0) as usize;
    let row_hi = ((source.row + r).floor().max(-1.0) + 1.0).min(height as f64) as usize;
    let col_hi = ((source.col + r).floor().max(-1.0) + 1.0).min(width as f64) as usize;

    for y in row_lo..row_hi {
        for x in col_lo..col_hi {
            let covered = match source.shape {
                SourceShape::Box => true,
                SourceShape::Circle => {
                    let dy = y as f64 - source.row;
                    let dx = x as f64 - source.col;
                    dx * dx + dy * dy <= r * r
                }
            };
            if covered {
                *field.get_mut(x, y) += source.amount;
            }
        }
    }
}

/// Field made of `baseline` everywhere plus each source stamped in order.
pub fn source_field(width: usize, height: usize, baseline: f64, sources: &[PointSource]) -> Tilemap<f64> {
    let mut field = Tilemap::new_with(width, height, baseline);
    for source in sources {
        stamp_source(&mut field, source);
    }
    field
}

// =============================================================================
// CLIMATE MODIFIER
// =============================================================================

/// Latitude-, relief- and elevation-dependent climate.
///
/// Rows run from one pole (row 0) to the other, with the equator mid-grid.
/// Wind blows from the east, so terrain rising westward lifts air and rains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateKernel {
    /// Strength of the windward rain enhancement (0 = none)
    pub orographic_factor: f64,
    /// Precipitation lost from the equator to either pole (fraction)
    pub latitude_variation: f64,
    /// Elevation with the most rainfall (m)
    pub optimal_elevation: f64,
    /// Temperature at the equator at sea level (deg C)
    pub base_temperature: f64,
    /// Equator-to-pole temperature drop (deg C)
    pub pole_cooling: f64,
    /// Cooling per kilometre of elevation (deg C)
    pub lapse_rate: f64,
}

impl Default for ClimateKernel {
    fn default() -> Self {
        Self {
            orographic_factor: 0.0,
            latitude_variation: 0.3,
            optimal_elevation: 2000.0,
            base_temperature: 15.0,
            pole_cooling: 30.0,
            lapse_rate: 6.5,
        }
    }
}

impl ClimateKernel {
    pub fn new(orographic_factor: f64) -> Self {
        Self {
            orographic_factor,
            ..Default::default()
        }
    }

    /// Distance from the equator, 0 at mid-grid and 1 at the first row.
    #[inline]
    fn polar_distance(y: usize, height: usize) -> f64 {
        (y as f64 / height as f64 - 0.5).abs() * 2.0
    }

    /// Per-cell multiplier to apply to a precipitation field.
    pub fn precipitation_multiplier(&self, grid: &Grid) -> Tilemap<f64> {
        let height = grid.height();
        let cell_size = grid.cell_size();
        Tilemap::par_from_fn(grid.width(), height, |x, y| {
            let latitude = 1.0 - self.latitude_variation * Self::polar_distance(y, height);

            // Gradient per cell; air moving west climbs where dz/dx < 0.
            let (dzdx, _) = grid.gradient_at(x, y);
            let orographic = (1.0 + self.orographic_factor * -dzdx * cell_size * 0.1).clamp(0.2, 2.0);

            let z = *grid.elevation().get(x, y);
            let elevation = (1.0 - 0.2 * (z - self.optimal_elevation).abs() / self.optimal_elevation).clamp(0.3, 1.2);

            latitude * orographic * elevation
        })
    }

    /// Mean annual temperature (deg C) from latitude and lapse rate.
    pub fn temperature(&self, grid: &Grid) -> Tilemap<f64> {
        let height = grid.height();
        Tilemap::par_from_fn(grid.width(), height, |x, y| {
            let z = *grid.elevation().get(x, y);
            self.base_temperature - self.pole_cooling * Self::polar_distance(y, height) - z / 1000.0 * self.lapse_rate
        })
    }
}

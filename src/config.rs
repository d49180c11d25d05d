//! Per-step configuration.
//!
//! Every option the orchestrator recognises is a typed field with a default.
//! Unknown keys in a JSON document are rejected when it is parsed.

use crate::erosion::{ErosionParams, ErosionPreset, OverbankParams};
use crate::error::EngineError;
use crate::hydrology::FlowRouting;
use crate::tilemap::Tilemap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Footprint of a localised source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceShape {
    /// Square of half-width `radius`
    #[default]
    Box,
    /// Disc of radius `radius`
    Circle,
}

/// Localised rain or sediment input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointSource {
    pub row: f64,
    pub col: f64,
    #[serde(default)]
    pub radius: f64,
    /// Rate added to every covered cell
    pub amount: f64,
    #[serde(default)]
    pub shape: SourceShape,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepConfig {
    // =========================================================================
    // Tectonics
    // =========================================================================

    /// Uniform uplift rate (negative = subsidence)
    pub uplift_rate: f64,

    /// Per-cell multiplier of `uplift_rate`
    pub uplift_mask: Option<Tilemap<f64>>,

    // =========================================================================
    // Climate
    // =========================================================================

    /// Uniform precipitation baseline
    pub precipitation: f64,

    /// Extra precipitation stamped on top of the baseline, in order
    pub rain_sources: Vec<PointSource>,

    /// Windward rain enhancement; 0 disables the climate modifier entirely
    pub orographic_factor: f64,

    // =========================================================================
    // Hydrology
    // =========================================================================

    pub routing: FlowRouting,

    /// Fill pits before routing so they pond into lakes
    pub fill_sinks: bool,

    /// Set water depth to sea depth below sea level
    pub inundation: bool,

    // =========================================================================
    // Erosion and Deposition
    // =========================================================================

    pub erosion: ErosionParams,

    /// External sediment entering the transport network
    pub sediment_sources: Vec<PointSource>,

    /// Floodplain deposition when channels exceed bankfull
    pub overbank: Option<OverbankParams>,

    pub lateral_erosion: bool,

    /// Bank erodibility
    pub lateral_coefficient: f64,

    /// Scales `dt` for hillslope diffusion; 0 disables it
    pub diffusion_rate: f64,

    pub mass_movement: bool,

    /// Degrees; critical slope = tan(angle)
    pub friction_angle: f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            uplift_rate: 0.0,
            uplift_mask: None,
            precipitation: 0.01,
            rain_sources: Vec::new(),
            orographic_factor: 0.0,
            routing: FlowRouting::D8,
            fill_sinks: false,
            inundation: false,
            erosion: ErosionParams::default(),
            sediment_sources: Vec::new(),
            overbank: None,
            lateral_erosion: true,
            lateral_coefficient: 0.01,
            diffusion_rate: 0.01,
            mass_movement: true,
            friction_angle: 35.0,
        }
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), EngineError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!("{} must be finite and >= 0, got {}", name, value)))
    }
}

fn check_sources(name: &str, sources: &[PointSource]) -> Result<(), EngineError> {
    for (i, source) in sources.iter().enumerate() {
        if !source.row.is_finite() || !source.col.is_finite() {
            return Err(EngineError::InvalidConfig(format!("{}[{}] position must be finite", name, i)));
        }
        check_non_negative(&format!("{}[{}].radius", name, i), source.radius)?;
        check_non_negative(&format!("{}[{}].amount", name, i), source.amount)?;
    }
    Ok(())
}

impl StepConfig {
    /// Configuration with erosion strength taken from a preset.
    pub fn from_preset(preset: ErosionPreset) -> Self {
        let erosion = ErosionParams::from_preset(preset);
        match preset {
            ErosionPreset::None => Self {
                erosion,
                lateral_erosion: false,
                mass_movement: false,
                diffusion_rate: 0.0,
                ..Default::default()
            },
            ErosionPreset::Gentle => Self {
                erosion,
                lateral_coefficient: 0.005,
                friction_angle: 40.0,
                ..Default::default()
            },
            ErosionPreset::Normal => Self::default(),
            ErosionPreset::Aggressive => Self {
                erosion,
                precipitation: 0.02,
                lateral_coefficient: 0.02,
                friction_angle: 30.0,
                overbank: Some(OverbankParams::default()),
                ..Default::default()
            },
        }
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Range-check everything for a `width` x `height` grid.
    pub fn validate(&self, width: usize, height: usize) -> Result<(), EngineError> {
        if !self.uplift_rate.is_finite() {
            return Err(EngineError::InvalidConfig(format!("uplift_rate must be finite, got {}", self.uplift_rate)));
        }
        if let Some(mask) = &self.uplift_mask {
            if !mask.is_consistent() || mask.width != width || mask.height != height {
                return Err(EngineError::InvalidConfig(format!(
                    "uplift_mask is {}x{}, grid is {}x{}",
                    mask.width, mask.height, width, height
                )));
            }
            if mask.iter().any(|(_, _, v)| !v.is_finite()) {
                return Err(EngineError::InvalidConfig("uplift_mask contains non-finite values".to_string()));
            }
        }

        check_non_negative("precipitation", self.precipitation)?;
        check_non_negative("orographic_factor", self.orographic_factor)?;
        check_non_negative("lateral_coefficient", self.lateral_coefficient)?;
        check_non_negative("diffusion_rate", self.diffusion_rate)?;
        check_sources("rain_sources", &self.rain_sources)?;
        check_sources("sediment_sources", &self.sediment_sources)?;

        if let FlowRouting::Mfd { exponent } = self.routing {
            check_non_negative("routing.exponent", exponent)?;
        }
        if !(self.friction_angle > 0.0 && self.friction_angle < 90.0) {
            return Err(EngineError::InvalidConfig(format!(
                "friction_angle must be in (0, 90) degrees, got {}",
                self.friction_angle
            )));
        }
        if let Some(overbank) = &self.overbank {
            check_non_negative("overbank.bankfull_discharge", overbank.bankfull_discharge)?;
            check_non_negative("overbank.decay_rate", overbank.decay_rate)?;
            check_non_negative("overbank.rate", overbank.rate)?;
            check_non_negative("overbank.max_distance", overbank.max_distance)?;
        }
        self.erosion.validate().map_err(EngineError::InvalidConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(StepConfig::default().validate(8, 8).is_ok());
        for &preset in ErosionPreset::all() {
            assert!(StepConfig::from_preset(preset).validate(8, 8).is_ok(), "{} preset invalid", preset);
        }
    }

    #[test]
    fn test_mask_shape_checked() {
        let config = StepConfig {
            uplift_rate: 1.0,
            uplift_mask: Some(Tilemap::new_with(4, 4, 1.0)),
            ..Default::default()
        };
        assert!(config.validate(4, 4).is_ok());
        assert!(matches!(config.validate(5, 4), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_values_rejected() {
        let config = StepConfig { friction_angle: 90.0, ..Default::default() };
        assert!(config.validate(4, 4).is_err());

        let config = StepConfig { diffusion_rate: -0.1, ..Default::default() };
        assert!(config.validate(4, 4).unwrap_err().to_string().contains("diffusion_rate"));

        let config = StepConfig {
            rain_sources: vec![PointSource { row: 1.0, col: 1.0, radius: -2.0, amount: 1.0, shape: SourceShape::Box }],
            ..Default::default()
        };
        assert!(config.validate(4, 4).is_err());
    }

    #[test]
    fn test_json_defaults_and_unknown_keys() {
        let config: StepConfig = serde_json::from_str(
            r#"{
                "uplift_rate": 0.002,
                "routing": { "Mfd": { "exponent": 1.1 } },
                "rain_sources": [ { "row": 3, "col": 4, "radius": 2, "amount": 0.05, "shape": "circle" } ],
                "erosion": { "k": 0.0002 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.uplift_rate, 0.002);
        assert_eq!(config.routing, FlowRouting::Mfd { exponent: 1.1 });
        assert_eq!(config.rain_sources[0].shape, SourceShape::Circle);
        assert_eq!(config.erosion.k, 0.0002);
        assert_eq!(config.erosion.m, 0.5);
        assert_eq!(config.precipitation, 0.01);
        assert!(config.lateral_erosion);

        let bad: Result<StepConfig, _> = serde_json::from_str(r#"{ "lateral_erosoin": false }"#);
        assert!(bad.is_err());
    }
}

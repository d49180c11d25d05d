//! Erosion coefficients and presets

use serde::{Deserialize, Serialize};

/// Erosion intensity preset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErosionPreset {
    /// No erosion - terrain only responds to uplift
    None,
    /// Slow incision and creep
    Gentle,
    /// Balanced erosion
    #[default]
    Normal,
    /// Fast incision - deep valleys and canyons
    Aggressive,
}

impl ErosionPreset {
    pub fn all() -> &'static [Self] {
        &[Self::None, Self::Gentle, Self::Normal, Self::Aggressive]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::None => "No erosion (uplift only)",
            Self::Gentle => "Slow incision and soil creep",
            Self::Normal => "Balanced erosion",
            Self::Aggressive => "Deep valleys and canyons",
        }
    }
}

impl std::fmt::Display for ErosionPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Gentle => write!(f, "gentle"),
            Self::Normal => write!(f, "normal"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Stream-power, transport and diffusion coefficients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErosionParams {
    // =========================================================================
    // Stream Power Law: E = K * Q^m * S^n
    // =========================================================================

    /// Bedrock erodibility K
    pub k: f64,

    /// Discharge exponent m
    pub m: f64,

    /// Slope exponent n
    pub n: f64,

    // =========================================================================
    // Sediment Transport
    // =========================================================================

    /// Transport efficiency Kf: capacity = Kf * Q^m * S^n
    pub kf: f64,

    /// Erosion multiplier applied to cells below sea level
    pub underwater_erosion_factor: f64,

    /// Effective slope multiplier below sea level (slack water carries less)
    pub underwater_slope_factor: f64,

    // =========================================================================
    // Hillslope Diffusion
    // =========================================================================

    /// Diffusivity D in dz/dt = D * laplacian(z)
    pub diffusivity: f64,

    // =========================================================================
    // Numerical Guards
    // =========================================================================

    /// Slope floor used as an exponent base or divisor
    pub min_slope: f64,

    /// Optional cap on the magnitude of any single cell's change per call
    pub max_change_per_step: Option<f64>,
}

impl Default for ErosionParams {
    fn default() -> Self {
        Self {
            k: 1e-4,
            m: 0.5,
            n: 1.0,
            kf: 0.05,                        // 500 * K
            underwater_erosion_factor: 0.1,  // the sea barely incises
            underwater_slope_factor: 0.5,
            diffusivity: 0.01,
            min_slope: 0.001,
            max_change_per_step: None,
        }
    }
}

impl ErosionParams {
    /// Create parameters from a preset
    pub fn from_preset(preset: ErosionPreset) -> Self {
        match preset {
            ErosionPreset::None => Self {
                k: 0.0,
                kf: 0.0,
                diffusivity: 0.0,
                ..Default::default()
            },
            ErosionPreset::Gentle => Self {
                k: 5e-5,
                kf: 0.025,
                diffusivity: 0.005,
                ..Default::default()
            },
            ErosionPreset::Normal => Self::default(),
            ErosionPreset::Aggressive => Self {
                k: 3e-4,
                kf: 0.15,
                diffusivity: 0.02,
                max_change_per_step: Some(5.0),
                ..Default::default()
            },
        }
    }

    /// Clamp a change magnitude to `max_change_per_step`, if set.
    #[inline]
    pub fn clamp_change(&self, amount: f64) -> f64 {
        match self.max_change_per_step {
            Some(limit) => amount.clamp(-limit, limit),
            None => amount,
        }
    }

    /// Check every coefficient is finite and non-negative.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("k", self.k),
            ("m", self.m),
            ("n", self.n),
            ("kf", self.kf),
            ("underwater_erosion_factor", self.underwater_erosion_factor),
            ("underwater_slope_factor", self.underwater_slope_factor),
            ("diffusivity", self.diffusivity),
            ("min_slope", self.min_slope),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("erosion.{} must be finite and >= 0, got {}", name, value));
            }
        }
        if self.min_slope == 0.0 {
            return Err("erosion.min_slope must be > 0".to_string());
        }
        if let Some(limit) = self.max_change_per_step {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(format!("erosion.max_change_per_step must be > 0, got {}", limit));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for &preset in ErosionPreset::all() {
            assert!(ErosionParams::from_preset(preset).validate().is_ok(), "{} preset invalid", preset);
        }
        assert_eq!(ErosionParams::from_preset(ErosionPreset::Normal), ErosionParams::default());
    }

    #[test]
    fn test_validate_rejects_negative() {
        let params = ErosionParams { kf: -1.0, ..Default::default() };
        assert!(params.validate().unwrap_err().contains("kf"));

        let params = ErosionParams { max_change_per_step: Some(0.0), ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_clamp_change() {
        let params = ErosionParams { max_change_per_step: Some(2.0), ..Default::default() };
        assert_eq!(params.clamp_change(-5.0), -2.0);
        assert_eq!(params.clamp_change(1.5), 1.5);
        assert_eq!(ErosionParams::default().clamp_change(100.0), 100.0);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let ok: Result<ErosionParams, _> = serde_json::from_str(r#"{ "k": 0.001 }"#);
        assert_eq!(ok.unwrap().k, 0.001);
        let bad: Result<ErosionParams, _> = serde_json::from_str(r#"{ "kk": 0.001 }"#);
        assert!(bad.is_err());
    }
}

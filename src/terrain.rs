//! Initial terrain builders for the command-line tools.

use crate::tilemap::Tilemap;
use noise::{NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Starting surface shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TerrainKind {
    /// Plane tilted from the first row down to the last
    Ramp,
    /// Single peak in the middle
    Cone,
    /// Perlin fBm hills on a gentle regional tilt
    #[default]
    Fractal,
}

impl TerrainKind {
    /// Build a bedrock surface with `relief` metres between high and low.
    pub fn build(self, width: usize, height: usize, relief: f64, seed: u64) -> Tilemap<f64> {
        match self {
            Self::Ramp => ramp(width, height, relief),
            Self::Cone => cone(width, height, relief),
            Self::Fractal => fractal(width, height, relief, seed),
        }
    }
}

impl std::fmt::Display for TerrainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ramp => write!(f, "ramp"),
            Self::Cone => write!(f, "cone"),
            Self::Fractal => write!(f, "fractal"),
        }
    }
}

pub fn ramp(width: usize, height: usize, relief: f64) -> Tilemap<f64> {
    let span = (height.max(2) - 1) as f64;
    Tilemap::from_fn(width, height, |_, y| relief * (1.0 - y as f64 / span))
}

pub fn cone(width: usize, height: usize, relief: f64) -> Tilemap<f64> {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let max_r = (cx * cx + cy * cy).sqrt().max(1.0);
    Tilemap::from_fn(width, height, |x, y| {
        let r = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
        relief * (1.0 - r / max_r)
    })
}

/// Fractal Brownian motion noise, normalised to roughly [-1, 1].
pub fn fbm_noise(
    noise: &impl NoiseFn<f64, 2>,
    x: f64,
    y: f64,
    octaves: u32,
    persistence: f64,
    lacunarity: f64,
) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    let mut max_value = 0.0;

    for _ in 0..octaves {
        total += amplitude * noise.get([x * frequency, y * frequency]);
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
    }

    total / max_value
}

/// Noisy hills on a southward tilt, with a little per-cell jitter so no two
/// cells tie exactly.
pub fn fractal(width: usize, height: usize, relief: f64, seed: u64) -> Tilemap<f64> {
    let perlin = Perlin::new(seed as u32);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let span = (height.max(2) - 1) as f64;
    let scale = 4.0 / width.max(height) as f64;

    Tilemap::from_fn(width, height, |x, y| {
        let n = fbm_noise(&perlin, x as f64 * scale, y as f64 * scale, 5, 0.5, 2.0);
        let tilt = 1.0 - y as f64 / span;
        let jitter: f64 = rng.gen_range(0.0..1e-3);
        relief * (0.6 * tilt + 0.4 * (n * 0.5 + 0.5)) + jitter
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ramp_spans_relief() {
        let map = ramp(3, 5, 40.0);
        assert_relative_eq!(*map.get(1, 0), 40.0);
        assert_relative_eq!(*map.get(1, 4), 0.0);
    }

    #[test]
    fn test_cone_peaks_in_centre() {
        let map = cone(5, 5, 10.0);
        let (_, max) = map.min_max();
        assert_relative_eq!(*map.get(2, 2), max);
        assert_relative_eq!(*map.get(0, 0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fractal_is_seeded() {
        let a = fractal(16, 12, 100.0, 7);
        assert_eq!(a, fractal(16, 12, 100.0, 7));
        assert_ne!(a, fractal(16, 12, 100.0, 8));
        let (lo, hi) = a.min_max();
        assert!(lo >= 0.0 && hi <= 100.01, "range {}..{}", lo, hi);
    }
}

//! Landscape evolution library
//!
//! A terrain grid plus composable hydrology, erosion, bank-migration and
//! mass-wasting kernels, driven step by step by [`EarthSystem`].

pub mod climate;
pub mod config;
pub mod erosion;
pub mod error;
pub mod grid;
pub mod hydrology;
pub mod system;
pub mod terrain;
pub mod tilemap;

pub use config::{PointSource, SourceShape, StepConfig};
pub use error::EngineError;
pub use grid::{Grid, Uplift};
pub use hydrology::{FlowRouting, HydrologyKernel, Rainfall};
pub use system::{EarthSystem, StateSnapshot, StepStats};
pub use tilemap::Tilemap;

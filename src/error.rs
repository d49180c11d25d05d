//! Errors raised at the engine's construction and configuration boundary.
//!
//! Stepping itself never fails; everything here is caught before the first step.

/// Errors that can occur while building an engine or loading its configuration.
#[derive(Debug)]
pub enum EngineError {
    /// Grid width or height was zero.
    InvalidDimensions { width: usize, height: usize },
    /// Cell size was not a positive finite number.
    InvalidCellSize(f64),
    /// A step configuration value was out of range.
    InvalidConfig(String),
    /// IO error while reading a configuration file
    Io(std::io::Error),
    /// Malformed configuration document
    Parse(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDimensions { width, height } => {
                write!(f, "Invalid grid dimensions: {}x{} (both must be > 0)", width, height)
            }
            EngineError::InvalidCellSize(size) => {
                write!(f, "Invalid cell size: {} (must be finite and > 0)", size)
            }
            EngineError::InvalidConfig(e) => write!(f, "Invalid configuration: {}", e),
            EngineError::Io(e) => write!(f, "IO error: {}", e),
            EngineError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

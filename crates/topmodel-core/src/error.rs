//! Error types for model construction and stepping.

/// Invalid parameters or topography, detected once at construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The catchment mask selects no cells.
    #[error("catchment mask has no active cells")]
    NoActiveCells,
    /// A grid does not have the number of cells implied by the mask dimensions.
    #[error("{grid} has {actual} cells, expected {expected}")]
    ShapeMismatch {
        grid: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A mask index lies outside the raster or breaks ascending order.
    #[error("mask index {index} at position {position} is out of order or outside a raster of {cells} cells")]
    InvalidMaskIndex {
        index: usize,
        position: usize,
        cells: usize,
    },
    /// Catchment area came out zero or negative.
    #[error("catchment area must be positive, got {0} m2")]
    NonPositiveCatchmentArea(f64),
    /// A scalar parameter is outside its accepted range.
    #[error("{name} = {value} is out of range {range}")]
    ParamOutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },
    /// Topography was prepared with a different cell size than the parameters declare.
    #[error("topography cell area {topography} m2 does not match parameter cell area {params} m2")]
    CellAreaMismatch { params: f64, topography: f64 },
    /// An active cell carries a value the wetness index cannot be computed from.
    #[error("{grid} value {value} at active cell {index} is invalid: {reason}")]
    InvalidCell {
        grid: &'static str,
        index: usize,
        value: f64,
        reason: &'static str,
    },
}

/// Top-level error returned by the public API.
#[derive(Debug, thiserror::Error)]
pub enum TopModelError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// Mass-balance residual of a step exceeded the configured tolerance.
    #[error("mass balance residual {residual:e} m at step {step} exceeds tolerance {tolerance:e} m")]
    NumericInstability {
        step: u64,
        residual: f64,
        tolerance: f64,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid parameter json: {0}")]
    Json(#[from] serde_json::Error),
}

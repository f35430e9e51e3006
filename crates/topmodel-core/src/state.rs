//! TopModel state.
//!
//! The catchment-mean saturation deficit is the only state variable. The step
//! counter is carried along so diagnostics can name the step they refer to.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Catchment-mean local saturation deficit [m].
    pub saturation_deficit: f64,
    /// Number of completed timesteps.
    pub step: u64,
}

impl State {
    pub fn new(saturation_deficit: f64) -> Self {
        Self { saturation_deficit, step: 0 }
    }
}

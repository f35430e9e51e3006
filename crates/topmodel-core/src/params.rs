//! TopModel parameter set.
//!
//! The recognised fields are exactly those of the legacy parameter file
//! (`dt`, `m`, `ko`, `twi_cutoff`, `so`) plus the raster cell size, which
//! used to be a hard-coded constant, and an optional mass-balance tolerance.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TopModelError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopModelParams {
    /// Timestep length [s].
    pub dt: f64,
    /// Effective soil depth, i.e. decay scale of transmissivity with depth [m].
    pub m: f64,
    /// Saturated lateral hydraulic conductivity at the surface [m s-1].
    pub ko: f64,
    /// Percentile (0–100) of the positive wetness-index distribution above
    /// which index values are clamped.
    pub twi_cutoff: f64,
    /// Initial catchment-mean saturation deficit [m].
    pub so: f64,
    /// Raster cell width [m]; cell area is `cell_size²`.
    pub cell_size: f64,
    /// Largest accepted |mass-balance residual| per step [m]. `None` disables
    /// the check.
    pub mbe_tolerance: Option<f64>,
}

impl Default for TopModelParams {
    fn default() -> Self {
        Self {
            dt: 86_400.0,
            m: 0.025,
            ko: 0.001,
            twi_cutoff: 99.5,
            so: 0.05,
            cell_size: 16.0,
            mbe_tolerance: None,
        }
    }
}

fn check(name: &'static str, value: f64, range: &'static str, ok: bool) -> Result<(), ConfigError> {
    if value.is_finite() && ok {
        Ok(())
    } else {
        Err(ConfigError::ParamOutOfRange { name, value, range })
    }
}

impl TopModelParams {
    /// Validate every field against its physical range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("dt", self.dt, "(0, inf)", self.dt > 0.0)?;
        check("m", self.m, "[0, inf)", self.m >= 0.0)?;
        check("ko", self.ko, "(0, inf)", self.ko > 0.0)?;
        check(
            "twi_cutoff",
            self.twi_cutoff,
            "[0, 100]",
            (0.0..=100.0).contains(&self.twi_cutoff),
        )?;
        check("so", self.so, "[0, inf)", self.so >= 0.0)?;
        check("cell_size", self.cell_size, "(0, inf)", self.cell_size > 0.0)?;
        if let Some(tol) = self.mbe_tolerance {
            check("mbe_tolerance", tol, "(0, inf)", tol > 0.0)?;
        }
        Ok(())
    }

    /// Grid cell area [m2].
    pub fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }

    /// Surface transmissivity per timestep, `To = ko · dt` [m2 step-1].
    pub fn transmissivity(&self) -> f64 {
        self.ko * self.dt
    }

    /// Parse and validate parameters from a JSON document. Missing fields
    /// take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, TopModelError> {
        let p: Self = serde_json::from_str(s)?;
        p.validate()?;
        Ok(p)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopModelError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

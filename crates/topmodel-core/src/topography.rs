//! Static topographic wetness field and catchment constants.
//!
//! Built once per simulation. The per-cell index is stored densely for the
//! active cells only (mask order), so inactive cells can never enter an
//! area-weighted reduction.

use serde::Serialize;

use crate::error::ConfigError;
use crate::grid::{ActiveMask, Grid};
use crate::params::TopModelParams;
use crate::terrain::{percentile, wetness_index, FLAT_EPS};

const LOG_TARGET: &str = "topmodel::topography";

/// Clamped wetness-index field over the active cells of a catchment.
#[derive(Debug, Clone)]
pub struct Topography {
    mask: ActiveMask,
    /// Clamped index per active cell, in mask order.
    xi: Vec<f64>,
    /// Clamp value; `None` when no positive index existed to take a percentile of.
    cutoff: Option<f64>,
    cell_area: f64,
    catchment_area: f64,
    /// Catchment-mean index `X`.
    mean_index: f64,
}

impl Topography {
    /// Build from flow accumulation [m2] and slope [deg] grids.
    ///
    /// Every active cell must have a finite positive flow accumulation and a
    /// finite slope in [0°, 90°]; anything else is a configuration error.
    pub fn from_terrain(
        mask: ActiveMask,
        flow_acc: &Grid,
        slope_deg: &Grid,
        cell_size: f64,
        twi_cutoff: f64,
    ) -> Result<Self, ConfigError> {
        check_shape("flow_accumulation", flow_acc, &mask)?;
        check_shape("slope", slope_deg, &mask)?;

        let mut raw = Vec::with_capacity(mask.n_active());
        for &i in mask.indices() {
            let a = flow_acc.data[i];
            if !(a.is_finite() && a > 0.0) {
                return Err(ConfigError::InvalidCell {
                    grid: "flow_accumulation",
                    index: i,
                    value: a,
                    reason: "must be finite and positive",
                });
            }
            let s = slope_deg.data[i];
            if !(0.0..=90.0).contains(&s) {
                return Err(ConfigError::InvalidCell {
                    grid: "slope",
                    index: i,
                    value: s,
                    reason: "must lie in [0, 90] degrees",
                });
            }
            raw.push(wetness_index(a, cell_size, s));
        }
        Self::build(mask, raw, cell_size, twi_cutoff)
    }

    /// Build from a precomputed wetness-index grid. The percentile clamp is
    /// still applied.
    pub fn from_wetness_index(
        mask: ActiveMask,
        twi: &Grid,
        cell_size: f64,
        twi_cutoff: f64,
    ) -> Result<Self, ConfigError> {
        check_shape("twi", twi, &mask)?;
        let raw = mask.gather(twi);
        Self::build(mask, raw, cell_size, twi_cutoff)
    }

    fn build(
        mask: ActiveMask,
        mut xi: Vec<f64>,
        cell_size: f64,
        twi_cutoff: f64,
    ) -> Result<Self, ConfigError> {
        if mask.n_active() == 0 {
            return Err(ConfigError::NoActiveCells);
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ConfigError::ParamOutOfRange {
                name: "cell_size",
                value: cell_size,
                range: "(0, inf)",
            });
        }
        if !(0.0..=100.0).contains(&twi_cutoff) {
            return Err(ConfigError::ParamOutOfRange {
                name: "twi_cutoff",
                value: twi_cutoff,
                range: "[0, 100]",
            });
        }
        if let Some((k, &v)) = xi.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::InvalidCell {
                grid: "twi",
                index: mask.indices()[k],
                value: v,
                reason: "wetness index must be finite",
            });
        }

        let cell_area = cell_size * cell_size;
        let catchment_area = mask.n_active() as f64 * cell_area;
        if !catchment_area.is_finite() || catchment_area <= 0.0 {
            return Err(ConfigError::NonPositiveCatchmentArea(catchment_area));
        }

        // Stream cells form a long right tail; clamp it at the percentile of
        // the positive part of the distribution.
        let positive: Vec<f64> = xi.iter().copied().filter(|&v| v > 0.0).collect();
        let cutoff = percentile(&positive, twi_cutoff);
        match cutoff {
            Some(clim) => {
                for v in xi.iter_mut() {
                    if *v > clim {
                        *v = clim;
                    }
                }
            }
            None => tracing::warn!(
                target: LOG_TARGET,
                active_cells = mask.n_active(),
                "no positive wetness index values; percentile clamp skipped"
            ),
        }

        let mean_index = xi.iter().map(|&v| v * cell_area).sum::<f64>() / catchment_area;

        tracing::debug!(
            target: LOG_TARGET,
            active_cells = mask.n_active(),
            cutoff = ?cutoff,
            mean_index,
            catchment_area,
            "topography prepared"
        );

        Ok(Self {
            mask,
            xi,
            cutoff,
            cell_area,
            catchment_area,
            mean_index,
        })
    }

    pub fn mask(&self) -> &ActiveMask {
        &self.mask
    }

    /// Clamped index per active cell, in mask order.
    pub fn wetness_index(&self) -> &[f64] {
        &self.xi
    }

    pub fn cutoff(&self) -> Option<f64> {
        self.cutoff
    }

    pub fn n_active(&self) -> usize {
        self.mask.n_active()
    }

    pub fn cell_area(&self) -> f64 {
        self.cell_area
    }

    pub fn catchment_area(&self) -> f64 {
        self.catchment_area
    }

    /// Catchment-mean wetness index `X`.
    pub fn mean_index(&self) -> f64 {
        self.mean_index
    }

    /// Area-weighted catchment mean of a per-active-cell field.
    pub fn area_weighted_mean(&self, values: &[f64]) -> f64 {
        debug_assert_eq!(values.len(), self.xi.len());
        values.iter().map(|&v| v * self.cell_area).sum::<f64>() / self.catchment_area
    }
}

fn check_shape(name: &'static str, grid: &Grid, mask: &ActiveMask) -> Result<(), ConfigError> {
    if grid.same_shape(mask.width, mask.height) && grid.len() == mask.width * mask.height {
        Ok(())
    } else {
        Err(ConfigError::ShapeMismatch {
            grid: name,
            expected: mask.width * mask.height,
            actual: grid.len(),
        })
    }
}

// ── Catchment constants ───────────────────────────────────────────────────────

/// Scalars derived once from the topography and the parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CatchmentConstants {
    /// Grid cell area [m2].
    pub cell_area: f64,
    /// Active cells × cell area [m2].
    pub catchment_area: f64,
    /// Catchment-mean wetness index `X` [-].
    pub mean_index: f64,
    /// Effective soil depth `M` [m].
    pub m: f64,
    /// Surface transmissivity per step `To = ko · dt` [m2 step-1].
    pub to: f64,
    /// Baseflow at zero mean deficit, `Qo = To · exp(−X)` [m step-1].
    pub qo: f64,
}

impl CatchmentConstants {
    pub fn derive(topo: &Topography, params: &TopModelParams) -> Self {
        let to = params.transmissivity();
        Self {
            cell_area: topo.cell_area(),
            catchment_area: topo.catchment_area(),
            mean_index: topo.mean_index(),
            m: params.m,
            to,
            qo: to * (-topo.mean_index()).exp(),
        }
    }

    /// Subsurface flow to the stream network per unit catchment area [m step-1].
    ///
    /// `Qb = Qo · exp(−S / (M + ε))`
    #[inline]
    pub fn baseflow(&self, mean_deficit: f64) -> f64 {
        self.qo * (-mean_deficit / (self.m + FLAT_EPS)).exp()
    }
}

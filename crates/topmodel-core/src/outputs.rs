//! Step outputs.
//!
//! Two levels: `StepFluxes` is what the integrator produces, in metres per
//! step on the internal state; `StepReport` is the driver-facing record with
//! fluxes in mm d-1. `Timeseries` accumulates reports column-wise over a run.

use serde::Serialize;

use crate::grid::ActiveMask;

/// Seconds per day, for m step-1 → mm d-1.
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Factor turning a depth per step [m] into a rate [mm d-1].
#[inline]
pub fn m_per_step_to_mm_per_day(dt: f64) -> f64 {
    1e3 * SECONDS_PER_DAY / dt
}

/// Raw results of one `advance`, all depths in metres per unit catchment area.
#[derive(Debug, Clone)]
pub struct StepFluxes {
    /// Drainage delivered by the soil submodel this step [m].
    pub recharge: f64,
    /// Baseflow `Qb`, from the state before this step [m].
    pub baseflow: f64,
    /// Catchment-mean return flow `Qr` [m].
    pub returnflow: f64,
    /// Fraction of active cells with local deficit ≤ 0 [-].
    pub saturated_fraction: f64,
    /// `(S_prev − S) − (recharge − Qb − Qr)` [m].
    pub mass_balance_error: f64,
    /// Mean deficit before the step [m].
    pub deficit_before: f64,
    /// Mean deficit after the step [m].
    pub saturation_deficit: f64,
    /// Per-cell return flow [m], active cells in mask order.
    pub return_flow_field: Vec<f64>,
    /// Per-cell local deficit [m] before return flow was removed, mask order.
    pub local_deficit: Vec<f64>,
}

impl StepFluxes {
    /// Decrease of the mean deficit over the step, i.e. water gained by the store [m].
    pub fn storage_change(&self) -> f64 {
        self.deficit_before - self.saturation_deficit
    }
}

/// Driver-facing record of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: u64,
    /// [mm d-1]
    pub baseflow: f64,
    /// [mm d-1]
    pub returnflow: f64,
    /// Recharge from the soil submodel [mm d-1].
    pub drainage_in: f64,
    /// Water gained by the subsurface store [mm d-1].
    pub storage_change: f64,
    /// Mass-balance residual [mm d-1].
    pub water_closure: f64,
    /// Catchment-mean saturation deficit after the step [m].
    pub saturation_deficit: f64,
    /// Saturated-area fraction [-].
    pub saturated_area: f64,
    /// Per-cell return flow [mm d-1], full raster, `None` outside the catchment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_returnflow: Option<Vec<Option<f64>>>,
    /// Per-cell local saturation deficit [mm], full raster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_saturation_deficit: Option<Vec<Option<f64>>>,
}

impl StepReport {
    /// Scalar-only report.
    pub fn new(step: u64, fluxes: &StepFluxes, dt: f64) -> Self {
        let k = m_per_step_to_mm_per_day(dt);
        Self {
            step,
            baseflow: fluxes.baseflow * k,
            returnflow: fluxes.returnflow * k,
            drainage_in: fluxes.recharge * k,
            storage_change: fluxes.storage_change() * k,
            water_closure: fluxes.mass_balance_error * k,
            saturation_deficit: fluxes.saturation_deficit,
            saturated_area: fluxes.saturated_fraction,
            local_returnflow: None,
            local_saturation_deficit: None,
        }
    }

    /// Report including the per-cell fields scattered back onto the raster.
    pub fn with_fields(step: u64, fluxes: &StepFluxes, dt: f64, mask: &ActiveMask) -> Self {
        let k = m_per_step_to_mm_per_day(dt);
        let qr: Vec<f64> = fluxes.return_flow_field.iter().map(|v| v * k).collect();
        let s: Vec<f64> = fluxes.local_deficit.iter().map(|v| v * 1e3).collect();
        Self {
            local_returnflow: Some(mask.scatter(&qr)),
            local_saturation_deficit: Some(mask.scatter(&s)),
            ..Self::new(step, fluxes, dt)
        }
    }
}

/// Column-oriented record of a run (scalar outputs only).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Timeseries {
    pub baseflow: Vec<f64>,
    pub returnflow: Vec<f64>,
    pub drainage_in: Vec<f64>,
    pub storage_change: Vec<f64>,
    pub water_closure: Vec<f64>,
    pub saturation_deficit: Vec<f64>,
    pub saturated_area: Vec<f64>,
}

impl Timeseries {
    /// Pre-allocate all columns for `n` timesteps.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            baseflow: Vec::with_capacity(n),
            returnflow: Vec::with_capacity(n),
            drainage_in: Vec::with_capacity(n),
            storage_change: Vec::with_capacity(n),
            water_closure: Vec::with_capacity(n),
            saturation_deficit: Vec::with_capacity(n),
            saturated_area: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, r: &StepReport) {
        self.baseflow.push(r.baseflow);
        self.returnflow.push(r.returnflow);
        self.drainage_in.push(r.drainage_in);
        self.storage_change.push(r.storage_change);
        self.water_closure.push(r.water_closure);
        self.saturation_deficit.push(r.saturation_deficit);
        self.saturated_area.push(r.saturated_area);
    }

    pub fn len(&self) -> usize {
        self.baseflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseflow.is_empty()
    }

    /// Largest |water_closure| over the run [mm d-1].
    pub fn max_abs_closure(&self) -> f64 {
        self.water_closure.iter().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }
}

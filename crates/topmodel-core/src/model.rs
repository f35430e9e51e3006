//! TopModel timestep integrator.
//!
//! Explicit forward-in-time scheme over the single state variable, the
//! catchment-mean saturation deficit `S`:
//!
//!   1. S_prev = S
//!   2. Qb = Qo · exp(−S_prev / (M + ε))
//!   3. S' = S_prev + Qb − R
//!   4. s_i = S' + M · (X − xi_i)
//!   5. qr_i = max(−s_i, 0)
//!   6. Qr = Σ qr_i · A_cell / A_catchment
//!   7. S = S' + Qr
//!   8. fsat = #(s_i ≤ 0) / #active
//!   9. mbe = (S_prev − S) − (R − Qb − Qr)
//!
//! Baseflow depends on the previous state only. Steps must be run strictly
//! in order.

use crate::deficit::{local_field, return_flow, saturated_cells};
use crate::error::{ConfigError, TopModelError};
use crate::grid::{ActiveMask, Grid};
use crate::outputs::{StepFluxes, StepReport, Timeseries};
use crate::params::TopModelParams;
use crate::state::State;
use crate::topography::{CatchmentConstants, Topography};

const LOG_TARGET: &str = "topmodel::model";

/// Relative tolerance when comparing the topography's cell area with the
/// parameter set's.
const CELL_AREA_RTOL: f64 = 1e-9;

/// One catchment's TopModel instance. Owns its state; nothing is shared
/// between instances.
#[derive(Debug, Clone)]
pub struct TopModel {
    params: TopModelParams,
    topo: Topography,
    consts: CatchmentConstants,
    state: State,
    /// Return flow of the last step [m], mask order.
    return_flow: Vec<f64>,
}

impl TopModel {
    /// Set up the model with the initial deficit from `params.so`.
    pub fn new(params: TopModelParams, topo: Topography) -> Result<Self, TopModelError> {
        let so = params.so;
        Self::with_initial_deficit(params, topo, so)
    }

    /// Set up the model with an explicit initial mean deficit [m], overriding
    /// `params.so` (e.g. a state saved from an earlier run).
    ///
    /// The initial local field is clamped at zero and the mean re-derived, so
    /// the effective initial state can be slightly larger than `initial`.
    pub fn with_initial_deficit(
        params: TopModelParams,
        topo: Topography,
        initial: f64,
    ) -> Result<Self, TopModelError> {
        params.validate()?;
        if !initial.is_finite() {
            return Err(ConfigError::ParamOutOfRange {
                name: "initial_deficit",
                value: initial,
                range: "finite",
            }
            .into());
        }
        let expected = params.cell_area();
        if (topo.cell_area() - expected).abs() > CELL_AREA_RTOL * expected {
            return Err(ConfigError::CellAreaMismatch {
                params: expected,
                topography: topo.cell_area(),
            }
            .into());
        }

        let consts = CatchmentConstants::derive(&topo, &params);

        let mut s = local_field(&topo, params.m, initial);
        for v in s.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        let s0 = topo.area_weighted_mean(&s);

        tracing::debug!(
            target: LOG_TARGET,
            mean_index = consts.mean_index,
            to = consts.to,
            qo = consts.qo,
            configured = initial,
            initial_deficit = s0,
            "topmodel initialised"
        );

        let n = topo.n_active();
        Ok(Self {
            params,
            topo,
            consts,
            state: State::new(s0),
            return_flow: vec![0.0; n],
        })
    }

    /// Build the topography from terrain grids and set up the model.
    pub fn from_terrain(
        params: TopModelParams,
        mask: ActiveMask,
        flow_acc: &Grid,
        slope_deg: &Grid,
    ) -> Result<Self, TopModelError> {
        let topo =
            Topography::from_terrain(mask, flow_acc, slope_deg, params.cell_size, params.twi_cutoff)?;
        Self::new(params, topo)
    }

    /// Build the topography from a precomputed wetness-index grid and set up the model.
    pub fn from_wetness_index(
        params: TopModelParams,
        mask: ActiveMask,
        twi: &Grid,
    ) -> Result<Self, TopModelError> {
        let topo = Topography::from_wetness_index(mask, twi, params.cell_size, params.twi_cutoff)?;
        Self::new(params, topo)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn params(&self) -> &TopModelParams {
        &self.params
    }

    pub fn topography(&self) -> &Topography {
        &self.topo
    }

    pub fn constants(&self) -> &CatchmentConstants {
        &self.consts
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Catchment-mean saturation deficit `S` [m].
    pub fn saturation_deficit(&self) -> f64 {
        self.state.saturation_deficit
    }

    /// Return flow of the last step [m], active cells in mask order.
    pub fn return_flow_field(&self) -> &[f64] {
        &self.return_flow
    }

    /// Return flow of the last step on the full raster; `None` outside the catchment.
    pub fn return_flow_grid(&self) -> Vec<Option<f64>> {
        self.topo.mask().scatter(&self.return_flow)
    }

    /// Local deficit field [m] for an arbitrary catchment mean.
    pub fn local_field(&self, mean_deficit: f64) -> Vec<f64> {
        local_field(&self.topo, self.params.m, mean_deficit)
    }

    /// Local deficit field [m] of the current state.
    pub fn local_deficit(&self) -> Vec<f64> {
        self.local_field(self.state.saturation_deficit)
    }

    /// Baseflow [m step-1] that the current state would produce.
    pub fn baseflow(&self) -> f64 {
        self.consts.baseflow(self.state.saturation_deficit)
    }

    // ── Stepping ─────────────────────────────────────────────────────────────

    /// Advance one timestep with catchment-mean recharge `recharge` [m].
    ///
    /// Negative recharge (net loss) is valid. A residual above the configured
    /// tolerance is logged, not returned; use [`advance_checked`](Self::advance_checked)
    /// to make it an error.
    pub fn advance(&mut self, recharge: f64) -> StepFluxes {
        let fluxes = self.integrate(recharge);
        if let Some(tol) = self.params.mbe_tolerance {
            if fluxes.mass_balance_error.abs() > tol {
                tracing::warn!(
                    target: LOG_TARGET,
                    step = self.state.step,
                    residual = fluxes.mass_balance_error,
                    tolerance = tol,
                    "mass balance residual exceeds tolerance"
                );
            }
        }
        fluxes
    }

    /// Like [`advance`](Self::advance) but fails with
    /// `NumericInstability` when the residual exceeds `params.mbe_tolerance`.
    /// The state is committed either way.
    pub fn advance_checked(&mut self, recharge: f64) -> Result<StepFluxes, TopModelError> {
        let fluxes = self.integrate(recharge);
        match self.params.mbe_tolerance {
            Some(tol) if fluxes.mass_balance_error.abs() > tol => {
                Err(TopModelError::NumericInstability {
                    step: self.state.step,
                    residual: fluxes.mass_balance_error,
                    tolerance: tol,
                })
            }
            _ => Ok(fluxes),
        }
    }

    fn integrate(&mut self, recharge: f64) -> StepFluxes {
        let s_prev = self.state.saturation_deficit;
        let qb = self.consts.baseflow(s_prev);

        let s_prov = s_prev + qb - recharge;
        let local = local_field(&self.topo, self.params.m, s_prov);

        self.return_flow = return_flow(&local);
        let qr = self.return_flow.iter().map(|&q| q * self.consts.cell_area).sum::<f64>()
            / self.consts.catchment_area;

        let s_new = s_prov + qr;
        self.state.saturation_deficit = s_new;
        self.state.step += 1;

        let fsat = saturated_cells(&local) as f64 / self.topo.n_active() as f64;
        let mbe = (s_prev - s_new) - (recharge - qb - qr);

        tracing::trace!(
            target: LOG_TARGET,
            step = self.state.step,
            recharge,
            baseflow = qb,
            returnflow = qr,
            fsat,
            deficit = s_new,
            mbe,
            "step"
        );

        StepFluxes {
            recharge,
            baseflow: qb,
            returnflow: qr,
            saturated_fraction: fsat,
            mass_balance_error: mbe,
            deficit_before: s_prev,
            saturation_deficit: s_new,
            return_flow_field: self.return_flow.clone(),
            local_deficit: local,
        }
    }

    /// Advance over a recharge series and collect the driver-facing reports.
    pub fn run(&mut self, recharge: &[f64]) -> Timeseries {
        let mut out = Timeseries::with_capacity(recharge.len());
        for &r in recharge {
            let fluxes = self.advance(r);
            out.push(&StepReport::new(self.state.step, &fluxes, self.params.dt));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Two equal cells with xi = [1, 3], A = 100 m2, M = 0.025 m,
    /// ko = 1e-3 m/s, dt = 1 day, so = 0.05 m.
    fn two_cell_model() -> TopModel {
        let params = TopModelParams {
            dt: 86_400.0,
            m: 0.025,
            ko: 1e-3,
            twi_cutoff: 100.0,
            so: 0.05,
            cell_size: 10.0,
            mbe_tolerance: None,
        };
        let twi = Grid::from_vec(2, 1, vec![1.0, 3.0]).unwrap();
        TopModel::from_wetness_index(params, ActiveMask::full(2, 1), &twi).unwrap()
    }

    fn random_model(rng: &mut StdRng) -> TopModel {
        let w = rng.gen_range(2..16);
        let h = rng.gen_range(2..16);
        let mut flags: Vec<bool> = (0..w * h).map(|_| rng.gen_bool(0.75)).collect();
        flags[0] = true;
        let mask = ActiveMask::from_flags(w, h, &flags).unwrap();
        let mut acc = Grid::new(w, h, f64::NAN);
        let mut slope = Grid::new(w, h, f64::NAN);
        for &i in mask.indices() {
            acc.data[i] = 25.0 * 10f64.powf(rng.gen_range(0.0..3.5));
            slope.data[i] = if rng.gen_bool(0.05) { 0.0 } else { rng.gen_range(0.5..25.0) };
        }
        let params = TopModelParams {
            m: rng.gen_range(0.005..0.08),
            ko: 10f64.powf(rng.gen_range(-6.0..-3.0)),
            twi_cutoff: rng.gen_range(90.0..=100.0),
            so: rng.gen_range(0.0..0.2),
            cell_size: 5.0,
            ..Default::default()
        };
        TopModel::from_terrain(params, mask, &acc, &slope).unwrap()
    }

    // ── Worked two-cell example ──────────────────────────────────────────────

    #[test]
    fn two_cell_constants() {
        let model = two_cell_model();
        let c = model.constants();
        assert_abs_diff_eq!(c.mean_index, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c.to, 86.4, epsilon = 1e-12);
        assert_abs_diff_eq!(c.qo, 86.4 * (-2.0f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(c.qo, 11.6929, epsilon = 1e-4);
        assert_abs_diff_eq!(c.catchment_area, 200.0);
        // Initial local field [0.075, 0.025] is non-negative: no regularisation.
        assert_abs_diff_eq!(model.saturation_deficit(), 0.05, epsilon = 1e-15);
    }

    #[test]
    fn two_cell_dry_step() {
        let mut model = two_cell_model();
        let f = model.advance(0.0);
        let qb = 86.4 * (-2.0f64).exp() * (-2.0f64).exp();
        assert_abs_diff_eq!(f.baseflow, qb, epsilon = 1e-9);
        assert_abs_diff_eq!(f.baseflow, 1.582, epsilon = 1e-3);
        assert_eq!(f.returnflow, 0.0);
        assert_eq!(f.saturated_fraction, 0.0);
        assert_abs_diff_eq!(model.saturation_deficit(), 0.05 + qb, epsilon = 1e-9);
        assert_abs_diff_eq!(f.mass_balance_error, 0.0, epsilon = 1e-12);
        assert_eq!(model.state().step, 1);
    }

    #[test]
    fn two_cell_half_saturated_step() {
        let mut model = two_cell_model();
        // Recharge that brings the provisional mean exactly to zero:
        // local field [0.025, -0.025], one saturated cell.
        let r = 0.05 + model.baseflow();
        let f = model.advance(r);
        assert_abs_diff_eq!(f.local_deficit[0], 0.025, epsilon = 1e-9);
        assert_abs_diff_eq!(f.local_deficit[1], -0.025, epsilon = 1e-9);
        assert_eq!(f.saturated_fraction, 0.5);
        assert_eq!(f.return_flow_field[0], 0.0);
        assert_abs_diff_eq!(f.return_flow_field[1], 0.025, epsilon = 1e-9);
        assert_abs_diff_eq!(f.returnflow, 0.0125, epsilon = 1e-9);
        assert_abs_diff_eq!(model.saturation_deficit(), 0.0125, epsilon = 1e-9);
        assert_abs_diff_eq!(f.mass_balance_error, 0.0, epsilon = 1e-12);
        assert_eq!(model.return_flow_field(), f.return_flow_field.as_slice());
    }

    #[test]
    fn two_cell_flooding_step_saturates_everything() {
        let mut model = two_cell_model();
        let r = 0.2 + model.baseflow();
        let f = model.advance(r);
        assert_eq!(f.saturated_fraction, 1.0);
        // All excess leaves as return flow; the mean lands back on zero.
        assert_abs_diff_eq!(f.returnflow, 0.15, epsilon = 1e-9);
        assert_abs_diff_eq!(model.saturation_deficit(), 0.0, epsilon = 1e-9);
    }

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn initial_state_regularised_by_clamping() {
        let params = TopModelParams {
            m: 0.025,
            twi_cutoff: 100.0,
            so: 0.0,
            cell_size: 10.0,
            ..Default::default()
        };
        let twi = Grid::from_vec(2, 1, vec![1.0, 3.0]).unwrap();
        let model = TopModel::from_wetness_index(params, ActiveMask::full(2, 1), &twi).unwrap();
        // Local field [0.025, -0.025] → [0.025, 0] → mean 0.0125.
        assert_abs_diff_eq!(model.saturation_deficit(), 0.0125, epsilon = 1e-12);
    }

    #[test]
    fn initial_override_replaces_so() {
        let base = two_cell_model();
        let model = TopModel::with_initial_deficit(*base.params(), base.topography().clone(), 0.3)
            .unwrap();
        assert_abs_diff_eq!(model.saturation_deficit(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn construction_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = random_model(&mut rng);
        let mut rng = StdRng::seed_from_u64(11);
        let b = random_model(&mut rng);
        assert_eq!(a.constants(), b.constants());
        assert_eq!(a.state(), b.state());
        assert_eq!(a.topography().wetness_index(), b.topography().wetness_index());
    }

    #[test]
    fn cell_area_mismatch_rejected() {
        let twi = Grid::from_vec(2, 1, vec![1.0, 3.0]).unwrap();
        let topo = Topography::from_wetness_index(ActiveMask::full(2, 1), &twi, 10.0, 100.0).unwrap();
        let params = TopModelParams { cell_size: 16.0, ..Default::default() };
        assert!(matches!(
            TopModel::new(params, topo),
            Err(TopModelError::Configuration(ConfigError::CellAreaMismatch { .. }))
        ));
    }

    #[test]
    fn empty_catchment_fails_before_any_step() {
        let mask = ActiveMask::from_flags(2, 2, &[false; 4]).unwrap();
        let g = Grid::new(2, 2, f64::NAN);
        let err = TopModel::from_terrain(TopModelParams::default(), mask, &g, &g).unwrap_err();
        assert!(matches!(
            err,
            TopModelError::Configuration(ConfigError::NoActiveCells)
        ));
    }

    // ── Properties ───────────────────────────────────────────────────────────

    #[test]
    fn mass_is_conserved_for_random_recharge() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..10 {
            let mut model = random_model(&mut rng);
            for _ in 0..300 {
                // Mostly small drainage, some net-loss and storm steps.
                let r = match rng.gen_range(0..10) {
                    0 => -rng.gen_range(0.0..0.003),
                    1 => rng.gen_range(0.02..0.1),
                    2 => 0.0,
                    _ => rng.gen_range(0.0..0.005),
                };
                let f = model.advance(r);
                assert!(
                    f.mass_balance_error.abs() < 1e-12,
                    "residual {} at step {}",
                    f.mass_balance_error,
                    model.state().step
                );
                assert!((0.0..=1.0).contains(&f.saturated_fraction));
                assert!(f.return_flow_field.iter().all(|&q| q >= 0.0));
            }
        }
    }

    #[test]
    fn saturated_fraction_limits() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = random_model(&mut rng);
        let xi = model.topography().wetness_index();
        let m = model.params().m;
        let x = model.constants().mean_index;
        let xi_max = xi.iter().copied().fold(f64::MIN, f64::max);
        let xi_min = xi.iter().copied().fold(f64::MAX, f64::min);

        // Provisional mean low enough that even the driest cell is ≤ 0.
        let target = -m * (x - xi_min) - 0.01;
        let r = model.saturation_deficit() + model.baseflow() - target;
        assert_eq!(model.advance(r).saturated_fraction, 1.0);

        // Provisional mean high enough that even the wettest cell is > 0.
        let target = -m * (x - xi_max) + 0.01;
        let r = model.saturation_deficit() + model.baseflow() - target;
        assert_eq!(model.advance(r).saturated_fraction, 0.0);
    }

    #[test]
    fn checked_step_passes_within_tolerance() {
        let params = TopModelParams {
            twi_cutoff: 100.0,
            cell_size: 10.0,
            mbe_tolerance: Some(1e-9),
            ..Default::default()
        };
        let twi = Grid::from_vec(3, 1, vec![1.0, 2.5, 6.0]).unwrap();
        let mut model = TopModel::from_wetness_index(params, ActiveMask::full(3, 1), &twi).unwrap();
        for k in 0..50 {
            let r = 0.002 * (k % 7) as f64 - 0.003;
            assert!(model.advance_checked(r).is_ok(), "step {k} tripped the tolerance");
        }
        assert_eq!(model.state().step, 50);
    }

    #[test]
    fn checked_step_fails_past_tolerance_but_commits_state() {
        let params = TopModelParams {
            twi_cutoff: 100.0,
            cell_size: 10.0,
            mbe_tolerance: Some(f64::MIN_POSITIVE),
            ..Default::default()
        };
        let twi = Grid::from_vec(3, 1, vec![1.0, 2.5, 6.0]).unwrap();
        let mut model = TopModel::from_wetness_index(params, ActiveMask::full(3, 1), &twi).unwrap();
        // Any rounding residual trips a tolerance this tight.
        for k in 0..200u64 {
            let before = model.saturation_deficit();
            match model.advance_checked(0.0137 * k as f64 - 0.1) {
                Ok(_) => continue,
                Err(TopModelError::NumericInstability { step, residual, tolerance }) => {
                    assert_eq!(step, k + 1);
                    assert_eq!(model.state().step, k + 1);
                    assert_ne!(model.saturation_deficit(), before);
                    assert!(residual.abs() > tolerance);
                    return;
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        panic!("no step exceeded the tolerance");
    }

    #[test]
    fn invalid_params_rejected_by_grid_constructors() {
        let twi = Grid::from_vec(2, 1, vec![1.0, 3.0]).unwrap();
        let params = TopModelParams { m: -1.0, cell_size: 10.0, ..Default::default() };
        assert!(matches!(
            TopModel::from_wetness_index(params, ActiveMask::full(2, 1), &twi),
            Err(TopModelError::Configuration(ConfigError::ParamOutOfRange { name: "m", .. }))
        ));
    }

    #[test]
    fn instability_error_names_step_and_residual() {
        let err = TopModelError::NumericInstability { step: 12, residual: 2e-6, tolerance: 1e-9 };
        let msg = err.to_string();
        assert!(msg.contains("step 12"), "{msg}");
        assert!(msg.contains("2e-6"), "{msg}");
    }

    #[test]
    fn run_collects_one_report_per_step() {
        let mut model = two_cell_model();
        let ts = model.run(&[0.0, 0.001, -0.0005, 0.0]);
        assert_eq!(ts.len(), 4);
        assert!(ts.max_abs_closure() < 1e-9);
        assert_abs_diff_eq!(ts.saturation_deficit[3], model.saturation_deficit());
        assert!(ts.saturated_area.iter().all(|f| (0.0..=1.0).contains(f)));
    }

    #[test]
    fn return_flow_grid_marks_outside_cells_missing() {
        let params = TopModelParams { twi_cutoff: 100.0, cell_size: 10.0, ..Default::default() };
        let mask = ActiveMask::from_flags(3, 1, &[true, false, true]).unwrap();
        let twi = Grid::from_vec(3, 1, vec![1.0, f64::NAN, 3.0]).unwrap();
        let mut model = TopModel::from_wetness_index(params, mask, &twi).unwrap();
        model.advance(1.0);
        let grid = model.return_flow_grid();
        assert_eq!(grid[1], None);
        assert!(grid[0].is_some() && grid[2].is_some());
    }
}

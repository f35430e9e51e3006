//! Mapping between the catchment-mean saturation deficit and the local
//! per-cell deficit field.
//!
//!   s_i = S + M · (X − xi_i)
//!
//! Fields are dense over the active cells, in mask order. With the
//! `threading` feature the per-cell maps run on rayon; reductions stay
//! sequential so results do not depend on the feature.

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::topography::Topography;

/// Local saturation deficit [m] of every active cell for a catchment mean
/// `mean_deficit` [m] and effective depth `m` [m].
pub fn local_field(topo: &Topography, m: f64, mean_deficit: f64) -> Vec<f64> {
    let x = topo.mean_index();
    #[cfg(feature = "threading")]
    let cells = topo.wetness_index().par_iter();
    #[cfg(not(feature = "threading"))]
    let cells = topo.wetness_index().iter();
    cells.map(|&xi| mean_deficit + m * (x - xi)).collect()
}

/// Return flow [m] of each cell: the magnitude of a negative local deficit,
/// zero elsewhere.
pub fn return_flow(local: &[f64]) -> Vec<f64> {
    #[cfg(feature = "threading")]
    let cells = local.par_iter();
    #[cfg(not(feature = "threading"))]
    let cells = local.iter();
    cells.map(|&s| if s < 0.0 { -s } else { 0.0 }).collect()
}

/// Number of cells at or below zero local deficit.
pub fn saturated_cells(local: &[f64]) -> usize {
    local.iter().filter(|&&s| s <= 0.0).count()
}

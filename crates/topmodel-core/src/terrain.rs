//! Terrain helpers: Horn (1981) slope from a DEM, the topographic wetness
//! index and a linear-interpolation percentile.

use crate::grid::{ActiveMask, Grid};

/// Floor added to `tan(slope)` so flat cells give a finite index.
pub const FLAT_EPS: f64 = f64::EPSILON;

/// Local topographic wetness index for a single cell.
///
/// `xi = ln(a / dx / (tan(β) + ε))`
///
/// `flow_acc` is the upslope contributing area [m2], `cell_width` the grid
/// spacing [m] and `slope_deg` the local slope in degrees.
#[inline]
pub fn wetness_index(flow_acc: f64, cell_width: f64, slope_deg: f64) -> f64 {
    (flow_acc / cell_width / (slope_deg.to_radians().tan() + FLAT_EPS)).ln()
}

/// Percentile `q` (0–100) of `values` with linear interpolation between the
/// two closest ranks.
///
/// Returns `None` for an empty slice; a single value is its own percentile.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Horn (1981) weighted 3×3 gradient at `(r, c)`.
///
/// ```text
///   NW(-1,-1)  N(-1, 0)  NE(-1,+1)
///   W ( 0,-1)  *         E ( 0,+1)
///   SW(+1,-1)  S(+1, 0)  SE(+1,+1)
/// ```
///
/// Neighbours beyond the raster edge replicate the nearest edge cell.
/// Neighbours outside the catchment or holding NaN take the centre value.
fn horn_gradient(dem: &Grid, mask: &ActiveMask, r: usize, c: usize, cellsize: f64) -> (f64, f64) {
    let z0 = dem.get(r, c);
    let at = |dr: isize, dc: isize| -> f64 {
        let rr = (r as isize + dr).clamp(0, dem.height as isize - 1) as usize;
        let cc = (c as isize + dc).clamp(0, dem.width as isize - 1) as usize;
        let v = dem.get(rr, cc);
        if v.is_nan() || !mask.is_active(rr * dem.width + cc) { z0 } else { v }
    };
    let nw = at(-1, -1);
    let n  = at(-1,  0);
    let ne = at(-1,  1);
    let w  = at( 0, -1);
    let e  = at( 0,  1);
    let sw = at( 1, -1);
    let s  = at( 1,  0);
    let se = at( 1,  1);

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * cellsize);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * cellsize);
    (dz_dx, dz_dy)
}

/// Slope angle [deg] of every active cell of `dem`.
///
/// Inactive cells are NaN in the returned grid.
///   slope = atan(√(dz_dx² + dz_dy²)) × 180/π
pub fn slope_from_dem(dem: &Grid, mask: &ActiveMask, cellsize: f64) -> Grid {
    let mut out = Grid::new(dem.width, dem.height, f64::NAN);
    for &i in mask.indices() {
        let r = i / dem.width;
        let c = i % dem.width;
        let (dz_dx, dz_dy) = horn_gradient(dem, mask, r, c, cellsize);
        out.data[i] = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees();
    }
    out
}

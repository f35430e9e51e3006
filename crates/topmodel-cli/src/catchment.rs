//! Catchment grid document read by the driver.
//!
//! ```json
//! { "width": 3, "height": 2,
//!   "mask": [1, 1, null, 1, 1, 1],
//!   "flow_accumulation": [...],
//!   "slope": [...] }
//! ```
//!
//! Terrain comes as `flow_accumulation` plus either `slope` [deg] or `dem`
//! [m], or as a precomputed `twi`. `null` marks missing cells in any grid.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use topmodel_core::terrain::slope_from_dem;
use topmodel_core::{ActiveMask, Grid, TopModel, TopModelParams};

fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f64>, D::Error> {
    let v: Vec<Option<f64>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
}

fn null_as_nan_opt<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<f64>>, D::Error> {
    null_as_nan_vec(d).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatchmentDoc {
    pub width: usize,
    pub height: usize,
    /// 1 = catchment cell; anything else or null = outside.
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub mask: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_nan_opt")]
    pub flow_accumulation: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "null_as_nan_opt")]
    pub slope: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "null_as_nan_opt")]
    pub dem: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "null_as_nan_opt")]
    pub twi: Option<Vec<f64>>,
}

impl CatchmentDoc {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parsing catchment JSON")
    }

    fn grid(&self, name: &str, data: &[f64]) -> Result<Grid> {
        Grid::from_vec(self.width, self.height, data.to_vec())
            .with_context(|| format!("catchment grid `{name}`"))
    }

    /// Build the model, picking the terrain source available in the document.
    pub fn build_model(&self, params: TopModelParams, initial: Option<f64>) -> Result<TopModel> {
        let mask = ActiveMask::from_grid(&self.grid("mask", &self.mask)?);

        let model = if let Some(twi) = &self.twi {
            let twi = self.grid("twi", twi)?;
            TopModel::from_wetness_index(params, mask, &twi)?
        } else {
            let Some(acc) = &self.flow_accumulation else {
                bail!("catchment needs either `twi` or `flow_accumulation`");
            };
            let acc = self.grid("flow_accumulation", acc)?;
            let slope = match (&self.slope, &self.dem) {
                (Some(slope), _) => self.grid("slope", slope)?,
                (None, Some(dem)) => {
                    tracing::info!("deriving slope from DEM");
                    slope_from_dem(&self.grid("dem", dem)?, &mask, params.cell_size)
                }
                (None, None) => bail!("catchment needs `slope` or `dem` with `flow_accumulation`"),
            };
            TopModel::from_terrain(params, mask, &acc, &slope)?
        };

        match initial {
            Some(s0) => Ok(TopModel::with_initial_deficit(
                *model.params(),
                model.topography().clone(),
                s0,
            )?),
            None => Ok(model),
        }
    }
}

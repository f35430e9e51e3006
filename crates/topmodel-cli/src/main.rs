//! Reference driver: runs the TopModel submodel over a recharge series.
//!
//! Inputs are JSON: an optional parameter file, a catchment grid document
//! and a recharge series in metres per step. Output is a JSON document with
//! the catchment constants, initial/final state and the per-step results.
mod catchment;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use catchment::CatchmentDoc;
use topmodel_core::{CatchmentConstants, State, StepReport, Timeseries, TopModelParams};

#[derive(Parser, Debug)]
#[command(name = "topmodel", about = "Run the TopModel subsurface-flow submodel over a recharge series")]
struct Args {
    /// Parameter JSON (dt, m, ko, twi_cutoff, so, cell_size, mbe_tolerance). Defaults if omitted.
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Catchment grid JSON (mask + flow_accumulation/slope|dem, or twi).
    #[arg(short, long)]
    catchment: PathBuf,

    /// Recharge series JSON: array of catchment-mean drainage per step [m].
    #[arg(short, long)]
    recharge: PathBuf,

    /// Output JSON path; stdout if omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Initial mean saturation deficit [m], overriding `so`.
    #[arg(long)]
    initial_deficit: Option<f64>,

    /// Include per-cell return flow and local deficit grids for every step.
    #[arg(long)]
    fields: bool,

    /// Abort when a step's mass-balance residual exceeds `mbe_tolerance`.
    #[arg(long)]
    strict: bool,
}

#[derive(Serialize)]
struct RunOutput {
    constants: CatchmentConstants,
    /// Applied wetness-index clamp value; null when clamping was skipped.
    twi_cutoff_value: Option<f64>,
    initial_state: State,
    final_state: State,
    timeseries: Timeseries,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    steps: Vec<StepReport>,
}

/// `--strict` only has an effect with a residual tolerance to check against.
fn check_strict(strict: bool, params: &TopModelParams) -> Result<()> {
    if strict && params.mbe_tolerance.is_none() {
        bail!("--strict needs `mbe_tolerance` in the parameter file");
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let params = match &args.params {
        Some(path) => TopModelParams::from_path(path)
            .with_context(|| format!("loading parameters from {}", path.display()))?,
        None => TopModelParams::default(),
    };

    check_strict(args.strict, &params)?;

    let text = fs::read_to_string(&args.catchment)
        .with_context(|| format!("reading {}", args.catchment.display()))?;
    let doc = CatchmentDoc::from_json_str(&text)?;
    let mut model = doc.build_model(params, args.initial_deficit)?;

    let text = fs::read_to_string(&args.recharge)
        .with_context(|| format!("reading {}", args.recharge.display()))?;
    let recharge: Vec<f64> = serde_json::from_str(&text).context("parsing recharge series")?;

    tracing::info!(
        active_cells = model.topography().n_active(),
        mean_index = model.constants().mean_index,
        initial_deficit = model.saturation_deficit(),
        steps = recharge.len(),
        "starting run"
    );

    let initial_state = model.state();
    let dt = model.params().dt;
    let mut timeseries = Timeseries::with_capacity(recharge.len());
    let mut steps = Vec::new();

    for &r in &recharge {
        let fluxes = if args.strict { model.advance_checked(r)? } else { model.advance(r) };
        let step = model.state().step;
        let report = if args.fields {
            StepReport::with_fields(step, &fluxes, dt, model.topography().mask())
        } else {
            StepReport::new(step, &fluxes, dt)
        };
        timeseries.push(&report);
        if args.fields {
            steps.push(report);
        }
    }

    tracing::info!(
        final_deficit = model.saturation_deficit(),
        max_abs_closure_mm = timeseries.max_abs_closure(),
        "run complete"
    );

    let out = RunOutput {
        constants: *model.constants(),
        twi_cutoff_value: model.topography().cutoff(),
        initial_state,
        final_state: model.state(),
        timeseries,
        steps,
    };
    let json = serde_json::to_string_pretty(&out)?;
    match &args.output {
        Some(path) => fs::write(path, json).with_context(|| format!("writing {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}

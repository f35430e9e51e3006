//! TopModel (Beven & Kirkby) subsurface-flow submodel for catchment-scale
//! ecohydrology simulations.
//!
//! A single state variable, the catchment-mean saturation deficit, is
//! advanced each timestep from a scalar recharge input. The static
//! topographic wetness index distributes that mean onto the grid to find
//! locally saturated cells and their return flow.

pub mod deficit;
pub mod error;
pub mod grid;
pub mod model;
pub mod outputs;
pub mod params;
pub mod state;
pub mod terrain;
pub mod topography;

pub use error::{ConfigError, TopModelError};
pub use grid::{ActiveMask, Grid};
pub use model::TopModel;
pub use outputs::{StepFluxes, StepReport, Timeseries};
pub use params::TopModelParams;
pub use state::State;
pub use topography::{CatchmentConstants, Topography};

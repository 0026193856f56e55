//! Analytic run prediction: cost surfaces, least-squares refitting,
//! calibration sweeps and persisted fits.

mod fit;
mod model;
mod record;
mod sweep;

pub use fit::*;
pub use model::*;
pub use record::*;
pub use sweep::*;

//! Accumulation of photon paths into a source-centred histogram.

mod config;
mod coordinates;
#[allow(clippy::module_inception)]
mod tabulator;

pub use config::TabulatorConfig;
pub use coordinates::{BinCoordinates, Location, locate};
pub use tabulator::{RecordSummary, Tabulator, UniformSampler};

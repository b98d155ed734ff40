use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::sim::acceptance::DOM_RADIUS;
use crate::table::binning::{AxisSpec, BinEdges, NUM_DIMS};
use crate::table::header::Header;

/// Settings of one table-generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabulatorConfig {
    /// Mean distance between volume samples along a photon path (m).
    pub step_length: f64,
    /// Radius of the sensor whose cross-section weights each sample (m).
    pub sensor_radius: f64,
    /// Seed of the sampling RNG. `None` seeds from system entropy.
    pub seed: Option<u64>,
    /// Binning of r, azimuth, cos(zenith) and time residual.
    pub bins: [AxisSpec; NUM_DIMS],
    /// Header written to the finished table; the photon count is filled in
    /// by the tabulator.
    pub header: Header,
}

impl TabulatorConfig {
    pub fn new() -> Self {
        Self {
            step_length: 1.0,
            sensor_radius: DOM_RADIUS,
            seed: None,
            bins: BinEdges::default_specs(),
            header: Header::default(),
        }
    }

    /// Reads a JSON configuration. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse configuration: {}", path.display()))
    }

    pub fn bin_edges(&self) -> Result<BinEdges> {
        Ok(BinEdges::from_specs(&self.bins)?)
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for TabulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

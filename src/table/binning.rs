//! Bin edges of the source-centred spherical table and the phase-space
//! volume of each bin.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::error::{Result, TableError};
use crate::vecutils::{diff, is_strictly_increasing, linspace, midpoints};

/// Number of table dimensions: r, azimuth, cos(zenith), time residual.
pub const NUM_DIMS: usize = 4;

/// Table dimensions in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Distance from the source (m).
    Radius,
    /// Angle around the source axis (degrees, folded onto 0..180).
    Azimuth,
    /// Cosine of the angle between the source axis and the displacement.
    CosZenith,
    /// Delay with respect to direct light (ns).
    TimeResidual,
}

impl Axis {
    pub const ALL: [Axis; NUM_DIMS] = [
        Axis::Radius,
        Axis::Azimuth,
        Axis::CosZenith,
        Axis::TimeResidual,
    ];

    pub fn index(self) -> usize {
        match self {
            Axis::Radius => 0,
            Axis::Azimuth => 1,
            Axis::CosZenith => 2,
            Axis::TimeResidual => 3,
        }
    }

    /// Photons leaving the table along a bounded axis are dropped, on the
    /// other axes they are folded into the last bin.
    pub fn truncates_on_overflow(self) -> bool {
        matches!(self, Axis::Radius | Axis::TimeResidual)
    }
}

/// Result of looking a coordinate up along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinIndex {
    Bin(usize),
    /// Coordinate lies beyond the top edge.
    Overflow,
    /// Coordinate is NaN.
    Invalid,
}

/// Finds the bin `i` with `edges[i] <= value < edges[i + 1]`.
///
/// The top edge itself belongs to the last bin. Values below the first edge
/// land in bin 0; values above the top edge report [`BinIndex::Overflow`]
/// and NaN reports [`BinIndex::Invalid`].
/// `edges` must hold at least two strictly increasing values.
pub fn search_bin(edges: &[f64], value: f64) -> BinIndex {
    if value.is_nan() {
        return BinIndex::Invalid;
    }
    let n_bins = edges.len() - 1;
    let at_or_below = edges.partition_point(|&e| e <= value);
    if at_or_below == 0 {
        BinIndex::Bin(0)
    } else if at_or_below <= n_bins {
        BinIndex::Bin(at_or_below - 1)
    } else if value == edges[n_bins] {
        BinIndex::Bin(n_bins - 1)
    } else {
        BinIndex::Overflow
    }
}

/// How edges are distributed between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    Linear,
    /// Evenly spaced in `sqrt(x)`, i.e. finer bins near `min`.
    Quadratic,
}

/// Compact description of one axis' edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub min: f64,
    pub max: f64,
    pub n_bins: usize,
    pub spacing: Spacing,
}

impl AxisSpec {
    pub fn linear(min: f64, max: f64, n_bins: usize) -> Self {
        Self {
            min,
            max,
            n_bins,
            spacing: Spacing::Linear,
        }
    }

    pub fn quadratic(min: f64, max: f64, n_bins: usize) -> Self {
        Self {
            min,
            max,
            n_bins,
            spacing: Spacing::Quadratic,
        }
    }

    pub fn edges(&self) -> Vec<f64> {
        match self.spacing {
            Spacing::Linear => linspace(self.min, self.max, self.n_bins + 1),
            Spacing::Quadratic => linspace(self.min.sqrt(), self.max.sqrt(), self.n_bins + 1)
                .into_iter()
                .map(|x| x * x)
                .collect(),
        }
    }
}

/// Bin edges along the four table dimensions.
///
/// Centers and widths are always derived from the edges on request.
#[derive(Debug, Clone, PartialEq)]
pub struct BinEdges {
    edges: [Vec<f64>; NUM_DIMS],
}

impl BinEdges {
    pub fn new(edges: [Vec<f64>; NUM_DIMS]) -> Result<Self> {
        for (axis, e) in edges.iter().enumerate() {
            if e.len() < 2 {
                return Err(TableError::InvalidBinEdges {
                    axis,
                    reason: format!("need at least 2 edges, got {}", e.len()),
                });
            }
            if !is_strictly_increasing(e) || e.iter().any(|x| !x.is_finite()) {
                return Err(TableError::InvalidBinEdges {
                    axis,
                    reason: "edges must be finite and strictly increasing".to_string(),
                });
            }
        }
        Ok(Self { edges })
    }

    pub fn from_vecs(edges: Vec<Vec<f64>>) -> Result<Self> {
        let n = edges.len();
        let edges: [Vec<f64>; NUM_DIMS] =
            edges.try_into().map_err(|_| TableError::InvalidBinEdges {
                axis: n,
                reason: format!("expected {NUM_DIMS} axes, got {n}"),
            })?;
        Self::new(edges)
    }

    pub fn from_specs(specs: &[AxisSpec; NUM_DIMS]) -> Result<Self> {
        Self::new(specs.map(|s| s.edges()))
    }

    /// Binning used for the production cascade tables.
    pub fn default_specs() -> [AxisSpec; NUM_DIMS] {
        [
            AxisSpec::quadratic(0., 580., 200),
            AxisSpec::linear(0., 180., 36),
            AxisSpec::linear(-1., 1., 100),
            AxisSpec::quadratic(0., 7e3, 105),
        ]
    }

    pub fn edges(&self, axis: Axis) -> &[f64] {
        &self.edges[axis.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.edges.iter().map(|e| e.as_slice())
    }

    pub fn n_bins(&self, axis: Axis) -> usize {
        self.edges(axis).len() - 1
    }

    /// Histogram shape implied by the edges.
    pub fn shape(&self) -> [usize; NUM_DIMS] {
        Axis::ALL.map(|a| self.n_bins(a))
    }

    pub fn centers(&self, axis: Axis) -> Vec<f64> {
        midpoints(self.edges(axis))
    }

    pub fn widths(&self, axis: Axis) -> Vec<f64> {
        diff(self.edges(axis))
    }

    pub fn locate(&self, axis: Axis, value: f64) -> BinIndex {
        search_bin(self.edges(axis), value)
    }

    /// Phase-space volume of one spatial bin (m³).
    ///
    /// The azimuthal extent counts twice because both halves of the sphere
    /// are folded onto 0..180 degrees.
    pub fn volume(&self, ir: usize, iaz: usize, icos: usize) -> f64 {
        let r = self.edges(Axis::Radius);
        let az = self.edges(Axis::Azimuth);
        let cz = self.edges(Axis::CosZenith);
        ((r[ir + 1].powi(3) - r[ir].powi(3)) / 3.)
            * (2. * (az[iaz + 1] - az[iaz]).to_radians())
            * (cz[icos + 1] - cz[icos])
    }

    /// Volumes of all spatial bins, indexed `[r][azimuth][cosZenith]`.
    pub fn volumes(&self) -> Array3<f64> {
        let [nr, naz, ncos, _] = self.shape();
        Array3::from_shape_fn((nr, naz, ncos), |(i, j, k)| self.volume(i, j, k))
    }
}

impl Default for BinEdges {
    fn default() -> Self {
        Self {
            edges: Self::default_specs().map(|s| s.edges()),
        }
    }
}

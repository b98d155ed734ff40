//! Detector response curves.
//!
//! The same trait serves both the wavelength acceptance (argument in nm)
//! and the angular acceptance (argument is the cosine of the impact angle).

use anyhow::{Result, ensure};

use crate::vecutils::is_strictly_increasing;

/// Production DOM radius (m).
pub const DOM_RADIUS: f64 = 0.16510;

/// A response curve mapping its argument to a relative efficiency.
pub trait Acceptance: Send + Sync {
    fn value(&self, x: f64) -> f64;
}

impl<F> Acceptance for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn value(&self, x: f64) -> f64 {
        self(x)
    }
}

/// Same efficiency everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantAcceptance(pub f64);

impl Acceptance for ConstantAcceptance {
    fn value(&self, _x: f64) -> f64 {
        self.0
    }
}

/// Piecewise-linear curve through sampled points, zero outside the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedAcceptance {
    xs: Vec<f64>,
    ys: Vec<f64>,
    scale: f64,
}

impl TabulatedAcceptance {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self> {
        ensure!(
            xs.len() == ys.len(),
            "got {} sample positions but {} values",
            xs.len(),
            ys.len()
        );
        ensure!(xs.len() >= 2, "need at least 2 samples");
        ensure!(
            is_strictly_increasing(&xs),
            "sample positions must be strictly increasing"
        );
        Ok(Self { xs, ys, scale: 1. })
    }

    /// Multiplies the whole curve by `scale`, e.g. an overall efficiency
    /// correction.
    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale *= scale;
        self
    }
}

impl Acceptance for TabulatedAcceptance {
    fn value(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if !(x >= self.xs[0] && x <= self.xs[n - 1]) {
            return 0.;
        }
        let i = self.xs.partition_point(|&xi| xi <= x).clamp(1, n - 1);
        let (x0, x1) = (self.xs[i - 1], self.xs[i]);
        let (y0, y1) = (self.ys[i - 1], self.ys[i]);
        self.scale * (y0 + (y1 - y0) * (x - x0) / (x1 - x0))
    }
}

/// Polynomial `sum(c[i] * x^i)` clamped to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialAcceptance {
    pub coefficients: Vec<f64>,
}

impl PolynomialAcceptance {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }
}

impl Acceptance for PolynomialAcceptance {
    fn value(&self, x: f64) -> f64 {
        // Horner
        self.coefficients
            .iter()
            .rev()
            .fold(0., |acc, c| acc * x + c)
            .clamp(0., 1.)
    }
}

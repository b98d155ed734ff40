use log::{debug, info, warn};
use ndarray::{Array4, s};
use rand::rngs::StdRng;
use std::f64::consts::PI;
use std::ops::AddAssign;

use super::config::TabulatorConfig;
use super::coordinates::{BinCoordinates, Location, locate};
use crate::sim::acceptance::{Acceptance, ConstantAcceptance, DOM_RADIUS};
use crate::sim::photon::{PhotonPath, Source};
use crate::sim::residual::{PointSourceResidual, TimeResidual};
use crate::table::binning::{BinEdges, NUM_DIMS};
use crate::table::error::{Result, TableError};
use crate::table::header::Header;
use crate::table::table::PhotoTable;

/// Source of uniform random numbers in [0, 1).
pub trait UniformSampler {
    fn uniform(&mut self) -> f64;
}

impl<R: rand::Rng> UniformSampler for R {
    fn uniform(&mut self) -> f64 {
        self.gen_range(0.0..1.0)
    }
}

/// Bookkeeping of [`Tabulator::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordSummary {
    /// Segments visited.
    pub segments: usize,
    /// Segments with an undefined end point.
    pub skipped: usize,
    /// Samples added to the histogram.
    pub samples: usize,
    /// Segments whose remaining samples were dropped because they left the
    /// table in r or time residual.
    pub truncated: usize,
    /// Samples or segments with NaN coordinates, recorded as NaN.
    pub invalid: usize,
}

impl AddAssign for RecordSummary {
    fn add_assign(&mut self, other: Self) {
        self.segments += other.segments;
        self.skipped += other.skipped;
        self.samples += other.samples;
        self.truncated += other.truncated;
        self.invalid += other.invalid;
    }
}

/// Accumulates weighted photon path samples into a 4-D histogram.
///
/// Each photon path is cut into segments between recorded positions. Every
/// segment is sampled at random points, on average one per `step_length`,
/// and each sample adds
/// `area(wavelength) * photon weight * angular efficiency * exp(-absorption lengths)`
/// to the bin it falls into. The squared weights are accumulated alongside
/// as a variance estimate.
///
/// Samples whose coordinates are NaN are not binned. They add NaN to the
/// first bin instead, so the table refuses to combine later.
///
/// An instance is not meant to be shared: parallel runs use one tabulator
/// (and one RNG stream) each and combine the finished tables.
pub struct Tabulator<R = StdRng> {
    edges: BinEdges,
    step_length: f64,
    values: Array4<f64>,
    weights: Array4<f64>,
    n_photons: f64,
    wavelength_acceptance: Box<dyn Acceptance>,
    angular_acceptance: Box<dyn Acceptance>,
    sensor_area: f64,
    time_residual: Box<dyn TimeResidual>,
    /// Refractive indices of the first recorded source.
    indices: Option<(f64, f64)>,
    /// First source whose indices differ from `indices`.
    conflicting_indices: Option<(f64, f64)>,
    rng: R,
}

impl Tabulator<StdRng> {
    /// Builds a tabulator with the binning, step length, sensor radius and
    /// seed of `config`.
    pub fn from_config(config: &TabulatorConfig) -> anyhow::Result<Self> {
        let mut tabulator = Self::new(config.bin_edges()?, config.step_length, config.rng())?;
        tabulator.set_efficiencies(
            ConstantAcceptance(1.),
            ConstantAcceptance(1.),
            config.sensor_radius,
        );
        Ok(tabulator)
    }
}

impl<R: UniformSampler> Tabulator<R> {
    /// Creates an empty tabulator with unit efficiencies, a production-size
    /// sensor and the point-source time residual.
    pub fn new(edges: BinEdges, step_length: f64, rng: R) -> Result<Self> {
        check_step_length(step_length)?;
        let shape = edges.shape();
        Ok(Self {
            edges,
            step_length,
            values: Array4::zeros(shape),
            weights: Array4::zeros(shape),
            n_photons: 0.,
            wavelength_acceptance: Box::new(ConstantAcceptance(1.)),
            angular_acceptance: Box::new(ConstantAcceptance(1.)),
            sensor_area: PI * DOM_RADIUS * DOM_RADIUS,
            time_residual: Box::new(PointSourceResidual),
            indices: None,
            conflicting_indices: None,
            rng,
        })
    }

    /// Replaces the binning and clears everything recorded so far.
    pub fn set_bins(&mut self, edges: BinEdges, step_length: f64) -> Result<()> {
        check_step_length(step_length)?;
        let shape = edges.shape();
        self.edges = edges;
        self.step_length = step_length;
        self.values = Array4::zeros(shape);
        self.weights = Array4::zeros(shape);
        self.n_photons = 0.;
        self.indices = None;
        self.conflicting_indices = None;
        Ok(())
    }

    /// Sets the detector response.
    ///
    /// # Arguments
    /// * `wavelength` - acceptance as a function of wavelength (nm)
    /// * `angular` - relative efficiency as a function of the cosine of the
    ///   impact angle
    /// * `radius` - sensor radius (m), the effective area is
    ///   `pi * radius² * wavelength(λ)`
    pub fn set_efficiencies(
        &mut self,
        wavelength: impl Acceptance + 'static,
        angular: impl Acceptance + 'static,
        radius: f64,
    ) {
        self.wavelength_acceptance = Box::new(wavelength);
        self.angular_acceptance = Box::new(angular);
        self.sensor_area = PI * radius * radius;
    }

    pub fn set_random_service(&mut self, rng: R) {
        self.rng = rng;
    }

    pub fn set_time_residual(&mut self, model: impl TimeResidual + 'static) {
        self.time_residual = Box::new(model);
    }

    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    pub fn step_length(&self) -> f64 {
        self.step_length
    }

    /// Effective sensor area at `wavelength` (m²).
    pub fn effective_area(&self, wavelength: f64) -> f64 {
        self.sensor_area * self.wavelength_acceptance.value(wavelength)
    }

    /// Adds to the photon count the table is normalized to later.
    ///
    /// Generation is usually biased, so this is the sum of the weights of
    /// the generated photons rather than their number.
    pub fn add_photons(&mut self, weight: f64) {
        self.n_photons += weight;
    }

    pub fn n_photons(&self) -> f64 {
        self.n_photons
    }

    /// Accumulated `(values, weights)`.
    pub fn values(&self) -> (&Array4<f64>, &Array4<f64>) {
        (&self.values, &self.weights)
    }

    /// Phase-space volume of every bin (m³), repeated along the time axis.
    pub fn bin_volumes(&self) -> Array4<f64> {
        let volumes = self.edges.volumes();
        Array4::from_shape_fn(self.edges.shape(), |(ir, iaz, icos, _)| {
            volumes[[ir, iaz, icos]]
        })
    }

    /// Number of samples to draw on a segment of length `distance`.
    ///
    /// `floor(distance / step)`, plus one with probability equal to the
    /// remainder, so the expected count is exactly `distance / step`.
    fn sample_count(&mut self, distance: f64) -> usize {
        let ratio = distance / self.step_length;
        let whole = ratio.floor();
        let extra = self.rng.uniform() < ratio - whole;
        whole as usize + extra as usize
    }

    /// Samples every segment of `photon` into the histogram.
    pub fn record(&mut self, source: &Source, photon: &PhotonPath) -> RecordSummary {
        self.note_indices(source);
        let mut summary = RecordSummary::default();

        // Constant for the whole photon: effective area and generation weight
        let wlen_weight = self.effective_area(photon.wavelength) * photon.weight;
        let mut t = photon.start_time;

        for segment in photon.segments() {
            summary.segments += 1;
            let (Some(start), Some(stop)) = (segment.start, segment.stop) else {
                summary.skipped += 1;
                continue;
            };

            let distance = start.distance(stop);
            if !distance.is_finite() {
                self.poison();
                summary.invalid += 1;
                t = f64::NAN;
                continue;
            }
            let n_samples = self.sample_count(distance);
            let direction = (stop - start).normalize();

            if let Some(direction) = direction {
                // The sensor looks straight down, so the cosine of the impact
                // angle is the z component of the photon direction
                let impact = direction.dz;
                let impact_weight = wlen_weight * self.angular_acceptance.value(impact);
                let abs_distance = segment.stop_absorption - segment.start_absorption;

                for _ in 0..n_samples {
                    let d = distance * self.rng.uniform();
                    let pos = start + direction * d;
                    let coords = BinCoordinates::compute(
                        source,
                        pos,
                        t + d / photon.group_velocity,
                        self.time_residual.as_ref(),
                    );
                    let idx = match locate(&self.edges, &coords) {
                        Location::Inside(idx) => idx,
                        // Left the recording volume, the rest of the segment is lost
                        Location::Outside => {
                            summary.truncated += 1;
                            break;
                        }
                        Location::Invalid => {
                            self.poison();
                            summary.invalid += 1;
                            continue;
                        }
                    };
                    let d_abs = segment.start_absorption + (d / distance) * abs_distance;
                    let weight = impact_weight * (-d_abs).exp();

                    self.values[idx] += weight;
                    self.weights[idx] += weight * weight;
                    summary.samples += 1;
                }
            }

            t += distance / photon.group_velocity;
        }

        if summary.invalid > 0 {
            warn!("{} samples had NaN coordinates", summary.invalid);
        }
        summary
    }

    fn poison(&mut self) {
        let first = [0; NUM_DIMS];
        self.values[first] = f64::NAN;
        self.weights[first] = f64::NAN;
    }

    fn note_indices(&mut self, source: &Source) {
        let used = (source.n_group, source.n_phase);
        match self.indices {
            None => self.indices = Some(used),
            Some(first) if first != used && self.conflicting_indices.is_none() => {
                self.conflicting_indices = Some(used);
            }
            Some(_) => {}
        }
    }

    /// Records several photons from the same source.
    pub fn record_all<'a, I>(&mut self, source: &Source, photons: I) -> RecordSummary
    where
        I: IntoIterator<Item = &'a PhotonPath>,
    {
        let mut summary = RecordSummary::default();
        for photon in photons {
            summary += self.record(source, photon);
        }
        debug!(
            "Recorded {} samples on {} segments ({} truncated, {} skipped, {} invalid)",
            summary.samples, summary.segments, summary.truncated, summary.skipped, summary.invalid
        );
        summary
    }

    /// Converts the accumulated weights (m² per photon) into detection
    /// probabilities by dividing each bin by its volume per step length.
    ///
    /// Bins without volume are left untouched.
    pub fn normalize(&mut self) {
        normalize_by_flux(
            &self.edges,
            self.step_length,
            &mut self.values,
            &mut self.weights,
        );
    }

    /// Normalized copy of the histogram wrapped in a table.
    ///
    /// The photon count and refractive indices of `header` are replaced by
    /// the recorded ones; the values are *not* divided by the photon count so
    /// tables can still be combined. Fails if sources with different
    /// refractive indices were recorded.
    pub fn to_table(&self, header: &Header) -> Result<PhotoTable> {
        let mut values = self.values.clone();
        let mut weights = self.weights.clone();
        normalize_by_flux(&self.edges, self.step_length, &mut values, &mut weights);
        self.wrap(values, weights, header)
    }

    /// Like [`Tabulator::to_table`] without copying the histogram.
    pub fn into_table(mut self, header: &Header) -> Result<PhotoTable> {
        self.normalize();
        let values = std::mem::take(&mut self.values);
        let weights = std::mem::take(&mut self.weights);
        self.wrap(values, weights, header)
    }

    fn wrap(
        &self,
        values: Array4<f64>,
        weights: Array4<f64>,
        header: &Header,
    ) -> Result<PhotoTable> {
        let mut header = Header {
            n_photons: self.n_photons,
            ..header.clone()
        };
        if let (Some(first), Some(other)) = (self.indices, self.conflicting_indices) {
            let (key, ours, theirs) = if first.0 != other.0 {
                ("n_group", first.0, other.0)
            } else {
                ("n_phase", first.1, other.1)
            };
            return Err(TableError::HeaderMismatch {
                key: key.to_string(),
                ours: ours.to_string(),
                theirs: theirs.to_string(),
            });
        }
        if let Some((n_group, n_phase)) = self.indices {
            if (header.n_group, header.n_phase) != (n_group, n_phase) {
                warn!(
                    "Header has n_group={} n_phase={}, recorded with {n_group} {n_phase}",
                    header.n_group, header.n_phase
                );
            }
            header.n_group = n_group;
            header.n_phase = n_phase;
        }
        info!("Total weights: {}", self.n_photons);
        PhotoTable::new(self.edges.clone(), values, Some(weights), header)
    }
}

fn check_step_length(step_length: f64) -> Result<()> {
    if step_length.is_finite() && step_length > 0. {
        Ok(())
    } else {
        Err(TableError::InvalidStepLength(step_length))
    }
}

fn normalize_by_flux(
    edges: &BinEdges,
    step_length: f64,
    values: &mut Array4<f64>,
    weights: &mut Array4<f64>,
) {
    let volumes = edges.volumes();
    info!("Total volume: {}", volumes.sum());

    let mut skipped = 0;
    for ((ir, iaz, icos), &volume) in volumes.indexed_iter() {
        if volume <= 0. || volume.is_nan() {
            skipped += 1;
            continue;
        }
        let flux = volume / step_length;
        values
            .slice_mut(s![ir, iaz, icos, ..])
            .mapv_inplace(|v| v / flux);
        weights
            .slice_mut(s![ir, iaz, icos, ..])
            .mapv_inplace(|w| w / (flux * flux));
    }
    if skipped > 0 {
        warn!("{skipped} bins have no volume and were left unnormalized");
    }
}

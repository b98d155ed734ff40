use crate::Point;
use crate::sim::photon::Source;
use crate::sim::residual::TimeResidual;
use crate::table::binning::{Axis, BinEdges, BinIndex, NUM_DIMS};

/// Position of a photon sample in table coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinCoordinates {
    /// Distance from the source (m).
    pub r: f64,
    /// Angle around the source axis, 0..180 degrees.
    pub azimuth: f64,
    /// Cosine of the angle between the source axis and the displacement.
    pub cos_zenith: f64,
    /// Delay with respect to direct light (ns).
    pub time_residual: f64,
}

impl BinCoordinates {
    /// Transforms a sample at `point` and `time` into source-centred
    /// spherical coordinates.
    pub fn compute(source: &Source, point: Point, time: f64, residual: &dyn TimeResidual) -> Self {
        let time_residual =
            residual.residual(source, point, time, source.n_group, source.n_phase);

        let displacement = point - source.position;
        let r = displacement.length();
        let l = displacement.dot(source.direction);
        let rho = displacement - source.direction * l;
        let rho_len = rho.length();

        let azimuth = if rho_len > 0. {
            let cos_az = rho.dot(source.direction.perpendicular()) / rho_len;
            cos_az.clamp(-1., 1.).acos().to_degrees()
        } else {
            0.
        };
        let cos_zenith = if r > 0. { l / r } else { 1. };

        Self {
            r,
            azimuth,
            cos_zenith,
            time_residual,
        }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Radius => self.r,
            Axis::Azimuth => self.azimuth,
            Axis::CosZenith => self.cos_zenith,
            Axis::TimeResidual => self.time_residual,
        }
    }
}

/// Where a sample falls with respect to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Inside([usize; NUM_DIMS]),
    /// Past the top of the radius or time-residual axis.
    Outside,
    /// At least one coordinate is NaN.
    Invalid,
}

/// Finds the table bin of `coords`.
///
/// Coordinates past the top edge of the azimuth or cos(zenith) axis are
/// clamped into the last bin. Past the top of the radius or time-residual
/// axis the sample is outside the recorded volume. A NaN coordinate makes
/// the sample invalid even when another axis is out of range.
pub fn locate(edges: &BinEdges, coords: &BinCoordinates) -> Location {
    let mut idx = [0; NUM_DIMS];
    let mut outside = false;
    for axis in Axis::ALL {
        idx[axis.index()] = match edges.locate(axis, coords.get(axis)) {
            BinIndex::Bin(i) => i,
            BinIndex::Invalid => return Location::Invalid,
            BinIndex::Overflow if axis.truncates_on_overflow() => {
                outside = true;
                0
            }
            BinIndex::Overflow => edges.n_bins(axis) - 1,
        };
    }
    if outside {
        Location::Outside
    } else {
        Location::Inside(idx)
    }
}

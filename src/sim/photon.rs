use crate::table::error::{Result, TableError};
use crate::table::header::{N_ICE_GROUP, N_ICE_PHASE};
use crate::{Point, Vector};

/// Light source a table is built around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Source {
    pub position: Point,
    /// Unit vector along the source axis.
    pub direction: Vector,
    /// Emission time (ns).
    pub time: f64,
    /// Group refractive index used for the time residual.
    pub n_group: f64,
    /// Phase refractive index used for the time residual.
    pub n_phase: f64,
}

impl Source {
    /// Creates a source in deep ice emitting at `t = 0`.
    ///
    /// `direction` is normalized. Returns `None` if it has no length.
    pub fn new(position: Point, direction: Vector) -> Option<Self> {
        Some(Self {
            position,
            direction: direction.normalize()?,
            time: 0.,
            n_group: N_ICE_GROUP,
            n_phase: N_ICE_PHASE,
        })
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn with_refractive_indices(mut self, n_group: f64, n_phase: f64) -> Self {
        self.n_group = n_group;
        self.n_phase = n_phase;
        self
    }
}

/// Recorded trajectory of one propagated photon.
///
/// `positions[i]` is `None` where the propagator could not determine the
/// position. `absorption_lengths[i]` is the path length up to `positions[i]`
/// in units of the local absorption length; both lists always have the same
/// length.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotonPath {
    positions: Vec<Option<Point>>,
    absorption_lengths: Vec<f64>,
    /// Wavelength (nm).
    pub wavelength: f64,
    /// Statistical weight, the inverse of any generation bias.
    pub weight: f64,
    /// Time at the first recorded position (ns).
    pub start_time: f64,
    /// Group velocity (m/ns).
    pub group_velocity: f64,
}

/// Pair of consecutive recorded positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Option<Point>,
    pub stop: Option<Point>,
    pub start_absorption: f64,
    pub stop_absorption: f64,
}

impl PhotonPath {
    pub fn new(
        positions: Vec<Option<Point>>,
        absorption_lengths: Vec<f64>,
        wavelength: f64,
        start_time: f64,
        group_velocity: f64,
    ) -> Result<Self> {
        check_lengths(positions.len(), absorption_lengths.len())?;
        Ok(Self {
            positions,
            absorption_lengths,
            wavelength,
            weight: 1.,
            start_time,
            group_velocity,
        })
    }

    /// Path through fully known points without absorption bookkeeping.
    pub fn through(points: &[Point], wavelength: f64, start_time: f64, group_velocity: f64) -> Self {
        Self {
            positions: points.iter().copied().map(Some).collect(),
            absorption_lengths: vec![0.; points.len()],
            wavelength,
            weight: 1.,
            start_time,
            group_velocity,
        }
    }

    pub fn with_absorption_lengths(mut self, absorption_lengths: Vec<f64>) -> Result<Self> {
        check_lengths(self.positions.len(), absorption_lengths.len())?;
        self.absorption_lengths = absorption_lengths;
        Ok(self)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn positions(&self) -> &[Option<Point>] {
        &self.positions
    }

    pub fn absorption_lengths(&self) -> &[f64] {
        &self.absorption_lengths
    }

    /// Consecutive position pairs, in order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.positions
            .windows(2)
            .zip(self.absorption_lengths.windows(2))
            .map(|(p, a)| Segment {
                start: p[0],
                stop: p[1],
                start_absorption: a[0],
                stop_absorption: a[1],
            })
    }
}

fn check_lengths(positions: usize, absorption_lengths: usize) -> Result<()> {
    if positions == absorption_lengths {
        Ok(())
    } else {
        Err(TableError::InvalidPath {
            positions,
            absorption_lengths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_direction_is_normalized() {
        let s = Source::new(Point::origin(), Vector::new(0., 3., 4.)).unwrap();
        assert!((s.direction.length() - 1.).abs() < 1e-12);
        assert!(Source::new(Point::origin(), Vector::new(0., 0., 0.)).is_none());
    }

    #[test]
    fn test_segments() {
        let path = PhotonPath::new(
            vec![
                Some(Point::new(0., 0., 0.)),
                None,
                Some(Point::new(1., 2., 0.)),
            ],
            vec![0., 0.1, 0.3],
            400.,
            0.,
            0.22,
        )
        .unwrap();
        let segs: Vec<Segment> = path.segments().collect();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].stop, None);
        assert_eq!(segs[1].start_absorption, 0.1);
        assert_eq!(segs[1].stop_absorption, 0.3);
        assert_eq!(segs[1].stop, Some(Point::new(1., 2., 0.)));
    }

    #[test]
    fn test_absorption_lengths_must_match_positions() {
        let points = [Point::origin(), Point::new(1., 0., 0.), Point::new(2., 0., 0.)];
        let short = PhotonPath::through(&points, 400., 0., 0.22).with_absorption_lengths(vec![0., 1.]);
        assert!(matches!(
            short,
            Err(TableError::InvalidPath {
                positions: 3,
                absorption_lengths: 2
            })
        ));
        let err = PhotonPath::new(vec![Some(Point::origin()); 2], vec![0.; 3], 400., 0., 0.22);
        assert!(err.is_err());

        let path = PhotonPath::through(&points, 400., 0., 0.22)
            .with_absorption_lengths(vec![0., 1., 2.])
            .unwrap();
        assert_eq!(path.segments().count(), 2);
    }
}

//! Expected arrival time of direct light and the resulting delay.

use super::photon::Source;
use crate::Point;

/// Speed of light in vacuum (m/ns).
pub const SPEED_OF_LIGHT: f64 = 0.299_792_458;

/// Delay of a photon at `point` and `time` relative to direct light.
pub trait TimeResidual: Send + Sync {
    fn residual(&self, source: &Source, point: Point, time: f64, n_group: f64, n_phase: f64)
    -> f64;
}

impl<F> TimeResidual for F
where
    F: Fn(&Source, Point, f64, f64, f64) -> f64 + Send + Sync,
{
    fn residual(&self, source: &Source, point: Point, time: f64, n_group: f64, n_phase: f64)
    -> f64 {
        self(source, point, time, n_group, n_phase)
    }
}

/// Point-like emitter such as an electromagnetic cascade or an LED:
/// direct light travels in a straight line at the group velocity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointSourceResidual;

impl TimeResidual for PointSourceResidual {
    fn residual(
        &self,
        source: &Source,
        point: Point,
        time: f64,
        n_group: f64,
        _n_phase: f64,
    ) -> f64 {
        let distance = source.position.distance(point);
        time - source.time - distance * n_group / SPEED_OF_LIGHT
    }
}

/// Infinite track emitting Cherenkov light, with `source.position` reached
/// at `source.time`.
///
/// Requires `n_phase > 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CherenkovTrackResidual;

impl TimeResidual for CherenkovTrackResidual {
    fn residual(
        &self,
        source: &Source,
        point: Point,
        time: f64,
        n_group: f64,
        n_phase: f64,
    ) -> f64 {
        let displacement = point - source.position;
        let l = displacement.dot(source.direction);
        let rho = (displacement - source.direction * l).length();
        let tan_theta_c = (n_phase * n_phase - 1.).sqrt();
        let direct = (l + rho * (n_group * n_phase - 1.) / tan_theta_c) / SPEED_OF_LIGHT;
        time - source.time - direct
    }
}

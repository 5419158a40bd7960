//! Vivaldi network coordinates (spec §4.3).
//!
//! A height-augmented 2-D embedding with an adaptive per-node error
//! estimate, updated from measured round-trip times without any central
//! coordination.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::VivaldiError;

const ERROR_WEIGHT: f64 = 0.5;
const CONST_ERROR: f64 = 0.5;
const CONST_ERROR_C: f64 = 0.25;
const MIN_ERROR: f64 = 0.1;
const MAX_ERROR: f64 = 10.0;
const MAX_MAGNITUDE: f64 = 30_000.0;
const ANCHOR_EVERY: u32 = 5;
const ANCHOR_ERROR: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VivaldiCoord {
    pub x: f64,
    pub y: f64,
    pub h: f64,
}

impl VivaldiCoord {
    pub const ORIGIN: VivaldiCoord = VivaldiCoord { x: 0.0, y: 0.0, h: 0.0 };

    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.h == 0.0
    }

    /// Planar norm plus height, per spec §4.3 ("distance `‖·‖` = planar-norm + `h`").
    fn planar_norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt() + self.h
    }

    fn sub(&self, other: &VivaldiCoord) -> VivaldiCoord {
        VivaldiCoord { x: self.x - other.x, y: self.y - other.y, h: (self.h - other.h).abs() }
    }

    /// Estimated RTT to `other`: planar-distance plus both endpoints'
    /// height terms, or zero if either side is still unpositioned at the
    /// origin (spec §4.6 "Vivaldi" selector).
    pub fn estimate_rtt(&self, other: &VivaldiCoord) -> f64 {
        if self.is_origin() || other.is_origin() {
            return 0.0;
        }
        self.sub(other).planar_norm()
    }
}

/// A node or client's local Vivaldi state: coordinate, error estimate, and
/// the anchor-update counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VivaldiPosition {
    pub coord: VivaldiCoord,
    pub error: f64,
    updates_since_anchor: u32,
}

impl Default for VivaldiPosition {
    fn default() -> Self {
        Self { coord: VivaldiCoord::ORIGIN, error: ANCHOR_ERROR.min(MAX_ERROR).max(MIN_ERROR), updates_since_anchor: 0 }
    }
}

impl VivaldiPosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one Vivaldi update step (spec §4.3, steps 1-5) given a
    /// measured `rtt` to a peer at `(peer_coord, peer_error)`. `jitter`
    /// supplies the tiny random perturbation used to break ties when the
    /// two coordinates coincide; callers must draw it from this entity's
    /// own seeded RNG, never a shared one.
    pub fn update(
        &mut self,
        rtt: f64,
        peer_coord: VivaldiCoord,
        peer_error: f64,
        rng: &mut impl Rng,
    ) -> Result<(), VivaldiError> {
        if !rtt.is_finite() || rtt <= 0.0 || rtt > 300.0 {
            return Err(VivaldiError::InvalidRtt(rtt));
        }
        if !peer_coord.x.is_finite() || !peer_coord.y.is_finite() || !peer_coord.h.is_finite() || !peer_error.is_finite() {
            return Err(VivaldiError::NonFinite);
        }
        let combined = self.error + peer_error;
        if combined == 0.0 {
            return Err(VivaldiError::ZeroCombinedError);
        }

        let w = self.error / combined;
        let estimated = self.coord.sub(&peer_coord).planar_norm();
        let re = rtt - estimated;
        let es = re.abs() / rtt;

        self.error = (es * ERROR_WEIGHT * w + self.error * (1.0 - ERROR_WEIGHT * w)).clamp(MIN_ERROR, MAX_ERROR);

        let delta = CONST_ERROR_C * w;
        let mut dir = self.coord.sub(&peer_coord);
        dir.x += rng.gen_range(-1e-6..1e-6);
        dir.y += rng.gen_range(-1e-6..1e-6);
        // Height is folded through the same displacement-scaled unit vector
        // as x/y rather than summed outright, matching the original's
        // `unity()` (all three components divided by the combined measure).
        let measure = (dir.x * dir.x + dir.y * dir.y).sqrt() + dir.h;
        let unit = if measure > 0.0 { (dir.x / measure, dir.y / measure, dir.h / measure) } else { (0.0, 0.0, 0.0) };

        self.coord.x += unit.0 * delta * re;
        self.coord.y += unit.1 * delta * re;
        self.coord.h = (self.coord.h + unit.2 * delta * re).abs();

        if !self.coord.x.is_finite()
            || !self.coord.y.is_finite()
            || !self.coord.h.is_finite()
            || self.coord.x.abs() > MAX_MAGNITUDE
            || self.coord.y.abs() > MAX_MAGNITUDE
            || self.coord.h.abs() > MAX_MAGNITUDE
        {
            self.coord = VivaldiCoord::ORIGIN;
            self.error = ANCHOR_ERROR.clamp(MIN_ERROR, MAX_ERROR);
            self.updates_since_anchor = 0;
            return Ok(());
        }

        self.updates_since_anchor += 1;
        if self.updates_since_anchor >= ANCHOR_EVERY {
            self.updates_since_anchor = 0;
            let _ = self.update(
                self.coord.planar_norm().max(f64::MIN_POSITIVE).min(300.0),
                VivaldiCoord::ORIGIN,
                ANCHOR_ERROR,
                rng,
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn rejects_out_of_window_rtt() {
        let mut pos = VivaldiPosition::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pos.update(0.0, VivaldiCoord::ORIGIN, 1.0, &mut rng), Err(VivaldiError::InvalidRtt(0.0)));
        assert_eq!(pos.update(301.0, VivaldiCoord::ORIGIN, 1.0, &mut rng), Err(VivaldiError::InvalidRtt(301.0)));
    }

    #[test]
    fn error_stays_in_bounds() {
        let mut pos = VivaldiPosition::new();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..50 {
            let _ = pos.update(0.05, VivaldiCoord { x: 10.0, y: 10.0, h: 0.0 }, 2.0, &mut rng);
            assert!(pos.error >= MIN_ERROR && pos.error <= MAX_ERROR);
        }
    }

    #[test]
    fn converges_toward_true_distance_ordering() {
        let mut a = VivaldiPosition::new();
        let mut rng = StdRng::seed_from_u64(3);
        let near = VivaldiCoord { x: 1.0, y: 0.0, h: 0.0 };
        let far = VivaldiCoord { x: 10.0, y: 0.0, h: 0.0 };
        for _ in 0..200 {
            let _ = a.update(0.001, near, 1.0, &mut rng);
            let _ = a.update(0.010, far, 1.0, &mut rng);
        }
        assert!(a.coord.estimate_rtt(&near) < a.coord.estimate_rtt(&far));
    }
}

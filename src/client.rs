//! Mobile client lifecycle (spec §4.7): movement, reconnection policy, and
//! virtual-position update.

use rand::rngs::StdRng;
use rand::Rng;

use crate::geometry::{Bounds, Position};
use crate::ids::{MessageId, ParticipantId};
use crate::input::TripLeg;
use crate::vivaldi::{VivaldiCoord, VivaldiPosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    OutOfBounds,
    PlanExhausted,
}

/// Bookkeeping for the client's last outgoing task, used by the
/// reconnection rules (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct OutstandingTask {
    pub id: MessageId,
    pub send_ts: f64,
    pub response_ts: Option<f64>,
    /// The request's own one-way latency and optimal-node latency, stashed
    /// so the matching response can compute round-trip rtt/opt error (spec
    /// §8 `rtt_rmse`/`opt_rate`) without a global message store.
    pub latency: f64,
    pub opt_latency: Option<f64>,
}

pub struct MobileClient {
    pub id: ParticipantId,
    plan: Vec<TripLeg>,
    leg_idx: usize,
    leg_start_time: f64,
    leg_start_pos: Position,
    pub position: Position,
    pub stop_cause: Option<StopCause>,
    pub start_time: f64,

    pub attached_node: Option<ParticipantId>,
    pub last_task: Option<OutstandingTask>,

    pub latency_threshold: f64,
    pub roundtrip_threshold: f64,
    pub timeout_threshold: f64,

    pub vivaldi: Option<VivaldiPosition>,

    pub out_history: Vec<MessageId>,
    pub in_history: Vec<MessageId>,

    pub rng: StdRng,
}

impl MobileClient {
    pub fn new(
        id: ParticipantId,
        plan: Vec<TripLeg>,
        start_time: f64,
        latency_threshold: f64,
        roundtrip_threshold: f64,
        timeout_threshold: f64,
        track_vivaldi: bool,
        rng: StdRng,
    ) -> Option<Self> {
        let first = plan.first()?;
        Some(Self {
            id,
            leg_start_pos: first.position,
            position: first.position,
            plan,
            leg_idx: 0,
            leg_start_time: start_time,
            stop_cause: None,
            start_time,
            attached_node: None,
            last_task: None,
            latency_threshold,
            roundtrip_threshold,
            timeout_threshold,
            vivaldi: if track_vivaldi { Some(VivaldiPosition::new()) } else { None },
            out_history: Vec::new(),
            in_history: Vec::new(),
            rng,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_cause.is_some()
    }

    /// Advances position to `now`, per the current leg's linear
    /// interpolation, possibly crossing into the next leg or exhausting
    /// the plan. Returns the stop cause the first time the client leaves
    /// the simulation boundary or runs out of plan.
    pub fn advance(&mut self, now: f64, bounds: &Bounds) -> Option<StopCause> {
        if self.is_stopped() {
            return self.stop_cause;
        }
        loop {
            let leg = &self.plan[self.leg_idx];
            let elapsed = now - self.leg_start_time;
            if leg.trav_time <= 0.0 || elapsed >= leg.trav_time {
                self.position = leg.position;
                if self.leg_idx + 1 >= self.plan.len() {
                    self.stop_cause = Some(StopCause::PlanExhausted);
                    return self.stop_cause;
                }
                self.leg_idx += 1;
                self.leg_start_time = now.min(self.leg_start_time + leg.trav_time.max(0.0));
                self.leg_start_pos = leg.position;
                continue;
            }
            let frac = (elapsed / leg.trav_time).clamp(0.0, 1.0);
            self.position = Position::new(
                self.leg_start_pos.x + (leg.position.x - self.leg_start_pos.x) * frac,
                self.leg_start_pos.y + (leg.position.y - self.leg_start_pos.y) * frac,
            );
            break;
        }
        if !self.position.in_bounds(bounds) {
            self.stop_cause = Some(StopCause::OutOfBounds);
        }
        self.stop_cause
    }

    /// Next out-tick period: `[0.5, 1.0]` seconds, seeded per client (spec
    /// §4.7).
    pub fn next_task_period(&mut self) -> f64 {
        self.rng.gen_range(0.5..=1.0)
    }

    /// Evaluates the three reconnection rules of spec §4.7. `current_latency`
    /// is the true instantaneous link latency to `attached_node`.
    pub fn needs_reconnect(&self, now: f64, current_latency: Option<f64>) -> bool {
        if let Some(latency) = current_latency {
            if latency > self.latency_threshold {
                return true;
            }
        } else {
            return true;
        }
        if let Some(task) = self.last_task {
            match task.response_ts {
                Some(rec_ts) => {
                    if rec_ts - task.send_ts > self.roundtrip_threshold {
                        return true;
                    }
                }
                None => {
                    if now - task.send_ts > self.timeout_threshold {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Updates the client's Vivaldi position from a response that carries
    /// a round-trip measurement (spec §4.7 last paragraph).
    pub fn update_vivaldi(&mut self, rtt: f64, peer_coord: VivaldiCoord, peer_error: f64) {
        if let Some(vivaldi) = &mut self.vivaldi {
            let mut rng = std::mem::replace(&mut self.rng, rand::SeedableRng::seed_from_u64(0));
            let _ = vivaldi.update(rtt, peer_coord, peer_error, &mut rng);
            self.rng = rng;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::world_rng;

    fn plan() -> Vec<TripLeg> {
        vec![
            TripLeg { position: Position::new(0.0, 0.0), trav_time: 0.0 },
            TripLeg { position: Position::new(0.0, 1000.0), trav_time: 100.0 },
        ]
    }

    fn bounds() -> Bounds {
        Bounds { x_min: -1.0, x_max: 1.0, y_min: -1.0, y_max: 2000.0 }
    }

    #[test]
    fn interpolates_linearly() {
        let mut rng = world_rng(1);
        let id = ParticipantId::new(&mut rng);
        let mut client = MobileClient::new(id, plan(), 0.0, 0.005, 1.2, 0.1, false, rng).unwrap();
        client.advance(50.0, &bounds());
        assert!((client.position.y - 500.0).abs() < 1e-6);
    }

    #[test]
    fn exhausts_plan_at_final_leg() {
        let mut rng = world_rng(2);
        let id = ParticipantId::new(&mut rng);
        let mut client = MobileClient::new(id, plan(), 0.0, 0.005, 1.2, 0.1, false, rng).unwrap();
        let cause = client.advance(100.0, &bounds());
        assert_eq!(cause, Some(StopCause::PlanExhausted));
    }

    #[test]
    fn timeout_rule_triggers_reconnect() {
        let mut rng = world_rng(3);
        let id = ParticipantId::new(&mut rng);
        let mut client = MobileClient::new(id, plan(), 0.0, 0.005, 1.2, 0.1, false, rng).unwrap();
        let mut rng2 = world_rng(4);
        client.last_task =
            Some(OutstandingTask { id: MessageId::new(&mut rng2), send_ts: 0.0, response_ts: None, latency: 0.0, opt_latency: None });
        assert!(client.needs_reconnect(1.0, Some(0.001)));
    }
}

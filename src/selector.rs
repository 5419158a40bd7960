//! Closest-node selection algorithms (spec §4.6).
//!
//! Baseline/random/Vivaldi are pure lookups over already-available state.
//! Meridian's recursive hop needs scheduler suspension to collect ping
//! responses, so only its per-hop decision (which peers to ping, which hop
//! to forward to) lives here; the timing orchestration is in `world.rs`.

use std::collections::HashMap;

use rand::Rng;

use crate::gossip::{GossipNews, VirtualPosition};
use crate::ids::ParticipantId;
use crate::meridian::RingSet;
use crate::vivaldi::VivaldiCoord;

pub const MERIDIAN_BETA: f64 = 0.5;

/// Omniscient ground truth (spec §4.6 "Baseline"): lowest true latency
/// among nodes with a free slot, ties broken by identifier.
pub fn baseline_select(candidates: impl Iterator<Item = (ParticipantId, bool, f64)>) -> Option<ParticipantId> {
    candidates
        .filter(|(_, has_slot, _)| *has_slot)
        .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)))
        .map(|(id, _, _)| id)
}

pub fn random_select(candidates: &[ParticipantId], rng: &mut impl Rng) -> Option<ParticipantId> {
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range(0..candidates.len())])
}

/// Among gossiped fog-node entries with a free slot, the one whose stored
/// Vivaldi coordinate minimizes the estimated RTT to `client_coord` (spec
/// §4.6 "Vivaldi").
pub fn vivaldi_select(client_coord: &VivaldiCoord, gossip: &HashMap<ParticipantId, GossipNews>) -> Option<ParticipantId> {
    gossip
        .values()
        .filter_map(|news| match (&news.position, news.available_slots) {
            (VirtualPosition::Vivaldi(coord), Some(slots)) if slots > 0 => {
                Some((news.id, client_coord.estimate_rtt(coord)))
            }
            _ => None,
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)))
        .map(|(id, _)| id)
}

/// The ring a contacted node `a` believes `target` belongs to, per its own
/// ring-set, and the primary members it should ping (spec §4.6 "Meridian").
pub fn meridian_ring_and_peers(ring_set: &RingSet, ring_number: u32) -> Vec<ParticipantId> {
    match ring_set.ring(ring_number) {
        Some(ring) => ring.members.iter().map(|m| m.id).collect(),
        None => Vec::new(),
    }
}

/// Picks the best forwarding hop from collected ping responses: the member
/// with the lowest reported latency to the target. `None` means `a` should
/// declare itself closest.
pub fn meridian_best_hop(responses: &[(ParticipantId, f64)]) -> Option<ParticipantId> {
    responses.iter().min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)).map(|(id, _)| *id)
}

/// Suspension window for collecting Meridian ping responses (spec §4.6):
/// `(2*beta + 1) * d` virtual seconds, where `d` is the current round-trip
/// estimate to the pinged ring.
pub fn meridian_collection_window(round_trip_estimate: f64) -> f64 {
    (2.0 * MERIDIAN_BETA + 1.0) * round_trip_estimate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::world_rng;

    #[test]
    fn baseline_picks_lowest_latency_with_free_slot() {
        let mut rng = world_rng(1);
        let a = ParticipantId::new(&mut rng);
        let b = ParticipantId::new(&mut rng);
        let picked = baseline_select(vec![(a, true, 5.0), (b, true, 1.0)].into_iter());
        assert_eq!(picked, Some(b));
    }

    #[test]
    fn baseline_skips_saturated_nodes() {
        let mut rng = world_rng(2);
        let a = ParticipantId::new(&mut rng);
        let b = ParticipantId::new(&mut rng);
        let picked = baseline_select(vec![(a, false, 0.1), (b, true, 9.0)].into_iter());
        assert_eq!(picked, Some(b));
    }

    #[test]
    fn meridian_best_hop_is_lowest_latency() {
        let mut rng = world_rng(3);
        let a = ParticipantId::new(&mut rng);
        let b = ParticipantId::new(&mut rng);
        let best = meridian_best_hop(&[(a, 9.0), (b, 1.0)]);
        assert_eq!(best, Some(b));
    }
}

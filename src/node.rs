//! Fog-node state machine (spec §4.5).
//!
//! A node is driven entirely by `World`: there is no live fiber per node,
//! only state plus handler methods the world's event loop calls at the
//! right virtual time. This is the synchronous-DES translation of the
//! fiber model (spec §9 "protocol polymorphism") — the dispatch table is
//! still selected once, at construction, by the configured protocol.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::DiscoveryProtocol;
use crate::error::ProtocolError;
use crate::geometry::Position;
use crate::gossip::{self, GossipNews, VirtualPosition};
use crate::ids::{MessageId, ParticipantId};
use crate::meridian::{Membership, RingSet};
use crate::vivaldi::VivaldiPosition;

const EVICT_IDLE_SECS: f64 = 2.0;

/// An open Meridian recursive-discovery search this node is coordinating
/// for some client (spec §4.6 "Meridian").
pub struct MeridianSearch {
    pub requester: ParticipantId,
    pub target: ParticipantId,
    pub responses: Vec<(ParticipantId, f64)>,
    pub opened_at: f64,
    /// The originating discovery request's ground-truth optimal node, carried
    /// across relay hops (spec §3 `opt_node`, threaded via
    /// `MessageBody::Discovery::origin_opt_node` rather than the per-message
    /// metrics field, which is `None` on node-to-node traffic by invariant).
    pub opt_node: Option<ParticipantId>,
}

/// An open Meridian ping this node was asked to perform on behalf of
/// another node (spec §4.5 type-4 dispatch).
pub struct OpenPing {
    pub requester: ParticipantId,
}

pub struct FogNode {
    pub id: ParticipantId,
    pub position: Position,
    pub nearest_tower: Position,
    pub slots: usize,
    pub hardware_tier: u32,
    pub unlimited_bandwidth: bool,
    pub protocol: DiscoveryProtocol,

    pub clients: HashMap<ParticipantId, f64>,
    pub gossip: HashMap<ParticipantId, GossipNews>,

    pub vivaldi: Option<VivaldiPosition>,
    pub ring_set: Option<RingSet>,
    pub meridian_searches: HashMap<ParticipantId, MeridianSearch>,
    pub open_pings: HashMap<ParticipantId, OpenPing>,
    /// Outstanding probes this node sent, keyed by the message id, so a
    /// type-3 response can be matched back to the peer and send time it
    /// measured against.
    pub pending_probes: HashMap<MessageId, (ParticipantId, f64)>,
    /// Latencies measured against peers via probing, in milliseconds; the
    /// snapshot a Meridian ring insert uses as the member's `coordinates`
    /// (spec §3 "the full latency-vector the member last gossiped" — this
    /// node's own measurements stand in for that vector, since no gossip
    /// wire format currently carries a flat peer-latency vector).
    pub measured_latencies: HashMap<ParticipantId, f64>,

    pub out_history: Vec<MessageId>,
    pub in_history: Vec<MessageId>,
    pub workload_log: Vec<(f64, usize, f64)>,

    pub rng: StdRng,
}

impl FogNode {
    pub fn new(
        id: ParticipantId,
        position: Position,
        nearest_tower: Position,
        slots: usize,
        hardware_tier: u32,
        unlimited_bandwidth: bool,
        protocol: DiscoveryProtocol,
        meridian_capacities: (usize, usize),
        rng: StdRng,
    ) -> Self {
        let (vivaldi, ring_set) = match protocol {
            DiscoveryProtocol::Vivaldi => (Some(VivaldiPosition::new()), None),
            DiscoveryProtocol::Meridian => (None, Some(RingSet::new(meridian_capacities.0, meridian_capacities.1))),
            DiscoveryProtocol::Baseline | DiscoveryProtocol::Random => (None, None),
        };
        Self {
            id,
            position,
            nearest_tower,
            slots,
            hardware_tier,
            unlimited_bandwidth,
            protocol,
            clients: HashMap::new(),
            gossip: HashMap::new(),
            vivaldi,
            ring_set,
            meridian_searches: HashMap::new(),
            open_pings: HashMap::new(),
            pending_probes: HashMap::new(),
            measured_latencies: HashMap::new(),
            out_history: Vec::new(),
            in_history: Vec::new(),
            workload_log: Vec::new(),
            rng,
        }
    }

    pub fn available_slots(&self) -> Option<usize> {
        self.slots.checked_sub(self.clients.len())
    }

    pub fn has_free_slot(&self) -> bool {
        self.clients.len() < self.slots
    }

    /// My own gossip-worthy news, refreshed to the current tick (spec §4.5
    /// "Self-news is always refreshed").
    pub fn self_news(&self, now: f64) -> GossipNews {
        let position = match (&self.vivaldi, &self.ring_set) {
            (Some(v), _) => VirtualPosition::Vivaldi(v.coord),
            (_, Some(r)) => VirtualPosition::Meridian(r.clone()),
            _ => VirtualPosition::None,
        };
        GossipNews { id: self.id, position, timestamp: now, available_slots: self.available_slots() }
    }

    /// Merges a batch of gossiped news into this node's table.
    pub fn merge_gossip(&mut self, news: Vec<GossipNews>) {
        for item in news {
            if item.id == self.id {
                continue;
            }
            gossip::merge(&mut self.gossip, item);
        }
    }

    /// Type-1 dispatch (spec §4.5): admit or refresh a client's task.
    /// Returns `true` if the task was accepted (and so deserves a reply).
    pub fn handle_task(&mut self, client: ParticipantId, now: f64) -> bool {
        if let Some(ts) = self.clients.get_mut(&client) {
            *ts = now;
            return true;
        }
        if self.has_free_slot() {
            self.clients.insert(client, now);
            return true;
        }
        debug!(node = %self.id, %client, "task dropped, node saturated");
        false
    }

    /// Monitor fiber tick (spec §4.5): evict clients idle for more than
    /// `EVICT_IDLE_SECS` and snapshot the workload log.
    pub fn monitor_tick(&mut self, now: f64) {
        self.clients.retain(|_, last_ts| now - *last_ts <= EVICT_IDLE_SECS);
        let load = if self.slots == 0 { 0.0 } else { self.clients.len() as f64 / self.slots as f64 };
        self.workload_log.push((now, self.clients.len(), load));
    }

    /// Picks the next probe target per Dabek's rule (spec §4.5 probe
    /// fiber): 50% uniformly random, 50% from the nearest 4 neighbours.
    pub fn pick_probe_target(&mut self, peers: &[(ParticipantId, Position)]) -> Option<ParticipantId> {
        if peers.is_empty() {
            return None;
        }
        if self.rng.gen_bool(0.5) {
            let idx = self.rng.gen_range(0..peers.len());
            Some(peers[idx].0)
        } else {
            let mut sorted = peers.to_vec();
            sorted.sort_by(|a, b| {
                self.position.distance(&a.1).partial_cmp(&self.position.distance(&b.1)).unwrap_or(std::cmp::Ordering::Equal)
            });
            let pool = &sorted[..sorted.len().min(4)];
            let idx = self.rng.gen_range(0..pool.len());
            Some(pool[idx].0)
        }
    }

    /// Next probe-fiber period (spec §4.5): `min(2, ln(now+1)) + jitter`.
    pub fn next_probe_period(&mut self, now: f64) -> f64 {
        let base = (now + 1.0).ln().min(2.0).max(0.0);
        base + self.rng.gen_range(0.0..0.25)
    }

    /// Type-3 dispatch when this is a peer's response to one of our probes:
    /// update our Vivaldi position from the measured RTT (spec §4.5).
    pub fn handle_probe_response(
        &mut self,
        peer: ParticipantId,
        rtt: f64,
        peer_coord: Option<crate::vivaldi::VivaldiCoord>,
        peer_error: f64,
    ) {
        if let (Some(vivaldi), Some(coord)) = (&mut self.vivaldi, peer_coord) {
            let mut rng = std::mem::replace(&mut self.rng, rand::SeedableRng::seed_from_u64(0));
            if let Err(e) = vivaldi.update(rtt, coord, peer_error, &mut rng) {
                warn!(node = %self.id, %peer, error = %e, "vivaldi update rejected");
            }
            self.rng = rng;
        }

        if self.ring_set.is_some() {
            let latency_ms = rtt * 1000.0;
            self.measured_latencies.insert(peer, latency_ms);
            let prev_ring = self.ring_set.as_ref().and_then(|rs| rs.find_ring(peer)).unwrap_or(0);
            let coordinates: Vec<(ParticipantId, f64)> = self.measured_latencies.iter().map(|(&id, &lat)| (id, lat)).collect();
            if let Some(ring_set) = &mut self.ring_set {
                let membership = Membership { id: peer, latency: latency_ms, prev_ring, coordinates };
                if let Err(e) = ring_set.insert(membership) {
                    warn!(node = %self.id, %peer, error = %e, "ring insert skipped");
                }
            }
        }
    }

    /// Type-4 request dispatch (spec §4.5): only participate if we still
    /// have a free slot; otherwise record the open ping and fire a probe.
    pub fn handle_meridian_ping_request(&mut self, requester: ParticipantId, target: ParticipantId) -> bool {
        if !self.has_free_slot() {
            return false;
        }
        self.open_pings.insert(target, OpenPing { requester });
        true
    }

    /// Type-4 response dispatch: append the measured latency to the open
    /// search record for `target`, if one exists.
    pub fn handle_meridian_ping_response(
        &mut self,
        target: ParticipantId,
        peer: ParticipantId,
        measured_latency: f64,
    ) -> Result<(), ProtocolError> {
        match self.meridian_searches.get_mut(&target) {
            Some(search) => {
                search.responses.push((peer, measured_latency));
                Ok(())
            }
            None => Err(ProtocolError::UnknownMeridianRequest(target)),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn node(slots: usize) -> FogNode {
        let mut rng = StdRng::seed_from_u64(1);
        let id = ParticipantId::new(&mut rng);
        FogNode::new(
            id,
            Position::ORIGIN,
            Position::ORIGIN,
            slots,
            1,
            false,
            DiscoveryProtocol::Baseline,
            (4, 4),
            rng,
        )
    }

    #[test]
    fn admits_until_saturated() {
        let mut n = node(1);
        let mut rng = StdRng::seed_from_u64(2);
        let a = ParticipantId::new(&mut rng);
        let b = ParticipantId::new(&mut rng);
        assert!(n.handle_task(a, 0.0));
        assert!(!n.handle_task(b, 0.0));
        assert!(n.handle_task(a, 1.0));
    }

    #[test]
    fn monitor_evicts_idle_clients() {
        let mut n = node(2);
        let mut rng = StdRng::seed_from_u64(3);
        let a = ParticipantId::new(&mut rng);
        n.handle_task(a, 0.0);
        n.monitor_tick(1.0);
        assert_eq!(n.clients.len(), 1);
        n.monitor_tick(3.0);
        assert_eq!(n.clients.len(), 0);
    }
}

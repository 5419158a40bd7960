//! Gossip news (spec §3 "Gossip news"): best-effort dissemination of
//! virtual-position and slot-availability tuples, piggy-backed on every
//! message and merged last-writer-wins by timestamp.

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;
use crate::meridian::RingSet;
use crate::vivaldi::VivaldiCoord;

/// The heterogeneous virtual-position slot of a gossip entry (spec §9
/// design note: "model the virtual-position slot as a variant"). Selection
/// algorithms pattern-match and reject a mismatched kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VirtualPosition {
    None,
    Vivaldi(VivaldiCoord),
    Meridian(RingSet),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipNews {
    pub id: ParticipantId,
    pub position: VirtualPosition,
    pub timestamp: f64,
    pub available_slots: Option<usize>,
}

/// Merges `incoming` into `stored`: last-writer-wins by `timestamp` (spec
/// §3). Returns `true` if the merge changed anything, so callers can tell
/// idempotent re-merges apart from real updates.
pub fn merge(stored: &mut std::collections::HashMap<ParticipantId, GossipNews>, incoming: GossipNews) -> bool {
    match stored.get(&incoming.id) {
        Some(existing) if existing.timestamp >= incoming.timestamp => false,
        _ => {
            stored.insert(incoming.id, incoming);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn news(id: ParticipantId, ts: f64) -> GossipNews {
        GossipNews { id, position: VirtualPosition::None, timestamp: ts, available_slots: Some(1) }
    }

    #[test]
    fn merge_is_last_writer_wins() {
        let mut table = std::collections::HashMap::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        use rand::SeedableRng;
        let id = ParticipantId::new(&mut rng);
        assert!(merge(&mut table, news(id, 1.0)));
        assert!(!merge(&mut table, news(id, 0.5)));
        assert_eq!(table[&id].timestamp, 1.0);
        assert!(merge(&mut table, news(id, 2.0)));
        assert_eq!(table[&id].timestamp, 2.0);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut table = std::collections::HashMap::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        use rand::SeedableRng;
        let id = ParticipantId::new(&mut rng);
        merge(&mut table, news(id, 3.0));
        let changed = merge(&mut table, news(id, 3.0));
        assert!(!changed);
    }
}

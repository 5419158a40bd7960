//! Ring membership bookkeeping (spec §4.4). Ring-management (the
//! hypervolume-driven reduce step) lives in `engine.rs`; this module only
//! owns insertion, eviction and freeze state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::RingError;
use crate::ids::ParticipantId;

pub const MAX_RINGS: u32 = 8;
const DEFAULT_ALPHA: f64 = 1.0;
const DEFAULT_S: f64 = 1.5;

/// A ring membership record (spec §3 "Meridian ring-set"). `coordinates` is
/// the full latency-vector the member last gossiped, keyed by the ids it
/// was measured against; it is what `engine::manage_ring` builds the
/// pairwise latency matrix from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: ParticipantId,
    pub latency: f64,
    pub prev_ring: u32,
    pub coordinates: Vec<(ParticipantId, f64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ring {
    pub members: Vec<Membership>,
    pub secondary: VecDeque<Membership>,
    pub frozen: bool,
}

/// Per-node ring-set: `max_rings` latency bands, each with a primary and a
/// FIFO secondary pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingSet {
    rings: Vec<Ring>,
    pub primary_capacity: usize,
    pub secondary_capacity: usize,
    pub alpha: f64,
    pub s: f64,
}

impl RingSet {
    pub fn new(primary_capacity: usize, secondary_capacity: usize) -> Self {
        Self {
            rings: (0..MAX_RINGS).map(|_| Ring::default()).collect(),
            primary_capacity,
            secondary_capacity,
            alpha: DEFAULT_ALPHA,
            s: DEFAULT_S,
        }
    }

    /// Maps a measured latency (ms) to its 1-based ring number, per spec
    /// §4.4's indexing rule.
    pub fn ring_index(&self, latency_ms: f64) -> u32 {
        if latency_ms < self.alpha {
            return 1;
        }
        let top = self.alpha * self.s.powi(MAX_RINGS as i32);
        if latency_ms > top {
            return MAX_RINGS;
        }
        for i in 1..=MAX_RINGS {
            let lo = self.alpha * self.s.powi(i as i32 - 1);
            let hi = self.alpha * self.s.powi(i as i32);
            if latency_ms >= lo && latency_ms < hi {
                return i;
            }
        }
        MAX_RINGS
    }

    fn slot(&mut self, ring_number: u32) -> Result<&mut Ring, RingError> {
        if ring_number == 0 || ring_number > MAX_RINGS {
            return Err(RingError::OutOfRange(ring_number, MAX_RINGS));
        }
        Ok(&mut self.rings[(ring_number - 1) as usize])
    }

    pub fn ring(&self, ring_number: u32) -> Option<&Ring> {
        if ring_number == 0 || ring_number > MAX_RINGS {
            return None;
        }
        self.rings.get((ring_number - 1) as usize)
    }

    /// The ring `id` currently belongs to, primary or secondary, if any.
    pub fn find_ring(&self, id: ParticipantId) -> Option<u32> {
        self.rings.iter().position(|ring| ring.members.iter().any(|m| m.id == id) || ring.secondary.iter().any(|m| m.id == id)).map(|idx| (idx + 1) as u32)
    }

    pub fn freeze(&mut self, ring_number: u32) -> Result<(), RingError> {
        self.slot(ring_number)?.frozen = true;
        Ok(())
    }

    pub fn unfreeze(&mut self, ring_number: u32) -> Result<(), RingError> {
        self.slot(ring_number)?.frozen = false;
        Ok(())
    }

    /// Removes `id` from ring `ring_number` if present (either side),
    /// promoting the oldest secondary to primary when a primary slot opens.
    pub fn erase(&mut self, id: ParticipantId, ring_number: u32) -> Result<(), RingError> {
        let ring = self.slot(ring_number)?;
        if let Some(pos) = ring.members.iter().position(|m| m.id == id) {
            ring.members.remove(pos);
            if let Some(promoted) = ring.secondary.pop_front() {
                ring.members.push(promoted);
            }
            return Ok(());
        }
        ring.secondary.retain(|m| m.id != id);
        Ok(())
    }

    /// Insert or update a member's measured latency and coordinate
    /// snapshot, per spec §4.4 "Insert(node)".
    pub fn insert(&mut self, membership: Membership) -> Result<(), RingError> {
        let target = self.ring_index(membership.latency);
        if self.rings[(target - 1) as usize].frozen {
            return Err(RingError::Frozen(target));
        }

        let prev = membership.prev_ring;
        if prev != 0 && prev != target {
            self.erase(membership.id, prev)?;
        }

        let primary_capacity = self.primary_capacity;
        let secondary_capacity = self.secondary_capacity;
        let ring = self.slot(target)?;

        if let Some(existing) = ring.members.iter_mut().find(|m| m.id == membership.id) {
            existing.latency = membership.latency;
            existing.coordinates = membership.coordinates;
            return Ok(());
        }
        if let Some(existing) = ring.secondary.iter_mut().find(|m| m.id == membership.id) {
            existing.latency = membership.latency;
            existing.coordinates = membership.coordinates;
            return Ok(());
        }

        if ring.members.len() < primary_capacity {
            ring.members.push(Membership { prev_ring: target, ..membership });
        } else {
            ring.secondary.push_back(Membership { prev_ring: target, ..membership });
            while ring.secondary.len() > secondary_capacity {
                ring.secondary.pop_front();
            }
        }
        Ok(())
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    pub fn rings_mut(&mut self) -> &mut [Ring] {
        &mut self.rings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: ParticipantId, latency: f64) -> Membership {
        Membership { id, latency, prev_ring: 0, coordinates: Vec::new() }
    }

    #[test]
    fn ring_index_matches_bands() {
        let set = RingSet::new(4, 4);
        assert_eq!(set.ring_index(0.5), 1);
        assert_eq!(set.ring_index(1.0), 2);
        assert_eq!(set.ring_index(1_000_000.0), MAX_RINGS);
    }

    #[test]
    fn insert_then_erase_is_idempotent() {
        let mut set = RingSet::new(4, 4);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        use rand::SeedableRng;
        let id = ParticipantId::new(&mut rng);
        let ring_no = set.ring_index(2.0);
        set.insert(member(id, 2.0)).unwrap();
        assert!(set.ring(ring_no).unwrap().members.iter().any(|m| m.id == id));
        set.erase(id, ring_no).unwrap();
        assert!(!set.ring(ring_no).unwrap().members.iter().any(|m| m.id == id));
    }

    #[test]
    fn secondary_overflow_evicts_fifo() {
        let mut set = RingSet::new(1, 2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        use rand::SeedableRng;
        let primary = ParticipantId::new(&mut rng);
        set.insert(member(primary, 2.0)).unwrap();
        let ring_no = set.ring_index(2.0);
        let a = ParticipantId::new(&mut rng);
        let b = ParticipantId::new(&mut rng);
        let c = ParticipantId::new(&mut rng);
        set.insert(member(a, 2.0)).unwrap();
        set.insert(member(b, 2.0)).unwrap();
        set.insert(member(c, 2.0)).unwrap();
        let ring = set.ring(ring_no).unwrap();
        assert_eq!(ring.secondary.len(), 2);
        assert!(!ring.secondary.iter().any(|m| m.id == a));
    }
}

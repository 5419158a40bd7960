//! Meridian overlay: concentric latency rings (spec §4.4) plus the
//! hypervolume-maximizing ring-management engine.

mod engine;
mod ring;

pub use engine::manage_ring;
pub use ring::{Membership, Ring, RingSet, MAX_RINGS};

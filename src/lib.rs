//! Discrete-event simulator for closest-fog-node discovery protocols over a
//! simulated mobile/edge network.
//!
//! `world::World` owns every participant and drives a virtual-time
//! `scheduler::Scheduler` loop; everything else in this crate is either
//! state (`node`, `client`, `gossip`) or a pure function of it (`latency`,
//! `vivaldi`, `meridian`, `selector`).

pub mod client;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gossip;
pub mod ids;
pub mod input;
pub mod latency;
pub mod meridian;
pub mod message;
pub mod metrics;
pub mod node;
pub mod rng;
pub mod scheduler;
pub mod selector;
pub mod vivaldi;
pub mod world;

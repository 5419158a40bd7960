//! Error taxonomy (spec §7).
//!
//! Fatal configuration errors abort before scheduling starts and are
//! surfaced to `main` as `anyhow::Error`. Everything else here is handled
//! by its caller: invariant violations in math kernels are logged and the
//! update is skipped; protocol-level anomalies are logged as warnings and
//! the operation is skipped, trusting the overlay to self-heal.

use thiserror::Error;

use crate::ids::ParticipantId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown area selection method {0:?}, expected one of center, random, all")]
    UnknownAreaSelection(String),
    #[error("unknown discovery protocol {0:?}")]
    UnknownProtocol(String),
    #[error("unknown scenario {0:?}, expected berlin or germany")]
    UnknownScenario(String),
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),
    #[error("map boundary is degenerate: x_min={x_min} x_max={x_max} y_min={y_min} y_max={y_max}")]
    DegenerateMap { x_min: f64, x_max: f64, y_min: f64, y_max: f64 },
    #[error("could not find a valid simulation area with at least {min_nodes} nodes after {attempts} attempts")]
    NoValidArea { min_nodes: usize, attempts: usize },
    #[error("failed to read input file {path}: {source}")]
    InputIo { path: String, source: std::io::Error },
    #[error("failed to parse input file {path}: {reason}")]
    InputParse { path: String, reason: String },
}

/// Invariant violation raised inside a Vivaldi coordinate update.
///
/// Raised and immediately caught by the caller (spec §7): the update is
/// skipped and the coordinate is left unchanged, except for the
/// out-of-bounds case which resets to the origin per spec §3.
#[derive(Debug, Error, PartialEq)]
pub enum VivaldiError {
    #[error("rtt {0} outside the valid window (0, 300] seconds")]
    InvalidRtt(f64),
    #[error("combined error estimate is zero")]
    ZeroCombinedError,
    #[error("non-finite input encountered")]
    NonFinite,
}

/// Invariant violation / protocol anomaly raised inside Meridian ring
/// management. These are logged as warnings and the operation is skipped;
/// the ring set self-heals on the next management cycle (spec §7).
#[derive(Debug, Error, PartialEq)]
pub enum RingError {
    #[error("ring number {0} outside the valid range [1, {1}]")]
    OutOfRange(u32, u32),
    #[error("primary ring {0} is frozen")]
    Frozen(u32),
    #[error("node {0} is not a member of ring {1}")]
    NotAMember(ParticipantId, u32),
    #[error("latency matrix for ring {0} contains non-finite entries")]
    NonFiniteMatrix(u32),
    #[error("latency matrix for ring {0} is sub-critical (needs > (k+1)^2 entries)")]
    SubCriticalMatrix(u32),
}

/// Protocol-level anomaly encountered while dispatching a message at a node
/// or client (spec §7 "Protocol-level anomalies"). Logged as a warning by
/// the caller; the message is dropped.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("received a meridian ping response for target {0} with no open request")]
    UnknownMeridianRequest(ParticipantId),
    #[error("no gossip entry for participant {0}")]
    MissingGossip(ParticipantId),
    #[error("gossip entry for {0} has a virtual position of the wrong kind for this protocol")]
    MismatchedGossipKind(ParticipantId),
}

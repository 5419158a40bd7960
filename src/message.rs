//! Messages (spec §3 "Message") and the gossip news piggy-backed on them.

use serde::{Deserialize, Serialize};

use crate::gossip::GossipNews;
use crate::ids::{MessageId, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Task = 1,
    DiscoveryRequest = 2,
    Probe = 3,
    MeridianPing = 4,
}

/// Protocol-specific payload. Most message kinds carry no extra data beyond
/// the envelope; discovery requests and responses carry the node being
/// discovered once one has been found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
    Empty,
    /// `requester` is the client the discovery is ultimately for — distinct
    /// from `send_id`/`rec_id` once a Meridian search forwards the request
    /// through intermediate nodes (spec §4.6 "Meridian"). `target` is the
    /// node identified once one has been found. `origin_opt_node` carries the
    /// ground-truth optimal node across node-to-node relay hops, since
    /// `Message::opt_node` is `None` on that traffic by invariant (spec §3);
    /// it is not itself subject to that invariant, only the per-message
    /// metrics field is.
    Discovery { requester: ParticipantId, target: Option<ParticipantId>, origin_opt_node: Option<ParticipantId> },
    MeridianPingRequest { target: ParticipantId },
    MeridianPingResponse { target: ParticipantId, measured_latency: f64 },
}

/// An immutable message once constructed (spec §3). `opt_node`/`opt_latency`
/// are the omniscient-baseline answer for this request, computed at
/// construction time and never consulted by any protocol — they exist only
/// so metrics can compare a protocol's actual choice against the optimum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub send_id: ParticipantId,
    pub rec_id: ParticipantId,
    pub send_timestamp: f64,
    pub body: MessageBody,
    pub kind: MessageKind,
    pub response: bool,
    pub prev_msg: Option<MessageId>,
    pub gossip: Vec<GossipNews>,
    pub latency: f64,
    pub opt_node: Option<ParticipantId>,
    pub opt_latency: Option<f64>,
    /// True latency from the requesting client to the node actually
    /// discovered by this response (distinct from `opt_latency`, the
    /// latency to the theoretical optimum). Populated on type-2 responses.
    pub discovered_latency: Option<f64>,
}

impl Message {
    /// Build the `(opt_node, opt_latency)` pair for a fresh discovery
    /// request: the lowest true client-to-node latency among nodes with a
    /// free slot. `None` iff the fleet is fully saturated.
    pub fn optimal_choice(
        candidates: impl Iterator<Item = (ParticipantId, f64)>,
    ) -> (Option<ParticipantId>, Option<f64>) {
        let best = candidates.min_by(|a, b| {
            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });
        match best {
            Some((id, lat)) => (Some(id), Some(lat)),
            None => (None, None),
        }
    }
}

//! The simulation arena: owns every participant and drives the scheduler
//! (spec §9 "Cyclic references" — an arena of participants indexed by
//! identifier; messages and gossip hold only identifiers, never live
//! references).

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::client::{MobileClient, OutstandingTask, StopCause};
use crate::config::{AreaSelection, Config, DiscoveryProtocol, Scenario};
use crate::error::ConfigError;
use crate::geometry::{nearest, Bounds, Position};
use crate::gossip::VirtualPosition;
use crate::ids::{MessageId, ParticipantId};
use crate::input::{slots_for, NodeSite, TripPlan};
use crate::latency;
use crate::meridian::manage_ring;
use crate::message::{Message, MessageBody, MessageKind};
use crate::metrics::{ClientSample, NodeSample, TimeSeriesRow};
use crate::node::FogNode;
use crate::rng::{entity_rng, world_rng};
use crate::scheduler::Scheduler;
use crate::selector;
use crate::vivaldi::VivaldiCoord;

const MONITOR_PERIOD: f64 = 1.0;
const RING_MANAGEMENT_PERIOD: f64 = 30.0;

pub enum Event {
    Deliver(Box<Message>),
    ClientMove(ParticipantId),
    ClientOut(ParticipantId),
    NodeProbe(ParticipantId),
    NodeMonitor(ParticipantId),
    NodeRingManagement(ParticipantId, u32),
    MeridianTimeout { node: ParticipantId, target: ParticipantId },
    Progress,
}

pub struct World {
    pub config: Config,
    pub bounds: Bounds,
    pub protocol: DiscoveryProtocol,
    pub run_seed: u64,

    pub nodes: HashMap<ParticipantId, FogNode>,
    pub clients: HashMap<ParticipantId, MobileClient>,
    node_positions: Vec<(ParticipantId, Position)>,

    scheduler: Scheduler<Event>,
    pub message_count: u64,
    pub client_samples: HashMap<ParticipantId, ClientSample>,
    pub node_samples: HashMap<ParticipantId, NodeSample>,
    pub time_series: Vec<TimeSeriesRow>,

    world_rng: StdRng,
    last_progress_second: i64,
    tick_discoveries: HashSet<ParticipantId>,
    cum_opt_hits: u64,
}

impl World {
    pub fn new(config: Config, node_sites: Vec<NodeSite>, trip_plans: Vec<TripPlan>, run_seed: u64) -> Result<Self, ConfigError> {
        let map_bounds = Bounds {
            x_min: config.map.x_min,
            x_max: config.map.x_max,
            y_min: config.map.y_min,
            y_max: config.map.y_max,
        };
        let protocol = config.simulation.discovery_protocol;
        let mut wrng = world_rng(run_seed);

        let mut nodes = HashMap::new();
        let mut node_positions = Vec::new();
        let min_nodes = config.nodes.min_nodes;
        let all_sites = match config.simulation.scenario {
            // Places one node per named major city instead of sampling the
            // cell-tower point data (spec SPEC_FULL §B.3).
            Scenario::Germany => germany_city_sites(&map_bounds),
            Scenario::Berlin => node_sites,
        };

        // Area selection (spec §6 `area_selection`): `all` simulates over
        // the full configured map rectangle verbatim; `center`/`random`
        // carve an `area × area` sub-rectangle (spec §6 `simulation.area`)
        // out of the map and re-roll its placement until it contains at
        // least `min_nodes` sites, mirroring the original's
        // `generate_boundaries` + re-roll loop. The `germany` scenario's
        // fixed city sites are never filtered by this boundary (the
        // original places them unconditionally of the sampled area).
        const MAX_AREA_ATTEMPTS: usize = 1000;
        let (bounds, mut sites, attempts) = match config.simulation.scenario {
            Scenario::Germany => (map_bounds, all_sites, 1),
            Scenario::Berlin => match config.simulation.area_selection {
                AreaSelection::All => {
                    let filtered: Vec<_> = all_sites.iter().filter(|s| s.position.in_bounds(&map_bounds)).cloned().collect();
                    (map_bounds, filtered, 1)
                }
                AreaSelection::Center | AreaSelection::Random => {
                    let side = config.simulation.area;
                    let mut attempts = 0;
                    loop {
                        attempts += 1;
                        let sub_bounds = area_sub_rectangle(&map_bounds, side, config.simulation.area_selection, &mut wrng);
                        let filtered: Vec<_> = all_sites.iter().filter(|s| s.position.in_bounds(&sub_bounds)).cloned().collect();
                        if filtered.len() >= min_nodes || attempts >= MAX_AREA_ATTEMPTS {
                            break (sub_bounds, filtered, attempts);
                        }
                    }
                }
            },
        };
        if sites.len() < min_nodes {
            return Err(ConfigError::NoValidArea { min_nodes, attempts });
        }
        if let Some(max_nodes) = config.nodes.max_nodes {
            sites.truncate(max_nodes.min(sites.len()));
        }

        let meridian_capacities = meridian_ring_capacities(sites.len(), &config.nodes);
        for site in &sites {
            let id = ParticipantId::new(&mut wrng);
            let slots = slots_for(site.antennas, config.nodes.slot_scaler, config.nodes.unlimited_bandwidth);
            let rng = entity_rng(run_seed, id);
            let node = FogNode::new(
                id,
                site.position,
                site.position,
                slots,
                config.nodes.hardware_tier,
                config.nodes.unlimited_bandwidth,
                protocol,
                meridian_capacities,
                rng,
            );
            node_positions.push((id, node.position));
            nodes.insert(id, node);
        }

        let mut clients = HashMap::new();
        let mut plans = trip_plans;
        if matches!(config.simulation.scenario, Scenario::Berlin) {
            // Candidate plans are filtered to those starting inside the
            // simulation rectangle before sampling (spec SPEC_FULL §B.4).
            plans.retain(|p| p.legs.first().map(|l| l.position.in_bounds(&bounds)).unwrap_or(false));
        }
        // `client_ratio` bounds the fleet to `total_slots * ratio` (spec §6
        // "slots×ratio upper bound"), on top of any explicit `max_clients`.
        let total_slots: usize = nodes.values().map(|n| n.slots).fold(0usize, |acc, s| acc.saturating_add(s));
        let ratio_cap = (total_slots as f64 * config.clients.client_ratio).floor().max(0.0) as usize;
        let cap = match config.clients.max_clients {
            Some(max_clients) => max_clients.min(ratio_cap),
            None => ratio_cap,
        };
        plans.truncate(cap);
        for plan in plans {
            let id = ParticipantId::new(&mut wrng);
            let rng = entity_rng(run_seed, id);
            let track_vivaldi = matches!(protocol, DiscoveryProtocol::Vivaldi);
            if let Some(client) = MobileClient::new(
                id,
                plan.legs,
                0.0,
                config.clients.latency_threshold,
                config.clients.roundtrip_threshold,
                config.clients.timeout_threshold,
                track_vivaldi,
                rng,
            ) {
                clients.insert(id, client);
            }
        }

        let mut world = Self {
            config,
            bounds,
            protocol,
            run_seed,
            nodes,
            clients,
            node_positions,
            scheduler: Scheduler::new(),
            message_count: 0,
            client_samples: HashMap::new(),
            node_samples: HashMap::new(),
            time_series: Vec::new(),
            world_rng: wrng,
            last_progress_second: -1,
            tick_discoveries: HashSet::new(),
            cum_opt_hits: 0,
        };
        world.seed_initial_events();
        Ok(world)
    }

    fn seed_initial_events(&mut self) {
        for id in self.sorted_node_ids() {
            self.scheduler.schedule_in(0.0, Event::NodeProbe(id));
            self.scheduler.schedule_in(MONITOR_PERIOD, Event::NodeMonitor(id));
            if matches!(self.protocol, DiscoveryProtocol::Meridian) {
                let offset = self.world_rng.gen_range(0.0..RING_MANAGEMENT_PERIOD);
                for ring in 1..=crate::meridian::MAX_RINGS {
                    self.scheduler.schedule_in(offset, Event::NodeRingManagement(id, ring));
                }
            }
            self.node_samples.insert(id, NodeSample { id: Some(id), ..Default::default() });
        }
        for id in self.sorted_client_ids() {
            self.scheduler.schedule_in(0.0, Event::ClientMove(id));
            self.scheduler.schedule_in(0.1, Event::ClientOut(id));
            self.client_samples.insert(id, ClientSample { id: Some(id), ..Default::default() });
        }
        self.scheduler.schedule_in(1.0, Event::Progress);
    }

    /// Node ids in a fixed, seed-independent order, so any scheduling or
    /// selection that iterates them stays deterministic across runs (spec
    /// §4.1 "Ordering contract") rather than following `HashMap`'s per-
    /// process iteration order.
    fn sorted_node_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    fn sorted_client_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Distance between two participants for the latency model (spec
    /// §4.2): client-node hops route through each side's nearest tower;
    /// node-node hops use the direct geodesic.
    fn distance_between(&self, a: ParticipantId, b: ParticipantId) -> f64 {
        let pos_a = self.position_of(a);
        let pos_b = self.position_of(b);
        let tower_a = self.nearest_tower(pos_a);
        let tower_b = self.nearest_tower(pos_b);
        if self.nodes.contains_key(&a) && self.nodes.contains_key(&b) {
            pos_a.distance(&pos_b)
        } else {
            pos_a.distance(&tower_a) + tower_a.distance(&tower_b) + tower_b.distance(&pos_b)
        }
    }

    fn position_of(&self, id: ParticipantId) -> Position {
        if let Some(node) = self.nodes.get(&id) {
            node.position
        } else if let Some(client) = self.clients.get(&id) {
            client.position
        } else {
            Position::ORIGIN
        }
    }

    fn nearest_tower(&self, from: Position) -> Position {
        nearest(&from, &self.node_positions, |(_, p)| *p).map(|(_, p)| *p).unwrap_or(from)
    }

    /// True instantaneous latency between two participants, including the
    /// slower party's load-derived bandwidth (spec §4.2).
    pub fn true_latency(&self, a: ParticipantId, b: ParticipantId) -> f64 {
        let distance = self.distance_between(a, b);
        let node_side = self.nodes.get(&a).or_else(|| self.nodes.get(&b));
        let (bandwidth, tier) = match node_side {
            Some(node) => (latency::bandwidth(node.clients.len(), node.slots, node.unlimited_bandwidth), node.hardware_tier),
            None => (1.0, 1),
        };
        latency::link_latency(distance, bandwidth, tier)
    }

    fn fresh_message(
        &mut self,
        send_id: ParticipantId,
        rec_id: ParticipantId,
        body: MessageBody,
        kind: MessageKind,
        response: bool,
        prev_msg: Option<MessageId>,
        opt: (Option<ParticipantId>, Option<f64>),
    ) -> Message {
        let now = self.scheduler.now();
        let latency = self.true_latency(send_id, rec_id);
        let id = MessageId::new(&mut self.world_rng);
        let gossip = self.gossip_snapshot(send_id, now);
        Message {
            id,
            send_id,
            rec_id,
            send_timestamp: now,
            body,
            kind,
            response,
            prev_msg,
            gossip,
            latency,
            opt_node: opt.0,
            opt_latency: opt.1,
            discovered_latency: None,
        }
    }

    /// Ground truth for a fresh client-originated request (spec §3 "Derived
    /// on construction"): the lowest true latency from `client_id` among
    /// nodes with a free slot. Never consulted by a protocol, only by
    /// metrics.
    fn opt_choice_for(&self, client_id: ParticipantId) -> (Option<ParticipantId>, Option<f64>) {
        let candidates: Vec<(ParticipantId, f64)> =
            self.nodes.iter().filter(|(_, n)| n.has_free_slot()).map(|(id, _)| (*id, self.true_latency(client_id, *id))).collect();
        Message::optimal_choice(candidates.into_iter())
    }

    /// Ground truth for a response (spec §3 "For responses, derived from
    /// `prev_msg.opt_node`"): carries the originating request's optimal node
    /// forward, recomputing the latency against the current recipient.
    fn discovery_opt(&self, prev_opt_node: Option<ParticipantId>, now_rec_id: ParticipantId) -> (Option<ParticipantId>, Option<f64>) {
        match prev_opt_node {
            Some(node_id) => (Some(node_id), Some(self.true_latency(node_id, now_rec_id))),
            None => (None, None),
        }
    }

    fn gossip_snapshot(&self, from: ParticipantId, now: f64) -> Vec<crate::gossip::GossipNews> {
        if let Some(node) = self.nodes.get(&from) {
            let mut news: Vec<_> = node.gossip.values().cloned().collect();
            news.push(node.self_news(now));
            news
        } else {
            Vec::new()
        }
    }

    /// Schedules delivery of `message` after its computed latency, per
    /// spec §4.1 `send_message`.
    fn send_message(&mut self, message: Message) {
        self.message_count += 1;
        let delay = message.latency;
        self.scheduler.schedule_in(delay, Event::Deliver(Box::new(message)));
    }

    pub fn run(&mut self) {
        let runtime = self.config.simulation.runtime;
        while let Some((now, event)) = self.scheduler.pop() {
            if now > runtime {
                break;
            }
            self.handle_event(now, event);
        }
    }

    fn handle_event(&mut self, now: f64, event: Event) {
        match event {
            Event::Deliver(message) => self.deliver(now, *message),
            Event::ClientMove(id) => self.client_move(now, id),
            Event::ClientOut(id) => self.client_out(now, id),
            Event::NodeProbe(id) => self.node_probe(now, id),
            Event::NodeMonitor(id) => self.node_monitor(now, id),
            Event::NodeRingManagement(id, ring) => self.node_ring_management(now, id, ring),
            Event::MeridianTimeout { node, target } => self.meridian_timeout(now, node, target),
            Event::Progress => self.progress(now),
        }
    }

    fn progress(&mut self, now: f64) {
        let second = now.floor() as i64;
        if second != self.last_progress_second {
            self.last_progress_second = second;
            info!(runtime = self.config.simulation.runtime, t = second, messages = self.message_count, "progress");
            self.time_series.push(TimeSeriesRow {
                timestamp: second as f64,
                unique_discoveries: self.tick_discoveries.len() as u64,
                opt_choice: self.cum_opt_hits,
                total_messages: self.message_count,
            });
            self.tick_discoveries.clear();
        }
        if now < self.config.simulation.runtime {
            self.scheduler.schedule_in(1.0, Event::Progress);
        }
    }

    fn client_move(&mut self, now: f64, id: ParticipantId) {
        let stop = {
            let Some(client) = self.clients.get_mut(&id) else { return };
            client.advance(now, &self.bounds)
        };
        if let Some(cause) = stop {
            if let Some(sample) = self.client_samples.get_mut(&id) {
                sample.active_time = now - self.clients.get(&id).map(|c| c.start_time).unwrap_or(0.0);
            }
            let out_of_bounds = matches!(cause, StopCause::OutOfBounds);
            debug!(client = %id, out_of_bounds, "client stopped");
            return;
        }
        self.scheduler.schedule_in(MONITOR_PERIOD, Event::ClientMove(id));
    }

    fn client_out(&mut self, now: f64, id: ParticipantId) {
        let attached_node = match self.clients.get(&id) {
            Some(client) if !client.is_stopped() => client.attached_node,
            _ => return,
        };
        let current_latency = attached_node.map(|node_id| self.true_latency(id, node_id));
        let (period, send_to) = {
            let Some(client) = self.clients.get_mut(&id) else { return };
            let needs_reconnect = client.needs_reconnect(now, current_latency);
            let target = if needs_reconnect { None } else { attached_node };
            (client.next_task_period(), target)
        };

        match send_to {
            None => self.start_discovery(now, id),
            Some(node_id) => self.send_task(now, id, node_id),
        }
        self.scheduler.schedule_in(period, Event::ClientOut(id));
    }

    fn send_task(&mut self, now: f64, client_id: ParticipantId, node_id: ParticipantId) {
        let opt = self.opt_choice_for(client_id);
        let message = self.fresh_message(client_id, node_id, MessageBody::Empty, MessageKind::Task, false, None, opt);
        let msg_id = message.id;
        let (latency, opt_latency) = (message.latency, message.opt_latency);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_task = Some(OutstandingTask { id: msg_id, send_ts: now, response_ts: None, latency, opt_latency });
            client.out_history.push(msg_id);
        }
        if let Some(sample) = self.client_samples.get_mut(&client_id) {
            sample.out_msgs += 1;
            sample.pending_tasks.insert(msg_id);
        }
        self.send_message(message);
    }

    /// Picks where the client sends its type-2 re-probe (spec §4.7: "its
    /// current node, or a random node if none") — independent of discovery
    /// protocol, which only governs who the *receiving* node identifies as
    /// closest (spec §4.6).
    fn start_discovery(&mut self, _now: f64, client_id: ParticipantId) {
        let attached = self.clients.get(&client_id).and_then(|c| c.attached_node);
        let target_node = match attached {
            Some(node_id) if self.nodes.contains_key(&node_id) => Some(node_id),
            _ => {
                let ids = self.sorted_node_ids();
                selector::random_select(&ids, &mut self.world_rng)
            }
        };
        let Some(node_id) = target_node else { return };
        let opt = self.opt_choice_for(client_id);
        let message = self.fresh_message(
            client_id,
            node_id,
            MessageBody::Discovery { requester: client_id, target: None, origin_opt_node: opt.0 },
            MessageKind::DiscoveryRequest,
            false,
            None,
            opt,
        );
        let msg_id = message.id;
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.out_history.push(msg_id);
        }
        if let Some(sample) = self.client_samples.get_mut(&client_id) {
            sample.out_msgs += 1;
            sample.reconnections += 1;
        }
        self.send_message(message);
    }

    fn node_probe(&mut self, now: f64, id: ParticipantId) {
        let peers = self.node_positions.iter().filter(|(p, _)| *p != id).cloned().collect::<Vec<_>>();
        let target = {
            let Some(node) = self.nodes.get_mut(&id) else { return };
            node.pick_probe_target(&peers)
        };
        if let Some(target) = target {
            let message = self.fresh_message(id, target, MessageBody::Empty, MessageKind::Probe, false, None, (None, None));
            let msg_id = message.id;
            let send_ts = message.send_timestamp;
            if let Some(node) = self.nodes.get_mut(&id) {
                node.pending_probes.insert(msg_id, (target, send_ts));
                node.out_history.push(msg_id);
            }
            self.send_message(message);
        }
        let period = {
            let Some(node) = self.nodes.get_mut(&id) else { return };
            node.next_probe_period(now)
        };
        self.scheduler.schedule_in(period, Event::NodeProbe(id));
    }

    fn node_monitor(&mut self, now: f64, id: ParticipantId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.monitor_tick(now);
            if let (Some(sample), Some(&(_, workload, _))) = (self.node_samples.get_mut(&id), node.workload_log.last()) {
                sample.workload_log.push((now, workload, node.workload_log.last().map(|(_, _, l)| *l).unwrap_or(0.0)));
                sample.bandwidth_log.push(latency::bandwidth(node.clients.len(), node.slots, node.unlimited_bandwidth));
            }
        }
        self.scheduler.schedule_in(MONITOR_PERIOD, Event::NodeMonitor(id));
    }

    fn node_ring_management(&mut self, _now: f64, id: ParticipantId, ring: u32) {
        let self_coords: Vec<(ParticipantId, f64)> =
            self.nodes.keys().filter(|&&other| other != id).map(|&other| (other, self.true_latency(id, other))).collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(ring_set) = &mut node.ring_set {
                if let Err(e) = manage_ring(id, &self_coords, ring_set, ring) {
                    warn!(node = %id, ring, error = %e, "ring management skipped");
                }
            }
        }
        self.scheduler.schedule_in(RING_MANAGEMENT_PERIOD, Event::NodeRingManagement(id, ring));
    }

    fn meridian_timeout(&mut self, now: f64, node_id: ParticipantId, target: ParticipantId) {
        let (requester, responses, opt_node) = {
            let Some(node) = self.nodes.get_mut(&node_id) else { return };
            match node.meridian_searches.remove(&target) {
                Some(search) => (search.requester, search.responses, search.opt_node),
                None => return,
            }
        };
        match selector::meridian_best_hop(&responses) {
            Some(next_hop) if next_hop != node_id => {
                let message = self.fresh_message(
                    node_id,
                    next_hop,
                    MessageBody::Discovery { requester, target: None, origin_opt_node: opt_node },
                    MessageKind::DiscoveryRequest,
                    false,
                    None,
                    (None, None),
                );
                self.send_message(message);
            }
            _ => {
                self.reply_discovery(now, requester, node_id, node_id, opt_node);
            }
        }
    }

    fn reply_discovery(
        &mut self,
        _now: f64,
        requester: ParticipantId,
        responding_node: ParticipantId,
        discovered: ParticipantId,
        prev_opt_node: Option<ParticipantId>,
    ) {
        let discovered_latency = self.true_latency(requester, discovered);
        let opt = self.discovery_opt(prev_opt_node, requester);
        let mut message = self.fresh_message(
            responding_node,
            requester,
            MessageBody::Discovery { requester, target: Some(discovered), origin_opt_node: None },
            MessageKind::DiscoveryRequest,
            true,
            None,
            opt,
        );
        message.discovered_latency = Some(discovered_latency);
        self.send_message(message);
    }

    fn deliver(&mut self, now: f64, mut message: Message) {
        if let Some(sample) = self.client_samples.get_mut(&message.send_id) {
            sample.latencies.push(message.latency);
        }
        let gossip = std::mem::take(&mut message.gossip);
        if let Some(node) = self.nodes.get_mut(&message.rec_id) {
            node.merge_gossip(gossip);
        }
        match message.kind {
            MessageKind::Task => self.dispatch_task(now, message),
            MessageKind::DiscoveryRequest => self.dispatch_discovery(now, message),
            MessageKind::Probe => self.dispatch_probe(now, message),
            MessageKind::MeridianPing => self.dispatch_meridian_ping(now, message),
        }
    }

    fn dispatch_task(&mut self, now: f64, message: Message) {
        if message.response {
            let mut matched_task: Option<OutstandingTask> = None;
            if let Some(client) = self.clients.get_mut(&message.rec_id) {
                if let Some(task) = &mut client.last_task {
                    if Some(task.id) == message.prev_msg {
                        task.response_ts = Some(now);
                        matched_task = Some(*task);
                    }
                }
                client.in_history.push(message.id);
                client.attached_node = Some(message.send_id);
            }
            // Client-side Vivaldi update from this round-trip measurement
            // (spec §4.7 last paragraph).
            if let Some(peer) = self.nodes.get(&message.send_id).and_then(|n| n.vivaldi.as_ref()).map(|v| (v.coord, v.error)) {
                if let Some(client) = self.clients.get_mut(&message.rec_id) {
                    client.update_vivaldi(message.latency, peer.0, peer.1);
                }
            }
            if let Some(sample) = self.client_samples.get_mut(&message.rec_id) {
                sample.in_msgs += 1;
                if let Some(prev) = message.prev_msg {
                    sample.pending_tasks.remove(&prev);
                }
                if let Some(task) = matched_task {
                    if let Some(opt_latency_in) = message.opt_latency {
                        sample.opt_total += 1;
                        if message.opt_node == Some(message.send_id) {
                            sample.opt_hits += 1;
                            self.cum_opt_hits += 1;
                        }
                        if let Some(opt_latency_out) = task.opt_latency {
                            let y_true = (task.latency + message.latency) * 1000.0;
                            let y_opt = (opt_latency_out + opt_latency_in) * 1000.0;
                            sample.rtt_errors.push(y_true - y_opt);
                        }
                    }
                }
            }
            return;
        }
        let accepted = {
            let Some(node) = self.nodes.get_mut(&message.rec_id) else { return };
            let ok = node.handle_task(message.send_id, now);
            node.in_history.push(message.id);
            ok
        };
        if let Some(sample) = self.node_samples.get_mut(&message.rec_id) {
            sample.in_msgs += 1;
        }
        if accepted {
            let opt = self.discovery_opt(message.opt_node, message.send_id);
            let reply =
                self.fresh_message(message.rec_id, message.send_id, MessageBody::Empty, MessageKind::Task, true, Some(message.id), opt);
            self.send_message(reply);
        }
    }

    fn dispatch_discovery(&mut self, now: f64, message: Message) {
        if message.response {
            let discovered = match &message.body {
                MessageBody::Discovery { target: Some(id), .. } => Some(*id),
                _ => None,
            };
            if let Some(discovered) = discovered {
                self.tick_discoveries.insert(discovered);
            }
            if let (Some(sample), Some(discovered)) = (self.client_samples.get_mut(&message.rec_id), discovered) {
                sample.in_msgs += 1;
                sample.discovery_total += 1;
                if let (Some(dl), Some(ol)) = (message.discovered_latency, message.opt_latency) {
                    sample.discovery_errors.push((dl - ol) * 1000.0);
                }
                if message.opt_node == Some(discovered) {
                    sample.discovery_optimal += 1;
                }
            }
            if let Some(client) = self.clients.get_mut(&message.rec_id) {
                if let MessageBody::Discovery { target: Some(node_id), .. } = message.body {
                    client.attached_node = Some(node_id);
                }
            }
            return;
        }

        let (requester, origin_opt_node) = match message.body {
            MessageBody::Discovery { requester, origin_opt_node, .. } => (requester, origin_opt_node),
            _ => (message.send_id, None),
        };
        let responding_node = message.rec_id;
        match self.protocol {
            DiscoveryProtocol::Baseline => {
                let candidates: Vec<(ParticipantId, bool, f64)> = self
                    .nodes
                    .iter()
                    .map(|(id, n)| (*id, n.has_free_slot(), self.true_latency(requester, *id)))
                    .collect();
                let chosen = selector::baseline_select(candidates.into_iter());
                if let Some(chosen) = chosen {
                    self.reply_discovery(now, requester, responding_node, chosen, origin_opt_node);
                }
            }
            DiscoveryProtocol::Random => {
                let ids = self.sorted_node_ids();
                if let Some(chosen) = selector::random_select(&ids, &mut self.world_rng) {
                    self.reply_discovery(now, requester, responding_node, chosen, origin_opt_node);
                }
            }
            DiscoveryProtocol::Vivaldi => {
                let coord = self.clients.get(&requester).and_then(|c| c.vivaldi.as_ref()).map(|v| v.coord).unwrap_or(VivaldiCoord::ORIGIN);
                let gossip = self.nodes.get(&responding_node).map(|n| n.gossip.clone()).unwrap_or_default();
                let chosen = selector::vivaldi_select(&coord, &gossip).unwrap_or(responding_node);
                self.reply_discovery(now, requester, responding_node, chosen, origin_opt_node);
            }
            DiscoveryProtocol::Meridian => {
                self.meridian_begin_hop(now, requester, responding_node, requester, origin_opt_node);
            }
        }
    }

    fn meridian_begin_hop(
        &mut self,
        now: f64,
        requester: ParticipantId,
        at_node: ParticipantId,
        target: ParticipantId,
        opt_node: Option<ParticipantId>,
    ) {
        let has_ring_set = self.nodes.get(&at_node).map(|n| n.ring_set.is_some()).unwrap_or(false);
        if !has_ring_set {
            self.reply_discovery(now, requester, at_node, at_node, opt_node);
            return;
        }
        let latency_to_target = self.true_latency(at_node, target);
        let ring_number = match self.nodes.get(&at_node).and_then(|n| n.ring_set.as_ref()) {
            Some(ring_set) => ring_set.ring_index(latency_to_target),
            None => return,
        };
        let peers = match self.nodes.get(&at_node).and_then(|n| n.ring_set.as_ref()) {
            Some(ring_set) => selector::meridian_ring_and_peers(ring_set, ring_number),
            None => Vec::new(),
        };
        if peers.is_empty() {
            self.reply_discovery(now, requester, at_node, at_node, opt_node);
            return;
        }
        if let Some(node) = self.nodes.get_mut(&at_node) {
            node.meridian_searches.insert(
                target,
                crate::node::MeridianSearch { requester, target, responses: Vec::new(), opened_at: now, opt_node },
            );
        }
        for peer in &peers {
            let message = self.fresh_message(
                at_node,
                *peer,
                MessageBody::MeridianPingRequest { target },
                MessageKind::MeridianPing,
                false,
                None,
                (None, None),
            );
            self.send_message(message);
        }
        let window = selector::meridian_collection_window(self.true_latency(at_node, target));
        self.scheduler.schedule_in(window, Event::MeridianTimeout { node: at_node, target });
    }

    fn dispatch_probe(&mut self, now: f64, message: Message) {
        if message.response {
            let peer = message.send_id;
            let (target, rtt) = {
                let Some(node) = self.nodes.get_mut(&message.rec_id) else { return };
                match message.prev_msg.and_then(|id| node.pending_probes.remove(&id)) {
                    Some((target, send_ts)) if target == peer => (Some(target), now - send_ts),
                    _ => (None, 0.0),
                }
            };
            if let Some(target) = target {
                let peer_coord = self.nodes.get(&peer).and_then(|n| n.vivaldi.as_ref()).map(|v| (v.coord, v.error));
                if let Some(node) = self.nodes.get_mut(&message.rec_id) {
                    if let Some((coord, error)) = peer_coord {
                        node.handle_probe_response(peer, rtt, Some(coord), error);
                    }
                }
                // This probe may have been fired on behalf of a Meridian ping
                // request (spec §4.6 "Meridian"); if so, report the measured
                // latency back to whoever asked us to ping `target`.
                let open_ping = self.nodes.get_mut(&message.rec_id).and_then(|n| n.open_pings.remove(&target));
                if let Some(open_ping) = open_ping {
                    let response = self.fresh_message(
                        message.rec_id,
                        open_ping.requester,
                        MessageBody::MeridianPingResponse { target, measured_latency: rtt },
                        MessageKind::MeridianPing,
                        true,
                        message.prev_msg,
                        (None, None),
                    );
                    self.send_message(response);
                }
            }
            return;
        }
        let reply = self.fresh_message(
            message.rec_id,
            message.send_id,
            MessageBody::Empty,
            MessageKind::Probe,
            true,
            Some(message.id),
            (None, None),
        );
        self.send_message(reply);
    }

    fn dispatch_meridian_ping(&mut self, now: f64, message: Message) {
        match message.body {
            MessageBody::MeridianPingRequest { target } => {
                let accepted = {
                    let Some(node) = self.nodes.get_mut(&message.rec_id) else { return };
                    node.handle_meridian_ping_request(message.send_id, target)
                };
                if accepted {
                    let probe = self.fresh_message(
                        message.rec_id,
                        target,
                        MessageBody::Empty,
                        MessageKind::Probe,
                        false,
                        None,
                        (None, None),
                    );
                    let probe_id = probe.id;
                    let send_ts = probe.send_timestamp;
                    if let Some(node) = self.nodes.get_mut(&message.rec_id) {
                        node.pending_probes.insert(probe_id, (target, send_ts));
                    }
                    self.send_message(probe);
                }
            }
            MessageBody::MeridianPingResponse { target, measured_latency } => {
                if let Some(node) = self.nodes.get_mut(&message.rec_id) {
                    if let Err(e) = node.handle_meridian_ping_response(target, message.send_id, measured_latency) {
                        warn!(node = %message.rec_id, error = %e, "meridian ping response without open search");
                    }
                }
            }
            _ => {}
        }
    }

    pub fn warmup_secs(&self) -> f64 {
        self.config.simulation.warmup_secs
    }
}

/// Normalized `(x_fraction, y_fraction)` of the map rectangle for ten major
/// German cities, used by `scenario: germany` in place of the cell-tower
/// point dataset (spec SPEC_FULL §B.3).
const GERMAN_CITY_FRACTIONS: [(&str, f64, f64); 10] = [
    ("Berlin", 0.82, 0.62),
    ("Hamburg", 0.55, 0.85),
    ("Munich", 0.62, 0.12),
    ("Cologne", 0.22, 0.55),
    ("Frankfurt", 0.40, 0.48),
    ("Stuttgart", 0.38, 0.28),
    ("Dusseldorf", 0.20, 0.62),
    ("Leipzig", 0.68, 0.55),
    ("Dortmund", 0.22, 0.65),
    ("Essen", 0.18, 0.68),
];

const GERMAN_CITY_ANTENNAS: u32 = 4;

fn germany_city_sites(bounds: &Bounds) -> Vec<NodeSite> {
    GERMAN_CITY_FRACTIONS
        .iter()
        .map(|(_, fx, fy)| NodeSite {
            position: Position::new(bounds.x_min + fx * bounds.width(), bounds.y_min + fy * bounds.height()),
            antennas: GERMAN_CITY_ANTENNAS,
        })
        .collect()
}

/// Meridian primary/secondary ring capacity (spec §3): `k = ceil(log_1.6(N))`,
/// `l` defaults to `N - k`; both config-overridable.
fn meridian_ring_capacities(n: usize, nodes_cfg: &crate::config::NodesConfig) -> (usize, usize) {
    let k = nodes_cfg.meridian_primary_capacity.unwrap_or_else(|| {
        if n <= 1 {
            1
        } else {
            (((n as f64).ln() / 1.6f64.ln()).ceil() as usize).max(1)
        }
    });
    let l = nodes_cfg.meridian_secondary_capacity.unwrap_or_else(|| n.saturating_sub(k));
    (k, l)
}

/// Carves an `x_trans × y_trans` sub-rectangle out of `map_bounds`, per the
/// original's `generate_boundaries`: `random` drops its lower corner
/// uniformly anywhere in the map, `center` centers it on the map's
/// midpoint. Neither clamps the upper corner back into the map — a
/// sufficiently large `area` relative to the map simply yields a
/// rectangle that extends past it, same as the source.
fn area_sub_rectangle(map_bounds: &Bounds, side: f64, method: AreaSelection, rng: &mut impl Rng) -> Bounds {
    let (x_lower, y_lower) = match method {
        AreaSelection::Random => (rng.gen_range(map_bounds.x_min..map_bounds.x_max), rng.gen_range(map_bounds.y_min..map_bounds.y_max)),
        AreaSelection::Center | AreaSelection::All => {
            ((map_bounds.x_min + map_bounds.x_max) / 2.0 - side / 2.0, (map_bounds.y_min + map_bounds.y_max) / 2.0 - side / 2.0)
        }
    };
    Bounds { x_min: x_lower, x_max: x_lower + side, y_min: y_lower, y_max: y_lower + side }
}

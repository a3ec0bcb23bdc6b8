//! Deterministic simulation runner.
//!
//! Plays every external role around the node state machines: the network
//! (with latency, loss, and partitions), the epoch store, the crypto
//! workers, the availability layer, and the output module that feeds
//! ordered blocks back as next-epoch topologies. Given the same seed and
//! schedule of fault injections, a run is bit-for-bit reproducible.

use crate::event_queue::EventKey;
use crate::metrics::SimulationMetrics;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::storage::SimEpochStore;
use crate::NodeIndex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sequent_bft::{BftConfig, RecoveredState};
use sequent_core::{Action, Event, OutboundMessage, StateMachine, TimerId};
use sequent_messages::{
    parse_pbft, parse_transfer_request, parse_transfer_response, serialize_pbft,
    serialize_transfer_request, serialize_transfer_response,
};
use sequent_node::NodeStateMachine;
use sequent_sync::SyncConfig;
use sequent_types::test_utils::{test_key, test_peer, test_topology};
use sequent_types::{
    Commit, EpochNumber, Hash, KeyPair, Membership, OrderedBlockForOutput, OrderingPayload,
    OrderingTopology, PbftMessage, PeerId, RequestId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Configuration of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of nodes; all of them form every epoch's topology.
    pub num_nodes: usize,
    /// Network behavior.
    pub network: NetworkConfig,
    /// Consensus tunables given to every node.
    pub bft: BftConfig,
    /// Transfer tunables given to every node.
    pub sync: SyncConfig,
    /// Latency of the simulated availability layer.
    pub proposal_delay: Duration,
    /// Seed for every random decision in the run.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            network: NetworkConfig::default(),
            bft: BftConfig {
                epoch_length: 2,
                view_change_timeout: Duration::from_millis(500),
                ..BftConfig::default()
            },
            sync: SyncConfig {
                retry_interval: Duration::from_millis(400),
            },
            proposal_delay: Duration::from_millis(5),
            seed: 42,
        }
    }
}

/// Counters collected during a run.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Events processed across all nodes.
    pub events_processed: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped by partition, loss, or muting.
    pub messages_dropped: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
    /// Non-compliance reports.
    pub non_compliance: u64,
}

/// One simulated node with its collaborators' state.
pub struct NodeHarness {
    me: PeerId,
    key: KeyPair,
    machine: NodeStateMachine,
    storage: SimEpochStore,
    /// Everything emitted to the output sink, in emission order.
    ordered: Vec<OrderedBlockForOutput>,
    /// Epochs whose topology the node's output module already announced.
    announced: BTreeSet<EpochNumber>,
    /// Admin probe replies.
    admin_responses: Vec<(RequestId, EpochNumber, Vec<PeerId>)>,
    halted: bool,
}

impl NodeHarness {
    /// The node's state machine.
    pub fn machine(&self) -> &NodeStateMachine {
        &self.machine
    }

    /// The node's epoch store.
    pub fn storage(&self) -> &SimEpochStore {
        &self.storage
    }

    /// Blocks handed to the output sink, in order.
    pub fn ordered(&self) -> &[OrderedBlockForOutput] {
        &self.ordered
    }

    /// Replies to admin topology probes.
    pub fn admin_responses(&self) -> &[(RequestId, EpochNumber, Vec<PeerId>)] {
        &self.admin_responses
    }

    /// Whether the node halted.
    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

/// Deterministic multi-node simulation.
pub struct SimulationRunner {
    config: SimulationConfig,
    topology: Arc<OrderingTopology>,
    peer_index: BTreeMap<PeerId, NodeIndex>,
    nodes: Vec<NodeHarness>,
    queue: BTreeMap<EventKey, Event>,
    sequence: u64,
    now: Duration,
    network: SimulatedNetwork,
    rng: ChaCha8Rng,
    timers: HashMap<(NodeIndex, TimerId), EventKey>,
    /// Nodes whose outbound traffic is dropped (crash-silent peers).
    muted: HashSet<NodeIndex>,
    /// Nodes whose commits are replaced with a mismatching digest.
    commit_corruptors: HashSet<NodeIndex>,
    metrics: SimulationMetrics,
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Build the nodes and schedule their start events.
    pub fn new(config: SimulationConfig) -> Self {
        let topology = test_topology(config.num_nodes, Duration::ZERO);
        let peer_index: BTreeMap<PeerId, NodeIndex> = (0..config.num_nodes)
            .map(|i| (test_peer(i), i as NodeIndex))
            .collect();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let network = SimulatedNetwork::new(config.network.clone());

        let nodes = (0..config.num_nodes)
            .map(|i| {
                let me = test_peer(i);
                let key = test_key(i);
                NodeHarness {
                    me: me.clone(),
                    key: key.clone(),
                    machine: NodeStateMachine::new(
                        me,
                        key,
                        topology.clone(),
                        config.bft.clone(),
                        config.sync.clone(),
                        RecoveredState::default(),
                    ),
                    storage: SimEpochStore::default(),
                    ordered: Vec::new(),
                    announced: BTreeSet::new(),
                    admin_responses: Vec::new(),
                    halted: false,
                }
            })
            .collect();

        let mut runner = Self {
            config,
            topology,
            peer_index,
            nodes,
            queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network,
            rng,
            timers: HashMap::new(),
            muted: HashSet::new(),
            commit_corruptors: HashSet::new(),
            metrics: SimulationMetrics::new(),
            stats: SimulationStats::default(),
        };
        for node in 0..runner.nodes.len() as NodeIndex {
            runner.schedule(node, Duration::ZERO, Event::Start);
        }
        runner
    }

    // ─── Accessors ───

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Run metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// One node's harness.
    pub fn node(&self, node: NodeIndex) -> &NodeHarness {
        &self.nodes[node as usize]
    }

    /// The network, for partition control.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    /// The topology shared by every epoch of the run.
    pub fn topology(&self) -> Arc<OrderingTopology> {
        self.topology.clone()
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    // ─── Fault injection ───

    /// Drop all outbound traffic from `node` (a crash-silent peer).
    pub fn mute(&mut self, node: NodeIndex) {
        self.muted.insert(node);
    }

    /// Replace `node`'s commits with a mismatching digest, properly signed.
    pub fn corrupt_commits(&mut self, node: NodeIndex) {
        self.commit_corruptors.insert(node);
    }

    /// Deliver an event to a node from the outside (e.g. a replayed
    /// topology announcement or an admin probe).
    pub fn inject(&mut self, node: NodeIndex, delay: Duration, event: Event) {
        let time = self.now + delay;
        self.schedule(node, time, event);
    }

    /// Crash a node and bring it back from its own store.
    pub fn restart_node(&mut self, node: NodeIndex) {
        debug!(node, "restarting node");
        // In-flight events and timers die with the process.
        let dead: Vec<EventKey> = self
            .queue
            .keys()
            .filter(|k| k.node == node)
            .copied()
            .collect();
        for key in dead {
            self.queue.remove(&key);
        }
        self.timers.retain(|(n, _), _| *n != node);

        let harness = &mut self.nodes[node as usize];
        let recovered = harness.storage.recovered_state();
        let latest = recovered.latest_completed.clone();
        harness.machine = NodeStateMachine::new(
            harness.me.clone(),
            harness.key.clone(),
            self.topology.clone(),
            self.config.bft.clone(),
            self.config.sync.clone(),
            recovered,
        );
        harness.halted = false;
        self.schedule(node, self.now, Event::Start);

        // The output module replays its latest announcement after a restart;
        // consensus is expected to treat replays as duplicates.
        if let Some(latest) = latest {
            let topology = self.topology.clone();
            self.schedule(
                node,
                self.now + Duration::from_millis(1),
                Event::NewEpochTopology {
                    epoch: latest.info.number.next(),
                    topology,
                },
            );
        }
    }

    // ─── Main loop ───

    /// Process events until the queue runs dry or `end_time` is reached.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some((&key, _)) = self.queue.first_key_value() {
            if key.time > end_time {
                break;
            }
            let (key, event) = self.queue.pop_first().expect("peeked above");
            self.now = key.time.max(self.now);
            let node = key.node;

            if self.nodes[node as usize].halted {
                trace!(node, kind = event.type_name(), "dropping event for halted node");
                continue;
            }

            self.stats.events_processed += 1;
            let actions = {
                let harness = &mut self.nodes[node as usize];
                harness.machine.set_time(self.now);
                harness.machine.handle(event)
            };
            for action in actions {
                self.process_action(node, action);
            }
        }
        self.now = end_time.max(self.now);
    }

    /// Run for a further duration.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        self.run_until(end);
    }

    // ─── Action execution ───

    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Send { to, message } => {
                let Some(&to_index) = self.peer_index.get(&to) else {
                    warn!(%to, "send to unknown peer");
                    return;
                };
                self.deliver(from, &[to_index], message);
            }
            Action::Broadcast { message } => {
                let peers: Vec<NodeIndex> = (0..self.nodes.len() as NodeIndex)
                    .filter(|i| *i != from)
                    .collect();
                self.deliver(from, &peers, message);
            }

            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&(from, id)) {
                    self.queue.remove(&old);
                }
                let key = self.schedule(from, self.now + duration, Event::TimerFired { id });
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }
            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.queue.remove(&key);
                    self.stats.timers_cancelled += 1;
                }
            }

            Action::EnqueueInternal { event } => {
                self.schedule(from, self.now, event);
            }

            // Delegated work runs instantly; results come back as events at
            // the same timestamp with internal priority.
            Action::VerifyPbftMessage { message, checks } => {
                let valid = checks.iter().all(|c| c.verify());
                self.schedule(from, self.now, Event::PbftMessageVerified { message, valid });
            }
            Action::VerifyStoredEpoch { epoch, topology } => {
                let membership =
                    Membership::new(self.nodes[from as usize].me.clone(), topology);
                let valid = epoch.certificate.validate_structure(&membership).is_ok()
                    && epoch
                        .certificate
                        .verify_signatures(&membership.topology)
                        .is_ok();
                self.schedule(from, self.now, Event::StoredEpochVerified { epoch, valid });
            }

            // Storage writes apply synchronously; durability callbacks are
            // delivered strictly afterwards, preserving the store contract.
            Action::PersistEpochStart { info } => {
                self.nodes[from as usize].storage.start_epoch(info);
                self.schedule(from, self.now, Event::NewEpochStored { info });
            }
            Action::PersistEpochCompletion {
                epoch,
                last_block_commits,
            } => {
                self.nodes[from as usize]
                    .storage
                    .complete_epoch(epoch, last_block_commits);
                self.schedule(from, self.now, Event::CompleteEpochStored { epoch });
            }
            Action::PersistOrderedBlock { block, certificate } => {
                self.nodes[from as usize].storage.add_block(block, certificate);
            }
            Action::PersistPbftMessage { message } => {
                self.nodes[from as usize].storage.add_pbft_message(message);
            }
            Action::PersistTransferredEpoch { epoch } => {
                let number = epoch.number();
                self.nodes[from as usize].storage.store_transferred(*epoch);
                self.schedule(
                    from,
                    self.now,
                    Event::TransferredEpochStored { epoch: number },
                );
            }
            Action::FetchStoredEpochs { from: epoch, requester } => {
                let epochs = self.nodes[from as usize].storage.completed_from(epoch);
                self.schedule(
                    from,
                    self.now,
                    Event::StoredEpochsLoaded { requester, epochs },
                );
            }

            // The availability layer supplies a deterministic payload.
            Action::RequestProposal { epoch, block } => {
                let payload =
                    OrderingPayload(format!("batch-{}-{}", epoch.0, block.0).into_bytes());
                self.schedule(
                    from,
                    self.now + self.config.proposal_delay,
                    Event::ProposalCreated {
                        epoch,
                        block,
                        payload,
                    },
                );
            }

            // The output sink: record the block and, at an epoch boundary,
            // answer with the next epoch's topology.
            Action::EmitOrderedBlock { block } => {
                let provenance = match block.provenance {
                    sequent_types::BlockProvenance::FromConsensus => "consensus",
                    sequent_types::BlockProvenance::FromStateTransfer => "state_transfer",
                };
                self.metrics
                    .blocks_ordered
                    .with_label_values(&[provenance])
                    .inc();
                let boundary = block.block.is_last_in_epoch;
                let epoch = block.block.metadata.epoch;
                self.nodes[from as usize].ordered.push(block);
                if boundary && self.nodes[from as usize].announced.insert(epoch.next()) {
                    let topology = self.topology.clone();
                    self.schedule(
                        from,
                        self.now + Duration::from_millis(1),
                        Event::NewEpochTopology {
                            epoch: epoch.next(),
                            topology,
                        },
                    );
                }
            }

            Action::RespondOrderingTopology {
                request_id,
                epoch,
                peers,
            } => {
                self.nodes[from as usize]
                    .admin_responses
                    .push((request_id, epoch, peers));
            }

            Action::ReportNonCompliance { report } => {
                self.stats.non_compliance += 1;
                self.metrics
                    .non_compliance
                    .with_label_values(&[report.kind.as_label()])
                    .inc();
            }

            Action::Halt { reason } => {
                warn!(node = from, %reason, "node halted");
                self.nodes[from as usize].halted = true;
            }
        }
    }

    /// Encode a message once, then deliver it to each destination through
    /// the wire codec, subject to muting, partitions, and loss.
    fn deliver(&mut self, from: NodeIndex, to: &[NodeIndex], message: OutboundMessage) {
        if self.muted.contains(&from) {
            self.stats.messages_dropped += to.len() as u64;
            return;
        }
        let message = self.apply_byzantine_faults(from, message);
        let bytes = match &message {
            OutboundMessage::Pbft(m) => serialize_pbft(m),
            OutboundMessage::BlockTransferRequest(r) => serialize_transfer_request(r),
            OutboundMessage::BlockTransferResponse(r) => serialize_transfer_response(r),
        };
        for &to_index in to {
            let Some(latency) = self.network.should_deliver(from, to_index, &mut self.rng) else {
                self.stats.messages_dropped += 1;
                continue;
            };
            let event = match &message {
                OutboundMessage::Pbft(_) => match parse_pbft(&bytes) {
                    Ok(parsed) => Event::PbftMessageReceived { message: parsed },
                    Err(err) => {
                        self.metrics.parse_failures.inc();
                        warn!(%err, "wire roundtrip failed");
                        continue;
                    }
                },
                OutboundMessage::BlockTransferRequest(_) => match parse_transfer_request(&bytes) {
                    Ok(parsed) => Event::BlockTransferRequestReceived { request: parsed },
                    Err(err) => {
                        self.metrics.parse_failures.inc();
                        warn!(%err, "wire roundtrip failed");
                        continue;
                    }
                },
                OutboundMessage::BlockTransferResponse(_) => {
                    match parse_transfer_response(&bytes) {
                        Ok(parsed) => Event::BlockTransferResponseReceived {
                            response: Box::new(parsed),
                        },
                        Err(err) => {
                            self.metrics.parse_failures.inc();
                            warn!(%err, "wire roundtrip failed");
                            continue;
                        }
                    }
                }
            };
            self.stats.messages_sent += 1;
            self.metrics.messages_sent.inc();
            self.schedule(to_index, self.now + latency, event);
        }
    }

    /// A commit corruptor signs a commit for a digest nobody proposed.
    fn apply_byzantine_faults(
        &mut self,
        from: NodeIndex,
        message: OutboundMessage,
    ) -> OutboundMessage {
        if !self.commit_corruptors.contains(&from) {
            return message;
        }
        match message {
            OutboundMessage::Pbft(PbftMessage::Commit(commit)) => {
                let key = &self.nodes[from as usize].key;
                let forged = Commit::new(
                    commit.metadata,
                    commit.view,
                    Hash::digest(b"equivocation"),
                    commit.sender,
                    commit.timestamp_micros,
                    key,
                );
                OutboundMessage::Pbft(PbftMessage::Commit(forged))
            }
            other => other,
        }
    }

    fn schedule(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        let key = EventKey {
            time,
            priority: event.priority(),
            sequence: self.sequence,
            node,
        };
        self.sequence += 1;
        self.queue.insert(key, event);
        key
    }
}

//! Node state machine.

use sequent_bft::{BftConfig, ConsensusState, RecoveredState};
use sequent_core::{Action, Event, StateMachine, TimerId};
use sequent_sync::{StateTransferState, SyncConfig};
use sequent_types::{KeyPair, Membership, OrderingTopology, PeerId};
use std::sync::Arc;
use std::time::Duration;

/// Combined node state machine.
///
/// Composes the consensus module and the state-transfer manager into a
/// single event handler. The consensus module decides when to yield to
/// catch-up; this machine only routes.
pub struct NodeStateMachine {
    consensus: ConsensusState,
    sync: StateTransferState,
    now: Duration,
}

impl NodeStateMachine {
    /// Create a node from its identity, keys, known topology, and the
    /// recovered store snapshot. Use `RecoveredState::default()` for a
    /// fresh start.
    pub fn new(
        me: PeerId,
        key: KeyPair,
        topology: Arc<OrderingTopology>,
        bft_config: BftConfig,
        sync_config: SyncConfig,
        recovered: RecoveredState,
    ) -> Self {
        let membership = Membership::new(me.clone(), topology.clone());
        Self {
            consensus: ConsensusState::new(me, key, topology, bft_config, recovered),
            sync: StateTransferState::new(membership, sync_config),
            now: Duration::ZERO,
        }
    }

    /// The consensus module.
    pub fn consensus(&self) -> &ConsensusState {
        &self.consensus
    }

    /// The state-transfer manager.
    pub fn sync(&self) -> &StateTransferState {
        &self.sync
    }

    /// Whether a bulk transfer is running.
    pub fn is_transferring(&self) -> bool {
        self.sync.is_transferring()
    }

    /// Keep the transfer manager's membership in lockstep with the
    /// consensus module after any event that may have changed the topology.
    fn refresh_sync_membership(&mut self) {
        self.sync.set_membership(self.consensus.membership().clone());
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            // ─── Lifecycle ───
            Event::Start => self.consensus.on_start(),
            Event::NewEpochTopology { epoch, topology } => {
                self.consensus.on_new_epoch_topology(epoch, topology)
            }
            Event::NewEpochStored { info } => {
                let actions = self.consensus.on_new_epoch_stored(info);
                self.refresh_sync_membership();
                actions
            }
            Event::CompleteEpochStored { epoch } => self.consensus.on_complete_epoch_stored(epoch),
            Event::AsyncException { operation, error } => {
                self.consensus.on_async_exception(operation, error)
            }

            // ─── Timers ───
            Event::TimerFired { id } => match id {
                TimerId::ViewChange(_) => self.consensus.on_timer(id),
                TimerId::TransferRetry => self.sync.on_retry(),
            },

            // ─── Consensus path ───
            Event::PbftMessageReceived { message } => self.consensus.on_pbft_received(message),
            Event::PbftMessageVerified { message, valid } => {
                self.consensus.on_pbft_verified(message, valid)
            }
            Event::ProposalCreated {
                epoch,
                block,
                payload,
            } => self.consensus.on_proposal_created(epoch, block, payload),
            Event::BlockOrdered { block, certificate } => {
                self.consensus.on_block_ordered(block, certificate)
            }

            // ─── State transfer ───
            Event::StateTransferNeeded {
                from_epoch,
                target_epoch,
            } => {
                let baseline = self.consensus.latest_completed().clone();
                self.sync
                    .on_transfer_needed(from_epoch, target_epoch, baseline)
            }
            Event::StateTransferCompleted { last_completed } => {
                let actions = self.consensus.on_state_transfer_completed(*last_completed);
                self.refresh_sync_membership();
                actions
            }
            Event::BlockTransferRequestReceived { request } => self.sync.on_request(request),
            Event::BlockTransferResponseReceived { response } => self.sync.on_response(*response),
            Event::StoredEpochVerified { epoch, valid } => {
                self.sync.on_epoch_verified(*epoch, valid)
            }
            Event::TransferredEpochStored { epoch } => {
                let actions = self.sync.on_transferred_stored(epoch);
                // A slot this node already ordered live must not reach the
                // output sink a second time from its transferred copy.
                actions
                    .into_iter()
                    .filter(|action| match action {
                        Action::EmitOrderedBlock { block } => {
                            !self.consensus.already_ordered(&block.block.metadata)
                        }
                        _ => true,
                    })
                    .collect()
            }
            Event::StoredEpochsLoaded { requester, epochs } => {
                self.sync.on_stored_epochs_loaded(requester, epochs)
            }

            // ─── Admin ───
            Event::QueryOrderingTopology { request_id } => {
                self.consensus.on_query_topology(request_id)
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.consensus.set_time(now);
        self.sync.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("consensus", &self.consensus)
            .field("sync", &self.sync)
            .finish()
    }
}

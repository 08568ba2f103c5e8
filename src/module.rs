//! The module: the unit of coordination.
//!
//! There is no global scheduler. Each module owns its tasks, publishes its
//! coordination field, tracks its k-neighbors, participates in consensus,
//! and decides locally what to run next from its own gradient fields —
//! [`Module::tick`] is the entire coordination loop for one module, one
//! period.

use crate::consensus::{Ballot, Consensus, InhibitMessage, ProposalMessage, ProposalType, VoteMessage};
use crate::field::{FieldEngine, FieldRegion};
use crate::heartbeat::{Heartbeat, HeartbeatMessage};
use crate::fixedpoint::Fixed;
use crate::topology::{DiscoveryMessage, Topology};
use crate::types::*;
use heapless::Vec;

/// Cap on messages a single `tick` can emit (one heartbeat + one discovery
/// + a handful of votes/inhibits in response to this tick's inbound batch).
pub const MAX_OUTBOUND_PER_TICK: usize = 8;

// ============================================================================
// Internal Task
// ============================================================================

/// Task state within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Idle,
    Ready,
    Running,
    Blocked,
}

/// Task entry point. The raw pointer argument mirrors the teacher's
/// C-interop-friendly task model; callers are responsible for its
/// lifetime and aliasing.
pub type TaskFn = fn(*mut ());

/// A task owned by a module (not the kernel — there is no kernel-level
/// task table, only per-module ones).
#[derive(Clone)]
pub struct InternalTask {
    pub id: TaskId,
    pub name: &'static str,
    pub function: TaskFn,
    pub arg: *mut (),
    pub state: TaskState,
    /// Local priority, 0 = highest.
    pub priority: u8,
    /// Re-run period; 0 = one-shot.
    pub period: TimeUs,
    pub next_run: TimeUs,
    pub run_count: u32,
    pub total_runtime: TimeUs,
    /// `None` = no deadline tracked for this task.
    pub deadline: Option<Deadline>,
    /// Capability bits this module must hold to run the task.
    pub required_caps: Capability,
}

impl Default for InternalTask {
    fn default() -> Self {
        Self {
            id: 0,
            name: "",
            function: |_| {},
            arg: core::ptr::null_mut(),
            state: TaskState::Idle,
            priority: 255,
            period: 0,
            next_run: 0,
            run_count: 0,
            total_runtime: 0,
            deadline: None,
            required_caps: 0,
        }
    }
}

// ============================================================================
// Module Callbacks
// ============================================================================

/// Optional event callbacks. All are plain `fn` pointers (no captures) —
/// consistent with running on targets with no heap for boxed closures.
#[derive(Default)]
pub struct ModuleCallbacks {
    pub on_field_change: Option<fn(&Module)>,
    pub on_neighbor_lost: Option<fn(&Module, ModuleId)>,
    pub on_neighbor_found: Option<fn(&Module, ModuleId)>,
    pub on_vote_request: Option<fn(&Module, &Ballot) -> VoteValue>,
    pub on_consensus_complete: Option<fn(&Module, &Ballot, VoteResult)>,
    pub on_state_change: Option<fn(&Module, ModuleState)>,
}

// ============================================================================
// Module Status
// ============================================================================

/// Snapshot of a module's state, for status reporting / the demo binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleStatus {
    pub id: ModuleId,
    pub state: ModuleState,
    pub neighbor_count: u32,
    pub load_gradient: Fixed,
    pub thermal_gradient: Fixed,
    pub active_ballots: u32,
    pub ticks_total: u32,
    /// Inbound messages rejected by their target engine this module's
    /// lifetime (unknown sender, stale ballot, already-decided vote, ...).
    pub messages_dropped: u32,
    pub reelections: u32,
    pub suspected: u32,
    pub declared_dead: u32,
    pub ballots_timed_out: u32,
    pub ballots_inhibited: u32,
}

// ============================================================================
// Inbound / Outbound Messages
// ============================================================================

/// A decoded message ready to be dispatched at the top of [`Module::tick`].
/// Decoding from the wire is `wire.rs`'s job; this enum is the boundary
/// between that byte layer and the engines.
#[derive(Clone, Copy)]
pub enum InboundMessage {
    Heartbeat(HeartbeatMessage),
    Discovery(DiscoveryMessage),
    /// A neighbor's published field, mirrored into the local `FieldRegion`
    /// (modules don't share memory across a real transport — this is how
    /// a publish from one module's address space reaches another's).
    Field { source: ModuleId, field: Field },
    Proposal(ProposalMessage),
    Vote(VoteMessage),
    Inhibit(InhibitMessage),
}

/// A message this module wants sent this tick. The caller (HAL-backed send
/// loop) is responsible for wire-encoding and transmission.
#[derive(Clone, Copy)]
pub enum OutboundMessage {
    Heartbeat(HeartbeatMessage),
    Discovery(DiscoveryMessage),
    Proposal(ProposalMessage),
    Vote(VoteMessage),
    Inhibit(InhibitMessage),
}

/// Proposals queued by `propose_mode`/`propose_power_limit` awaiting
/// broadcast on the next tick — opening a ballot and getting it onto the
/// wire are two different things, and only `tick` emits outbound traffic.
const MAX_PENDING_PROPOSALS: usize = 2;

// ============================================================================
// Module
// ============================================================================

/// The first-class coordination unit. Each `Module` is self-contained:
/// owns its tasks, its field/topology/consensus/heartbeat engines, and
/// decides everything locally from `tick` to `tick`.
pub struct Module {
    id: ModuleId,
    name: &'static str,
    state: ModuleState,

    my_field: Field,
    neighbor_aggregate: Field,
    gradients: [Fixed; FIELD_COUNT],
    field_engine: FieldEngine,

    topology: Topology,
    consensus: Consensus,
    heartbeat: Heartbeat,

    tasks: Vec<InternalTask, MAX_TASKS_PER_MODULE>,
    active_task: Option<TaskId>,

    pending_proposals: Vec<ProposalMessage, MAX_PENDING_PROPOSALS>,
    pending_inhibits: Vec<InhibitMessage, MAX_PENDING_PROPOSALS>,

    last_tick: TimeUs,
    tick_period: TimeUs,

    ticks_total: u32,
    field_updates: u32,
    topology_changes: u32,
    consensus_rounds: u32,
    /// Mirrors §7's "dropped silently with an observable counter increment"
    /// for inbound messages a target engine refuses (bad ballot, unknown
    /// sender, stale sequence, ...).
    messages_dropped: u32,

    capabilities: Capability,

    callbacks: ModuleCallbacks,
}

impl Module {
    pub fn new(id: ModuleId, name: &'static str, position: Position) -> Self {
        Self {
            id,
            name,
            state: ModuleState::Init,
            my_field: Field::new(),
            neighbor_aggregate: Field::new(),
            gradients: [Fixed::ZERO; FIELD_COUNT],
            field_engine: FieldEngine::new(),
            topology: Topology::new(id, position, None),
            consensus: Consensus::new(id, None),
            heartbeat: Heartbeat::new(id, None),
            tasks: Vec::new(),
            active_task: None,
            pending_proposals: Vec::new(),
            pending_inhibits: Vec::new(),
            last_tick: 0,
            tick_period: 1000,
            ticks_total: 0,
            field_updates: 0,
            topology_changes: 0,
            consensus_rounds: 0,
            messages_dropped: 0,
            capabilities: 0,
            callbacks: ModuleCallbacks::default(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != ModuleState::Init {
            return Err(Error::InvalidArg);
        }
        self.set_state(ModuleState::Discovering);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.set_state(ModuleState::Shutdown);
        Ok(())
    }

    /// The coordination loop for one tick, in order:
    ///
    /// 1. Drain inbound messages into the relevant engine.
    /// 2. Topology tick (retry reelection; flag a discovery broadcast).
    /// 3. Heartbeat tick (health transitions; flag a heartbeat broadcast).
    /// 4. Consensus tick (ballot timeouts, inhibition expiry).
    /// 5. Sample neighbor fields, aggregate, compute gradients.
    /// 6. Recompute task slack from current deadlines.
    /// 7. Select the next task (gradient-throttled, capability-gated,
    ///    deadline-prioritized, ties broken by ascending task id).
    /// 8. Run the selected task, if any.
    /// 9. Publish this module's updated field.
    /// 10. Re-evaluate module state from the current neighbor count.
    pub fn tick(
        &mut self,
        region: &mut FieldRegion,
        inbound: &[InboundMessage],
        now: TimeUs,
    ) -> Result<Vec<OutboundMessage, MAX_OUTBOUND_PER_TICK>> {
        self.last_tick = now;
        self.ticks_total += 1;
        let mut outbound: Vec<OutboundMessage, MAX_OUTBOUND_PER_TICK> = Vec::new();

        // 1. Drain inbound.
        for msg in inbound {
            self.dispatch_inbound(msg, region, now, &mut outbound);
        }

        // 2. Topology tick.
        if self.topology.tick(now) {
            self.topology_changes += 1;
        }
        if self.topology.discovery_due(now) {
            let msg = self.topology.create_discovery_message(self.capabilities);
            let _ = outbound.push(OutboundMessage::Discovery(msg));
        }

        // 3. Heartbeat tick.
        let health_changed = self.heartbeat.tick(now);

        // Topology's own Neighbor.health is only ever a mirror of the
        // heartbeat table (heartbeat owns the ALIVE/SUSPECT/DEAD state
        // machine); sync it every tick so step 5's aggregation and §3's
        // "every k-set member has health != UNKNOWN" invariant both hold.
        let neighbor_ids: heapless::Vec<ModuleId, K_NEIGHBORS> =
            self.topology.neighbors().iter().map(|n| n.id).collect();
        for id in neighbor_ids {
            let health = self.heartbeat.get_health(id);
            self.topology.set_neighbor_health(id, health);
        }

        if health_changed > 0 {
            let dead_neighbors: heapless::Vec<ModuleId, K_NEIGHBORS> = self
                .topology
                .neighbors()
                .iter()
                .filter(|n| self.heartbeat.get_health(n.id) == HealthState::Dead)
                .map(|n| n.id)
                .collect();

            for dead_id in dead_neighbors {
                self.topology.on_neighbor_lost(dead_id).ok();
                self.heartbeat.remove_neighbor(dead_id).ok();
                self.topology_changes += 1;

                if let Some(cb) = self.callbacks.on_neighbor_lost {
                    cb(self, dead_id);
                }
            }
        }
        if self.heartbeat.should_send(now) {
            let load_percent = self.percent(FieldComponent::Load);
            let thermal_percent = self.percent(FieldComponent::Thermal);
            // Broadcast, so there's no single neighbor to echo; RTT
            // tracking is exercised directly against the heartbeat engine
            // (see heartbeat::tests) rather than through the module loop.
            let msg = self.heartbeat.create_message(self.state, load_percent, thermal_percent, 0);
            self.heartbeat.mark_sent(now);
            let _ = outbound.push(OutboundMessage::Heartbeat(msg));
        }

        // 4. Consensus tick.
        self.consensus.tick(now);
        for proposal in self.pending_proposals.iter().copied() {
            let _ = outbound.push(OutboundMessage::Proposal(proposal));
        }
        self.pending_proposals.clear();
        for inhibit in self.pending_inhibits.iter().copied() {
            let _ = outbound.push(OutboundMessage::Inhibit(inhibit));
        }
        self.pending_inhibits.clear();

        // 5. Sample, aggregate, gradient.
        self.neighbor_aggregate =
            self.field_engine.sample_neighbors(region, self.topology.neighbors(), now);
        self.gradients = self.field_engine.gradient_all(&self.my_field, &self.neighbor_aggregate);

        // 6. Slack.
        self.compute_slack(now);

        // 7. Select task.
        let selected = self.select_task();

        // 8. Run task.
        if let Some(task_id) = selected {
            self.run_task(task_id, now);
        }

        // 9. Publish field.
        self.field_engine.publish(region, self.id, &self.my_field, now)?;
        self.field_updates += 1;

        // 10. State transition.
        self.update_state_from_topology();

        Ok(outbound)
    }

    fn dispatch_inbound(
        &mut self,
        msg: &InboundMessage,
        region: &mut FieldRegion,
        now: TimeUs,
        outbound: &mut Vec<OutboundMessage, MAX_OUTBOUND_PER_TICK>,
    ) {
        match *msg {
            InboundMessage::Heartbeat(hb) => {
                if self.heartbeat.add_neighbor(hb.sender_id).is_ok() {
                    if let Some(cb) = self.callbacks.on_neighbor_found {
                        cb(self, hb.sender_id);
                    }
                }
                if self.heartbeat.received(hb.sender_id, hb.sequence, hb.echo_sequence, now).is_err() {
                    self.messages_dropped += 1;
                }
            }
            InboundMessage::Discovery(disc) => {
                match self.topology.on_discovery(disc.sender_id, disc.position, disc.capabilities, now) {
                    Ok(changed) => {
                        if changed {
                            self.topology_changes += 1;
                            let _ = self.heartbeat.add_neighbor(disc.sender_id);
                        }
                    }
                    Err(_) => self.messages_dropped += 1,
                }
            }
            InboundMessage::Field { source, field } => {
                if self.field_engine.publish(region, source, &field, now).is_err() {
                    self.messages_dropped += 1;
                }
            }
            InboundMessage::Proposal(p) => {
                match self.consensus.on_proposal(p.proposer_id, p.ballot_id, p.proposal_type, p.data, p.threshold, now) {
                    Ok(vote) => {
                        let decided = self
                            .callbacks
                            .on_vote_request
                            .and_then(|cb| {
                                self.consensus
                                    .get_ballot(p.proposer_id, p.ballot_id)
                                    .map(|b| cb(self, b))
                            })
                            .unwrap_or(vote);

                        // A full outbound queue can't fail the tick; per §7
                        // the local ballot instead records this voter as
                        // ABSTAIN so neighbors who did hear it still see a
                        // consistent vote count.
                        let sent = outbound
                            .push(OutboundMessage::Vote(VoteMessage {
                                voter_id: self.id,
                                proposer: p.proposer_id,
                                ballot_id: p.ballot_id,
                                vote: decided,
                            }))
                            .is_ok();
                        if !sent {
                            let total = self.topology.neighbor_count() as u8;
                            let _ = self.consensus.on_vote(
                                self.id,
                                p.proposer_id,
                                p.ballot_id,
                                VoteValue::Abstain,
                                total,
                            );
                        }
                    }
                    Err(_) => self.messages_dropped += 1,
                }
            }
            InboundMessage::Vote(v) => {
                let total = self.topology.neighbor_count() as u8;
                if self.consensus.on_vote(v.voter_id, v.proposer, v.ballot_id, v.vote, total).is_err() {
                    self.messages_dropped += 1;
                }
                if let Some(cb) = self.callbacks.on_consensus_complete {
                    if let Some(ballot) = self.consensus.get_ballot(v.proposer, v.ballot_id) {
                        if ballot.completed {
                            cb(self, ballot, ballot.result);
                        }
                    }
                }
            }
            InboundMessage::Inhibit(i) => {
                if self.consensus.inhibit(i.proposer, i.ballot_id, now).is_err() {
                    self.messages_dropped += 1;
                }
            }
        }
    }

    /// Field component, scaled from Q16.16 `[0, 1]` to a `0..=100` percent
    /// for the heartbeat payload's byte-sized fields.
    fn percent(&self, component: FieldComponent) -> u8 {
        let value = self.my_field.get(component).clamp(Fixed::ZERO, Fixed::ONE);
        (value.saturating_mul(Fixed::from_num(100.0)).to_num::<i32>()).clamp(0, 100) as u8
    }

    // ========================================================================
    // Task Management
    // ========================================================================

    pub fn add_task(
        &mut self,
        name: &'static str,
        function: TaskFn,
        arg: *mut (),
        priority: u8,
        period: TimeUs,
    ) -> Result<TaskId> {
        if self.tasks.len() >= MAX_TASKS_PER_MODULE {
            return Err(Error::NoMemory);
        }

        let id = self.tasks.len() as TaskId;
        let task = InternalTask {
            id,
            name,
            function,
            arg,
            state: TaskState::Ready,
            priority,
            period,
            ..Default::default()
        };

        self.tasks.push(task).map_err(|_| Error::NoMemory)?;
        Ok(id)
    }

    pub fn task_ready(&mut self, task_id: TaskId) -> Result<()> {
        self.tasks
            .get_mut(task_id as usize)
            .map(|t| t.state = TaskState::Ready)
            .ok_or(Error::NotFound)
    }

    pub fn task_block(&mut self, task_id: TaskId) -> Result<()> {
        self.tasks
            .get_mut(task_id as usize)
            .map(|t| t.state = TaskState::Blocked)
            .ok_or(Error::NotFound)
    }

    /// Pick the next task to run, or `None` to idle this tick.
    ///
    /// Throttles outright when the load gradient says this module is
    /// already significantly overloaded relative to its neighbors.
    /// Otherwise ranks READY tasks by: capability match (required), then
    /// deadline criticality (critical beats non-critical), then ascending
    /// priority number, then — the final tie-break — ascending task id, so
    /// two tasks with identical priority and criticality resolve
    /// deterministically rather than by iteration order.
    fn select_task(&self) -> Option<TaskId> {
        let load_gradient = self.gradients[FieldComponent::Load as usize];
        if load_gradient < Fixed::from_num(-0.2) {
            return None;
        }

        let mut best: Option<&InternalTask> = None;

        for task in self.tasks.iter() {
            if task.state != TaskState::Ready {
                continue;
            }
            if task.required_caps != 0 && !can_perform(self.capabilities, task.required_caps) {
                continue;
            }

            let is_critical = task.deadline.as_ref().map_or(false, |d| d.critical);

            let select_this = match best {
                None => true,
                Some(current) => {
                    let current_critical = current.deadline.as_ref().map_or(false, |d| d.critical);
                    if is_critical != current_critical {
                        is_critical
                    } else if task.priority != current.priority {
                        task.priority < current.priority
                    } else {
                        task.id < current.id
                    }
                }
            };

            if select_this {
                best = Some(task);
            }
        }

        best.map(|t| t.id)
    }

    fn run_task(&mut self, task_id: TaskId, now: TimeUs) {
        if let Some(task) = self.tasks.get_mut(task_id as usize) {
            task.state = TaskState::Running;
            self.active_task = Some(task_id);

            (task.function)(task.arg);
            task.run_count += 1;

            if task.period > 0 {
                task.next_run = now + task.period;
                task.state = TaskState::Ready;
            } else {
                task.state = TaskState::Idle;
            }

            self.active_task = None;
        }
    }

    // ========================================================================
    // Field Operations
    // ========================================================================

    pub fn update_field(&mut self, load: Fixed, thermal: Fixed, power: Fixed) {
        self.my_field.set(FieldComponent::Load, load);
        self.my_field.set(FieldComponent::Thermal, thermal);
        self.my_field.set(FieldComponent::Power, power);

        if let Some(cb) = self.callbacks.on_field_change {
            cb(self);
        }
    }

    pub fn get_gradient(&self, component: FieldComponent) -> Fixed {
        self.gradients[component as usize]
    }

    pub fn gradients(&self) -> &[Fixed; FIELD_COUNT] {
        &self.gradients
    }

    // ========================================================================
    // Deadline / Slack Operations
    // ========================================================================

    /// Recompute every task's slack and publish the minimum across all
    /// deadline-bearing tasks as `FieldComponent::Slack` (1.0 if none has a
    /// deadline — maximal slack, not "no data").
    pub fn compute_slack(&mut self, now: TimeUs) {
        let mut min_slack = Fixed::ONE;
        let mut has_any_deadline = false;

        for task in self.tasks.iter_mut() {
            if let Some(deadline) = task.deadline.as_mut() {
                has_any_deadline = true;
                deadline.compute_slack(now);
                min_slack = min_slack.min(deadline.slack);
            }
        }

        self.my_field
            .set(FieldComponent::Slack, if has_any_deadline { min_slack } else { Fixed::ONE });
    }

    pub fn set_task_deadline(&mut self, task_id: TaskId, deadline: TimeUs, duration_est: TimeUs) -> Result<()> {
        self.tasks
            .get_mut(task_id as usize)
            .map(|t| t.deadline = Some(Deadline::new(deadline, duration_est)))
            .ok_or(Error::NotFound)
    }

    pub fn clear_task_deadline(&mut self, task_id: TaskId) -> Result<()> {
        self.tasks
            .get_mut(task_id as usize)
            .map(|t| t.deadline = None)
            .ok_or(Error::NotFound)
    }

    // ========================================================================
    // Capability Operations
    // ========================================================================

    pub fn set_capabilities(&mut self, caps: Capability) {
        self.capabilities = caps;
    }

    pub fn capabilities(&self) -> Capability {
        self.capabilities
    }

    pub fn set_task_capabilities(&mut self, task_id: TaskId, caps: Capability) -> Result<()> {
        self.tasks
            .get_mut(task_id as usize)
            .map(|t| t.required_caps = caps)
            .ok_or(Error::NotFound)
    }

    // ========================================================================
    // Consensus Shortcuts
    // ========================================================================

    pub fn propose_mode(&mut self, new_mode: u32, now: TimeUs) -> Result<BallotId> {
        self.propose(ProposalType::ModeChange, new_mode, threshold::SUPERMAJORITY, now)
    }

    pub fn propose_power_limit(&mut self, power_mw: u32, now: TimeUs) -> Result<BallotId> {
        self.propose(ProposalType::PowerLimit, power_mw, threshold::SIMPLE_MAJORITY, now)
    }

    /// Open a ballot and queue its `ProposalMessage` for broadcast on the
    /// next `tick`. Neighbors never see a ballot this module doesn't also
    /// put on the wire.
    fn propose(
        &mut self,
        proposal_type: ProposalType,
        data: u32,
        threshold: Fixed,
        now: TimeUs,
    ) -> Result<BallotId> {
        self.consensus_rounds += 1;
        let ballot_id = self.consensus.propose(proposal_type, data, threshold, now)?;
        let _ = self.pending_proposals.push(ProposalMessage {
            proposer_id: self.id,
            ballot_id,
            proposal_type,
            data,
            threshold,
        });
        Ok(ballot_id)
    }

    /// Veto a competing `(proposer, ballot_id)` proposal and queue the
    /// `InhibitMessage` for broadcast on the next `tick`.
    pub fn inhibit_ballot(&mut self, proposer: ModuleId, ballot_id: BallotId, now: TimeUs) -> Result<()> {
        self.consensus.inhibit(proposer, ballot_id, now)?;
        let _ = self.pending_inhibits.push(InhibitMessage {
            sender_id: self.id,
            proposer,
            ballot_id,
        });
        Ok(())
    }

    /// Result of a ballot this module proposed (shorthand for
    /// `get_consensus_result(self.id(), ballot_id)`).
    pub fn get_own_consensus_result(&self, ballot_id: BallotId) -> VoteResult {
        self.consensus.get_result(self.id, ballot_id)
    }

    pub fn get_consensus_result(&self, proposer: ModuleId, ballot_id: BallotId) -> VoteResult {
        self.consensus.get_result(proposer, ballot_id)
    }

    // ========================================================================
    // Topology Access
    // ========================================================================

    pub fn neighbor_count(&self) -> usize {
        self.topology.neighbor_count()
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        self.topology.neighbors()
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> ModuleStatus {
        ModuleStatus {
            id: self.id,
            state: self.state,
            neighbor_count: self.topology.neighbor_count() as u32,
            load_gradient: self.gradients[FieldComponent::Load as usize],
            thermal_gradient: self.gradients[FieldComponent::Thermal as usize],
            active_ballots: self.consensus.active_ballot_count() as u32,
            ticks_total: self.ticks_total,
            messages_dropped: self.messages_dropped,
            reelections: self.topology.stats().reelections,
            suspected: self.heartbeat.stats().suspected,
            declared_dead: self.heartbeat.stats().declared_dead,
            ballots_timed_out: self.consensus.stats().timed_out,
            ballots_inhibited: self.consensus.stats().inhibited,
        }
    }

    pub fn set_callbacks(&mut self, callbacks: ModuleCallbacks) {
        self.callbacks = callbacks;
    }

    pub fn tick_period(&self) -> TimeUs {
        self.tick_period
    }

    pub fn set_tick_period(&mut self, period: TimeUs) {
        self.tick_period = period;
    }

    // ========================================================================
    // Private Helpers
    // ========================================================================

    fn set_state(&mut self, new_state: ModuleState) {
        let old_state = self.state;
        self.state = new_state;

        if let Some(cb) = self.callbacks.on_state_change {
            cb(self, old_state);
        }
    }

    fn update_state_from_topology(&mut self) {
        let count = self.topology.neighbor_count();
        let min_neighbors = self.topology.config().min_neighbors;

        match self.state {
            ModuleState::Discovering if count >= min_neighbors => {
                self.set_state(ModuleState::Active);
            }
            ModuleState::Active if count == 0 => {
                self.set_state(ModuleState::Isolated);
            }
            ModuleState::Active if count < min_neighbors => {
                self.set_state(ModuleState::Degraded);
            }
            ModuleState::Degraded if count == 0 => {
                self.set_state(ModuleState::Isolated);
            }
            ModuleState::Degraded if count >= min_neighbors => {
                self.set_state(ModuleState::Active);
            }
            ModuleState::Isolated if count > 0 => {
                self.set_state(ModuleState::Reforming);
            }
            ModuleState::Reforming if count >= min_neighbors => {
                self.set_state(ModuleState::Active);
            }
            ModuleState::Reforming if count == 0 => {
                self.set_state(ModuleState::Isolated);
            }
            _ => {}
        }
    }
}

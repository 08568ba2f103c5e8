//! Threshold-based distributed consensus with mutual inhibition.
//!
//! Modules vote on system-wide decisions (mode changes, power limits,
//! shutdown, mesh reformation) using a configurable approval threshold —
//! simple majority for routine decisions, supermajority or unanimity for
//! safety-critical ones. An `Inhibit` vote cancels a ballot outright,
//! letting any single neighbor veto a proposal it knows conflicts with one
//! already in flight.
//!
//! Ballots are keyed by `(proposer, ballot_id)` rather than `ballot_id`
//! alone: each module allocates its own ballot ids independently, so two
//! proposers can legitimately reuse the same id concurrently.

use crate::fixedpoint::{self, Fixed};
use crate::types::*;
use heapless::Vec;

// ============================================================================
// Proposal Types
// ============================================================================

/// Proposal types. Applications extend via the `Custom0..Custom3` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProposalType {
    ModeChange = 0,
    PowerLimit = 1,
    Shutdown = 2,
    Reformation = 3,
    Custom0 = 16,
    Custom1 = 17,
    Custom2 = 18,
    Custom3 = 19,
}

// ============================================================================
// Configuration
// ============================================================================

/// Consensus engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusConfig {
    /// How long a ballot stays open before timing out (microseconds).
    pub vote_timeout: TimeUs,
    /// How long an inhibition blocks a (proposer, ballot) pair (microseconds).
    pub inhibit_duration: TimeUs,
    /// Whether the proposer itself counts toward the vote tally.
    pub allow_self_vote: bool,
    /// When set, a ballot can only resolve APPROVED once every neighbor has
    /// voted — reaching the threshold early is not enough.
    pub require_all_neighbors: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            vote_timeout: VOTE_TIMEOUT_US,
            inhibit_duration: 100_000,
            allow_self_vote: true,
            require_all_neighbors: false,
        }
    }
}

// ============================================================================
// Ballot
// ============================================================================

/// One voting round.
#[derive(Debug, Clone)]
pub struct Ballot {
    /// Ballot id, scoped to `proposer` — see the module docs.
    pub id: BallotId,
    pub proposal_type: ProposalType,
    pub proposer: ModuleId,
    pub data: u32,
    /// Required yes-ratio, Q16.16 in `[0, 1]`.
    pub threshold: Fixed,
    pub deadline: TimeUs,

    votes: [VoteValue; K_NEIGHBORS],
    /// The voter occupying each slot, `INVALID_MODULE_ID` if free. Slots are
    /// claimed by first-come, not `voter_id % K_NEIGHBORS` — two neighbors
    /// whose ids happen to be congruent mod `K_NEIGHBORS` must still get
    /// distinct slots.
    voter_ids: [ModuleId; K_NEIGHBORS],
    /// Tracks which slots have voted, independent of the vote value —
    /// `votes` alone can't distinguish "never voted" from "voted Abstain"
    /// since `VoteValue::Abstain` is also the array's default.
    voted: [bool; K_NEIGHBORS],
    pub vote_count: u8,
    pub yes_count: u8,
    pub no_count: u8,
    pub abstain_count: u8,

    pub result: VoteResult,
    pub completed: bool,
}

impl Ballot {
    pub fn new(
        id: BallotId,
        proposal_type: ProposalType,
        proposer: ModuleId,
        data: u32,
        threshold: Fixed,
        deadline: TimeUs,
    ) -> Self {
        Self {
            id,
            proposal_type,
            proposer,
            data,
            threshold,
            deadline,
            votes: [VoteValue::Abstain; K_NEIGHBORS],
            voter_ids: [INVALID_MODULE_ID; K_NEIGHBORS],
            voted: [false; K_NEIGHBORS],
            vote_count: 0,
            yes_count: 0,
            no_count: 0,
            abstain_count: 0,
            result: VoteResult::Pending,
            completed: false,
        }
    }

    /// Matches this ballot's `(proposer, id)` key.
    pub fn matches(&self, proposer: ModuleId, ballot_id: BallotId) -> bool {
        self.proposer == proposer && self.id == ballot_id
    }

    /// Record a vote from `voter_id`, deduplicated by voter identity (a
    /// voter retransmitting its vote is expected, not exceptional — that
    /// retransmission is a no-op here, returning `false`). Returns `false`
    /// too if every slot is already claimed by a different voter.
    pub fn record_vote_from(&mut self, voter_id: ModuleId, vote: VoteValue) -> bool {
        let existing = self.voter_ids.iter().position(|&id| id == voter_id);
        let slot = match existing {
            Some(slot) => slot,
            None => match self.voter_ids.iter().position(|&id| id == INVALID_MODULE_ID) {
                Some(slot) => slot,
                None => return false,
            },
        };

        if self.voted[slot] {
            return false;
        }

        self.voter_ids[slot] = voter_id;
        self.voted[slot] = true;
        self.votes[slot] = vote;
        self.vote_count += 1;

        match vote {
            VoteValue::Yes => self.yes_count += 1,
            VoteValue::No => self.no_count += 1,
            VoteValue::Abstain => self.abstain_count += 1,
            VoteValue::Inhibit => {
                self.result = VoteResult::Cancelled;
                self.completed = true;
            }
        }

        true
    }

    /// Evaluate the ballot against its threshold given the current known
    /// neighbor count.
    ///
    /// Resolution order: an `Inhibit` vote has already short-circuited the
    /// ballot to CANCELLED in `record_vote_from`. Otherwise, both ratios
    /// below are taken over votes cast so far (`max(1, vote_count)`), not
    /// the full neighbor count:
    /// 1. APPROVED once `yes_count / vote_count >= threshold` — gated on
    ///    every neighbor having voted when `require_all_neighbors` is set.
    /// 2. REJECTED once `no_count / vote_count > 1 - threshold`.
    /// 3. REJECTED once every neighbor has voted and neither above fired.
    pub fn check_threshold(&mut self, total_voters: u8, require_all_neighbors: bool) {
        if self.completed {
            return;
        }

        let counted = Fixed::from_num(self.vote_count.max(1));
        let yes_ratio = fixedpoint::fixed_div(Fixed::from_num(self.yes_count), counted);
        let no_ratio = fixedpoint::fixed_div(Fixed::from_num(self.no_count), counted);

        if yes_ratio >= self.threshold && (!require_all_neighbors || self.vote_count >= total_voters) {
            self.result = VoteResult::Approved;
            self.completed = true;
            return;
        }

        if no_ratio > Fixed::ONE.saturating_sub(self.threshold) {
            self.result = VoteResult::Rejected;
            self.completed = true;
            return;
        }

        if self.vote_count >= total_voters {
            self.result = VoteResult::Rejected;
            self.completed = true;
        }
    }
}

// ============================================================================
// Inhibition Entry
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Inhibition {
    proposer: ModuleId,
    ballot_id: BallotId,
    until: TimeUs,
}

// ============================================================================
// Stats
// ============================================================================

/// Operational counters for a module's consensus engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusStats {
    /// Ballots reaped by `tick` after passing their deadline unresolved.
    pub timed_out: u32,
    /// Ballots cancelled by an inhibit, whether explicit or via a
    /// received `Inhibit` vote.
    pub inhibited: u32,
}

// ============================================================================
// Consensus Engine
// ============================================================================

/// Consensus engine: proposes ballots, records votes, applies inhibition.
pub struct Consensus {
    my_id: ModuleId,
    ballots: Vec<Ballot, MAX_BALLOTS>,
    inhibited: Vec<Inhibition, MAX_BALLOTS>,
    next_ballot_id: BallotId,
    config: ConsensusConfig,

    on_decide: Option<fn(&Ballot) -> VoteValue>,
    on_complete: Option<fn(&Ballot, VoteResult)>,

    stats: ConsensusStats,
}

impl Consensus {
    pub fn new(my_id: ModuleId, config: Option<ConsensusConfig>) -> Self {
        Self {
            my_id,
            ballots: Vec::new(),
            inhibited: Vec::new(),
            next_ballot_id: 1,
            config: config.unwrap_or_default(),
            on_decide: None,
            on_complete: None,
            stats: ConsensusStats::default(),
        }
    }

    pub fn my_id(&self) -> ModuleId {
        self.my_id
    }

    pub fn stats(&self) -> &ConsensusStats {
        &self.stats
    }

    /// Open a new ballot proposed by this module. Returns the ballot id
    /// (scoped to this module — pair it with `my_id()` when referencing it
    /// over the wire).
    pub fn propose(
        &mut self,
        proposal_type: ProposalType,
        data: u32,
        threshold: Fixed,
        now: TimeUs,
    ) -> Result<BallotId> {
        if self.ballots.len() >= MAX_BALLOTS {
            return Err(Error::Busy);
        }

        let ballot_id = self.next_ballot_id;
        self.next_ballot_id = self.next_ballot_id.wrapping_add(1);
        if self.next_ballot_id == INVALID_BALLOT_ID {
            self.next_ballot_id = 1;
        }

        let deadline = now + self.config.vote_timeout;
        let mut ballot = Ballot::new(ballot_id, proposal_type, self.my_id, data, threshold, deadline);

        // Record the self-vote directly on the ballot rather than through
        // `on_vote`: the real cluster size isn't known yet (that's a
        // `Topology` concern this engine stays decoupled from), so
        // threshold evaluation has to wait for the first externally
        // supplied `total_voters`, not run against a placeholder of 1.
        if self.config.allow_self_vote {
            ballot.record_vote_from(self.my_id, VoteValue::Yes);
        }

        self.ballots.push(ballot).map_err(|_| Error::NoMemory)?;
        Ok(ballot_id)
    }

    /// Cast this module's own vote on a ballot it's tracking (either one it
    /// proposed, or one it received via `on_proposal`).
    pub fn vote(
        &mut self,
        proposer: ModuleId,
        ballot_id: BallotId,
        vote: VoteValue,
        total_voters: u8,
    ) -> Result<()> {
        self.on_vote(self.my_id, proposer, ballot_id, vote, total_voters)
    }

    /// Inhibit a competing `(proposer, ballot_id)` proposal: cancels it if
    /// tracked locally and blocks future votes/proposals under that key
    /// until `inhibit_duration` elapses.
    pub fn inhibit(&mut self, proposer: ModuleId, ballot_id: BallotId, now: TimeUs) -> Result<()> {
        if self.inhibited.iter().any(|i| i.proposer == proposer && i.ballot_id == ballot_id) {
            return Ok(());
        }

        let inhibition = Inhibition {
            proposer,
            ballot_id,
            until: now + self.config.inhibit_duration,
        };
        self.inhibited.push(inhibition).map_err(|_| Error::NoMemory)?;
        self.stats.inhibited += 1;

        if let Some(ballot) = self.ballots.iter_mut().find(|b| b.matches(proposer, ballot_id)) {
            ballot.result = VoteResult::Cancelled;
            ballot.completed = true;
        }

        Ok(())
    }

    /// Process a vote received from a neighbor.
    pub fn on_vote(
        &mut self,
        voter_id: ModuleId,
        proposer: ModuleId,
        ballot_id: BallotId,
        vote: VoteValue,
        total_voters: u8,
    ) -> Result<()> {
        if self.is_inhibited(proposer, ballot_id) {
            return Err(Error::Inhibited);
        }

        let require_all_neighbors = self.config.require_all_neighbors;
        let on_complete = self.on_complete;

        let ballot = self
            .ballots
            .iter_mut()
            .find(|b| b.matches(proposer, ballot_id))
            .ok_or(Error::NotFound)?;

        if !ballot.record_vote_from(voter_id, vote) {
            return Ok(());
        }
        ballot.check_threshold(total_voters, require_all_neighbors);

        if ballot.completed {
            if ballot.result == VoteResult::Cancelled {
                self.stats.inhibited += 1;
            }
            if let Some(callback) = on_complete {
                callback(ballot, ballot.result);
            }
        }

        Ok(())
    }

    /// Track an incoming proposal from a neighbor and decide this module's
    /// vote (via `on_decide`, defaulting to approve-everything).
    pub fn on_proposal(
        &mut self,
        proposer_id: ModuleId,
        ballot_id: BallotId,
        proposal_type: ProposalType,
        data: u32,
        threshold: Fixed,
        now: TimeUs,
    ) -> Result<VoteValue> {
        if self.is_inhibited(proposer_id, ballot_id) {
            return Err(Error::Inhibited);
        }

        let deadline = now + self.config.vote_timeout;
        let ballot = Ballot::new(ballot_id, proposal_type, proposer_id, data, threshold, deadline);

        let decision = match self.on_decide {
            Some(decide) => decide(&ballot),
            None => VoteValue::Yes,
        };

        if self.ballots.len() < MAX_BALLOTS {
            let _ = self.ballots.push(ballot);
        }

        Ok(decision)
    }

    pub fn get_result(&self, proposer: ModuleId, ballot_id: BallotId) -> VoteResult {
        self.ballots
            .iter()
            .find(|b| b.matches(proposer, ballot_id))
            .map(|b| b.result)
            .unwrap_or(VoteResult::Pending)
    }

    pub fn get_ballot(&self, proposer: ModuleId, ballot_id: BallotId) -> Option<&Ballot> {
        self.ballots.iter().find(|b| b.matches(proposer, ballot_id))
    }

    pub fn active_ballot_count(&self) -> usize {
        self.ballots.iter().filter(|b| !b.completed).count()
    }

    /// Periodic tick: expire overdue ballots, reap old inhibitions and
    /// completed ballots. Returns the number of ballots that timed out
    /// this tick.
    pub fn tick(&mut self, now: TimeUs) -> u32 {
        let mut timed_out = 0u32;
        let on_complete = self.on_complete;

        for ballot in self.ballots.iter_mut() {
            if !ballot.completed && now >= ballot.deadline {
                ballot.result = VoteResult::Timeout;
                ballot.completed = true;
                timed_out += 1;

                if let Some(callback) = on_complete {
                    callback(ballot, ballot.result);
                }
            }
        }
        self.stats.timed_out += timed_out;

        self.inhibited.retain(|i| i.until > now);

        while self.ballots.len() > MAX_BALLOTS / 2 {
            if let Some(pos) = self.ballots.iter().position(|b| b.completed) {
                self.ballots.remove(pos);
            } else {
                break;
            }
        }

        timed_out
    }

    fn is_inhibited(&self, proposer: ModuleId, ballot_id: BallotId) -> bool {
        self.inhibited
            .iter()
            .any(|i| i.proposer == proposer && i.ballot_id == ballot_id)
    }

    pub fn set_on_decide(&mut self, callback: fn(&Ballot) -> VoteValue) {
        self.on_decide = Some(callback);
    }

    pub fn set_on_complete(&mut self, callback: fn(&Ballot, VoteResult)) {
        self.on_complete = Some(callback);
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Vote payload. Logical shape only — encoded by `wire::encode_vote`.
#[derive(Debug, Clone, Copy)]
pub struct VoteMessage {
    pub voter_id: ModuleId,
    pub proposer: ModuleId,
    pub ballot_id: BallotId,
    pub vote: VoteValue,
}

/// Proposal payload. Logical shape only — encoded by `wire::encode_proposal`.
#[derive(Debug, Clone, Copy)]
pub struct ProposalMessage {
    pub proposer_id: ModuleId,
    pub ballot_id: BallotId,
    pub proposal_type: ProposalType,
    pub data: u32,
    pub threshold: Fixed,
}

/// Inhibit payload. Logical shape only — encoded by `wire::encode_inhibit`.
#[derive(Debug, Clone, Copy)]
pub struct InhibitMessage {
    pub sender_id: ModuleId,
    pub proposer: ModuleId,
    pub ballot_id: BallotId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propose_returns_a_trackable_ballot_id() {
        let mut cons = Consensus::new(1, None);
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();

        assert!(ballot_id != INVALID_BALLOT_ID);
        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Pending);
    }

    #[test]
    fn simple_majority_approves_above_threshold() {
        let mut cons = Consensus::new(1, None);
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();

        // Self-vote (Yes) already counted; 3 more yes out of 5 total.
        cons.on_vote(2, 1, ballot_id, VoteValue::Yes, 5).unwrap();
        cons.on_vote(3, 1, ballot_id, VoteValue::Yes, 5).unwrap();
        cons.on_vote(4, 1, ballot_id, VoteValue::Yes, 5).unwrap();

        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Approved);
    }

    #[test]
    fn rejects_early_once_no_votes_make_threshold_unreachable() {
        let config = ConsensusConfig {
            allow_self_vote: false,
            ..Default::default()
        };
        let mut cons = Consensus::new(1, Some(config));
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SUPERMAJORITY, 1000)
            .unwrap();

        // 2 no votes cast so far: no_ratio = 2/2 = 100%, comfortably over
        // 1 - 0.67 , so this rejects without waiting for the other 3.
        cons.on_vote(2, 1, ballot_id, VoteValue::No, 5).unwrap();
        cons.on_vote(3, 1, ballot_id, VoteValue::No, 5).unwrap();

        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Rejected);
    }

    #[test]
    fn inhibit_cancels_a_tracked_ballot() {
        let mut cons = Consensus::new(1, None);
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();

        cons.inhibit(1, ballot_id, 1000).unwrap();
        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Cancelled);
    }

    #[test]
    fn inhibited_ballot_key_rejects_further_votes() {
        let mut cons = Consensus::new(1, None);
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();
        cons.inhibit(1, ballot_id, 1000).unwrap();

        let result = cons.on_vote(2, 1, ballot_id, VoteValue::Yes, 5);
        assert_eq!(result, Err(Error::Inhibited));
    }

    #[test]
    fn voters_congruent_mod_k_neighbors_both_count() {
        let config = ConsensusConfig {
            allow_self_vote: false,
            ..Default::default()
        };
        let mut cons = Consensus::new(1, Some(config));
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();

        // 2 and 9 are congruent mod K_NEIGHBORS (7); both must get counted.
        cons.on_vote(2, 1, ballot_id, VoteValue::Yes, 5).unwrap();
        cons.on_vote(9, 1, ballot_id, VoteValue::Yes, 5).unwrap();

        let ballot = cons.get_ballot(1, ballot_id).unwrap();
        assert_eq!(ballot.vote_count, 2);
        assert_eq!(ballot.yes_count, 2);
    }

    #[test]
    fn duplicate_votes_from_the_same_voter_are_ignored() {
        let config = ConsensusConfig {
            allow_self_vote: false,
            ..Default::default()
        };
        let mut cons = Consensus::new(1, Some(config));
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();

        cons.on_vote(2, 1, ballot_id, VoteValue::Yes, 5).unwrap();
        cons.on_vote(2, 1, ballot_id, VoteValue::No, 5).unwrap();

        let ballot = cons.get_ballot(1, ballot_id).unwrap();
        assert_eq!(ballot.vote_count, 1);
        assert_eq!(ballot.yes_count, 1);
        assert_eq!(ballot.no_count, 0);
    }

    #[test]
    fn require_all_neighbors_blocks_early_approval() {
        let config = ConsensusConfig {
            allow_self_vote: false,
            require_all_neighbors: true,
            ..Default::default()
        };
        let mut cons = Consensus::new(1, Some(config));
        let ballot_id = cons
            .propose(ProposalType::ModeChange, 42, threshold::SIMPLE_MAJORITY, 1000)
            .unwrap();

        cons.on_vote(2, 1, ballot_id, VoteValue::Yes, 3).unwrap();
        cons.on_vote(3, 1, ballot_id, VoteValue::Yes, 3).unwrap();
        // 2/2 votes cast already clears simple majority, but the third
        // neighbor hasn't voted yet, so the ballot must still be pending.
        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Pending);

        cons.on_vote(4, 1, ballot_id, VoteValue::Yes, 3).unwrap();
        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Approved);
    }

    #[test]
    fn distinct_proposers_can_reuse_the_same_ballot_id() {
        let mut cons = Consensus::new(99, None);
        // Two external proposers independently allocate ballot id 1.
        cons.on_proposal(1, 1, ProposalType::ModeChange, 0, threshold::SIMPLE_MAJORITY, 0)
            .unwrap();
        cons.on_proposal(2, 1, ProposalType::PowerLimit, 0, threshold::SIMPLE_MAJORITY, 0)
            .unwrap();

        assert_eq!(cons.get_ballot(1, 1).unwrap().proposal_type, ProposalType::ModeChange);
        assert_eq!(cons.get_ballot(2, 1).unwrap().proposal_type, ProposalType::PowerLimit);
    }

    #[test]
    fn ballot_times_out_past_its_deadline() {
        let mut cons = Consensus::new(1, None);
        let ballot_id = cons
            .propose(ProposalType::Shutdown, 0, threshold::UNANIMOUS, 0)
            .unwrap();

        cons.tick(VOTE_TIMEOUT_US + 1);
        assert_eq!(cons.get_result(1, ballot_id), VoteResult::Timeout);
    }

    #[test]
    fn stats_count_timeouts_and_inhibits() {
        let mut cons = Consensus::new(1, None);
        let timed_out_id = cons
            .propose(ProposalType::Shutdown, 0, threshold::UNANIMOUS, 0)
            .unwrap();
        cons.tick(VOTE_TIMEOUT_US + 1);
        assert_eq!(cons.get_result(1, timed_out_id), VoteResult::Timeout);
        assert_eq!(cons.stats().timed_out, 1);

        let inhibited_id = cons
            .propose(ProposalType::ModeChange, 0, threshold::SIMPLE_MAJORITY, 0)
            .unwrap();
        cons.inhibit(1, inhibited_id, 0).unwrap();
        assert_eq!(cons.stats().inhibited, 1);
    }
}

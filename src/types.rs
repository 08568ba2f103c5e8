//! Base types shared by every engine: ids, the closed error set, module/
//! health/vote state machines, the coordination [`Field`], neighbour
//! bookkeeping, capability bitmasks and deadline/slack accounting.

use crate::fixedpoint::Fixed;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Number of topological neighbors per module.
pub const K_NEIGHBORS: usize = 7;

/// Maximum modules in a cluster.
pub const MAX_MODULES: usize = 256;

/// Maximum tasks per module.
pub const MAX_TASKS_PER_MODULE: usize = 8;

/// Default field decay time constant in microseconds (100ms).
pub const FIELD_DECAY_TAU_US: u64 = 100_000;

/// Default heartbeat period in microseconds (10ms).
pub const HEARTBEAT_PERIOD_US: u64 = 10_000;

/// Default DEAD threshold, in missed heartbeats (50ms at the default period).
pub const HEARTBEAT_TIMEOUT_COUNT: u8 = 5;

/// Default consensus vote timeout in microseconds (50ms).
pub const VOTE_TIMEOUT_US: u64 = 50_000;

/// Maximum concurrent ballots per module.
pub const MAX_BALLOTS: usize = 4;

/// Number of field components.
pub const FIELD_COUNT: usize = 6;

// ============================================================================
// Basic Types
// ============================================================================

/// Module identifier (0 = invalid, 0xFF = broadcast).
pub type ModuleId = u8;

/// Task identifier within a module.
pub type TaskId = u8;

/// Ballot identifier, scoped to its proposer (see [`Error`] and the
/// consensus engine's `(ModuleId, BallotId)` keying).
pub type BallotId = u16;

/// Timestamp in microseconds, HAL epoch.
pub type TimeUs = u64;

/// Tick counter.
pub type Tick = u32;

/// Invalid module ID sentinel.
pub const INVALID_MODULE_ID: ModuleId = 0;

/// Invalid ballot ID sentinel.
pub const INVALID_BALLOT_ID: BallotId = 0;

/// Broadcast address.
pub const BROADCAST_ID: ModuleId = 0xFF;

// ============================================================================
// Error Types
// ============================================================================

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Closed error set. No `dyn Error`, no error chains — every failure mode a
/// module can hit at runtime is enumerable ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error {
    /// Invalid argument provided.
    InvalidArg,
    /// A fixed-capacity collection is full.
    NoMemory,
    /// Operation timed out.
    Timeout,
    /// Resource is busy (e.g. a ballot slot already in use).
    Busy,
    /// Item not found.
    NotFound,
    /// Item already exists.
    AlreadyExists,
    /// Quorum not reached.
    NoQuorum,
    /// Proposal was inhibited.
    Inhibited,
    /// Neighbor was lost.
    NeighborLost,
    /// Field has expired.
    FieldExpired,
    /// HAL-level failure.
    HalFailure,
}

// ============================================================================
// Module State
// ============================================================================

/// Module operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum ModuleState {
    /// Initializing, not yet in mesh.
    #[default]
    Init,
    /// Discovering neighbors.
    Discovering,
    /// Normal operation, at least `min_neighbors` alive.
    Active,
    /// Some neighbors lost, below `min_neighbors` but not isolated.
    Degraded,
    /// No neighbors reachable.
    Isolated,
    /// Mesh reformation in progress.
    Reforming,
    /// Graceful shutdown.
    Shutdown,
}

// ============================================================================
// Health State
// ============================================================================

/// Neighbor health state, driven by the heartbeat engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum HealthState {
    /// Never seen.
    #[default]
    Unknown,
    /// Recent heartbeat received.
    Alive,
    /// Missed `suspect_missed_beats` heartbeats, not yet DEAD.
    Suspect,
    /// Missed `timeout_count` heartbeats.
    Dead,
}

// ============================================================================
// Vote Types
// ============================================================================

/// Vote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum VoteValue {
    /// No vote cast.
    #[default]
    Abstain,
    /// Approve proposal.
    Yes,
    /// Reject proposal.
    No,
    /// Block competing proposal outright.
    Inhibit,
}

/// Terminal or in-progress outcome of a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum VoteResult {
    /// Voting in progress.
    #[default]
    Pending,
    /// Threshold reached.
    Approved,
    /// Threshold cannot be reached even if all remaining votes are yes.
    Rejected,
    /// Voting timed out before reaching threshold.
    Timeout,
    /// Cancelled by inhibition.
    Cancelled,
}

// ============================================================================
// Field Components
// ============================================================================

/// Field component identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(usize)]
pub enum FieldComponent {
    /// Computational load potential.
    Load = 0,
    /// Thermal gradient.
    Thermal = 1,
    /// Power consumption.
    Power = 2,
    /// Application-defined 0.
    Custom0 = 3,
    /// Application-defined 1.
    Custom1 = 4,
    /// Deadline slack, normalized [0, 1].
    Slack = 5,
}

impl FieldComponent {
    /// All components, in declaration order.
    pub const ALL: [FieldComponent; FIELD_COUNT] = [
        FieldComponent::Load,
        FieldComponent::Thermal,
        FieldComponent::Power,
        FieldComponent::Custom0,
        FieldComponent::Custom1,
        FieldComponent::Slack,
    ];
}

// ============================================================================
// Coordination Field
// ============================================================================

/// A coordination field published by one module and sampled by its
/// neighbours. Decays with time per the publishing engine's configured
/// decay model; see `field::FieldEngine`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Field {
    /// Field values (Q16.16 fixed-point).
    pub components: [Fixed; FIELD_COUNT],
    /// Publish timestamp (microseconds).
    pub timestamp: TimeUs,
    /// Publishing module.
    pub source: ModuleId,
    /// Monotonic per-source sequence number, wraps at 256.
    pub sequence: u8,
}

impl Field {
    /// An empty, invalid field (`source == INVALID_MODULE_ID`).
    pub const fn new() -> Self {
        Self {
            components: [Fixed::ZERO; FIELD_COUNT],
            timestamp: 0,
            source: INVALID_MODULE_ID,
            sequence: 0,
        }
    }

    /// Build a field from the three most common components.
    pub fn with_values(load: Fixed, thermal: Fixed, power: Fixed) -> Self {
        let mut field = Self::new();
        field.components[FieldComponent::Load as usize] = load;
        field.components[FieldComponent::Thermal as usize] = thermal;
        field.components[FieldComponent::Power as usize] = power;
        field
    }

    /// Read a component.
    pub fn get(&self, component: FieldComponent) -> Fixed {
        self.components[component as usize]
    }

    /// Write a component.
    pub fn set(&mut self, component: FieldComponent, value: Fixed) {
        self.components[component as usize] = value;
    }

    /// Cheap staleness check by elapsed time alone, ignoring decay. The
    /// field engine's `is_expired` additionally accounts for the configured
    /// decay model driving every component to its floor before `max_age_us`.
    pub fn is_valid(&self, now: TimeUs, max_age_us: TimeUs) -> bool {
        self.source != INVALID_MODULE_ID && now.saturating_sub(self.timestamp) < max_age_us
    }

    /// Reset to the empty/invalid state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Componentwise add.
    pub fn add(&self, other: &Field) -> Field {
        let mut out = *self;
        for i in 0..FIELD_COUNT {
            out.components[i] = out.components[i].saturating_add(other.components[i]);
        }
        out
    }

    /// Scale every component by `factor`.
    pub fn scale(&self, factor: Fixed) -> Field {
        let mut out = *self;
        for i in 0..FIELD_COUNT {
            out.components[i] = out.components[i].saturating_mul(factor);
        }
        out
    }

    /// Linear interpolation toward `other` by `t` in `[0, 1]`.
    pub fn lerp(&self, other: &Field, t: Fixed) -> Field {
        let mut out = *self;
        for i in 0..FIELD_COUNT {
            let delta = other.components[i].saturating_sub(out.components[i]);
            out.components[i] = out.components[i].saturating_add(delta.saturating_mul(t));
        }
        out
    }
}

// ============================================================================
// Position
// ============================================================================

/// 3D position used by the `Physical` distance metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Position {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Squared Euclidean distance (avoids a sqrt on embedded targets).
    pub fn distance_squared(&self, other: &Position) -> i32 {
        let dx = (self.x - other.x) as i32;
        let dy = (self.y - other.y) as i32;
        let dz = (self.z - other.z) as i32;
        dx * dx + dy * dy + dz * dz
    }
}

// ============================================================================
// Neighbor Info
// ============================================================================

/// What the topology engine tracks about one neighbour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neighbor {
    /// Neighbor's module ID.
    pub id: ModuleId,
    /// Current health state.
    pub health: HealthState,
    /// Last heartbeat timestamp.
    pub last_seen: TimeUs,
    /// Last received field (may be stale — check `is_valid`/`is_expired`).
    pub last_field: Field,
    /// Distance under the configured metric; lower is closer.
    pub logical_distance: i32,
    /// Consecutive missed heartbeats since the last one received.
    pub missed_heartbeats: u8,
    /// Neighbor's advertised capabilities.
    pub capabilities: Capability,
}

impl Neighbor {
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            health: HealthState::Unknown,
            ..Default::default()
        }
    }

    /// True for ALIVE or SUSPECT — still counted toward the k-set.
    pub fn is_healthy(&self) -> bool {
        matches!(self.health, HealthState::Alive | HealthState::Suspect)
    }
}

// ============================================================================
// Capability Bitmask
// ============================================================================

/// Module capability bitmask. Tasks can require a subset of these; a module
/// only runs a task if it holds every required bit (see [`can_perform`]).
pub type Capability = u16;

/// Standard capability flags.
pub mod capability {
    use super::Capability;

    /// Within thermal limits.
    pub const THERMAL_OK: Capability = 1 << 0;
    /// High power mode available.
    pub const POWER_HIGH: Capability = 1 << 1;
    /// Can aggregate/route messages for other modules.
    pub const GATEWAY: Capability = 1 << 2;
    /// Bidirectional (vehicle-to-grid style) power capable.
    pub const V2G: Capability = 1 << 3;
    pub const RESERVED_4: Capability = 1 << 4;
    pub const RESERVED_5: Capability = 1 << 5;
    pub const RESERVED_6: Capability = 1 << 6;
    pub const RESERVED_7: Capability = 1 << 7;
    /// Application-defined 0.
    pub const CUSTOM_0: Capability = 1 << 8;
    /// Application-defined 1.
    pub const CUSTOM_1: Capability = 1 << 9;
    /// Application-defined 2.
    pub const CUSTOM_2: Capability = 1 << 10;
    /// Application-defined 3.
    pub const CUSTOM_3: Capability = 1 << 11;
}

/// `true` iff `have` holds every bit set in `need`.
#[inline]
pub fn can_perform(have: Capability, need: Capability) -> bool {
    (have & need) == need
}

// ============================================================================
// Deadline / Slack
// ============================================================================

/// Below this slack, a task is marked critical (10 seconds).
pub const SLACK_THRESHOLD_US: TimeUs = 10_000_000;

/// Slack at or above this is normalized to 1.0 (100 seconds).
pub const SLACK_NORMALIZE_US: TimeUs = 100_000_000;

/// A task's deadline and the slack computed against it.
///
/// `slack_us = deadline - (now + duration_est)`; `slack` is that value
/// normalized into `[0, 1]` for publication as `FieldComponent::Slack`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    /// Absolute deadline (microseconds).
    pub deadline: TimeUs,
    /// Estimated remaining duration (microseconds).
    pub duration_est: TimeUs,
    /// Normalized slack, `[0, 1]`.
    pub slack: Fixed,
    /// `true` once slack drops below [`SLACK_THRESHOLD_US`].
    pub critical: bool,
}

impl Deadline {
    pub fn new(deadline: TimeUs, duration_est: TimeUs) -> Self {
        Self {
            deadline,
            duration_est,
            slack: Fixed::ZERO,
            critical: false,
        }
    }

    /// Recompute `slack` and `critical` against the current time.
    pub fn compute_slack(&mut self, now: TimeUs) {
        let completion_time = now.saturating_add(self.duration_est);
        let slack_us = self.deadline as i64 - completion_time as i64;

        self.critical = slack_us < SLACK_THRESHOLD_US as i64;

        let normalized = slack_us as f32 / SLACK_NORMALIZE_US as f32;
        self.slack = Fixed::from_num(normalized.clamp(0.0, 1.0));
    }

    /// `true` once `now` reaches or passes the deadline.
    pub fn is_past_due(&self, now: TimeUs) -> bool {
        now >= self.deadline
    }
}

// ============================================================================
// Threshold Constants
// ============================================================================

/// Common consensus threshold values, as fractions in `[0, 1]`.
pub mod threshold {
    use super::Fixed;

    /// Simple majority (50%).
    pub const SIMPLE_MAJORITY: Fixed = Fixed::from_bits(0x8000);

    /// Supermajority (~67%).
    pub const SUPERMAJORITY: Fixed = Fixed::from_bits(0xAB85);

    /// Unanimous (100%).
    pub const UNANIMOUS: Fixed = Fixed::ONE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_creation() {
        let field = Field::with_values(
            Fixed::from_num(0.5),
            Fixed::from_num(0.3),
            Fixed::from_num(0.8),
        );
        assert_eq!(field.get(FieldComponent::Load), Fixed::from_num(0.5));
    }

    #[test]
    fn position_distance() {
        let p1 = Position::new(0, 0, 0);
        let p2 = Position::new(3, 4, 0);
        assert_eq!(p1.distance_squared(&p2), 25);
    }

    #[test]
    fn field_lerp_reaches_endpoints() {
        let a = Field::with_values(Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let b = Field::with_values(Fixed::ONE, Fixed::ONE, Fixed::ONE);
        let at_zero = a.lerp(&b, Fixed::ZERO);
        let at_one = a.lerp(&b, Fixed::ONE);
        assert_eq!(at_zero.get(FieldComponent::Load), Fixed::ZERO);
        assert_eq!(at_one.get(FieldComponent::Load), Fixed::ONE);
    }

    #[test]
    fn can_perform_requires_all_bits() {
        let have = capability::THERMAL_OK | capability::GATEWAY;
        let need = capability::THERMAL_OK | capability::GATEWAY;
        assert!(can_perform(have, need));
        assert!(!can_perform(capability::THERMAL_OK, need));
    }

    #[test]
    fn deadline_marks_critical_below_threshold() {
        let mut d = Deadline::new(1_000_000, 0);
        d.compute_slack(995_000);
        assert!(d.critical);
        assert!(!d.is_past_due(995_000));
        assert!(d.is_past_due(1_000_000));
    }
}

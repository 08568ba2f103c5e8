//! Heartbeat-driven liveness detection.
//!
//! Failure detection is a kernel concern here rather than an application
//! one: every module tracks ALIVE → SUSPECT → DEAD transitions for its
//! neighbors from periodic heartbeat traffic, and a DEAD transition is what
//! drives the topology engine's reelection.

use crate::types::*;
use heapless::Vec;

// ============================================================================
// Configuration
// ============================================================================

/// Depth of the sent-heartbeat history kept for RTT correlation.
const RTT_HISTORY: usize = 4;

/// Heartbeat engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Send period (microseconds).
    pub period: TimeUs,
    /// Missed beats before DEAD.
    pub timeout_count: u8,
    /// Missed beats before SUSPECT. Valid range is 1..=2 — the point of a
    /// SUSPECT state is an early, non-committal warning, so it has to fire
    /// strictly before DEAD and shouldn't be made to emulate a second DEAD
    /// threshold. Clamped to that range in `Heartbeat::new`.
    pub suspect_missed_beats: u8,
    /// Automatically track send cadence (actual transmission is a HAL
    /// concern; this only flags when a send is due).
    pub auto_broadcast: bool,
    /// Track RTT to neighbors via echoed sequence numbers.
    pub track_latency: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period: HEARTBEAT_PERIOD_US,
            timeout_count: HEARTBEAT_TIMEOUT_COUNT,
            suspect_missed_beats: 1,
            auto_broadcast: true,
            track_latency: false,
        }
    }
}

// ============================================================================
// Neighbor Tracking
// ============================================================================

/// Per-neighbor heartbeat tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatNeighbor {
    pub id: ModuleId,
    pub health: HealthState,
    pub last_seen: TimeUs,
    pub missed_count: u8,
    pub sequence: u8,
    /// EWMA of round-trip time, in microseconds (0 until a sample lands).
    pub avg_latency: TimeUs,
}

impl HeartbeatNeighbor {
    pub fn new(id: ModuleId) -> Self {
        Self {
            id,
            health: HealthState::Unknown,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SentBeat {
    sequence: u8,
    sent_at: TimeUs,
}

// ============================================================================
// Stats
// ============================================================================

/// Operational counters for a module's heartbeat engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatStats {
    /// Number of ALIVE -> SUSPECT edges fired across every tracked neighbor.
    pub suspected: u32,
    /// Number of neighbors declared DEAD.
    pub declared_dead: u32,
}

// ============================================================================
// Heartbeat Engine
// ============================================================================

/// Heartbeat engine: tracks outgoing cadence and every neighbor's health.
pub struct Heartbeat {
    my_id: ModuleId,
    neighbors: Vec<HeartbeatNeighbor, MAX_MODULES>,
    last_send: TimeUs,
    send_sequence: u8,
    sent_history: Vec<SentBeat, RTT_HISTORY>,
    config: HeartbeatConfig,

    on_alive: Option<fn(ModuleId)>,
    on_suspect: Option<fn(ModuleId)>,
    on_dead: Option<fn(ModuleId)>,

    stats: HeartbeatStats,
}

impl Heartbeat {
    pub fn new(my_id: ModuleId, config: Option<HeartbeatConfig>) -> Self {
        let mut config = config.unwrap_or_default();
        config.suspect_missed_beats = config.suspect_missed_beats.clamp(1, 2);

        Self {
            my_id,
            neighbors: Vec::new(),
            last_send: 0,
            send_sequence: 0,
            sent_history: Vec::new(),
            config,
            on_alive: None,
            on_suspect: None,
            on_dead: None,
            stats: HeartbeatStats::default(),
        }
    }

    pub fn stats(&self) -> &HeartbeatStats {
        &self.stats
    }

    pub fn add_neighbor(&mut self, neighbor_id: ModuleId) -> Result<()> {
        if neighbor_id == self.my_id || neighbor_id == INVALID_MODULE_ID {
            return Err(Error::InvalidArg);
        }
        if self.neighbors.iter().any(|n| n.id == neighbor_id) {
            return Err(Error::AlreadyExists);
        }

        let neighbor = HeartbeatNeighbor::new(neighbor_id);
        self.neighbors.push(neighbor).map_err(|_| Error::NoMemory)
    }

    pub fn remove_neighbor(&mut self, neighbor_id: ModuleId) -> Result<()> {
        if let Some(pos) = self.neighbors.iter().position(|n| n.id == neighbor_id) {
            self.neighbors.remove(pos);
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Record a received heartbeat, reviving the sender to ALIVE, and, if
    /// latency tracking is on and `echo_sequence` matches a beat we sent,
    /// fold a fresh RTT sample into that neighbor's EWMA (`avg = avg -
    /// avg/4 + sample/4`).
    pub fn received(
        &mut self,
        sender_id: ModuleId,
        sequence: u8,
        echo_sequence: u8,
        now: TimeUs,
    ) -> Result<()> {
        let track_latency = self.config.track_latency;
        let rtt_sample = if track_latency {
            self.sent_history
                .iter()
                .find(|b| b.sequence == echo_sequence)
                .map(|b| now.saturating_sub(b.sent_at))
        } else {
            None
        };

        let neighbor = self
            .neighbors
            .iter_mut()
            .find(|n| n.id == sender_id)
            .ok_or(Error::NotFound)?;

        let old_health = neighbor.health;

        neighbor.last_seen = now;
        neighbor.missed_count = 0;
        neighbor.sequence = sequence;
        neighbor.health = HealthState::Alive;

        if let Some(rtt) = rtt_sample {
            neighbor.avg_latency = if neighbor.avg_latency == 0 {
                rtt
            } else {
                neighbor.avg_latency - neighbor.avg_latency / 4 + rtt / 4
            };
        }

        if old_health != HealthState::Alive {
            if let Some(callback) = self.on_alive {
                callback(sender_id);
            }
        }

        Ok(())
    }

    /// Periodic tick. Returns the number of neighbors whose health changed.
    pub fn tick(&mut self, now: TimeUs) -> u32 {
        let mut changed = 0u32;

        let timeout = self.config.period * self.config.timeout_count as u64;
        let suspect_threshold = self.config.period * self.config.suspect_missed_beats as u64;

        for neighbor in self.neighbors.iter_mut() {
            if neighbor.health == HealthState::Dead {
                continue;
            }

            let elapsed = now.saturating_sub(neighbor.last_seen);
            let old_health = neighbor.health;

            if elapsed > timeout {
                neighbor.health = HealthState::Dead;
                neighbor.missed_count = self.config.timeout_count;

                if old_health != HealthState::Dead {
                    changed += 1;
                    self.stats.declared_dead += 1;
                    if let Some(callback) = self.on_dead {
                        callback(neighbor.id);
                    }
                }
            } else if elapsed > suspect_threshold {
                neighbor.health = HealthState::Suspect;
                neighbor.missed_count = (elapsed / self.config.period) as u8;

                if old_health != HealthState::Suspect {
                    changed += 1;
                    self.stats.suspected += 1;
                    if let Some(callback) = self.on_suspect {
                        callback(neighbor.id);
                    }
                }
            }
        }

        changed
    }

    /// `true` once `period` has elapsed since the last send.
    pub fn should_send(&self, now: TimeUs) -> bool {
        now.saturating_sub(self.last_send) >= self.config.period
    }

    /// Record that a heartbeat was sent, advancing the sequence and (if
    /// latency tracking is on) remembering the send time for RTT
    /// correlation.
    pub fn mark_sent(&mut self, now: TimeUs) {
        self.last_send = now;
        self.send_sequence = self.send_sequence.wrapping_add(1);

        if self.config.track_latency {
            if self.sent_history.is_full() {
                self.sent_history.remove(0);
            }
            let _ = self.sent_history.push(SentBeat {
                sequence: self.send_sequence,
                sent_at: now,
            });
        }
    }

    pub fn sequence(&self) -> u8 {
        self.send_sequence
    }

    pub fn get_health(&self, neighbor_id: ModuleId) -> HealthState {
        self.neighbors
            .iter()
            .find(|n| n.id == neighbor_id)
            .map(|n| n.health)
            .unwrap_or(HealthState::Unknown)
    }

    /// Current EWMA round-trip estimate, if any sample has landed.
    pub fn get_latency(&self, neighbor_id: ModuleId) -> Option<TimeUs> {
        self.neighbors
            .iter()
            .find(|n| n.id == neighbor_id)
            .filter(|n| n.avg_latency > 0)
            .map(|n| n.avg_latency)
    }

    pub fn time_since(&self, neighbor_id: ModuleId, now: TimeUs) -> Option<TimeUs> {
        self.neighbors
            .iter()
            .find(|n| n.id == neighbor_id)
            .map(|n| now.saturating_sub(n.last_seen))
    }

    pub fn set_callbacks(
        &mut self,
        on_alive: Option<fn(ModuleId)>,
        on_suspect: Option<fn(ModuleId)>,
        on_dead: Option<fn(ModuleId)>,
    ) {
        self.on_alive = on_alive;
        self.on_suspect = on_suspect;
        self.on_dead = on_dead;
    }

    /// The most recently received sequence from a neighbor, for echoing
    /// back in our own next heartbeat (RTT correlation).
    pub fn last_echo_for(&self, neighbor_id: ModuleId) -> u8 {
        self.neighbors
            .iter()
            .find(|n| n.id == neighbor_id)
            .map(|n| n.sequence)
            .unwrap_or(0)
    }

    pub fn create_message(
        &self,
        state: ModuleState,
        load_percent: u8,
        thermal_percent: u8,
        echo_sequence: u8,
    ) -> HeartbeatMessage {
        HeartbeatMessage {
            sender_id: self.my_id,
            sequence: self.send_sequence,
            state,
            neighbor_count: self.neighbors.len() as u8,
            load_percent,
            thermal_percent,
            echo_sequence,
            flags: 0,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Heartbeat broadcast payload, 8 bytes on the wire (see
/// `wire::encode_heartbeat`). Logical shape only — not `#[repr(C)]`.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMessage {
    pub sender_id: ModuleId,
    pub sequence: u8,
    pub state: ModuleState,
    pub neighbor_count: u8,
    pub load_percent: u8,
    pub thermal_percent: u8,
    /// Last sequence received from the recipient, echoed back for RTT
    /// measurement.
    pub echo_sequence: u8,
    pub flags: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_times_out_to_dead() {
        let mut hb = Heartbeat::new(1, None);
        hb.add_neighbor(2).unwrap();

        hb.received(2, 1, 0, 1000).unwrap();
        assert_eq!(hb.get_health(2), HealthState::Alive);

        hb.tick(1000 + HEARTBEAT_PERIOD_US * 6);
        assert_eq!(hb.get_health(2), HealthState::Dead);
    }

    #[test]
    fn default_suspect_threshold_is_one_missed_beat() {
        let mut hb = Heartbeat::new(1, None);
        hb.add_neighbor(2).unwrap();
        hb.received(2, 1, 0, 1000).unwrap();

        hb.tick(1000 + HEARTBEAT_PERIOD_US * 2 + 1);
        assert_eq!(hb.get_health(2), HealthState::Suspect);
    }

    #[test]
    fn suspect_threshold_is_configurable_and_clamped() {
        let config = HeartbeatConfig {
            suspect_missed_beats: 2,
            ..Default::default()
        };
        let mut hb = Heartbeat::new(1, Some(config));
        hb.add_neighbor(2).unwrap();
        hb.received(2, 1, 0, 1000).unwrap();

        // One missed beat: still ALIVE at the looser threshold.
        hb.tick(1000 + HEARTBEAT_PERIOD_US * 2 + 1);
        assert_eq!(hb.get_health(2), HealthState::Alive);

        hb.tick(1000 + HEARTBEAT_PERIOD_US * 3 + 1);
        assert_eq!(hb.get_health(2), HealthState::Suspect);

        // Out-of-range values are clamped, not rejected.
        let too_high = HeartbeatConfig {
            suspect_missed_beats: 9,
            ..Default::default()
        };
        let hb2 = Heartbeat::new(1, Some(too_high));
        assert_eq!(hb2.config.suspect_missed_beats, 2);
    }

    #[test]
    fn rtt_is_tracked_via_echoed_sequence() {
        let config = HeartbeatConfig {
            track_latency: true,
            ..Default::default()
        };
        let mut hb = Heartbeat::new(1, Some(config));
        hb.add_neighbor(2).unwrap();

        hb.mark_sent(1000); // our sequence becomes 1 at t=1000
        hb.received(2, 1, 1, 1250).unwrap(); // neighbor echoes our seq 1
        assert_eq!(hb.get_latency(2), Some(250));
    }

    #[test]
    fn stats_count_suspect_and_dead_transitions() {
        let mut hb = Heartbeat::new(1, None);
        hb.add_neighbor(2).unwrap();
        hb.received(2, 1, 0, 1000).unwrap();

        hb.tick(1000 + HEARTBEAT_PERIOD_US * 2 + 1);
        assert_eq!(hb.stats().suspected, 1);

        hb.tick(1000 + HEARTBEAT_PERIOD_US * 6);
        assert_eq!(hb.stats().declared_dead, 1);
    }

    #[test]
    fn message_size_matches_wire_layout() {
        // Logical field count must match the 8-byte wire encoding in wire.rs.
        let msg = HeartbeatMessage {
            sender_id: 1,
            sequence: 0,
            state: ModuleState::Active,
            neighbor_count: 0,
            load_percent: 0,
            thermal_percent: 0,
            echo_sequence: 0,
            flags: 0,
        };
        assert_eq!(msg.sender_id, 1);
    }
}

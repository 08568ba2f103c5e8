//! Property tests for the heartbeat engine: ALIVE/SUSPECT/DEAD transitions,
//! neighbor management, suspect/dead timing, sequence/RTT bookkeeping.

use swarmkernel::heartbeat::*;
use swarmkernel::types::*;
use proptest::prelude::*;

fn valid_module_id() -> impl Strategy<Value = ModuleId> {
    1u8..=254u8
}

fn different_module_ids() -> impl Strategy<Value = (ModuleId, ModuleId)> {
    (1u8..=127u8, 128u8..=254u8)
}

fn timestamp() -> impl Strategy<Value = TimeUs> {
    1_000_000u64..100_000_000u64
}

fn no_latency_config() -> HeartbeatConfig {
    HeartbeatConfig {
        period: 10_000,
        timeout_count: 5,
        suspect_missed_beats: 1,
        auto_broadcast: false,
        track_latency: false,
    }
}

proptest! {
    /// Unknown -> Alive -> Suspect -> Dead -> Alive (recovery).
    #[test]
    fn state_transitions_valid((my_id, neighbor_id) in different_module_ids(), now in timestamp()) {
        let mut hb = Heartbeat::new(my_id, Some(no_latency_config()));
        hb.add_neighbor(neighbor_id).unwrap();

        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Unknown);

        hb.received(neighbor_id, 1, 0, now).unwrap();
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Alive);

        hb.tick(now + 25_000); // 2.5 periods, default suspect boundary is 1 period
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Suspect);

        hb.tick(now + 60_000); // 6 periods, timeout_count is 5
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Dead);

        hb.received(neighbor_id, 2, 0, now + 70_000).unwrap();
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Alive);
    }

    #[test]
    fn fresh_heartbeat_resets_missed_count((my_id, neighbor_id) in different_module_ids(), now in timestamp()) {
        let mut hb = Heartbeat::new(my_id, Some(no_latency_config()));
        hb.add_neighbor(neighbor_id).unwrap();

        hb.received(neighbor_id, 1, 0, now).unwrap();
        hb.tick(now + 15_000); // past the 1-period suspect boundary
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Suspect);

        hb.received(neighbor_id, 2, 0, now + 30_000).unwrap();
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Alive);

        hb.tick(now + 35_000); // only 5ms since the fresh beat
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Alive);
    }
}

proptest! {
    #[test]
    fn cannot_add_self(my_id in valid_module_id()) {
        let mut hb = Heartbeat::new(my_id, None);
        prop_assert!(matches!(hb.add_neighbor(my_id), Err(Error::InvalidArg)));
    }

    #[test]
    fn cannot_add_invalid_id(my_id in valid_module_id()) {
        let mut hb = Heartbeat::new(my_id, None);
        prop_assert!(matches!(hb.add_neighbor(INVALID_MODULE_ID), Err(Error::InvalidArg)));
    }

    #[test]
    fn cannot_add_duplicate((my_id, neighbor_id) in different_module_ids()) {
        let mut hb = Heartbeat::new(my_id, None);
        hb.add_neighbor(neighbor_id).unwrap();
        prop_assert!(matches!(hb.add_neighbor(neighbor_id), Err(Error::AlreadyExists)));
    }

    #[test]
    fn remove_unknown_fails((my_id, neighbor_id) in different_module_ids()) {
        let mut hb = Heartbeat::new(my_id, None);
        prop_assert!(matches!(hb.remove_neighbor(neighbor_id), Err(Error::NotFound)));
    }

    #[test]
    fn add_remove_then_add_again_succeeds((my_id, neighbor_id) in different_module_ids()) {
        let mut hb = Heartbeat::new(my_id, None);
        hb.add_neighbor(neighbor_id).unwrap();
        hb.remove_neighbor(neighbor_id).unwrap();
        prop_assert!(hb.add_neighbor(neighbor_id).is_ok());
    }
}

proptest! {
    /// Suspect fires exactly at `suspect_missed_beats * period`.
    #[test]
    fn suspect_threshold_correct(
        (my_id, neighbor_id) in different_module_ids(),
        period in 5_000u64..50_000u64,
        now in timestamp(),
    ) {
        let config = HeartbeatConfig { period, timeout_count: 5, suspect_missed_beats: 1, auto_broadcast: false, track_latency: false };
        let mut hb = Heartbeat::new(my_id, Some(config));
        hb.add_neighbor(neighbor_id).unwrap();
        hb.received(neighbor_id, 1, 0, now).unwrap();

        hb.tick(now + period - 1);
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Alive);

        hb.tick(now + period + 1);
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Suspect);
    }

    /// Dead fires exactly at `timeout_count * period`.
    #[test]
    fn dead_threshold_correct(
        (my_id, neighbor_id) in different_module_ids(),
        period in 5_000u64..20_000u64,
        timeout_count in 3u8..10u8,
        now in timestamp(),
    ) {
        let config = HeartbeatConfig { period, timeout_count, suspect_missed_beats: 1, auto_broadcast: false, track_latency: false };
        let mut hb = Heartbeat::new(my_id, Some(config));
        hb.add_neighbor(neighbor_id).unwrap();
        hb.received(neighbor_id, 1, 0, now).unwrap();

        let timeout = period * timeout_count as u64;

        hb.tick(now + timeout - 1);
        prop_assert!(hb.get_health(neighbor_id) != HealthState::Dead, "should not be dead before timeout");

        hb.tick(now + timeout + 1);
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Dead);
    }

    /// `suspect_missed_beats` is clamped to 1..=2: requesting anything
    /// above 2 behaves exactly like requesting 2.
    #[test]
    fn suspect_missed_beats_clamped_to_two(
        (my_id, neighbor_id) in different_module_ids(),
        requested in 2u8..=255u8,
        now in timestamp(),
    ) {
        let period = 10_000u64;
        let config = HeartbeatConfig { period, suspect_missed_beats: requested, ..no_latency_config() };
        let mut hb = Heartbeat::new(my_id, Some(config));
        hb.add_neighbor(neighbor_id).unwrap();
        hb.received(neighbor_id, 1, 0, now).unwrap();

        // Just before 2*period: still Alive under the clamp.
        hb.tick(now + period * 2 - 1);
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Alive);

        // Just after 2*period: Suspect, same as requesting exactly 2.
        hb.tick(now + period * 2 + 1);
        prop_assert_eq!(hb.get_health(neighbor_id), HealthState::Suspect);
    }
}

proptest! {
    #[test]
    fn sequence_increments(my_id in valid_module_id(), now in timestamp(), count in 1usize..100usize) {
        let mut hb = Heartbeat::new(my_id, None);
        let initial = hb.sequence();

        for i in 0..count {
            hb.mark_sent(now + i as u64 * 10_000);
        }

        prop_assert_eq!(hb.sequence(), initial.wrapping_add(count as u8));
    }

    /// RTT is only sampled when `track_latency` is on and the echoed
    /// sequence matches a beat we actually sent.
    #[test]
    fn rtt_requires_matching_echo(my_id in valid_module_id(), neighbor_id in valid_module_id(), sent_at in 0u64..1_000_000u64, rtt in 1u64..10_000u64) {
        prop_assume!(my_id != neighbor_id);
        let config = HeartbeatConfig { track_latency: true, ..no_latency_config() };
        let mut hb = Heartbeat::new(my_id, Some(config));
        hb.add_neighbor(neighbor_id).unwrap();

        hb.mark_sent(sent_at);
        let our_sequence = hb.sequence();

        // Echoing a sequence we never sent should not produce a latency sample.
        hb.received(neighbor_id, 1, our_sequence.wrapping_add(37), sent_at + rtt).unwrap();
        prop_assert_eq!(hb.get_latency(neighbor_id), None);
    }
}

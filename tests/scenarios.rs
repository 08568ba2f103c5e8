//! End-to-end scenarios driving whole meshes of `Module`s through a shared
//! `FieldRegion`, with no HAL/wire layer in between — outbound messages
//! are routed directly to every other module's next-tick inbound queue,
//! the same loopback topology `src/bin/simulate.rs` uses.

use swarmkernel::field::FieldRegion;
use swarmkernel::fixedpoint::Fixed;
use swarmkernel::module::{InboundMessage, Module, OutboundMessage};
use swarmkernel::types::{FieldComponent, ModuleState, Position, TimeUs, VoteResult};

const TICK_PERIOD_US: u64 = 10_000;

fn route(sender: usize, msg: OutboundMessage, inboxes: &mut [Vec<InboundMessage>]) {
    let routed = match msg {
        OutboundMessage::Heartbeat(hb) => InboundMessage::Heartbeat(hb),
        OutboundMessage::Discovery(disc) => InboundMessage::Discovery(disc),
        OutboundMessage::Proposal(p) => InboundMessage::Proposal(p),
        OutboundMessage::Vote(v) => InboundMessage::Vote(v),
        OutboundMessage::Inhibit(inh) => InboundMessage::Inhibit(inh),
    };
    for (i, inbox) in inboxes.iter_mut().enumerate() {
        if i != sender {
            inbox.push(routed);
        }
    }
}

fn run_tick(
    modules: &mut [Module],
    region: &mut FieldRegion,
    inboxes: &mut [Vec<InboundMessage>],
    now: TimeUs,
) {
    let mut outbound = Vec::new();
    for (i, module) in modules.iter_mut().enumerate() {
        let inbound = core::mem::take(&mut inboxes[i]);
        for msg in module.tick(region, &inbound, now).expect("tick") {
            outbound.push((i, msg));
        }
    }
    for (sender, msg) in outbound {
        route(sender, msg, inboxes);
    }
}

/// Runs every module except `silent`, so its absence can simulate a dead
/// neighbor without removing it from the mesh outright.
fn run_tick_except(
    modules: &mut [Module],
    region: &mut FieldRegion,
    inboxes: &mut [Vec<InboundMessage>],
    now: TimeUs,
    silent: usize,
) {
    let mut outbound = Vec::new();
    for (i, module) in modules.iter_mut().enumerate() {
        if i == silent {
            continue;
        }
        let inbound = core::mem::take(&mut inboxes[i]);
        for msg in module.tick(region, &inbound, now).expect("tick") {
            outbound.push((i, msg));
        }
    }
    for (sender, msg) in outbound {
        route(sender, msg, inboxes);
    }
    inboxes[silent].clear(); // the silent module hears nothing either.
}

fn build_mesh(count: u8) -> (Vec<Module>, FieldRegion, Vec<Vec<InboundMessage>>) {
    let region = FieldRegion::new();
    let modules: Vec<Module> = (1..=count)
        .map(|id| {
            let mut module = Module::new(id, "node", Position::new((id as i16) * 10, 0, 0));
            module.start().unwrap();
            module
        })
        .collect();
    let inboxes = (0..count as usize).map(|_| Vec::new()).collect();
    (modules, region, inboxes)
}

#[test]
fn mesh_discovers_neighbors_and_reaches_active() {
    let (mut modules, mut region, mut inboxes) = build_mesh(6);

    let mut now = 0u64;
    for _ in 0..200 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }

    for module in &modules {
        assert_eq!(module.state(), ModuleState::Active, "module {} never stabilized", module.id());
        assert!(module.neighbor_count() >= 3, "module {} has too few neighbors", module.id());
    }
}

#[test]
fn losing_a_neighbor_drops_it_from_the_topology() {
    let (mut modules, mut region, mut inboxes) = build_mesh(6);

    let mut now = 0u64;
    for _ in 0..200 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }
    assert!(modules[0].neighbors().iter().any(|n| n.id == 2));

    // Module 2 goes silent: stop ticking it and stop routing messages to
    // or from it. Everyone else keeps running until the heartbeat timeout
    // (5 missed periods) elapses.
    for _ in 0..20 {
        now += TICK_PERIOD_US;
        run_tick_except(&mut modules, &mut region, &mut inboxes, now, 1);
    }

    assert!(
        !modules[0].neighbors().iter().any(|n| n.id == 2),
        "module 2 should have been reelected out after going silent"
    );
    assert!(modules[0].neighbor_count() >= 3, "remaining mesh should still meet min_neighbors");
}

#[test]
fn supermajority_proposal_is_approved_once_neighbors_vote() {
    // Four modules, default min_neighbors=3 with only 3 peers each — every
    // module becomes every other module's neighbor.
    let (mut modules, mut region, mut inboxes) = build_mesh(4);

    let mut now = 0u64;
    for _ in 0..150 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }
    for module in &modules {
        assert_eq!(module.state(), ModuleState::Active);
    }

    let ballot_id = modules[0].propose_mode(42, now).unwrap();

    // One tick broadcasts the proposal, the next carries the votes back,
    // the one after that lets the proposer observe the completed ballot.
    for _ in 0..5 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }

    assert_eq!(modules[0].get_own_consensus_result(ballot_id), VoteResult::Approved);
}

#[test]
fn inhibit_cancels_a_ballot_for_every_module_that_hears_it() {
    let (mut modules, mut region, mut inboxes) = build_mesh(4);

    let mut now = 0u64;
    for _ in 0..150 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }

    let ballot_id = modules[0].propose_mode(1, now).unwrap();
    now += TICK_PERIOD_US;
    run_tick(&mut modules, &mut region, &mut inboxes, now); // proposal reaches neighbors

    // A neighbor vetoes it before casting a normal vote.
    modules[1].inhibit_ballot(modules[0].id(), ballot_id, now).unwrap();

    for _ in 0..3 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }

    assert_eq!(modules[0].get_own_consensus_result(ballot_id), VoteResult::Cancelled);
    assert_eq!(
        modules[2].get_consensus_result(modules[0].id(), ballot_id),
        VoteResult::Cancelled
    );
}

#[test]
fn sparse_mesh_stays_degraded_below_min_neighbors() {
    // Only two modules can ever see each other: degraded forever, never
    // isolated (it does have one neighbor) and never active (< 3).
    let (mut modules, mut region, mut inboxes) = build_mesh(2);

    let mut now = 0u64;
    for _ in 0..300 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }

    for module in &modules {
        assert_eq!(module.state(), ModuleState::Degraded);
        assert_eq!(module.neighbor_count(), 1);
    }
}

#[test]
fn published_field_is_sampled_consistently_across_the_mesh() {
    let (mut modules, mut region, mut inboxes) = build_mesh(5);

    // Distinct, stable loads (0.2, 0.4, 0.6, 0.8, 1.0) so each module's
    // neighbor aggregate is a genuine, predictable function of everyone
    // else's field rather than a copy of its own.
    for (i, module) in modules.iter_mut().enumerate() {
        let load = Fixed::from_num((i + 1) as f32 / 5.0);
        module.update_field(load, Fixed::ZERO, Fixed::ZERO);
    }

    let mut now = 0u64;
    for _ in 0..250 {
        now += TICK_PERIOD_US;
        run_tick(&mut modules, &mut region, &mut inboxes, now);
    }

    for module in &modules {
        assert_eq!(module.state(), ModuleState::Active);
    }

    // In a fully connected mesh, every neighbor's load for module 0 (the
    // lowest) is strictly higher than its own, and for module 4 (the
    // highest) strictly lower — a weighted average of strictly-higher (or
    // strictly-lower) values can never land below (or above) its own load,
    // so the load gradient's sign is pinned regardless of the distance
    // weighting. A dead aggregation path (gradient = 0 - my_field) would
    // instead make every gradient negative.
    let load_index = FieldComponent::Load as usize;
    assert!(
        modules[0].gradients()[load_index] > Fixed::ZERO,
        "lowest-load module should be pulled up by its neighbors"
    );
    assert!(
        modules[4].gradients()[load_index] < Fixed::ZERO,
        "highest-load module should be pulled down by its neighbors"
    );
}

//! In-process multi-module simulation.
//!
//! Runs a small mesh of modules over a shared [`FieldRegion`], acting as
//! the postman between them: each tick, every module's outbound messages
//! are broadcast into every other module's inbound queue for the next
//! tick. Prints a JSON summary of the resulting neighbor sets and ballot
//! outcomes — useful for eyeballing convergence without a real transport.

use serde_json::json;
use swarmkernel::field::FieldRegion;
use swarmkernel::fixedpoint::Fixed;
use swarmkernel::module::{InboundMessage, Module, OutboundMessage};
use swarmkernel::types::{FieldComponent, Position};

const MODULE_COUNT: u8 = 6;
const TICK_PERIOD_US: u64 = 10_000;
const TICKS: u32 = 200;

fn main() {
    let mut region = FieldRegion::new();
    let mut modules: Vec<Module> = (1..=MODULE_COUNT)
        .map(|id| {
            let position = Position::new((id as i16) * 10, 0, 0);
            let mut module = Module::new(id, "sim", position);
            module.start().expect("start");
            module
        })
        .collect();

    let mut inboxes: Vec<Vec<InboundMessage>> = (0..MODULE_COUNT as usize).map(|_| Vec::new()).collect();
    let mut ballot_id = None;

    let mut now: u64 = 0;
    for tick in 0..TICKS {
        now += TICK_PERIOD_US;

        let load = Fixed::from_num(((tick % 10) as f32) / 10.0);
        for module in modules.iter_mut() {
            module.update_field(load, Fixed::ZERO, Fixed::ZERO);
        }

        if tick == 50 {
            ballot_id = Some(modules[0].propose_mode(1, now).expect("propose"));
        }

        let mut all_outbound: Vec<(usize, OutboundMessage)> = Vec::new();
        for (i, module) in modules.iter_mut().enumerate() {
            let inbound = core::mem::take(&mut inboxes[i]);
            let outbound = module.tick(&mut region, &inbound, now).expect("tick");
            for msg in outbound {
                all_outbound.push((i, msg));
            }
        }

        for (sender, msg) in all_outbound {
            for (i, inbox) in inboxes.iter_mut().enumerate() {
                if i == sender {
                    continue;
                }
                let routed = match msg {
                    OutboundMessage::Heartbeat(hb) => InboundMessage::Heartbeat(hb),
                    OutboundMessage::Discovery(disc) => InboundMessage::Discovery(disc),
                    OutboundMessage::Proposal(p) => InboundMessage::Proposal(p),
                    OutboundMessage::Vote(v) => InboundMessage::Vote(v),
                    OutboundMessage::Inhibit(inh) => InboundMessage::Inhibit(inh),
                };
                inbox.push(routed);
            }
        }

        // Field publication is a direct region write (publish already ran
        // inside tick), so neighbors see it on their next sample without a
        // Field message round-trip in this single-process simulation.
    }

    let summary: Vec<_> = modules
        .iter()
        .map(|m| {
            let status = m.status();
            json!({
                "id": status.id,
                "state": format!("{:?}", status.state),
                "neighbor_count": status.neighbor_count,
                "active_ballots": status.active_ballots,
                "ticks_total": status.ticks_total,
                "messages_dropped": status.messages_dropped,
                "reelections": status.reelections,
                "ballots_timed_out": status.ballots_timed_out,
                "ballots_inhibited": status.ballots_inhibited,
            })
        })
        .collect();

    let ballot_result = ballot_id.map(|id| modules[0].get_own_consensus_result(id));

    let report = json!({
        "modules": summary,
        "proposed_ballot_id": ballot_id,
        "proposed_ballot_result": ballot_result.map(|r| format!("{:?}", r)),
        "load_field": format!("{:?}", FieldComponent::Load),
    });

    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}

use crate::control::rail_system::components::{NodeId, ResourceId, SegmentId, SignalAspect};
use crate::control::rail_system::routing;
use crate::control::train::{NextMove, TrainState};
use crate::control::world::Simulation;
use tracing::{debug, info, warn};

/// Composite dispatch order of a waiting train.
///
/// Trains at the section boundary (entering, or about to reach their end
/// terminal) come first to keep the boundaries flowing; within a group
/// higher effective priority wins, and longer waiters break ties.
fn sort_key(sim: &Simulation, index: usize) -> (u8, i64, u64) {
    let train = &sim.trains[index];
    let waiting_since = train.waiting_since.unwrap_or(sim.clock);

    let at_entry =
        train.state == TrainState::ReadyToProceed && train.current_segment.is_none();
    let entering_terminal = train.state == TrainState::StoppedAwaitingClearance
        && matches!(train.next_move(), NextMove::Acquire { node, .. } if node == train.end_node);

    let group = if at_entry || entering_terminal { 0 } else { 1 };
    let priority = train.effective_priority(sim.clock, &sim.flags);

    (group, -priority, waiting_since)
}

/// Considers every waiting train in dispatch order and tries to move it
/// one (segment, node) pair forward.
pub(crate) fn dispatch_waiting_trains(sim: &mut Simulation) {
    let mut order: Vec<usize> = (0..sim.trains.len())
        .filter(|&i| sim.trains[i].is_waiting_for_dispatch())
        .collect();
    order.sort_by_key(|&i| sort_key(sim, i));

    for index in order {
        match sim.trains[index].state {
            TrainState::ReadyToProceed => consider_ready(sim, index),
            TrainState::StoppedAwaitingClearance => consider_stopped(sim, index),
            TrainState::BoardingPassengers => consider_boarding(sim, index),
            _ => {}
        }
    }
}

fn consider_ready(sim: &mut Simulation, index: usize) {
    if sim.trains[index].route.is_empty() {
        debug!(train = %sim.trains[index].id, "ready without a route; skipping");
        return;
    }

    let NextMove::Acquire {
        departure,
        segment,
        node,
    } = sim.trains[index].next_move()
    else {
        debug!(train = %sim.trains[index].id, "ready with inconsistent route; skipping");
        return;
    };

    if sim.segment_blocked(&segment) {
        let start = sim.trains[index].start_node.clone();
        if !attempt_reroute_and_dispatch(sim, index, &start) {
            debug!(
                train = %sim.trains[index].id,
                segment = %segment,
                "⛔ planned first segment unusable and no alternate found"
            );
        }
        return;
    }

    if !departure_cleared(sim, &departure) {
        debug!(train = %sim.trains[index].id, signal = %departure, "⛔ held at red signal");
        return;
    }

    if !sim.segment_locked(&segment) && !sim.node_locked(&node) {
        acquire_and_run(sim, index, segment, node);
    } else {
        let start = sim.trains[index].start_node.clone();
        if !attempt_reroute_and_dispatch(sim, index, &start) {
            debug!(
                train = %sim.trains[index].id,
                segment = %segment,
                "⛔ blocked at entry, no immediate alternate route"
            );
        }
    }
}

fn consider_stopped(sim: &mut Simulation, index: usize) {
    let next = sim.trains[index].next_move();
    match next {
        NextMove::AtDestination => {}
        NextMove::Malformed => {
            let from = sim.trains[index]
                .holding_node()
                .unwrap_or_else(|| sim.trains[index].start_node.clone());
            if !attempt_reroute_and_dispatch(sim, index, &from) {
                warn!(
                    train = %sim.trains[index].id,
                    "stopped with inconsistent route and no way to reroute"
                );
            }
        }
        NextMove::Acquire {
            departure,
            segment,
            node,
        } => {
            if sim.segment_blocked(&segment) {
                if !attempt_reroute_and_dispatch(sim, index, &departure) {
                    debug!(
                        train = %sim.trains[index].id,
                        at = %departure,
                        segment = %segment,
                        "⛔ next segment unusable, holding"
                    );
                }
                return;
            }

            if !departure_cleared(sim, &departure) {
                debug!(train = %sim.trains[index].id, signal = %departure, "⛔ held at red signal");
                return;
            }

            if !sim.segment_locked(&segment) && !sim.node_locked(&node) {
                acquire_and_run(sim, index, segment, node);
            } else if !attempt_reroute_and_dispatch(sim, index, &departure) {
                debug!(
                    train = %sim.trains[index].id,
                    at = %departure,
                    "⛔ blocked, no alternate found currently"
                );
            }
        }
    }
}

fn consider_boarding(sim: &mut Simulation, index: usize) {
    let done = sim.trains[index]
        .boarding_until
        .is_some_and(|until| sim.clock >= until);
    if done {
        let clock = sim.clock;
        let train = &mut sim.trains[index];
        train.state = TrainState::StoppedAwaitingClearance;
        train.boarding_until = None;
        train.waiting_since = Some(clock);
        info!(train = %train.id, "✅ boarding complete, awaiting clearance");
    }
}

/// A departure node only gates movement when it is a signal; anything
/// else always clears.
fn departure_cleared(sim: &Simulation, departure: &NodeId) -> bool {
    match sim.node(departure).and_then(|node| node.signal_aspect()) {
        Some(aspect) => aspect == SignalAspect::Green,
        None => true,
    }
}

/// Acquires the next (segment, node) pair and transitions the train to
/// running in one step, then applies fairness pressure to the trains
/// left waiting.
fn acquire_and_run(sim: &mut Simulation, index: usize, segment: SegmentId, node: NodeId) {
    sim.locked.insert(ResourceId::Segment(segment.clone()));
    sim.locked.insert(ResourceId::Node(node));

    let train = &mut sim.trains[index];
    train.state = TrainState::Running;
    train.speed_kph = 60;
    train.current_segment = Some(segment.clone());
    train.position_on_segment = 0.0;
    train.waiting_since = None;
    info!(train = %train.id, class = ?train.class, segment = %segment, "🟢 dispatched");

    bump_deferred_waiters(sim, index);
}

/// Every train passed over in favour of the dispatched one gains a point
/// of boost, so nobody starves behind a busy class.
fn bump_deferred_waiters(sim: &mut Simulation, dispatched: usize) {
    if !(sim.flags.train_type && sim.flags.punctuality) {
        return;
    }
    for (i, train) in sim.trains.iter_mut().enumerate() {
        if i != dispatched
            && matches!(
                train.state,
                TrainState::ReadyToProceed | TrainState::StoppedAwaitingClearance
            )
        {
            train.boost += 1;
        }
    }
}

/// Replans from the given node towards the train's destination and, if
/// the cheapest viable alternative has a free first hop, dispatches onto
/// it immediately.
fn attempt_reroute_and_dispatch(sim: &mut Simulation, index: usize, from: &NodeId) -> bool {
    let end = sim.trains[index].end_node.clone();
    let Some(candidate) = routing::best_viable(sim, from, &end) else {
        return false;
    };

    let first_segment = candidate.segments[0].clone();
    let first_node = candidate.nodes[1].clone();

    if sim.segment_locked(&first_segment)
        || sim.node_locked(&first_node)
        || sim.segment_blocked(&first_segment)
    {
        return false;
    }

    {
        let train = &mut sim.trains[index];
        train.route = candidate.segments;
        train.node_path = candidate.nodes;
    }
    info!(
        train = %sim.trains[index].id,
        segment = %first_segment,
        "🔁 rerouted onto alternate route"
    );
    acquire_and_run(sim, index, first_segment, first_node);
    true
}

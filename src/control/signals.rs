use crate::control::rail_system::components::{NodeId, NodeKind, NodeState};
use crate::control::train::{NextMove, TrainState};
use crate::control::world::Simulation;
use std::collections::HashSet;
use tracing::debug;

/// Signal changes applied by one controller sweep, for event emission.
#[derive(Debug, Default, Clone)]
pub struct SignalSweep {
    pub greens: Vec<NodeId>,
    pub reds: Vec<NodeId>,
}

impl SignalSweep {
    pub fn is_empty(&self) -> bool {
        self.greens.is_empty() && self.reds.is_empty()
    }
}

/// One proactive sweep of the automatic signal controller.
///
/// First pass turns departure signals green for trains whose next
/// segment and node are free; second pass turns green signals back red
/// when no waiting train needs them, unless a running train still passes
/// them or an adjacent segment is held. Signals manually touched within
/// the grace window are never changed.
pub(crate) fn sweep(sim: &mut Simulation) -> SignalSweep {
    let grace = sim.config.override_grace;
    let desired = desired_greens(sim);

    let mut applied = SignalSweep::default();

    for id in &desired {
        let Some(node) = sim.node(id) else { continue };
        if node.kind != NodeKind::Signal || node.state == NodeState::Green {
            continue;
        }
        if node.overridden_recently(sim.clock, grace) {
            continue;
        }
        sim.set_node_state(id, NodeState::Green, false);
        applied.greens.push(id.clone());
    }

    let reds = red_candidates(sim, &desired, grace);
    for id in &reds {
        sim.set_node_state(id, NodeState::Red, false);
        applied.reds.push(id.clone());
    }

    if !applied.is_empty() {
        debug!(
            greens = applied.greens.len(),
            reds = applied.reds.len(),
            "🤖 signal sweep applied"
        );
    }
    applied
}

/// Departure signals of trains that could proceed right now.
fn desired_greens(sim: &Simulation) -> HashSet<NodeId> {
    let mut desired = HashSet::new();

    for train in &sim.trains {
        if !matches!(
            train.state,
            TrainState::ReadyToProceed | TrainState::StoppedAwaitingClearance
        ) {
            continue;
        }
        let NextMove::Acquire {
            departure,
            segment,
            node,
        } = train.next_move()
        else {
            continue;
        };
        if sim.segment_blocked(&segment) || sim.segment_locked(&segment) {
            continue;
        }
        if sim.node_locked(&node) {
            continue;
        }
        if sim
            .node(&departure)
            .is_some_and(|n| n.overridden_recently(sim.clock, sim.config.override_grace))
        {
            continue;
        }
        desired.insert(departure);
    }

    desired
}

/// Green signals nobody needs, safe to close.
fn red_candidates(sim: &Simulation, desired: &HashSet<NodeId>, grace: u64) -> Vec<NodeId> {
    let mut protected: HashSet<&NodeId> = HashSet::new();
    for train in &sim.trains {
        if train.state == TrainState::Running {
            protected.extend(train.node_path.iter());
        }
    }

    sim.nodes
        .iter()
        .filter(|node| node.kind == NodeKind::Signal && node.state == NodeState::Green)
        .filter(|node| !desired.contains(&node.id))
        .filter(|node| !node.overridden_recently(sim.clock, grace))
        .filter(|node| !protected.contains(&node.id))
        .filter(|node| {
            // A held adjacent segment means a train is about to pass here.
            !sim.network()
                .neighbours(&node.id)
                .any(|(_, segment)| sim.segment_locked(segment))
        })
        .map(|node| node.id.clone())
        .collect()
}

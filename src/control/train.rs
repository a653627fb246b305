use crate::control::rail_system::components::{NodeId, ResourceId, SegmentId, TrainClass, TrainId};
use crate::control::world::{PriorityFlags, Simulation};
use crate::general::Clock;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle state of an active train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainState {
    /// Spawned, waiting for the planner to assign a route.
    WaitingPlan,
    /// Route assigned, waiting at the section entry for dispatch.
    ReadyToProceed,
    /// Moving along its current segment.
    Running,
    /// Dwelling at a platform.
    BoardingPassengers,
    /// Holding at a node until the next (segment, node) pair is granted.
    StoppedAwaitingClearance,
    /// Done; removed from the active set at the end of the tick.
    Exited,
}

/// The resources a waiting train would have to acquire next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextMove {
    /// Acquire `segment` and `node`, departing past `departure`.
    Acquire {
        departure: NodeId,
        segment: SegmentId,
        node: NodeId,
    },
    /// Stopped immediately before the final node of the route.
    AtDestination,
    /// Route bookkeeping is inconsistent for the current state.
    Malformed,
}

/// One train inside the section.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    #[serde(rename = "type")]
    pub class: TrainClass,
    pub start_node: NodeId,
    pub end_node: NodeId,
    pub scheduled_arrival: Clock,
    pub state: TrainState,
    /// Assigned route as an ordered list of segments.
    pub route: Vec<SegmentId>,
    /// Node path derived from the route.
    pub node_path: Vec<NodeId>,
    #[serde(rename = "currentSegmentId")]
    pub current_segment: Option<SegmentId>,
    /// Fraction of the current segment already covered, in `[0, 1]`.
    pub position_on_segment: f64,
    #[serde(rename = "speed_kph")]
    pub speed_kph: u32,
    pub waiting_since: Option<Clock>,
    #[serde(rename = "boardingTimerEndsAt")]
    pub boarding_until: Option<Clock>,
    /// Dynamic priority boost, grown each time another train is
    /// dispatched ahead of this one.
    pub boost: u32,
}

impl Train {
    pub(crate) fn spawned(
        id: TrainId,
        name: String,
        class: TrainClass,
        start_node: NodeId,
        end_node: NodeId,
        scheduled_arrival: Clock,
        clock: Clock,
    ) -> Self {
        Train {
            id,
            name,
            class,
            start_node,
            end_node,
            scheduled_arrival,
            state: TrainState::WaitingPlan,
            route: Vec::new(),
            node_path: Vec::new(),
            current_segment: None,
            position_on_segment: 0.0,
            speed_kph: 0,
            waiting_since: Some(clock),
            boarding_until: None,
            boost: 0,
        }
    }

    /// Index of the segment the train last entered within its route.
    pub fn route_index(&self) -> Option<usize> {
        let current = self.current_segment.as_ref()?;
        self.route.iter().position(|segment| segment == current)
    }

    /// The next (departure node, segment, node) triple the train needs,
    /// given its state. Meaningful for waiting states only.
    pub fn next_move(&self) -> NextMove {
        match self.state {
            TrainState::ReadyToProceed => {
                let (Some(segment), Some(departure), Some(node)) = (
                    self.route.first(),
                    self.node_path.first(),
                    self.node_path.get(1),
                ) else {
                    return NextMove::Malformed;
                };
                NextMove::Acquire {
                    departure: departure.clone(),
                    segment: segment.clone(),
                    node: node.clone(),
                }
            }
            TrainState::StoppedAwaitingClearance => {
                let Some(index) = self.route_index() else {
                    return NextMove::Malformed;
                };
                if index + 1 >= self.route.len() {
                    return NextMove::AtDestination;
                }
                let (Some(departure), Some(node)) =
                    (self.node_path.get(index + 1), self.node_path.get(index + 2))
                else {
                    return NextMove::Malformed;
                };
                NextMove::Acquire {
                    departure: departure.clone(),
                    segment: self.route[index + 1].clone(),
                    node: node.clone(),
                }
            }
            _ => NextMove::Malformed,
        }
    }

    /// The node the train is currently standing at, used as the origin
    /// for local rerouting.
    pub fn holding_node(&self) -> Option<NodeId> {
        match self.route_index() {
            Some(index) => self.node_path.get(index + 1).cloned(),
            None => self.node_path.last().cloned().or(Some(self.start_node.clone())),
        }
    }

    /// Effective priority under the given operator flags: class base,
    /// accumulated boost and lateness pressure.
    pub fn effective_priority(&self, clock: Clock, flags: &PriorityFlags) -> i64 {
        let base = if flags.train_type {
            self.class.base_priority() as i64
        } else {
            1
        };
        let punctuality = if flags.punctuality {
            (clock.saturating_sub(self.scheduled_arrival) / 60) as i64
        } else {
            0
        };
        base + self.boost as i64 + punctuality
    }

    pub fn is_waiting_for_dispatch(&self) -> bool {
        matches!(
            self.state,
            TrainState::ReadyToProceed
                | TrainState::StoppedAwaitingClearance
                | TrainState::BoardingPassengers
        )
    }
}

/// Advances every running train along its segment and handles node
/// arrivals. One tick covers `tick_rate * sim_speed / travel_time` of a
/// segment.
pub(crate) fn advance_running_trains(sim: &mut Simulation) {
    let increment =
        (sim.tick_rate * sim.sim_speed) as f64 / sim.config.travel_time as f64;

    for index in 0..sim.trains.len() {
        if sim.trains[index].state != TrainState::Running {
            continue;
        }
        {
            let train = &mut sim.trains[index];
            train.position_on_segment = (train.position_on_segment + increment).min(1.0);
            debug!(
                train = %train.id,
                segment = ?train.current_segment,
                position = train.position_on_segment,
                "running"
            );
        }
        if sim.trains[index].position_on_segment >= 1.0 {
            handle_arrival(sim, index);
        }
    }
}

/// A running train crossed the end of its segment: release the segment
/// and the node behind it in one step, then decide the follow-up state.
fn handle_arrival(sim: &mut Simulation, index: usize) {
    let Some((completed, route_index, cleared_node, arrived_node)) = ({
        let train = &sim.trains[index];
        train
            .current_segment
            .clone()
            .and_then(|segment| train.route_index().map(|i| (segment, i)))
            .and_then(|(segment, i)| {
                let cleared = train.node_path.get(i)?.clone();
                let arrived = train.node_path.get(i + 1)?.clone();
                Some((segment, i, cleared, arrived))
            })
    }) else {
        let train = &mut sim.trains[index];
        warn!(train = %train.id, "malformed route on arrival; holding at current node");
        train.state = TrainState::StoppedAwaitingClearance;
        train.speed_kph = 0;
        train.waiting_since = Some(sim.clock);
        return;
    };

    sim.locked.remove(&ResourceId::Segment(completed.clone()));
    sim.locked.remove(&ResourceId::Node(cleared_node.clone()));
    // A segment that went faulty or weather-struck underneath the train
    // stays unusable after it clears.
    if sim.segment_blocked(&completed) {
        sim.locked.insert(ResourceId::Segment(completed.clone()));
    }
    sim.plan_needed = true;

    debug!(
        train = %sim.trains[index].id,
        cleared = %cleared_node,
        segment = %completed,
        arrived = %arrived_node,
        "cleared segment"
    );

    if route_index + 1 >= sim.trains[index].route.len() {
        sim.locked.remove(&ResourceId::Node(arrived_node.clone()));
        let train = &mut sim.trains[index];
        train.state = TrainState::Exited;
        train.speed_kph = 0;
        info!(train = %train.id, node = %arrived_node, "✅ exited the section");
        return;
    }

    let train = &mut sim.trains[index];
    if arrived_node.is_platform(&sim.config.platform_prefix) {
        train.state = TrainState::BoardingPassengers;
        train.speed_kph = 0;
        train.boarding_until = Some(sim.clock + sim.config.boarding_dwell);
        info!(train = %train.id, node = %arrived_node, "boarding passengers");
    } else {
        train.state = TrainState::StoppedAwaitingClearance;
        train.speed_kph = 0;
        train.waiting_since = Some(sim.clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::world::PriorityFlags;

    fn waiting_train() -> Train {
        Train::spawned(
            TrainId::new("12001"),
            "TRN-001-SHA".into(),
            TrainClass::Shatabdi,
            NodeId::new("A"),
            NodeId::new("C"),
            0,
            0,
        )
    }

    #[test]
    fn ready_train_moves_from_route_head() {
        let mut train = waiting_train();
        train.state = TrainState::ReadyToProceed;
        train.route = vec![SegmentId::new("S1"), SegmentId::new("S2")];
        train.node_path = vec![NodeId::new("A"), NodeId::new("B"), NodeId::new("C")];

        assert_eq!(
            train.next_move(),
            NextMove::Acquire {
                departure: NodeId::new("A"),
                segment: SegmentId::new("S1"),
                node: NodeId::new("B"),
            }
        );
    }

    #[test]
    fn stopped_train_moves_past_its_holding_node() {
        let mut train = waiting_train();
        train.state = TrainState::StoppedAwaitingClearance;
        train.route = vec![SegmentId::new("S1"), SegmentId::new("S2")];
        train.node_path = vec![NodeId::new("A"), NodeId::new("B"), NodeId::new("C")];
        train.current_segment = Some(SegmentId::new("S1"));

        assert_eq!(
            train.next_move(),
            NextMove::Acquire {
                departure: NodeId::new("B"),
                segment: SegmentId::new("S2"),
                node: NodeId::new("C"),
            }
        );
        assert_eq!(train.holding_node(), Some(NodeId::new("B")));
    }

    #[test]
    fn stopped_train_before_final_node_is_at_destination() {
        let mut train = waiting_train();
        train.state = TrainState::StoppedAwaitingClearance;
        train.route = vec![SegmentId::new("S1")];
        train.node_path = vec![NodeId::new("A"), NodeId::new("C")];
        train.current_segment = Some(SegmentId::new("S1"));

        assert_eq!(train.next_move(), NextMove::AtDestination);
    }

    #[test]
    fn inconsistent_route_is_malformed() {
        let mut train = waiting_train();
        train.state = TrainState::StoppedAwaitingClearance;
        train.route = vec![SegmentId::new("S1")];
        train.node_path = vec![NodeId::new("A"), NodeId::new("C")];
        train.current_segment = Some(SegmentId::new("S9"));

        assert_eq!(train.next_move(), NextMove::Malformed);
    }

    #[test]
    fn priority_combines_class_boost_and_lateness() {
        let mut train = waiting_train();
        let flags = PriorityFlags::default();

        assert_eq!(train.effective_priority(0, &flags), 10);

        train.boost = 2;
        // 180 seconds late adds three minutes of pressure.
        assert_eq!(train.effective_priority(180, &flags), 15);

        let without_type = PriorityFlags {
            train_type: false,
            ..PriorityFlags::default()
        };
        assert_eq!(train.effective_priority(180, &without_type), 6);
    }
}

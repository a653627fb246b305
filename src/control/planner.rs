use crate::control::rail_system::components::{NodeId, ResourceId, SegmentId, TrainId};
use crate::control::rail_system::routing;
use crate::control::train::TrainState;
use crate::control::world::Simulation;
use crate::general::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanAction {
    /// Start time has already come; the train may depart now.
    Proceed,
    /// The train has a route but must wait for its start time.
    Hold,
}

/// One planned route assignment for a waiting train.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInstruction {
    pub train_id: TrainId,
    pub action: PlanAction,
    pub route: Vec<SegmentId>,
    pub start_time: Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Every plannable train got a conflict-free slot.
    Feasible,
    /// The wall-clock budget ran out; the plan covers a prefix of the
    /// trains only.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub instructions: Vec<PlanInstruction>,
    pub status: SolveStatus,
}

impl Plan {
    pub fn empty() -> Self {
        Plan {
            instructions: Vec::new(),
            status: SolveStatus::Feasible,
        }
    }
}

/// A candidate route of one waiting train.
#[derive(Debug, Clone)]
pub struct RouteOption {
    pub segments: Vec<SegmentId>,
    pub nodes: Vec<NodeId>,
}

/// Everything the solver needs to know about one waiting train.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub train_id: TrainId,
    /// Effective priority, clamped to at least one.
    pub weight: u64,
    pub scheduled_arrival: Clock,
    pub routes: Vec<RouteOption>,
}

/// A fixed resource booking of an in-flight train.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub resource: ResourceId,
    pub from: Clock,
    pub until: Clock,
}

/// Self-contained solver input, detached from the world so the solve can
/// run on a blocking worker while the simulation keeps ticking.
#[derive(Debug, Clone)]
pub struct PlannerInput {
    pub clock: Clock,
    pub horizon: u64,
    pub travel_time: u64,
    pub junction_occupancy: u64,
    pub budget: Duration,
    pub requests: Vec<RouteRequest>,
    pub reservations: Vec<Reservation>,
}

/// Collects the solver input from the current world: candidate routes and
/// weights for every train waiting on a plan, plus fixed reservations for
/// everything already rolling.
pub fn build_input(sim: &mut Simulation) -> PlannerInput {
    let requests = collect_requests(sim);
    let reservations = collect_reservations(sim);

    PlannerInput {
        clock: sim.clock,
        horizon: sim.config.horizon,
        travel_time: sim.config.travel_time,
        junction_occupancy: sim.config.junction_occupancy,
        budget: sim.config.solve_budget,
        requests,
        reservations,
    }
}

fn collect_requests(sim: &mut Simulation) -> Vec<RouteRequest> {
    let waiting: Vec<usize> = (0..sim.trains.len())
        .filter(|&i| sim.trains[i].state == TrainState::WaitingPlan)
        .collect();

    let mut requests = Vec::with_capacity(waiting.len());
    let mut newly_unroutable = Vec::new();

    for index in waiting {
        let (id, start, end, arrival) = {
            let train = &sim.trains[index];
            (
                train.id.clone(),
                train.start_node.clone(),
                train.end_node.clone(),
                train.scheduled_arrival,
            )
        };
        // Reachability is a cheap gate before the bounded enumeration.
        let connected = {
            let blocked = |segment: &SegmentId| sim.segment_blocked(segment);
            sim.network().reachable(&start, &end, &blocked)
        };
        let routes: Vec<RouteOption> = if connected {
            routing::possible_routes(sim, &start, &end)
                .into_iter()
                .filter(|candidate| candidate.nodes.len() == candidate.segments.len() + 1)
                .map(|candidate| RouteOption {
                    segments: candidate.segments,
                    nodes: candidate.nodes,
                })
                .collect()
        } else {
            Vec::new()
        };

        if routes.is_empty() {
            if !sim.unroutable_logged.contains(&id) {
                warn!(train = %id, %start, %end, "⚠️ no route through the section; train stays waiting");
                newly_unroutable.push(id.clone());
            }
            continue;
        }

        let weight = sim.trains[index]
            .effective_priority(sim.clock, &sim.flags)
            .max(1) as u64;
        requests.push(RouteRequest {
            train_id: id,
            weight,
            scheduled_arrival: arrival,
            routes,
        });
    }

    sim.unroutable_logged.extend(newly_unroutable);
    requests
}

/// Running trains hold their current segment for its remaining travel
/// fraction and every downstream junction and segment of their route,
/// chained head to tail from the current clock.
fn collect_reservations(sim: &Simulation) -> Vec<Reservation> {
    let mut reservations = Vec::new();

    for train in &sim.trains {
        if train.state != TrainState::Running || train.route.is_empty() {
            continue;
        }
        let (Some(current), Some(route_index)) =
            (train.current_segment.clone(), train.route_index())
        else {
            continue;
        };

        let remaining = (sim.config.travel_time as f64
            * (1.0 - train.position_on_segment.clamp(0.0, 1.0))) as u64;
        let mut end = sim.clock + remaining;
        reservations.push(Reservation {
            resource: ResourceId::Segment(current),
            from: sim.clock,
            until: end,
        });

        for (offset, segment) in train.route[route_index + 1..].iter().enumerate() {
            let Some(junction) = train.node_path.get(route_index + offset + 1) else {
                break;
            };
            let junction_end = end + sim.config.junction_occupancy;
            reservations.push(Reservation {
                resource: ResourceId::Node(junction.clone()),
                from: end,
                until: junction_end,
            });
            let segment_end = junction_end + sim.config.travel_time;
            reservations.push(Reservation {
                resource: ResourceId::Segment(segment.clone()),
                from: junction_end,
                until: segment_end,
            });
            end = segment_end;
        }
    }

    reservations
}

/// Per-resource booked intervals. Mutual exclusion of the emitted plan
/// follows from never booking into an occupied slot.
#[derive(Debug, Default)]
struct Timelines {
    booked: HashMap<ResourceId, Vec<(Clock, Clock)>>,
}

impl Timelines {
    fn book(&mut self, resource: ResourceId, from: Clock, until: Clock) {
        self.booked.entry(resource).or_default().push((from, until));
    }

    /// If `[from, until)` collides on `resource`, returns the end of one
    /// colliding interval as the next candidate start.
    fn conflict(&self, resource: &ResourceId, from: Clock, until: Clock) -> Option<Clock> {
        let intervals = self.booked.get(resource)?;
        intervals
            .iter()
            .filter(|(a, b)| *a < until && from < *b)
            .map(|(_, b)| *b)
            .max()
    }
}

/// The chained intervals a route occupies relative to its start time:
/// each segment for the travel time, then the junction behind it for the
/// junction occupancy.
fn route_chain(
    option: &RouteOption,
    travel_time: u64,
    junction_occupancy: u64,
) -> Vec<(ResourceId, u64, u64)> {
    let hop = travel_time + junction_occupancy;
    let mut chain = Vec::with_capacity(option.segments.len() * 2);
    for (i, segment) in option.segments.iter().enumerate() {
        let offset = i as u64 * hop;
        chain.push((
            ResourceId::Segment(segment.clone()),
            offset,
            offset + travel_time,
        ));
        chain.push((
            ResourceId::Node(option.nodes[i + 1].clone()),
            offset + travel_time,
            offset + hop,
        ));
    }
    chain
}

/// Earliest start at or after `not_before` at which the whole chain fits
/// without touching any booked interval.
fn earliest_fit(
    timelines: &Timelines,
    chain: &[(ResourceId, u64, u64)],
    not_before: Clock,
    not_after: Clock,
) -> Option<Clock> {
    let mut start = not_before;
    loop {
        if start > not_after {
            return None;
        }
        let mut bumped = None;
        for (resource, from_offset, until_offset) in chain {
            if let Some(free_at) =
                timelines.conflict(resource, start + from_offset, start + until_offset)
            {
                let candidate = free_at.saturating_sub(*from_offset);
                bumped = Some(bumped.map_or(candidate, |b: Clock| b.max(candidate)));
            }
        }
        match bumped {
            Some(candidate) if candidate > start => start = candidate,
            Some(_) => start += 1,
            None => return Some(start),
        }
    }
}

/// Assigns one route and start time to every plannable train such that
/// no segment or junction is ever booked twice at once, greedily serving
/// higher weights first and minimising each train's weighted completion.
///
/// The result is feasible but not proven optimal; infeasible trains are
/// left out of the plan and stay waiting.
pub fn solve(input: PlannerInput) -> Plan {
    if input.requests.is_empty() {
        return Plan::empty();
    }

    info!(
        trains = input.requests.len(),
        reservations = input.reservations.len(),
        "🧠 planning routes"
    );

    let deadline = Instant::now() + input.budget;
    let horizon_end = input.clock + input.horizon;

    let mut timelines = Timelines::default();
    for reservation in &input.reservations {
        timelines.book(reservation.resource.clone(), reservation.from, reservation.until);
    }

    let mut requests = input.requests;
    requests.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then(a.scheduled_arrival.cmp(&b.scheduled_arrival))
            .then(a.train_id.cmp(&b.train_id))
    });

    let mut instructions = Vec::with_capacity(requests.len());
    let mut status = SolveStatus::Feasible;

    for request in &requests {
        if Instant::now() >= deadline {
            warn!("planner budget exhausted; emitting partial plan");
            status = SolveStatus::TimedOut;
            break;
        }

        let mut best: Option<(u64, usize, Clock, &RouteOption)> = None;
        for option in &request.routes {
            let chain = route_chain(option, input.travel_time, input.junction_occupancy);
            let Some(start) = earliest_fit(&timelines, &chain, input.clock, horizon_end) else {
                continue;
            };
            let completion =
                start + option.segments.len() as u64 * (input.travel_time + input.junction_occupancy);
            let objective = request.weight * completion;
            let candidate = (objective, option.segments.len(), start, option);
            let better = match &best {
                None => true,
                Some((obj, len, ..)) => {
                    objective < *obj || (objective == *obj && option.segments.len() < *len)
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        let Some((_, _, start, option)) = best else {
            debug!(train = %request.train_id, "no conflict-free slot within the horizon");
            continue;
        };

        for (resource, from_offset, until_offset) in
            route_chain(option, input.travel_time, input.junction_occupancy)
        {
            timelines.book(resource, start + from_offset, start + until_offset);
        }

        let action = if start <= input.clock {
            PlanAction::Proceed
        } else {
            PlanAction::Hold
        };
        debug!(
            train = %request.train_id,
            ?action,
            start,
            weight = request.weight,
            "planned"
        );
        instructions.push(PlanInstruction {
            train_id: request.train_id.clone(),
            action,
            route: option.segments.clone(),
            start_time: start,
        });
    }

    info!(planned = instructions.len(), ?status, "🧠 planner finished");
    Plan {
        instructions,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str) -> SegmentId {
        SegmentId::new(id)
    }

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    fn linear_option() -> RouteOption {
        RouteOption {
            segments: vec![seg("S1"), seg("S2")],
            nodes: vec![node("A"), node("B"), node("C")],
        }
    }

    fn reversed_option() -> RouteOption {
        RouteOption {
            segments: vec![seg("S2"), seg("S1")],
            nodes: vec![node("C"), node("B"), node("A")],
        }
    }

    fn input(requests: Vec<RouteRequest>, reservations: Vec<Reservation>) -> PlannerInput {
        PlannerInput {
            clock: 0,
            horizon: 7200,
            travel_time: 30,
            junction_occupancy: 10,
            budget: Duration::from_secs(10),
            requests,
            reservations,
        }
    }

    fn occupations(instruction: &PlanInstruction, nodes: &[NodeId]) -> Vec<(ResourceId, u64, u64)> {
        let option = RouteOption {
            segments: instruction.route.clone(),
            nodes: nodes.to_vec(),
        };
        route_chain(&option, 30, 10)
            .into_iter()
            .map(|(resource, from, until)| {
                (resource, instruction.start_time + from, instruction.start_time + until)
            })
            .collect()
    }

    fn overlaps(a: &(ResourceId, u64, u64), b: &(ResourceId, u64, u64)) -> bool {
        a.0 == b.0 && a.1 < b.2 && b.1 < a.2
    }

    #[test]
    fn empty_input_yields_empty_feasible_plan() {
        let plan = solve(input(Vec::new(), Vec::new()));
        assert!(plan.instructions.is_empty());
        assert_eq!(plan.status, SolveStatus::Feasible);
    }

    #[test]
    fn head_on_conflict_gets_disjoint_slots() {
        let requests = vec![
            RouteRequest {
                train_id: TrainId::new("EXP"),
                weight: 3,
                scheduled_arrival: 0,
                routes: vec![linear_option()],
            },
            RouteRequest {
                train_id: TrainId::new("PAS"),
                weight: 8,
                scheduled_arrival: 0,
                routes: vec![reversed_option()],
            },
        ];
        let plan = solve(input(requests, Vec::new()));
        assert_eq!(plan.instructions.len(), 2);

        let exp = plan
            .instructions
            .iter()
            .find(|i| i.train_id == TrainId::new("EXP"))
            .unwrap();
        let pas = plan
            .instructions
            .iter()
            .find(|i| i.train_id == TrainId::new("PAS"))
            .unwrap();

        let exp_busy = occupations(exp, &[node("A"), node("B"), node("C")]);
        let pas_busy = occupations(pas, &[node("C"), node("B"), node("A")]);
        for a in &exp_busy {
            for b in &pas_busy {
                assert!(!overlaps(a, b), "{a:?} overlaps {b:?}");
            }
        }

        // The heavier train is served first.
        assert!(pas.start_time <= exp.start_time);
        assert_eq!(pas.action, PlanAction::Proceed);
    }

    #[test]
    fn higher_weight_starts_no_later_on_shared_resources() {
        let requests = vec![
            RouteRequest {
                train_id: TrainId::new("EXPRESS"),
                weight: 3,
                scheduled_arrival: 0,
                routes: vec![linear_option()],
            },
            RouteRequest {
                train_id: TrainId::new("SHATABDI"),
                weight: 10,
                scheduled_arrival: 1,
                routes: vec![linear_option()],
            },
        ];
        let plan = solve(input(requests, Vec::new()));
        assert_eq!(plan.instructions.len(), 2);

        let shatabdi = plan
            .instructions
            .iter()
            .find(|i| i.train_id == TrainId::new("SHATABDI"))
            .unwrap();
        let express = plan
            .instructions
            .iter()
            .find(|i| i.train_id == TrainId::new("EXPRESS"))
            .unwrap();
        assert!(shatabdi.start_time <= express.start_time);
        assert_eq!(shatabdi.action, PlanAction::Proceed);
        assert_eq!(express.action, PlanAction::Hold);
    }

    #[test]
    fn fixed_reservations_push_new_trains_back() {
        let reservations = vec![
            Reservation {
                resource: ResourceId::Segment(seg("S1")),
                from: 0,
                until: 25,
            },
            Reservation {
                resource: ResourceId::Node(node("B")),
                from: 25,
                until: 35,
            },
        ];
        let requests = vec![RouteRequest {
            train_id: TrainId::new("T1"),
            weight: 1,
            scheduled_arrival: 0,
            routes: vec![linear_option()],
        }];
        let plan = solve(input(requests, reservations));
        let instruction = &plan.instructions[0];

        let busy = occupations(instruction, &[node("A"), node("B"), node("C")]);
        assert!(!busy
            .iter()
            .any(|slot| overlaps(slot, &(ResourceId::Segment(seg("S1")), 0, 25))));
        assert!(!busy
            .iter()
            .any(|slot| overlaps(slot, &(ResourceId::Node(node("B")), 25, 35))));
        assert_eq!(instruction.action, PlanAction::Hold);
    }

    #[test]
    fn exhausted_budget_returns_partial_plan() {
        let requests = vec![RouteRequest {
            train_id: TrainId::new("T1"),
            weight: 1,
            scheduled_arrival: 0,
            routes: vec![linear_option()],
        }];
        let mut exhausted = input(requests, Vec::new());
        exhausted.budget = Duration::ZERO;
        let plan = solve(exhausted);
        assert!(plan.instructions.is_empty());
        assert_eq!(plan.status, SolveStatus::TimedOut);
    }
}

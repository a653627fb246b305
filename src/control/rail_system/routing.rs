use crate::control::rail_system::components::{NodeId, SegmentId, SegmentStatus};
use crate::control::world::Simulation;
use tracing::debug;

/// One enumerated route: the segment path and the node path it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    pub segments: Vec<SegmentId>,
    pub nodes: Vec<NodeId>,
}

impl RouteCandidate {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Enumerates candidate routes between two nodes, skipping segments that
/// are faulty or weather-blocked at enumeration time. Shortest routes
/// come first.
pub fn possible_routes(sim: &Simulation, from: &NodeId, to: &NodeId) -> Vec<RouteCandidate> {
    let blocked = |segment: &SegmentId| sim.segment_blocked(segment);
    let node_paths = sim.network().find_all_paths(
        from,
        to,
        sim.config.max_paths,
        sim.config.max_depth,
        &blocked,
    );

    node_paths
        .into_iter()
        .filter_map(|nodes| {
            let segments = sim.network().node_path_to_segment_path(&nodes)?;
            Some(RouteCandidate { segments, nodes })
        })
        .filter(|candidate| !candidate.is_empty())
        .collect()
}

/// Whether a route can be claimed right now: none of its segments may be
/// locked, faulty or weather-blocked, and no node along it may be locked.
/// The node at `from_index` is where the train itself stands and is
/// exempt.
pub fn is_viable(sim: &Simulation, candidate: &RouteCandidate, from_index: usize) -> bool {
    for (index, segment_id) in candidate.segments.iter().enumerate() {
        let node_before = &candidate.nodes[index];
        let node_after = &candidate.nodes[index + 1];

        if index != from_index && sim.node_locked(node_before) {
            return false;
        }
        if sim.segment_locked(segment_id) || sim.segment_blocked(segment_id) {
            return false;
        }
        if sim.node_locked(node_after) {
            return false;
        }
    }
    true
}

/// Scores a route; lower is better. Length always counts, congestion
/// adds five per locked segment and track condition three per
/// non-operational segment, each under its operator flag.
pub fn score(sim: &Simulation, segments: &[SegmentId]) -> u64 {
    let mut score = segments.len() as u64;

    if sim.flags.congestion {
        let occupied = segments
            .iter()
            .filter(|segment| sim.segment_locked(segment))
            .count() as u64;
        score += occupied * 5;
    }

    if sim.flags.track_condition {
        let degraded = segments
            .iter()
            .filter(|segment| {
                sim.segment(segment)
                    .is_some_and(|s| s.status != SegmentStatus::Operational)
            })
            .count() as u64;
        score += degraded * 3;
    }

    score
}

/// The cheapest viable route between two nodes, if any. Ordering is
/// stable, so equally scored routes keep their discovery order.
pub fn best_viable(sim: &Simulation, from: &NodeId, to: &NodeId) -> Option<RouteCandidate> {
    let mut viable: Vec<RouteCandidate> = possible_routes(sim, from, to)
        .into_iter()
        .filter(|candidate| is_viable(sim, candidate, 0))
        .collect();

    if viable.is_empty() {
        debug!(%from, %to, "no viable route");
        return None;
    }

    viable.sort_by_key(|candidate| score(sim, &candidate.segments));
    viable.into_iter().next()
}

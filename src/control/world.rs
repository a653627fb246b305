use crate::control::dispatcher;
use crate::control::planner::PlanInstruction;
use crate::control::rail_system::components::{
    Node, NodeId, NodeState, ResourceId, Segment, SegmentId, SegmentStatus, TrainId, Weather,
};
use crate::control::rail_system::network::{Layout, LayoutError, RailNetwork};
use crate::control::schedule::ScheduleEntry;
use crate::control::train::{self, Train, TrainState};
use crate::general::{Clock, SimConfig};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Operator-controlled weighting flags. Congestion and track condition
/// awareness are authoritative on the server and always on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityFlags {
    pub congestion: bool,
    pub train_type: bool,
    pub punctuality: bool,
    pub track_condition: bool,
    pub weather: bool,
}

impl Default for PriorityFlags {
    fn default() -> Self {
        PriorityFlags {
            congestion: true,
            train_type: true,
            punctuality: true,
            track_condition: true,
            weather: false,
        }
    }
}

impl PriorityFlags {
    /// Forces the always-on flags back on, whatever the operator sent.
    pub fn sanitized(mut self) -> Self {
        self.congestion = true;
        self.track_condition = true;
        self
    }
}

/// Immutable copy of the world handed to consumers once per tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: Clock,
    pub network: NetworkSnapshot,
    pub trains: Vec<Train>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub nodes: Vec<Node>,
    #[serde(rename = "trackSegments")]
    pub track_segments: Vec<Segment>,
}

/// The authoritative world of one simulated section.
///
/// All mutation happens through the owning driver task; consumers only
/// ever see [`Snapshot`]s.
#[derive(Debug)]
pub struct Simulation {
    pub(crate) section_code: String,
    pub(crate) config: SimConfig,
    pub(crate) clock: Clock,
    pub(crate) tick_rate: u64,
    pub(crate) sim_speed: u64,
    pub(crate) network: RailNetwork,
    pub(crate) nodes: Vec<Node>,
    node_index: HashMap<NodeId, usize>,
    pub(crate) segments: Vec<Segment>,
    segment_index: HashMap<SegmentId, usize>,
    pub(crate) locked: HashSet<ResourceId>,
    pub(crate) trains: Vec<Train>,
    pub(crate) spawned: HashSet<TrainId>,
    pub(crate) timetable: Vec<ScheduleEntry>,
    pub(crate) flags: PriorityFlags,
    pub(crate) plan_needed: bool,
    /// Trains already reported as unroutable, to log them only once.
    pub(crate) unroutable_logged: HashSet<TrainId>,
}

impl Simulation {
    pub fn new(
        section_code: impl Into<String>,
        layout: Layout,
        timetable: Vec<ScheduleEntry>,
        config: SimConfig,
    ) -> Result<Self, LayoutError> {
        let network = RailNetwork::build(&layout.nodes, &layout.segments)?;

        let node_index = layout
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();
        let segment_index = layout
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| (segment.id.clone(), i))
            .collect();

        // Segments already faulty in the layout are unusable from the start.
        let locked = layout
            .segments
            .iter()
            .filter(|segment| segment.status == SegmentStatus::Faulty)
            .map(|segment| ResourceId::Segment(segment.id.clone()))
            .collect();

        let section_code = section_code.into().trim().to_uppercase();
        info!(section = %section_code, "🚀 interlocking simulation ready");

        Ok(Simulation {
            section_code,
            tick_rate: config.tick_rate,
            sim_speed: 1,
            config,
            clock: 0,
            network,
            nodes: layout.nodes,
            node_index,
            segments: layout.segments,
            segment_index,
            locked,
            trains: Vec::new(),
            spawned: HashSet::new(),
            timetable,
            flags: PriorityFlags::default(),
            plan_needed: true,
            unroutable_logged: HashSet::new(),
        })
    }

    pub fn section_code(&self) -> &str {
        &self.section_code
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn plan_needed(&self) -> bool {
        self.plan_needed
    }

    pub fn network(&self) -> &RailNetwork {
        &self.network
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        let index = *self.node_index.get(id)?;
        Some(&mut self.nodes[index])
    }

    pub fn segment(&self, id: &SegmentId) -> Option<&Segment> {
        self.segment_index.get(id).map(|&i| &self.segments[i])
    }

    pub(crate) fn segment_mut(&mut self, id: &SegmentId) -> Option<&mut Segment> {
        let index = *self.segment_index.get(id)?;
        Some(&mut self.segments[index])
    }

    pub fn segment_locked(&self, id: &SegmentId) -> bool {
        self.locked.contains(&ResourceId::Segment(id.clone()))
    }

    pub fn node_locked(&self, id: &NodeId) -> bool {
        self.locked.contains(&ResourceId::Node(id.clone()))
    }

    /// Whether a segment is unusable independent of locks: faulty, or
    /// weather-struck while weather awareness is on.
    pub fn segment_blocked(&self, id: &SegmentId) -> bool {
        match self.segment(id) {
            Some(segment) => {
                segment.status == SegmentStatus::Faulty
                    || (self.flags.weather && segment.weather == Weather::Bad)
            }
            None => true,
        }
    }

    /// Advances the world by one tick: clock, spawning, dispatch and
    /// train movement. Signal automation and snapshots are driven from
    /// outside, after this returns.
    pub fn tick(&mut self) {
        self.clock += self.tick_rate * self.sim_speed;
        self.spawn_due_trains();
        dispatcher::dispatch_waiting_trains(self);
        train::advance_running_trains(self);
        self.trains.retain(|train| train.state != TrainState::Exited);
    }

    /// Spawns timetable entries whose arrival time has come, a bounded
    /// number per tick to keep entry pressure sane.
    fn spawn_due_trains(&mut self) {
        let due: Vec<ScheduleEntry> = self
            .timetable
            .iter()
            .filter(|entry| {
                entry.arrival_secs <= self.clock && !self.spawned.contains(&entry.train_no)
            })
            .take(self.config.max_spawn_per_tick)
            .cloned()
            .collect();

        for entry in due {
            info!(
                train = %entry.train_no,
                class = ?entry.class,
                arrival = entry.arrival_secs,
                "📅 spawned, waiting for a plan"
            );
            self.spawned.insert(entry.train_no.clone());
            self.trains.push(Train::spawned(
                entry.train_no,
                entry.name,
                entry.class,
                entry.start_node,
                entry.end_node,
                entry.arrival_secs,
                self.clock,
            ));
            self.plan_needed = true;
        }
    }

    /// Installs planned routes on trains still waiting for one. Trains
    /// in any other state ignore their instruction, which makes plan
    /// application idempotent.
    pub fn apply_plan(&mut self, instructions: &[PlanInstruction]) {
        for instruction in instructions {
            let Some(index) = self
                .trains
                .iter()
                .position(|train| train.id == instruction.train_id)
            else {
                continue;
            };
            if self.trains[index].state != TrainState::WaitingPlan {
                continue;
            }
            let Some(node_path) = self.network.segment_path_to_node_path_from(
                &self.trains[index].start_node,
                &instruction.route,
            ) else {
                warn!(train = %instruction.train_id, "plan instruction with broken route; ignored");
                continue;
            };
            let train = &mut self.trains[index];
            train.route = instruction.route.clone();
            train.node_path = node_path;
            train.state = TrainState::ReadyToProceed;
            info!(train = %train.id, "plan received, ready to proceed");
        }
    }

    /// Sets the displayed state of a node. Manual changes stamp the
    /// override clock so signal automation keeps its hands off for the
    /// grace window.
    pub fn set_node_state(&mut self, id: &NodeId, state: NodeState, manual: bool) -> bool {
        let clock = self.clock;
        let Some(node) = self.node_mut(id) else {
            warn!(node = %id, "attempted to set state of unknown node");
            return false;
        };
        node.state = state;
        if manual {
            node.is_manually_overridden = true;
            node.last_manual_override_at = Some(clock);
        }
        info!(node = %id, ?state, manual, "🔔 signal state set");
        self.plan_needed = true;
        true
    }

    /// Marks a segment operational or faulty, keeping the locked set in
    /// step so faulty track can never be acquired.
    pub fn set_segment_status(&mut self, id: &SegmentId, status: SegmentStatus) -> bool {
        let occupied = self.segment_occupied_by_train(id);
        let Some(segment) = self.segment_mut(id) else {
            warn!(segment = %id, "attempted to set status of unknown segment");
            return false;
        };
        segment.status = status;
        match status {
            SegmentStatus::Faulty => {
                self.locked.insert(ResourceId::Segment(id.clone()));
            }
            SegmentStatus::Operational => {
                // Never unlock a segment a train is still on.
                if !occupied {
                    self.locked.remove(&ResourceId::Segment(id.clone()));
                }
            }
        }
        info!(segment = %id, ?status, "🔧 track status set");
        self.plan_needed = true;
        true
    }

    pub fn set_priorities(&mut self, flags: PriorityFlags) {
        self.flags = flags.sanitized();
        info!(flags = ?self.flags, "priorities set");
    }

    /// Strikes a few random operational segments with bad weather and
    /// locks them out of routing.
    pub fn assign_random_weather(&mut self, count: usize) {
        self.reset_weather();
        let mut candidates: Vec<SegmentId> = self
            .segments
            .iter()
            .filter(|segment| segment.status != SegmentStatus::Faulty)
            .map(|segment| segment.id.clone())
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(count);

        for id in &candidates {
            if let Some(segment) = self.segment_mut(id) {
                segment.weather = Weather::Bad;
            }
            self.locked.insert(ResourceId::Segment(id.clone()));
        }
        info!(segments = ?candidates, "🌧️ bad weather assigned");
        self.plan_needed = true;
    }

    /// Clears weather everywhere and releases the weather locks.
    pub fn clear_weather(&mut self) {
        self.reset_weather();
        info!("🌤️ weather cleared on all segments");
        self.plan_needed = true;
    }

    fn reset_weather(&mut self) {
        let struck: Vec<SegmentId> = self
            .segments
            .iter()
            .filter(|segment| segment.weather == Weather::Bad)
            .map(|segment| segment.id.clone())
            .collect();
        for id in struck {
            if let Some(segment) = self.segment_mut(&id) {
                segment.weather = Weather::Good;
            }
            // Faulty or occupied segments keep their lock.
            if self.segment(&id).map(|s| s.status) != Some(SegmentStatus::Faulty)
                && !self.segment_occupied_by_train(&id)
            {
                self.locked.remove(&ResourceId::Segment(id));
            }
        }
    }

    fn segment_occupied_by_train(&self, id: &SegmentId) -> bool {
        self.trains
            .iter()
            .any(|train| train.current_segment.as_ref() == Some(id))
    }

    /// Reconciles derived per-segment occupancy and returns an immutable
    /// copy of the world for consumers.
    pub fn snapshot(&mut self) -> Snapshot {
        let occupied: HashSet<&SegmentId> = self
            .trains
            .iter()
            .filter_map(|train| train.current_segment.as_ref())
            .collect();
        for segment in &mut self.segments {
            segment.is_occupied = occupied.contains(&segment.id);
        }

        Snapshot {
            timestamp: self.clock,
            network: NetworkSnapshot {
                nodes: self.nodes.clone(),
                track_segments: self.segments.clone(),
            },
            trains: self.trains.clone(),
        }
    }
}

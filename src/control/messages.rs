use crate::control::planner::PlanInstruction;
use crate::control::rail_system::components::{NodeId, NodeState, SegmentId, SegmentStatus};
use crate::control::world::{PriorityFlags, Snapshot};

/// Operator commands accepted by a [`Driver`](crate::control::driver::Driver).
#[derive(Debug, Clone)]
pub enum Command {
    /// Load the layout and schedule of a section and start ticking.
    StartSimulation { section: String },
    StopSimulation,
    TogglePause { playing: bool },
    /// Clamp is at one; higher values speed up wall clock and sim clock.
    SetSimSpeed { speed: u64 },
    SetPriorities(PriorityFlags),
    SetTrackStatus {
        segment: SegmentId,
        status: SegmentStatus,
    },
    /// `state: None` toggles between green and red.
    SetSignal {
        node: NodeId,
        state: Option<NodeState>,
    },
    SetAllSignalsRed,
    /// `enabled: None` flips the current value.
    ToggleAiControl { enabled: Option<bool> },
    /// Force a planner run on the next tick.
    RequestPlan,
}

/// Everything a driver reports outward.
#[derive(Debug, Clone)]
pub enum Event {
    /// Full snapshot sent once on start.
    InitialState(Snapshot),
    /// Full snapshot sent every tick.
    NetworkUpdate(Snapshot),
    /// The planner started working.
    PlanThinking,
    /// The planner produced instructions.
    PlanUpdate(Vec<PlanInstruction>),
    /// The signal controller changed a signal.
    SignalSet { node: NodeId, state: NodeState },
    AiControlChanged { enabled: bool },
    SimulationStarted,
    SimulationStopped,
    StateChanged { playing: bool },
    Error { message: String },
}

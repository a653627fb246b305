use crate::control::messages::{Command, Event};
use crate::control::planner::{self, Plan};
use crate::control::rail_system::components::{
    NodeId, NodeKind, NodeState, SegmentId, SegmentStatus,
};
use crate::control::rail_system::network::Layout;
use crate::control::schedule::{CsvTimetable, ScheduleSource};
use crate::control::signals;
use crate::control::train::TrainState;
use crate::control::world::{PriorityFlags, Simulation};
use crate::general::SimConfig;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const BAD_WEATHER_SEGMENTS: usize = 3;

/// Handle for talking to a running [`Driver`].
#[derive(Debug, Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl DriverHandle {
    /// Queues a command for the driver. Returns false when the driver is
    /// gone.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

struct PendingSolve {
    generation: u64,
    handle: JoinHandle<Plan>,
}

/// The single writer of one section's world.
///
/// Owns the simulation, advances it on a tick cadence of
/// `1 / sim_speed` seconds, drains operator commands between ticks and
/// broadcasts events. Planner solves run on a blocking worker so the
/// tick cadence is never held up by them; at most one solve is in
/// flight, and stale results from a stopped run are discarded.
pub struct Driver {
    config: SimConfig,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
    schedule_source: Box<dyn ScheduleSource>,
    sim: Option<Simulation>,
    playing: bool,
    ai_enabled: bool,
    flags: PriorityFlags,
    solve: Option<PendingSolve>,
    /// Bumped on every start and stop; solves stamped with an older
    /// value are ignored when they come back.
    generation: u64,
    /// Signal states set while no simulation was running.
    pending_signal_overrides: HashMap<NodeId, NodeState>,
    /// Tracks marked faulty while no simulation was running.
    pending_faulty_tracks: HashSet<SegmentId>,
    pending_all_signals_red: bool,
}

impl Driver {
    /// Creates a driver reading schedules from the configured data
    /// directory.
    ///
    /// # Usage
    ///
    /// ```
    /// # use railgrid::control::driver::Driver;
    /// # use railgrid::control::messages::Command;
    /// # use railgrid::general::SimConfig;
    /// # tokio_test::block_on(async {
    /// let (driver, handle) = Driver::new(SimConfig::default());
    /// tokio::spawn(driver.run());
    ///
    /// assert!(handle.send(Command::TogglePause { playing: false }).await);
    /// # });
    /// ```
    pub fn new(config: SimConfig) -> (Self, DriverHandle) {
        let source = CsvTimetable::new(config.data_dir.clone());
        Driver::with_schedule_source(config, Box::new(source))
    }

    /// Creates a driver with a custom schedule producer.
    pub fn with_schedule_source(
        config: SimConfig,
        schedule_source: Box<dyn ScheduleSource>,
    ) -> (Self, DriverHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(256);

        let handle = DriverHandle {
            commands: command_tx,
            events: event_tx.clone(),
        };
        let driver = Driver {
            config,
            commands: command_rx,
            events: event_tx,
            schedule_source,
            sim: None,
            playing: false,
            ai_enabled: true,
            flags: PriorityFlags::default(),
            solve: None,
            generation: 0,
            pending_signal_overrides: HashMap::new(),
            pending_faulty_tracks: HashSet::new(),
            pending_all_signals_red: false,
        };
        (driver, handle)
    }

    /// Runs until the command channel closes.
    pub async fn run(mut self) {
        info!("🏁 driver started, waiting for commands");
        loop {
            let tick_delay = Duration::from_secs_f64(
                1.0 / self.sim.as_ref().map_or(1, |sim| sim.sim_speed.max(1)) as f64,
            );

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                result = await_solve(&mut self.solve), if self.solve.is_some() => {
                    self.solve = None;
                    self.finish_solve(result);
                }
                _ = tokio::time::sleep(tick_delay), if self.sim.is_some() && self.playing => {
                    self.tick();
                }
            }
        }
        info!("driver ended");
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// One full tick: advance the world, run signal automation, kick off
    /// a planner solve when one is due and publish the snapshot.
    fn tick(&mut self) {
        let Some(sim) = self.sim.as_mut() else { return };
        sim.tick();

        if self.ai_enabled && self.solve.is_none() {
            let sweep = signals::sweep(sim);
            if !sweep.is_empty() {
                sim.plan_needed = true;
            }
            for node in sweep.greens {
                self.events
                    .send(Event::SignalSet {
                        node,
                        state: NodeState::Green,
                    })
                    .ok();
            }
            for node in sweep.reds {
                self.events
                    .send(Event::SignalSet {
                        node,
                        state: NodeState::Red,
                    })
                    .ok();
            }
        }

        let input = match self.sim.as_mut() {
            Some(sim)
                if sim.plan_needed
                    && self.solve.is_none()
                    && sim
                        .trains
                        .iter()
                        .any(|train| train.state == TrainState::WaitingPlan) =>
            {
                sim.plan_needed = false;
                Some(planner::build_input(sim))
            }
            _ => None,
        };
        if let Some(input) = input {
            self.emit(Event::PlanThinking);
            self.solve = Some(PendingSolve {
                generation: self.generation,
                handle: tokio::task::spawn_blocking(move || planner::solve(input)),
            });
        }

        let snapshot = self.sim.as_mut().map(|sim| sim.snapshot());
        if let Some(snapshot) = snapshot {
            self.emit(Event::NetworkUpdate(snapshot));
        }
    }

    /// Applies a finished solve, unless the world it planned for is gone.
    fn finish_solve(&mut self, result: (u64, Plan)) {
        let (generation, plan) = result;
        if generation != self.generation {
            debug!("discarding plan from a previous run");
            return;
        }
        let Some(sim) = self.sim.as_mut() else { return };

        if plan.instructions.is_empty() {
            warn!("planner returned no instructions");
            return;
        }

        if self.ai_enabled {
            // Open the departure signals of trains cleared to go now.
            for instruction in &plan.instructions {
                if instruction.action != planner::PlanAction::Proceed {
                    continue;
                }
                let Some(start) = sim
                    .trains
                    .iter()
                    .find(|train| train.id == instruction.train_id)
                    .map(|train| train.start_node.clone())
                else {
                    continue;
                };
                let Some(node_path) = sim
                    .network()
                    .segment_path_to_node_path_from(&start, &instruction.route)
                else {
                    continue;
                };
                let Some(first) = node_path.first() else { continue };
                let grace = sim.config.override_grace;
                let allowed = sim.node(first).is_some_and(|node| {
                    node.kind == NodeKind::Signal
                        && node.state != NodeState::Green
                        && !node.overridden_recently(sim.clock, grace)
                });
                if allowed {
                    sim.set_node_state(first, NodeState::Green, false);
                    self.events
                        .send(Event::SignalSet {
                            node: first.clone(),
                            state: NodeState::Green,
                        })
                        .ok();
                }
            }
        }

        sim.apply_plan(&plan.instructions);
        self.emit(Event::PlanUpdate(plan.instructions));
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartSimulation { section } => self.start_simulation(&section).await,
            Command::StopSimulation => {
                self.sim = None;
                self.playing = false;
                self.solve = None;
                self.generation += 1;
                info!("⏹️ simulation stopped and reset");
                self.emit(Event::SimulationStopped);
            }
            Command::TogglePause { playing } => {
                self.playing = playing;
                info!(playing, "simulation pause toggled");
                self.emit(Event::StateChanged { playing });
            }
            Command::SetSimSpeed { speed } => {
                if let Some(sim) = self.sim.as_mut() {
                    sim.sim_speed = speed.max(1);
                    info!(speed = sim.sim_speed, "⚙️ simulation speed set");
                }
            }
            Command::SetPriorities(flags) => {
                self.flags = flags.sanitized();
                if let Some(sim) = self.sim.as_mut() {
                    sim.set_priorities(self.flags);
                    if self.flags.weather {
                        sim.assign_random_weather(BAD_WEATHER_SEGMENTS);
                    } else {
                        sim.clear_weather();
                    }
                    let snapshot = sim.snapshot();
                    self.emit(Event::NetworkUpdate(snapshot));
                }
            }
            Command::SetTrackStatus { segment, status } => {
                if let Some(sim) = self.sim.as_mut() {
                    sim.set_segment_status(&segment, status);
                    let snapshot = sim.snapshot();
                    self.emit(Event::NetworkUpdate(snapshot));
                } else {
                    match status {
                        SegmentStatus::Faulty => {
                            info!(%segment, "🕓 queued faulty track for next start");
                            self.pending_faulty_tracks.insert(segment);
                        }
                        SegmentStatus::Operational => {
                            self.pending_faulty_tracks.remove(&segment);
                        }
                    }
                }
            }
            Command::SetSignal { node, state } => {
                if let Some(sim) = self.sim.as_mut() {
                    let current = sim.node(&node).map(|n| n.state);
                    let desired = state.unwrap_or(match current {
                        Some(NodeState::Green) => NodeState::Red,
                        _ => NodeState::Green,
                    });
                    if sim.set_node_state(&node, desired, true) {
                        let snapshot = sim.snapshot();
                        self.emit(Event::NetworkUpdate(snapshot));
                    }
                } else {
                    let desired = state.unwrap_or(NodeState::Green);
                    info!(%node, ?desired, "🕓 queued signal override for next start");
                    self.pending_signal_overrides.insert(node, desired);
                }
            }
            Command::SetAllSignalsRed => {
                if let Some(sim) = self.sim.as_mut() {
                    let signal_ids: Vec<NodeId> = sim
                        .nodes
                        .iter()
                        .filter(|node| node.kind == NodeKind::Signal)
                        .map(|node| node.id.clone())
                        .collect();
                    for id in &signal_ids {
                        sim.set_node_state(id, NodeState::Red, true);
                    }
                    info!(count = signal_ids.len(), "🔴 all signals set red");
                    let snapshot = sim.snapshot();
                    self.emit(Event::NetworkUpdate(snapshot));
                } else {
                    self.pending_all_signals_red = true;
                }
            }
            Command::ToggleAiControl { enabled } => {
                self.ai_enabled = enabled.unwrap_or(!self.ai_enabled);
                info!(enabled = self.ai_enabled, "⚖️ signal automation toggled");
                self.emit(Event::AiControlChanged {
                    enabled: self.ai_enabled,
                });
            }
            Command::RequestPlan => {
                if let Some(sim) = self.sim.as_mut() {
                    sim.plan_needed = true;
                    info!("plan explicitly requested");
                }
            }
        }
    }

    async fn start_simulation(&mut self, section: &str) {
        self.generation += 1;
        self.solve = None;

        let layout = match self.load_layout(section) {
            Ok(layout) => layout,
            Err(message) => {
                warn!(section, %message, "❌ refusing to start");
                self.emit(Event::Error { message });
                return;
            }
        };

        // A missing or broken schedule is not fatal; the section simply
        // sees no traffic.
        let timetable = match self.schedule_source.entries(section).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(section, %error, "⚠️ no schedule; running with an empty spawn queue");
                Vec::new()
            }
        };

        let mut sim = match Simulation::new(section, layout, timetable, self.config.clone()) {
            Ok(sim) => sim,
            Err(error) => {
                let message = error.to_string();
                warn!(section, %message, "❌ refusing to start");
                self.emit(Event::Error { message });
                return;
            }
        };

        sim.set_priorities(self.flags);

        for (node, state) in self.pending_signal_overrides.drain() {
            sim.set_node_state(&node, state, true);
        }
        for segment in self.pending_faulty_tracks.drain() {
            sim.set_segment_status(&segment, SegmentStatus::Faulty);
        }
        if self.pending_all_signals_red {
            self.pending_all_signals_red = false;
            let signal_ids: Vec<NodeId> = sim
                .nodes
                .iter()
                .filter(|node| node.kind == NodeKind::Signal)
                .map(|node| node.id.clone())
                .collect();
            for id in &signal_ids {
                sim.set_node_state(id, NodeState::Red, true);
            }
        }

        let snapshot = sim.snapshot();
        self.sim = Some(sim);
        self.playing = true;

        self.emit(Event::SimulationStarted);
        self.emit(Event::InitialState(snapshot));
        self.emit(Event::AiControlChanged {
            enabled: self.ai_enabled,
        });
    }

    fn load_layout(&self, section: &str) -> Result<Layout, String> {
        let path = self
            .config
            .data_dir
            .join(format!("{}_layout.json", section.trim().to_lowercase()));
        let json = std::fs::read_to_string(&path)
            .map_err(|error| format!("layout {} unreadable: {error}", path.display()))?;
        Layout::from_json(&json).map_err(|error| format!("layout {}: {error}", path.display()))
    }
}

async fn await_solve(solve: &mut Option<PendingSolve>) -> (u64, Plan) {
    match solve.as_mut() {
        Some(pending) => {
            let generation = pending.generation;
            let plan = (&mut pending.handle).await.unwrap_or_else(|error| {
                warn!(%error, "planner task failed; treating as empty plan");
                Plan::empty()
            });
            (generation, plan)
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::rail_system::components::TrainClass;
    use crate::control::rail_system::network_test::entry;
    use crate::control::schedule::{ScheduleEntry, ScheduleError, ScheduleSource};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::SystemTime;

    struct FixedSchedule(Vec<ScheduleEntry>);

    #[async_trait]
    impl ScheduleSource for FixedSchedule {
        async fn entries(&self, _section: &str) -> Result<Vec<ScheduleEntry>, ScheduleError> {
            Ok(self.0.clone())
        }
    }

    const LAYOUT: &str = r#"{
      "network": {
        "nodes": [
          { "id": "A", "type": "SIGNAL", "position": { "x": 0, "y": 0 }, "state": "GREEN",
            "isLocked": false, "isManuallyOverridden": false },
          { "id": "B", "type": "SIGNAL", "position": { "x": 10, "y": 0 }, "state": "GREEN",
            "isLocked": false, "isManuallyOverridden": false },
          { "id": "C", "type": "TERMINAL", "position": { "x": 20, "y": 0 } }
        ],
        "trackSegments": [
          { "id": "TC-1", "startNodeId": "A", "endNodeId": "B", "length": 100,
            "maxSpeed": 60, "status": "OPERATIONAL", "isOccupied": false,
            "tempSpeedRestriction": null },
          { "id": "TC-2", "startNodeId": "B", "endNodeId": "C", "length": 100,
            "maxSpeed": 60, "status": "OPERATIONAL", "isOccupied": false,
            "tempSpeedRestriction": null }
        ],
        "routes": []
      }
    }"#;

    fn scratch_data_dir(tag: &str) -> PathBuf {
        crate::control::rail_system::network_test::init_test_logging();
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let dir = std::env::temp_dir().join(format!(
            "railgrid-{tag}-{}-{nanos}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<Event>,
        mut predicate: impl FnMut(&Event) -> bool,
    ) -> Event {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("event channel closed early")
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn driver_runs_a_section_to_completion() {
        let dir = scratch_data_dir("run");
        std::fs::write(dir.join("tst_layout.json"), LAYOUT).unwrap();

        let config = SimConfig {
            data_dir: dir,
            ..SimConfig::default()
        };
        let schedule = FixedSchedule(vec![entry("101", TrainClass::Express, "A", "C", 0)]);
        let (driver, handle) = Driver::with_schedule_source(config, Box::new(schedule));
        tokio::spawn(driver.run());
        let mut events = handle.subscribe();

        assert!(
            handle
                .send(Command::StartSimulation {
                    section: "TST".into()
                })
                .await
        );
        handle.send(Command::SetSimSpeed { speed: 10 }).await;

        wait_for(&mut events, |e| matches!(e, Event::SimulationStarted)).await;
        wait_for(&mut events, |e| matches!(e, Event::InitialState(_))).await;
        wait_for(&mut events, |e| matches!(e, Event::PlanUpdate(plan) if !plan.is_empty())).await;

        // A tick with the train rolling, then one with the section empty
        // again after it exits.
        wait_for(&mut events, |e| {
            matches!(e, Event::NetworkUpdate(s) if s.trains.iter().any(|t| t.speed_kph > 0))
        })
        .await;
        wait_for(&mut events, |e| {
            matches!(e, Event::NetworkUpdate(s) if s.trains.is_empty() && s.timestamp > 0)
        })
        .await;

        // Toggling automation twice lands back on the prior state.
        handle
            .send(Command::ToggleAiControl { enabled: None })
            .await;
        wait_for(
            &mut events,
            |e| matches!(e, Event::AiControlChanged { enabled: false }),
        )
        .await;
        handle
            .send(Command::ToggleAiControl { enabled: None })
            .await;
        wait_for(
            &mut events,
            |e| matches!(e, Event::AiControlChanged { enabled: true }),
        )
        .await;

        handle.send(Command::StopSimulation).await;
        wait_for(&mut events, |e| matches!(e, Event::SimulationStopped)).await;
    }

    #[tokio::test]
    async fn missing_layout_refuses_to_start() {
        let dir = scratch_data_dir("missing");
        let config = SimConfig {
            data_dir: dir,
            ..SimConfig::default()
        };
        let (driver, handle) = Driver::with_schedule_source(config, Box::new(FixedSchedule(vec![])));
        tokio::spawn(driver.run());
        let mut events = handle.subscribe();

        handle
            .send(Command::StartSimulation {
                section: "NOPE".into(),
            })
            .await;
        wait_for(&mut events, |e| matches!(e, Event::Error { .. })).await;
    }

    #[tokio::test]
    async fn commands_queue_while_no_simulation_runs() {
        let dir = scratch_data_dir("queue");
        std::fs::write(dir.join("tst_layout.json"), LAYOUT).unwrap();

        let config = SimConfig {
            data_dir: dir,
            ..SimConfig::default()
        };
        let (driver, handle) = Driver::with_schedule_source(config, Box::new(FixedSchedule(vec![])));
        tokio::spawn(driver.run());
        let mut events = handle.subscribe();

        // Queued before start: a faulty track and a red entry signal.
        handle
            .send(Command::SetTrackStatus {
                segment: SegmentId::new("TC-1"),
                status: SegmentStatus::Faulty,
            })
            .await;
        handle
            .send(Command::SetSignal {
                node: NodeId::new("A"),
                state: Some(NodeState::Red),
            })
            .await;
        handle
            .send(Command::StartSimulation {
                section: "TST".into(),
            })
            .await;

        let initial = wait_for(&mut events, |e| matches!(e, Event::InitialState(_))).await;
        let Event::InitialState(snapshot) = initial else {
            unreachable!()
        };
        let tc1 = snapshot
            .network
            .track_segments
            .iter()
            .find(|s| s.id == SegmentId::new("TC-1"))
            .unwrap();
        assert_eq!(tc1.status, SegmentStatus::Faulty);
        let a = snapshot
            .network
            .nodes
            .iter()
            .find(|n| n.id == NodeId::new("A"))
            .unwrap();
        assert_eq!(a.state, NodeState::Red);
        assert!(a.is_manually_overridden);
    }
}

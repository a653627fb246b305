use std::path::PathBuf;
use std::time::Duration;

/// Simulated clock seconds since the start of the run.
pub type Clock = u64;

/// Tunable constants of the simulation core.
///
/// Travel and occupancy times are abstract tick units, not derived from
/// segment geometry.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Directory holding `<section>_layout.json` and `<section>_schedule.csv`.
    pub data_dir: PathBuf,
    /// Clock seconds added per tick before speed scaling.
    pub tick_rate: u64,
    /// Ticks a train needs to traverse one segment.
    pub travel_time: u64,
    /// Seconds a train occupies a junction while passing it.
    pub junction_occupancy: u64,
    /// Dwell time at a platform, in clock seconds.
    pub boarding_dwell: u64,
    /// Node id prefix marking platform signals.
    pub platform_prefix: String,
    /// Seconds during which a manually overridden signal is off-limits
    /// to the automatic signal controller.
    pub override_grace: u64,
    /// Cap on enumerated alternative routes per (start, end) pair.
    pub max_paths: usize,
    /// Cap on the node length of an enumerated route.
    pub max_depth: usize,
    /// Scheduling horizon of the planner, in clock seconds.
    pub horizon: u64,
    /// Wall clock budget for one planner solve.
    pub solve_budget: Duration,
    /// Trains spawned per tick at most.
    pub max_spawn_per_tick: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            data_dir: PathBuf::from("./data"),
            tick_rate: 1,
            travel_time: 30,
            junction_occupancy: 10,
            boarding_dwell: 100,
            platform_prefix: "S-PF-".to_string(),
            override_grace: 15,
            max_paths: 6,
            max_depth: 30,
            horizon: 7200,
            solve_budget: Duration::from_secs(10),
            max_spawn_per_tick: 3,
        }
    }
}

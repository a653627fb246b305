/// The tick loop driving a section and its command handling.
pub mod driver;
/// Waiting-train ordering and resource acquisition.
pub mod dispatcher;
/// The commands accepted by and the events emitted from a driver.
pub mod messages;
/// Disjunctive route and start-time planning for newly spawned trains.
pub mod planner;
/// The rail section: typed components, the layout graph and routing.
pub mod rail_system;
/// Timetable records and their sources.
pub mod schedule;
/// The automatic signal controller.
pub mod signals;
/// Train records and their per-tick state machine.
pub mod train;
/// Authoritative mutable world state and snapshots.
pub mod world;

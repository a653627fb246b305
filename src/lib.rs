//! # Railgrid
//!
//! A real-time railway interlocking simulator for a single section of
//! track. Scheduled trains enter the section, get routed over a graph of
//! signals, switches and junctions, and are dispatched under strict
//! resource exclusion: no two trains may ever hold the same track segment
//! or junction at the same time.
//!
//! The crate is organised around a single-writer [`control::driver::Driver`]
//! that owns the mutable world, advances it tick by tick and talks to the
//! outside world through command and event channels. Route planning for
//! newly spawned trains is delegated to a disjunctive scheduler in
//! [`control::planner`] that runs off the tick task.

/// Everything controlling the simulated section.
pub mod control;
/// Crate wide configuration values.
pub mod general;

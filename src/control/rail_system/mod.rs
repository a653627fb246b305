/// Typed nodes, segments and their identifiers.
pub mod components;
/// The immutable layout graph and path utilities.
pub mod network;
/// Route enumeration, feasibility filtering and scoring.
pub mod routing;

/// Shared fixture layouts and tests on them.
#[cfg(test)]
pub mod network_test;

use crate::general::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node in the layout.
///
/// Ids are normalised to trimmed upper case on construction so that
/// operator input (`" s-pf-3 "`) matches layout ids (`"S-PF-3"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        NodeId(id.as_ref().trim().to_uppercase())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this node dwells trains for boarding, by id prefix.
    pub fn is_platform(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId::new(id)
    }
}

/// Identifier of a track segment in the layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn new(id: impl AsRef<str>) -> Self {
        SegmentId(id.as_ref().trim().to_uppercase())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(id: &str) -> Self {
        SegmentId::new(id)
    }
}

/// Identifier of a train (its running number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainId(String);

impl TrainId {
    pub fn new(id: impl AsRef<str>) -> Self {
        TrainId(id.as_ref().trim().to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrainId {
    fn from(id: &str) -> Self {
        TrainId::new(id)
    }
}

/// A resource a train can hold exclusively: either a segment or a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Segment(SegmentId),
    Node(NodeId),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Segment(id) => write!(f, "{id}"),
            ResourceId::Node(id) => write!(f, "{id}"),
        }
    }
}

impl From<SegmentId> for ResourceId {
    fn from(id: SegmentId) -> Self {
        ResourceId::Segment(id)
    }
}

impl From<NodeId> for ResourceId {
    fn from(id: NodeId) -> Self {
        ResourceId::Node(id)
    }
}

/// Schematic position of a node, in abstract canvas units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Signal,
    Switch,
    Junction,
    Terminal,
    PlatformSignal,
}

/// Displayed state of a node. Only [`NodeKind::Signal`] nodes gate train
/// movement on it; switches carry `Normal`/`Reverse` for the schematic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Green,
    Red,
    Normal,
    Reverse,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::Red
    }
}

/// Aspect shown by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAspect {
    Green,
    Red,
}

impl From<SignalAspect> for NodeState {
    fn from(aspect: SignalAspect) -> Self {
        match aspect {
            SignalAspect::Green => NodeState::Green,
            SignalAspect::Red => NodeState::Red,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    Operational,
    Faulty,
}

impl Default for SegmentStatus {
    fn default() -> Self {
        SegmentStatus::Operational
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Weather {
    Good,
    Bad,
}

impl Default for Weather {
    fn default() -> Self {
        Weather::Good
    }
}

/// Priority class of a train. Unrecognised timetable types map to
/// [`TrainClass::Other`] with the lowest base priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrainClass {
    Shatabdi,
    Rajdhani,
    Passenger,
    #[serde(rename = "DMU")]
    Dmu,
    #[serde(rename = "MEMU")]
    Memu,
    #[serde(rename = "SF Express")]
    SfExpress,
    Mail,
    Express,
    Other,
}

impl TrainClass {
    /// Base priority of the class. Higher dispatches first.
    pub fn base_priority(&self) -> u32 {
        match self {
            TrainClass::Shatabdi => 10,
            TrainClass::Rajdhani => 9,
            TrainClass::Passenger => 8,
            TrainClass::Dmu => 7,
            TrainClass::Memu => 6,
            TrainClass::SfExpress => 5,
            TrainClass::Mail => 4,
            TrainClass::Express => 3,
            TrainClass::Other => 1,
        }
    }
}

impl Default for TrainClass {
    fn default() -> Self {
        TrainClass::Passenger
    }
}

impl From<&str> for TrainClass {
    fn from(label: &str) -> Self {
        match label.trim() {
            "Shatabdi" => TrainClass::Shatabdi,
            "Rajdhani" => TrainClass::Rajdhani,
            "Passenger" => TrainClass::Passenger,
            "DMU" => TrainClass::Dmu,
            "MEMU" => TrainClass::Memu,
            "SF Express" => TrainClass::SfExpress,
            "Mail" => TrainClass::Mail,
            "Express" => TrainClass::Express,
            _ => TrainClass::Other,
        }
    }
}

impl<'de> Deserialize<'de> for TrainClass {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(TrainClass::from(label.as_str()))
    }
}

/// A node of the section layout together with its mutable display state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Point,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_manually_overridden: bool,
    #[serde(default)]
    pub last_manual_override_at: Option<Clock>,
}

impl Node {
    /// The aspect this node shows, if it is a signal. Non-signal nodes
    /// never gate movement and report `None`.
    pub fn signal_aspect(&self) -> Option<SignalAspect> {
        if self.kind != NodeKind::Signal {
            return None;
        }
        Some(match self.state {
            NodeState::Green => SignalAspect::Green,
            _ => SignalAspect::Red,
        })
    }

    /// Whether an operator touched this signal within the grace window.
    pub fn overridden_recently(&self, clock: Clock, grace: u64) -> bool {
        match self.last_manual_override_at {
            Some(at) => clock < at.saturating_add(grace),
            None => false,
        }
    }
}

/// A track segment of the section layout together with its mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: SegmentId,
    #[serde(rename = "startNodeId")]
    pub start_node: NodeId,
    #[serde(rename = "endNodeId")]
    pub end_node: NodeId,
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub max_speed: f64,
    #[serde(default)]
    pub status: SegmentStatus,
    #[serde(default)]
    pub weather: Weather,
    #[serde(default)]
    pub is_occupied: bool,
    #[serde(default)]
    pub temp_speed_restriction: Option<f64>,
}

impl Segment {
    /// The endpoint on the far side of `node`.
    pub fn other_end(&self, node: &NodeId) -> &NodeId {
        if &self.start_node == node {
            &self.end_node
        } else {
            &self.start_node
        }
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        &self.start_node == node || &self.end_node == node
    }
}

use crate::control::rail_system::components::{Node, NodeId, Segment, SegmentId};
use fixedbitset::FixedBitSet;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("could not parse layout: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("could not read layout: {0}")]
    Unreadable(#[from] std::io::Error),
    #[error("segment {segment} references unknown node {node}")]
    UnknownEndpoint { segment: SegmentId, node: NodeId },
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),
}

/// The parsed static description of a section.
#[derive(Debug, Clone)]
pub struct Layout {
    pub nodes: Vec<Node>,
    pub segments: Vec<Segment>,
}

#[derive(Deserialize)]
struct LayoutFile {
    network: LayoutNetwork,
}

#[derive(Deserialize)]
struct LayoutNetwork {
    nodes: Vec<Node>,
    #[serde(rename = "trackSegments")]
    track_segments: Vec<Segment>,
    #[serde(default, rename = "routes")]
    _routes: Vec<serde_json::Value>,
}

impl Layout {
    /// Parses a layout document of the shape
    /// `{ "network": { "nodes": [...], "trackSegments": [...] } }`.
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        let file: LayoutFile = serde_json::from_str(json)?;
        Ok(Layout {
            nodes: file.network.nodes,
            segments: file.network.track_segments,
        })
    }
}

/// Immutable topology of a section: the undirected graph of nodes and
/// the segments connecting them, with symmetric adjacency.
///
/// All mutable per-node and per-segment state lives in the world, keyed
/// by id; the network only answers structural questions.
#[derive(Debug, Clone)]
pub struct RailNetwork {
    graph: UnGraph<NodeId, SegmentId>,
    indices: HashMap<NodeId, NodeIndex>,
    endpoints: HashMap<SegmentId, (NodeId, NodeId)>,
}

impl RailNetwork {
    /// Builds the graph, failing on segments whose endpoints are not
    /// part of the node list.
    pub fn build(nodes: &[Node], segments: &[Segment]) -> Result<Self, LayoutError> {
        let mut graph = UnGraph::new_undirected();
        let mut indices = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if indices.contains_key(&node.id) {
                return Err(LayoutError::DuplicateNode(node.id.clone()));
            }
            let index = graph.add_node(node.id.clone());
            indices.insert(node.id.clone(), index);
        }

        let mut endpoints = HashMap::with_capacity(segments.len());
        for segment in segments {
            let start = *indices.get(&segment.start_node).ok_or_else(|| {
                LayoutError::UnknownEndpoint {
                    segment: segment.id.clone(),
                    node: segment.start_node.clone(),
                }
            })?;
            let end = *indices.get(&segment.end_node).ok_or_else(|| {
                LayoutError::UnknownEndpoint {
                    segment: segment.id.clone(),
                    node: segment.end_node.clone(),
                }
            })?;
            graph.add_edge(start, end, segment.id.clone());
            endpoints.insert(
                segment.id.clone(),
                (segment.start_node.clone(), segment.end_node.clone()),
            );
        }

        Ok(RailNetwork {
            graph,
            indices,
            endpoints,
        })
    }

    pub fn contains_node(&self, node: &NodeId) -> bool {
        self.indices.contains_key(node)
    }

    pub fn contains_segment(&self, segment: &SegmentId) -> bool {
        self.endpoints.contains_key(segment)
    }

    pub fn segment_endpoints(&self, segment: &SegmentId) -> Option<&(NodeId, NodeId)> {
        self.endpoints.get(segment)
    }

    /// The neighbours of `node` as `(neighbour, connecting segment)` pairs.
    pub fn neighbours<'a>(
        &'a self,
        node: &NodeId,
    ) -> impl Iterator<Item = (&'a NodeId, &'a SegmentId)> + 'a {
        self.indices
            .get(node)
            .into_iter()
            .flat_map(move |index| {
                self.graph.edges(*index).map(move |edge| {
                    let other = if edge.source() == *index {
                        edge.target()
                    } else {
                        edge.source()
                    };
                    (&self.graph[other], edge.weight())
                })
            })
    }

    /// Breadth-first enumeration of simple node paths from `start` to
    /// `end`, capped at `max_paths` results and `max_depth` nodes per
    /// path. Neighbours whose connecting segment `blocked` rejects are
    /// skipped, so enumeration is state aware. Paths come out in
    /// discovery order, shortest first.
    pub fn find_all_paths(
        &self,
        start: &NodeId,
        end: &NodeId,
        max_paths: usize,
        max_depth: usize,
        blocked: &dyn Fn(&SegmentId) -> bool,
    ) -> Vec<Vec<NodeId>> {
        let (Some(&start_ix), Some(&end_ix)) = (self.indices.get(start), self.indices.get(end))
        else {
            return Vec::new();
        };

        let mut paths = Vec::new();
        let mut queue: VecDeque<Vec<NodeIndex>> = VecDeque::new();
        queue.push_back(vec![start_ix]);

        while let Some(path) = queue.pop_front() {
            if paths.len() >= max_paths {
                break;
            }
            let last = *path.last().unwrap_or(&start_ix);
            if last == end_ix {
                paths.push(path.iter().map(|ix| self.graph[*ix].clone()).collect());
                continue;
            }
            if path.len() > max_depth {
                continue;
            }
            for edge in self.graph.edges(last) {
                if blocked(edge.weight()) {
                    continue;
                }
                let next = if edge.source() == last {
                    edge.target()
                } else {
                    edge.source()
                };
                if path.contains(&next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }

        paths
    }

    /// Whether `end` can be reached from `start` at all over segments the
    /// predicate admits. Cheaper than enumerating paths.
    pub fn reachable(
        &self,
        start: &NodeId,
        end: &NodeId,
        blocked: &dyn Fn(&SegmentId) -> bool,
    ) -> bool {
        let (Some(&start_ix), Some(&end_ix)) = (self.indices.get(start), self.indices.get(end))
        else {
            return false;
        };

        let mut visited = FixedBitSet::with_capacity(self.graph.node_count());
        let mut queue = VecDeque::new();
        visited.insert(start_ix.index());
        queue.push_back(start_ix);

        while let Some(node) = queue.pop_front() {
            if node == end_ix {
                return true;
            }
            for edge in self.graph.edges(node) {
                if blocked(edge.weight()) {
                    continue;
                }
                let next = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                if !visited.put(next.index()) {
                    queue.push_back(next);
                }
            }
        }

        false
    }

    /// Converts a node path into the segments between each consecutive
    /// pair. Fails if two consecutive nodes are not adjacent.
    pub fn node_path_to_segment_path(&self, path: &[NodeId]) -> Option<Vec<SegmentId>> {
        let mut segments = Vec::with_capacity(path.len().saturating_sub(1));
        for pair in path.windows(2) {
            let segment = self
                .neighbours(&pair[0])
                .find(|(neighbour, _)| **neighbour == pair[1])
                .map(|(_, segment)| segment.clone())?;
            segments.push(segment);
        }
        Some(segments)
    }

    /// Converts a segment path back into the node path it traverses.
    ///
    /// The entry node of the first segment is the endpoint not shared
    /// with the second segment; a lone segment starts at its start
    /// endpoint. Each following step picks the endpoint of the next
    /// segment that is not the current node. Fails when two consecutive
    /// segments do not share an endpoint.
    pub fn segment_path_to_node_path(&self, segments: &[SegmentId]) -> Option<Vec<NodeId>> {
        let first = self.endpoints.get(segments.first()?)?;

        let start = if segments.len() == 1 {
            first.0.clone()
        } else {
            let second = self.endpoints.get(&segments[1])?;
            if first.1 == second.0 || first.1 == second.1 {
                first.0.clone()
            } else {
                first.1.clone()
            }
        };

        self.walk_segments(start, segments)
    }

    /// Like [`Self::segment_path_to_node_path`], but anchored at a known
    /// entry node. Fails if `start` is not an endpoint of the first
    /// segment, which catches routes that do not begin where the train
    /// stands.
    pub fn segment_path_to_node_path_from(
        &self,
        start: &NodeId,
        segments: &[SegmentId],
    ) -> Option<Vec<NodeId>> {
        let (a, b) = self.endpoints.get(segments.first()?)?;
        if a != start && b != start {
            return None;
        }
        self.walk_segments(start.clone(), segments)
    }

    fn walk_segments(&self, start: NodeId, segments: &[SegmentId]) -> Option<Vec<NodeId>> {
        let mut path = Vec::with_capacity(segments.len() + 1);
        path.push(start);
        for segment_id in segments {
            let (a, b) = self.endpoints.get(segment_id)?;
            let last = path.last()?;
            let next = if a == last {
                b.clone()
            } else if b == last {
                a.clone()
            } else {
                return None;
            };
            path.push(next);
        }
        Some(path)
    }
}

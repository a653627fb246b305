use crate::control::rail_system::components::{
    Node, NodeId, NodeKind, NodeState, Point, Segment, SegmentId, SegmentStatus, TrainClass,
    TrainId, Weather,
};
use crate::control::rail_system::network::{Layout, RailNetwork};
use crate::control::schedule::ScheduleEntry;
use crate::control::world::Simulation;
use crate::general::SimConfig;

pub fn node(id: &str, kind: NodeKind, state: NodeState) -> Node {
    Node {
        id: NodeId::new(id),
        kind,
        position: Point::default(),
        state,
        is_locked: false,
        is_manually_overridden: false,
        last_manual_override_at: None,
    }
}

pub fn segment(id: &str, start: &str, end: &str) -> Segment {
    Segment {
        id: SegmentId::new(id),
        start_node: NodeId::new(start),
        end_node: NodeId::new(end),
        length: 100.0,
        max_speed: 60.0,
        status: SegmentStatus::Operational,
        weather: Weather::Good,
        is_occupied: false,
        temp_speed_restriction: None,
    }
}

pub fn entry(no: &str, class: TrainClass, start: &str, end: &str, arrival: u64) -> ScheduleEntry {
    ScheduleEntry {
        train_no: TrainId::new(no),
        name: format!("TRN-{no}"),
        class,
        start_node: NodeId::new(start),
        end_node: NodeId::new(end),
        arrival_secs: arrival,
    }
}

/// `A --S1-- B --S2-- C`, signals at A and B already green, terminal C.
pub fn linear_layout() -> Layout {
    Layout {
        nodes: vec![
            node("A", NodeKind::Signal, NodeState::Green),
            node("B", NodeKind::Signal, NodeState::Green),
            node("C", NodeKind::Terminal, NodeState::Red),
        ],
        segments: vec![segment("S1", "A", "B"), segment("S2", "B", "C")],
    }
}

/// `A --S1-- S-PF-3 --S2-- C` with a platform between entry and terminal.
pub fn platform_layout() -> Layout {
    Layout {
        nodes: vec![
            node("A", NodeKind::Signal, NodeState::Green),
            node("S-PF-3", NodeKind::PlatformSignal, NodeState::Red),
            node("C", NodeKind::Terminal, NodeState::Red),
        ],
        segments: vec![segment("S1", "A", "S-PF-3"), segment("S2", "S-PF-3", "C")],
    }
}

/// Triangle `A --S1-- B --S2-- C --S3-- A`, no gating signals.
pub fn triangle_layout() -> Layout {
    Layout {
        nodes: vec![
            node("A", NodeKind::Junction, NodeState::Red),
            node("B", NodeKind::Junction, NodeState::Red),
            node("C", NodeKind::Terminal, NodeState::Red),
        ],
        segments: vec![
            segment("S1", "A", "B"),
            segment("S2", "B", "C"),
            segment("S3", "C", "A"),
        ],
    }
}

/// Installs a capture-friendly subscriber once; respects `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_simulation(layout: Layout, timetable: Vec<ScheduleEntry>) -> Simulation {
    init_test_logging();
    Simulation::new("TST", layout, timetable, SimConfig::default())
        .expect("fixture layout must build")
}

fn network(layout: &Layout) -> RailNetwork {
    RailNetwork::build(&layout.nodes, &layout.segments).expect("fixture layout must build")
}

mod graph {
    use super::*;

    #[test]
    fn adjacency_is_symmetric() {
        let net = network(&linear_layout());
        let a_sees_b = net
            .neighbours(&NodeId::new("A"))
            .any(|(n, s)| *n == NodeId::new("B") && *s == SegmentId::new("S1"));
        let b_sees_a = net
            .neighbours(&NodeId::new("B"))
            .any(|(n, s)| *n == NodeId::new("A") && *s == SegmentId::new("S1"));
        assert!(a_sees_b && b_sees_a);
    }

    #[test]
    fn unknown_segment_endpoint_is_rejected() {
        let mut layout = linear_layout();
        layout.segments.push(segment("S9", "A", "NOPE"));
        assert!(RailNetwork::build(&layout.nodes, &layout.segments).is_err());
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let mut layout = linear_layout();
        layout.nodes.push(node("A", NodeKind::Junction, NodeState::Red));
        assert!(RailNetwork::build(&layout.nodes, &layout.segments).is_err());
    }

    #[test]
    fn paths_come_shortest_first_and_capped() {
        let net = network(&triangle_layout());
        let paths = net.find_all_paths(&NodeId::new("A"), &NodeId::new("C"), 6, 30, &|_| false);
        assert_eq!(paths.len(), 2);
        // Direct hop over S3 is discovered before the detour over B.
        assert_eq!(paths[0], vec![NodeId::new("A"), NodeId::new("C")]);
        assert_eq!(
            paths[1],
            vec![NodeId::new("A"), NodeId::new("B"), NodeId::new("C")]
        );

        let capped = net.find_all_paths(&NodeId::new("A"), &NodeId::new("C"), 1, 30, &|_| false);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn blocked_segments_are_not_traversed() {
        let net = network(&triangle_layout());
        let s3 = SegmentId::new("S3");
        let paths =
            net.find_all_paths(&NodeId::new("A"), &NodeId::new("C"), 6, 30, &|s| *s == s3);
        assert_eq!(
            paths,
            vec![vec![NodeId::new("A"), NodeId::new("B"), NodeId::new("C")]]
        );

        assert!(!net.reachable(&NodeId::new("A"), &NodeId::new("C"), &|_| true));
        assert!(net.reachable(&NodeId::new("A"), &NodeId::new("C"), &|s| *s == s3));
    }

    #[test]
    fn node_and_segment_paths_roundtrip() {
        let net = network(&triangle_layout());
        for path in net.find_all_paths(&NodeId::new("A"), &NodeId::new("C"), 6, 30, &|_| false) {
            let segments = net.node_path_to_segment_path(&path).unwrap();
            let start = path.first().unwrap();
            assert_eq!(
                net.segment_path_to_node_path_from(start, &segments).unwrap(),
                path
            );
        }

        // Also when the walk enters the first segment at its end node.
        let reverse = vec![NodeId::new("C"), NodeId::new("B"), NodeId::new("A")];
        let segments = net.node_path_to_segment_path(&reverse).unwrap();
        assert_eq!(segments, vec![SegmentId::new("S2"), SegmentId::new("S1")]);
        assert_eq!(net.segment_path_to_node_path(&segments).unwrap(), reverse);

        // The anchored walk rejects routes not starting where the train is.
        assert!(net
            .segment_path_to_node_path_from(&NodeId::new("B"), &[SegmentId::new("S3")])
            .is_none());
    }

    #[test]
    fn disconnected_pairs_have_no_paths() {
        let mut layout = linear_layout();
        layout.nodes.push(node("X", NodeKind::Junction, NodeState::Red));
        let net = network(&layout);
        assert!(net
            .find_all_paths(&NodeId::new("A"), &NodeId::new("X"), 6, 30, &|_| false)
            .is_empty());
        assert!(!net.reachable(&NodeId::new("A"), &NodeId::new("X"), &|_| false));
    }
}

//! The phase list as a directed acyclic graph.
//!
//! Every phase has a `Next` edge to its successor. A conditional phase also
//! gets a `Bypass` edge from its predecessor to its successor, so every
//! path from `match` to `cleanup` is a feasible phase sequence.

use std::fmt;

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use petgraph::visit::EdgeRef;

use super::{PhaseKind, PHASES};
use crate::strategy::MatmulStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Next,
    Bypass,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Next => f.write_str("next"),
            Transition::Bypass => f.write_str("bypass"),
        }
    }
}

pub type PhaseGraph = DiGraph<PhaseKind, Transition>;

/// Build the phase DAG. Node `i` is `PHASES[i]`.
pub fn phase_graph() -> PhaseGraph {
    let mut graph = PhaseGraph::new();
    let nodes: Vec<NodeIndex> = PHASES.iter().map(|p| graph.add_node(p.kind)).collect();

    for window in nodes.windows(2) {
        graph.add_edge(window[0], window[1], Transition::Next);
    }
    for (i, phase) in PHASES.iter().enumerate() {
        if phase.is_conditional() && i > 0 && i + 1 < nodes.len() {
            graph.add_edge(nodes[i - 1], nodes[i + 1], Transition::Bypass);
        }
    }
    graph
}

/// Render the phase DAG in Graphviz format.
///
/// Conditional phases are dashed. With a strategy, the phases it skips are
/// greyed out.
pub fn to_dot(strategy: Option<&MatmulStrategy>) -> String {
    let graph = phase_graph();

    let node_attrs = |_: &PhaseGraph, (index, kind): (NodeIndex, &PhaseKind)| {
        let phase = &PHASES[index.index()];
        let mut attrs = vec![format!("label = \"{}\"", kind)];
        if phase.is_conditional() {
            attrs.push("style = dashed".to_string());
        }
        if let Some(s) = strategy {
            if !phase.is_enabled(s) {
                attrs.push("color = grey fontcolor = grey".to_string());
            }
        }
        attrs.join(" ")
    };
    let edge_attrs = |_: &PhaseGraph, edge: EdgeReference<'_, Transition>| match edge.weight() {
        Transition::Next => String::new(),
        Transition::Bypass => "style = dotted".to_string(),
    };

    let dot = Dot::with_attr_getters(
        &graph,
        &[Config::NodeNoLabel, Config::EdgeNoLabel],
        &edge_attrs,
        &node_attrs,
    );
    dot.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MatmulCaptures;
    use petgraph::algo::{is_cyclic_directed, toposort};

    #[test]
    fn test_graph_is_acyclic_and_ordered() {
        let graph = phase_graph();
        assert!(!is_cyclic_directed(&graph));
        let order: Vec<PhaseKind> = toposort(&graph, None)
            .unwrap()
            .into_iter()
            .map(|n| graph[n])
            .collect();
        let expected: Vec<PhaseKind> = PHASES.iter().map(|p| p.kind).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_bypass_edges_for_conditional_phases() {
        let graph = phase_graph();
        let bypasses = graph
            .edge_references()
            .filter(|e| *e.weight() == Transition::Bypass)
            .count();
        let conditional = PHASES.iter().filter(|p| p.is_conditional()).count();
        assert_eq!(bypasses, conditional);
        assert_eq!(graph.node_count(), PHASES.len());
    }

    #[test]
    fn test_dot_marks_skipped_phases() {
        let s = MatmulStrategy::with_defaults(MatmulCaptures::default());
        let dot = to_dot(Some(&s));
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("label = \"hoist-output-padding\" style = dashed color = grey"));
        let async_line = dot.lines().find(|l| l.contains("\"async-copies\"")).unwrap();
        assert!(async_line.contains("style = dashed"));
        assert!(!async_line.contains("grey"));
        assert!(dot.contains("style = dotted"));

        let plain = to_dot(None);
        assert!(!plain.contains("grey"));
    }
}

use std::collections::HashMap;
use std::time::Duration;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::{PulseDefinition, ScoreDefinition};
use crate::error::GraphError;
use crate::pulse::{delay_from_millis, expr, Pulse};

/// A directed transition, taken when density falls inside `[low, high]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub target: String,
    pub low: f64,
    pub high: f64,
}

impl Edge {
    pub fn contains(&self, density: f64) -> bool {
        self.low <= density && density <= self.high
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub pulse: Option<Pulse>,
    /// Declaration order is significant; see [`Node::select`].
    edges: Option<Vec<Edge>>,
}

impl Node {
    pub fn edges(&self) -> Result<&[Edge], GraphError> {
        self.edges
            .as_deref()
            .ok_or_else(|| GraphError::MissingEdges(self.id.clone()))
    }

    /// First edge, in declared order, whose range contains `density`.
    pub fn select(&self, density: f64) -> Option<&Edge> {
        self.edges
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|edge| edge.contains(density))
    }
}

/// Problems found in a loaded score. None of them stop the score from loading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audit {
    /// `(from, to)` edges whose target is not a node.
    pub dangling: Vec<(String, String)>,
    /// `(from, to)` edges with `low > high`, which can never be taken.
    pub inverted: Vec<(String, String)>,
    /// Nodes no path from the start node reaches.
    pub unreachable: Vec<String>,
    pub missing_start: bool,
}

impl Audit {
    pub fn is_clean(&self) -> bool {
        *self == Audit::default()
    }
}

/// Immutable score graph. Replaced wholesale on reload.
#[derive(Debug, Clone)]
pub struct ScoreGraph {
    pub name: String,
    pub start: String,
    nodes: HashMap<String, Node>,
}

impl ScoreGraph {
    /// Build the graph, or `None` if the definition lacks a name, start or nodes.
    pub fn from_definition(definition: &ScoreDefinition) -> Option<Self> {
        let valid = definition.validate()?;

        let nodes = valid
            .nodes
            .iter()
            .map(|(id, def)| {
                let node = Node {
                    id: id.clone(),
                    pulse: def.pulse.as_ref().and_then(|p| compile_pulse(id, p)),
                    edges: def.edges.as_ref().map(|edges| {
                        edges
                            .iter()
                            .map(|e| {
                                let (low, high) = e.threshold.bounds();
                                Edge {
                                    target: e.node.clone(),
                                    low,
                                    high,
                                }
                            })
                            .collect()
                    }),
                };
                (id.clone(), node)
            })
            .collect();

        Some(Self {
            name: valid.name.to_string(),
            start: valid.start.to_string(),
            nodes,
        })
    }

    pub fn node(&self, id: &str) -> Result<&Node, GraphError> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn audit(&self) -> Audit {
        let mut audit = Audit::default();
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

        let mut ids: Vec<&str> = self.node_ids().collect();
        ids.sort_unstable();
        for &id in &ids {
            indices.insert(id, graph.add_node(id));
        }

        for &id in &ids {
            let Ok(node) = self.node(id) else { continue };
            for edge in node.edges.as_deref().unwrap_or_default() {
                if edge.low > edge.high {
                    audit
                        .inverted
                        .push((id.to_string(), edge.target.clone()));
                }
                match indices.get(edge.target.as_str()) {
                    Some(&to) => {
                        graph.add_edge(indices[id], to, ());
                    }
                    None => audit
                        .dangling
                        .push((id.to_string(), edge.target.clone())),
                }
            }
        }

        match indices.get(self.start.as_str()) {
            Some(&start) => {
                let mut dfs = Dfs::new(&graph, start);
                let mut seen = vec![false; graph.node_count()];
                while let Some(ix) = dfs.next(&graph) {
                    seen[ix.index()] = true;
                }
                audit.unreachable = graph
                    .node_indices()
                    .filter(|ix| !seen[ix.index()])
                    .map(|ix| graph[ix].to_string())
                    .collect();
            }
            None => audit.missing_start = true,
        }

        audit
    }

    /// Log everything [`ScoreGraph::audit`] finds.
    pub fn report(&self) -> Audit {
        let audit = self.audit();
        if audit.missing_start {
            log::warn!("score \"{}\": start node \"{}\" does not exist", self.name, self.start);
        }
        for (from, to) in &audit.dangling {
            log::warn!("score \"{}\": edge {from} -> {to} points at a missing node", self.name);
        }
        for (from, to) in &audit.inverted {
            log::warn!("score \"{}\": edge {from} -> {to} has low > high and never fires", self.name);
        }
        for id in &audit.unreachable {
            log::info!("score \"{}\": node \"{id}\" is unreachable from \"{}\"", self.name, self.start);
        }
        audit
    }
}

fn compile_pulse(node: &str, definition: &PulseDefinition) -> Option<Pulse> {
    match definition {
        PulseDefinition::Period(ms) if ms.is_finite() && *ms > 0.0 => {
            Some(Pulse::Fixed(delay_from_millis(*ms).max(Duration::from_millis(1))))
        }
        PulseDefinition::Period(ms) => {
            log::warn!("node \"{node}\": ignoring pulse period {ms}");
            None
        }
        PulseDefinition::Expression(source) => match expr::compile(source) {
            Ok(evaluator) => Some(Pulse::Expression(evaluator)),
            Err(e) => {
                log::warn!("node \"{node}\": ignoring pulse expression \"{source}\": {e}");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: serde_json::Value) -> ScoreGraph {
        let def: ScoreDefinition = serde_json::from_value(value).unwrap();
        ScoreGraph::from_definition(&def).expect("valid score")
    }

    #[test]
    fn first_declared_match_wins() {
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": {
                "x": { "edges": [
                    { "node": "a", "threshold": [0.0, 0.3] },
                    { "node": "b", "threshold": [0.2, 0.5] }
                ] },
                "a": { "edges": [] },
                "b": { "edges": [] }
            }
        }));
        let x = g.node("x").unwrap();
        assert_eq!(x.select(0.25).unwrap().target, "a");
        assert_eq!(x.select(0.4).unwrap().target, "b");
        assert!(x.select(0.6).is_none());
    }

    #[test]
    fn declared_order_is_not_resorted() {
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": {
                "x": { "edges": [
                    { "node": "b", "threshold": [0.2, 0.5] },
                    { "node": "a", "threshold": [0.0, 0.3] }
                ] },
                "a": { "edges": [] },
                "b": { "edges": [] }
            }
        }));
        assert_eq!(g.node("x").unwrap().select(0.25).unwrap().target, "b");
    }

    #[test]
    fn ranges_are_inclusive() {
        let edge = Edge { target: "a".into(), low: 0.2, high: 0.5 };
        assert!(edge.contains(0.2));
        assert!(edge.contains(0.5));
        assert!(!edge.contains(0.19));
        assert!(!edge.contains(0.51));
    }

    #[test]
    fn lookups_report_what_is_missing() {
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": { "x": {} }
        }));
        assert_eq!(
            g.node("nowhere").unwrap_err(),
            GraphError::UnknownNode("nowhere".into())
        );
        assert_eq!(
            g.node("x").unwrap().edges().unwrap_err(),
            GraphError::MissingEdges("x".into())
        );
    }

    #[test]
    fn incomplete_definition_builds_nothing() {
        let def: ScoreDefinition = serde_json::from_value(json!({ "name": "s" })).unwrap();
        assert!(ScoreGraph::from_definition(&def).is_none());
    }

    #[test]
    fn pulses_are_compiled_or_dropped() {
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": {
                "x": { "pulse": 100, "edges": [] },
                "y": { "pulse": "elapsed * 10", "edges": [] },
                "z": { "pulse": "elapsed *", "edges": [] },
                "w": { "pulse": 0, "edges": [] }
            }
        }));
        assert!(matches!(
            g.node("x").unwrap().pulse,
            Some(Pulse::Fixed(d)) if d == Duration::from_millis(100)
        ));
        assert!(matches!(g.node("y").unwrap().pulse, Some(Pulse::Expression(_))));
        assert!(g.node("z").unwrap().pulse.is_none());
        assert!(g.node("w").unwrap().pulse.is_none());
    }

    #[test]
    fn runaway_nesting_drops_the_pulse() {
        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": { "x": { "pulse": deep, "edges": [] } }
        }));
        assert!(g.node("x").unwrap().pulse.is_none());
    }

    #[test]
    fn audit_finds_structural_problems() {
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": {
                "x": { "edges": [
                    { "node": "y", "threshold": [0.0, 0.5] },
                    { "node": "ghost", "threshold": [0.5, 1.0] },
                    { "node": "y", "threshold": [0.9, 0.1] }
                ] },
                "y": { "edges": [ { "node": "x", "threshold": [0, 1] } ] },
                "island": { "edges": [] }
            }
        }));
        let audit = g.audit();
        assert_eq!(audit.dangling, vec![("x".to_string(), "ghost".to_string())]);
        assert_eq!(audit.inverted, vec![("x".to_string(), "y".to_string())]);
        assert_eq!(audit.unreachable, vec!["island".to_string()]);
        assert!(!audit.missing_start);
    }

    #[test]
    fn audit_of_clean_score() {
        let g = graph(json!({
            "name": "s", "start": "x",
            "nodes": {
                "x": { "edges": [ { "node": "y", "threshold": [0.5, 1] } ] },
                "y": { "edges": [ { "node": "x", "threshold": [0, 0.1] } ] }
            }
        }));
        assert!(g.report().is_clean());
    }

    #[test]
    fn audit_flags_missing_start() {
        let g = graph(json!({
            "name": "s", "start": "nope",
            "nodes": { "x": { "edges": [] } }
        }));
        assert!(g.audit().missing_start);
    }
}

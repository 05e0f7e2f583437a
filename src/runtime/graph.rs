/// Dependency graph construction and validation
///
/// Merges the two edge sources of a workflow (explicit connections and
/// inferred parameter references) into one adjacency list + in-degree map,
/// and validates the combined graph with a three-color DFS cycle check.
/// The graph is rebuilt fresh for every run and never persisted.

use crate::workflow::types::{NodeKind, Workflow, WorkflowNode};
use std::collections::{HashMap, HashSet};

/// Combined dependency graph for a single workflow run
///
/// Edges come from explicit connections (source -> target) and from inferred
/// reference dependencies (referenced node -> referencing node). An execute
/// node that reads another node's output must run after it even when no wire
/// was drawn between them, so both edge sources feed the same structure.
#[derive(Debug)]
pub struct DependencyGraph {
    /// node id -> ids of nodes that depend on it
    pub adjacency: HashMap<String, Vec<String>>,
    /// node id -> number of distinct dependency edges pointing at it
    pub in_degree: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build the combined graph covering every node of the workflow.
    ///
    /// Edges referencing unknown node ids and self-edges are silently dropped;
    /// a duplicate edge between the same pair is registered only once.
    pub fn build(workflow: &Workflow) -> Self {
        let mut graph = Self {
            adjacency: HashMap::new(),
            in_degree: HashMap::new(),
        };

        for node in &workflow.nodes {
            graph.adjacency.entry(node.id.clone()).or_default();
            graph.in_degree.entry(node.id.clone()).or_insert(0);
        }

        // Explicit connections first, then inferred reference edges under the
        // same dedup rules, so registration order stays deterministic.
        for connection in &workflow.connections {
            graph.add_edge(&connection.source_node_id, &connection.target_node_id);
        }

        for node in &workflow.nodes {
            for referenced in referenced_node_ids(node) {
                graph.add_edge(referenced, &node.id);
            }
        }

        tracing::debug!(
            "📊 Built dependency graph: {} nodes, {} edges",
            graph.adjacency.len(),
            graph.adjacency.values().map(|targets| targets.len()).sum::<usize>()
        );

        graph
    }

    /// Register a single edge, enforcing the drop rules.
    fn add_edge(&mut self, source: &str, target: &str) {
        if source == target || !self.in_degree.contains_key(target) {
            return;
        }
        let Some(targets) = self.adjacency.get_mut(source) else {
            tracing::debug!("🔗 Dropping edge from unknown node: '{}' → '{}'", source, target);
            return;
        };
        if targets.iter().any(|existing| existing == target) {
            return;
        }
        targets.push(target.to_string());
        *self.in_degree.entry(target.to_string()).or_insert(0) += 1;
    }

    /// Whether the combined graph contains a cycle.
    ///
    /// Classic three-color DFS: white = unvisited, gray = on the current DFS
    /// path, black = fully explored. Any edge into a gray node is a back-edge.
    pub fn has_cycle(&self, workflow: &Workflow) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<&str, Color> =
            self.adjacency.keys().map(|id| (id.as_str(), Color::White)).collect();

        // Iterative DFS with an explicit stack; the Leave marker turns a node
        // black once all of its descendants are explored.
        enum Step<'a> {
            Enter(&'a str),
            Leave(&'a str),
        }

        for node in &workflow.nodes {
            if colors.get(node.id.as_str()) != Some(&Color::White) {
                continue;
            }

            let mut stack = vec![Step::Enter(node.id.as_str())];
            while let Some(step) = stack.pop() {
                match step {
                    Step::Enter(id) => {
                        match colors.get(id) {
                            Some(Color::White) => {}
                            _ => continue,
                        }
                        colors.insert(id, Color::Gray);
                        stack.push(Step::Leave(id));
                        if let Some(targets) = self.adjacency.get(id) {
                            for target in targets {
                                match colors.get(target.as_str()) {
                                    Some(Color::Gray) => return true,
                                    Some(Color::White) => stack.push(Step::Enter(target.as_str())),
                                    _ => {}
                                }
                            }
                        }
                    }
                    Step::Leave(id) => {
                        colors.insert(id, Color::Black);
                    }
                }
            }
        }

        false
    }

    /// Transposed adjacency (target -> sources), used for backward reachability.
    pub fn transpose(&self) -> HashMap<String, Vec<String>> {
        let mut reversed: HashMap<String, Vec<String>> =
            self.adjacency.keys().map(|id| (id.clone(), Vec::new())).collect();
        for (source, targets) in &self.adjacency {
            for target in targets {
                reversed
                    .entry(target.clone())
                    .or_default()
                    .push(source.clone());
            }
        }
        reversed
    }

    /// All nodes reachable forward from the given starting set.
    pub fn reachable_from(&self, starts: &[String]) -> HashSet<String> {
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: std::collections::VecDeque<String> = std::collections::VecDeque::new();

        for start in starts {
            if self.adjacency.contains_key(start) && reachable.insert(start.clone()) {
                queue.push_back(start.clone());
            }
        }

        while let Some(current) = queue.pop_front() {
            if let Some(targets) = self.adjacency.get(&current) {
                for target in targets {
                    if reachable.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }

        reachable
    }
}

/// Every node id referenced by the node's parameter values.
///
/// Covers Execute action_config values, Condition left/right, and Extract
/// source + others, the fields the resolver reads at run time.
fn referenced_node_ids(node: &WorkflowNode) -> Vec<&str> {
    let mut referenced = Vec::new();
    match &node.kind {
        NodeKind::Trigger { .. } | NodeKind::Logic { .. } => {}
        NodeKind::Execute { action_config, .. } => {
            for value in action_config.values() {
                if let Some(id) = value.referenced_node_id() {
                    referenced.push(id);
                }
            }
        }
        NodeKind::Condition { left, right, .. } => {
            for value in [left, right] {
                if let Some(id) = value.referenced_node_id() {
                    referenced.push(id);
                }
            }
        }
        NodeKind::Extract(spec) => {
            if let Some(id) = spec.source.referenced_node_id() {
                referenced.push(id);
            }
            for value in &spec.others {
                if let Some(id) = value.referenced_node_id() {
                    referenced.push(id);
                }
            }
        }
    }
    referenced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{
        ComparisonOperator, ParameterValue, WorkflowNodeConnection,
    };

    fn trigger(id: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Trigger { trigger_type: "manual".into(), schedule: None },
        }
    }

    fn execute(id: &str, config: Vec<(&str, ParameterValue)>) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Execute {
                action_type: "echo".into(),
                action_config: config
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            },
        }
    }

    fn condition(id: &str, left: ParameterValue, right: ParameterValue) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Condition { left, right, operator: ComparisonOperator::Eq },
        }
    }

    fn wire(source: &str, target: &str) -> WorkflowNodeConnection {
        WorkflowNodeConnection {
            source_node_id: source.into(),
            target_node_id: target.into(),
            condition: None,
        }
    }

    fn workflow(nodes: Vec<WorkflowNode>, connections: Vec<WorkflowNodeConnection>) -> Workflow {
        Workflow { id: "wf-test".into(), name: "test".into(), nodes, connections }
    }

    #[test]
    fn explicit_connections_become_edges() {
        let wf = workflow(
            vec![trigger("t"), execute("a", vec![]), execute("b", vec![])],
            vec![wire("t", "a"), wire("a", "b")],
        );
        let graph = DependencyGraph::build(&wf);

        assert_eq!(graph.adjacency["t"], vec!["a"]);
        assert_eq!(graph.adjacency["a"], vec!["b"]);
        assert_eq!(graph.in_degree["t"], 0);
        assert_eq!(graph.in_degree["a"], 1);
        assert_eq!(graph.in_degree["b"], 1);
    }

    #[test]
    fn duplicate_edges_are_registered_once() {
        let wf = workflow(
            vec![trigger("t"), execute("a", vec![])],
            vec![wire("t", "a"), wire("t", "a")],
        );
        let graph = DependencyGraph::build(&wf);

        assert_eq!(graph.adjacency["t"], vec!["a"]);
        assert_eq!(graph.in_degree["a"], 1);
    }

    #[test]
    fn parameter_references_add_inferred_edges() {
        // Two conditions read the same execute node's output with no wires at
        // all between them; the execute node must still be ordered first.
        let wf = workflow(
            vec![
                execute("fetch", vec![]),
                condition("c1", ParameterValue::reference("fetch"), ParameterValue::literal("1")),
                condition("c2", ParameterValue::reference("fetch"), ParameterValue::literal("2")),
            ],
            vec![],
        );
        let graph = DependencyGraph::build(&wf);

        assert_eq!(graph.adjacency["fetch"], vec!["c1", "c2"]);
        assert_eq!(graph.in_degree["c1"], 1);
        assert_eq!(graph.in_degree["c2"], 1);
    }

    #[test]
    fn explicit_wire_and_reference_between_same_pair_count_once() {
        let wf = workflow(
            vec![
                execute("a", vec![]),
                execute("b", vec![("input", ParameterValue::reference("a"))]),
            ],
            vec![wire("a", "b")],
        );
        let graph = DependencyGraph::build(&wf);

        assert_eq!(graph.adjacency["a"], vec!["b"]);
        assert_eq!(graph.in_degree["b"], 1);
    }

    #[test]
    fn unknown_endpoints_and_self_edges_are_dropped() {
        let wf = workflow(
            vec![execute("a", vec![("loop", ParameterValue::reference("a"))])],
            vec![wire("a", "ghost"), wire("ghost", "a"), wire("a", "a")],
        );
        let graph = DependencyGraph::build(&wf);

        assert!(graph.adjacency["a"].is_empty());
        assert_eq!(graph.in_degree["a"], 0);
    }

    #[test]
    fn cycle_is_detected() {
        let wf = workflow(
            vec![execute("a", vec![]), execute("b", vec![]), execute("c", vec![])],
            vec![wire("a", "b"), wire("b", "c"), wire("c", "a")],
        );
        let graph = DependencyGraph::build(&wf);
        assert!(graph.has_cycle(&wf));
    }

    #[test]
    fn reference_cycle_is_detected() {
        // a reads b, b is wired from a: a → b and b → a combined.
        let wf = workflow(
            vec![
                execute("a", vec![("in", ParameterValue::reference("b"))]),
                execute("b", vec![]),
            ],
            vec![wire("a", "b")],
        );
        let graph = DependencyGraph::build(&wf);
        assert!(graph.has_cycle(&wf));
    }

    #[test]
    fn acyclic_diamond_passes() {
        let wf = workflow(
            vec![
                trigger("t"),
                execute("a", vec![]),
                execute("b", vec![]),
                execute("join", vec![]),
            ],
            vec![wire("t", "a"), wire("t", "b"), wire("a", "join"), wire("b", "join")],
        );
        let graph = DependencyGraph::build(&wf);
        assert!(!graph.has_cycle(&wf));
    }

    #[test]
    fn forward_and_backward_reachability() {
        // t → a → join, with join also reading "side" which nothing wires in.
        let wf = workflow(
            vec![
                trigger("t"),
                execute("a", vec![]),
                execute("side", vec![]),
                execute("join", vec![("extra", ParameterValue::reference("side"))]),
                execute("unrelated", vec![]),
            ],
            vec![wire("t", "a"), wire("a", "join")],
        );
        let graph = DependencyGraph::build(&wf);

        let forward = graph.reachable_from(&["t".to_string()]);
        assert!(forward.contains("join"));
        assert!(!forward.contains("side"));

        // Backward closure over the transpose pulls the referenced ancestor in.
        let transposed = graph.transpose();
        assert!(transposed["join"].contains(&"side".to_string()));
        assert!(!forward.contains("unrelated"));
    }
}

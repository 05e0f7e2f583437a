/// Topological workflow execution engine
///
/// Walks a workflow's combined dependency graph (explicit wires + inferred
/// parameter references) in Kahn order, gating every node on its inbound
/// edge predicates and propagating skips forward so downstream joins never
/// stall. The worklist is an explicit FIFO queue plus restricted in-degree
/// counters: skip propagation and restricted reachability both hook into
/// the same decrement step, which a generic graph library would hide.

use crate::runtime::dispatch::ActionDispatcher;
use crate::runtime::graph::DependencyGraph;
use crate::runtime::interpreter::{parse_boolean_like, NodeInterpreter, RunContext};
use crate::runtime::SKIP_SENTINEL;
use crate::workflow::types::{
    NodeExecutionState, NodeKind, Workflow, WorkflowNode, WorkflowNodeConnection,
};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Final verdict of one workflow run
///
/// `node_states` holds the terminal state of every node the walk touched;
/// a node absent from the map never left Pending.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub workflow_id: String,
    pub success: bool,
    pub node_states: HashMap<String, NodeExecutionState>,
    pub message: String,
}

/// Synchronous sink for node state transitions
///
/// Called once per transition, in transition order, including the transient
/// Running state. This is the engine's sole observability hook.
pub trait RunObserver: Send + Sync {
    fn on_node_state(&self, node_id: &str, state: &NodeExecutionState);
}

/// Observer that mirrors every transition into the tracing log.
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_node_state(&self, node_id: &str, state: &NodeExecutionState) {
        tracing::debug!("📍 Node '{}' → {:?}", node_id, state);
    }
}

/// Workflow execution engine
///
/// Stateless across runs: every `execute` call builds its graph and state
/// map from scratch, so concurrent runs of different workflows share
/// nothing but the dispatcher.
pub struct ExecutionEngine {
    interpreter: NodeInterpreter,
}

impl ExecutionEngine {
    /// Create a new engine on top of an action dispatcher.
    pub fn new(dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        Self { interpreter: NodeInterpreter::new(dispatcher) }
    }

    /// Execute one workflow run.
    ///
    /// `trigger_node_id` selects a specific trigger (explicit or scheduled
    /// invocation); without it every trigger of type "manual" is activated.
    /// The trigger context is serialized onto each activated trigger as its
    /// Success result, so downstream nodes can reference it.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        trigger_node_id: Option<&str>,
        trigger_context: &BTreeMap<String, String>,
        observer: Option<&dyn RunObserver>,
    ) -> RunResult {
        let run_start = std::time::Instant::now();
        tracing::info!(
            "🚀 Starting workflow run: {} ({} nodes, {} connections)",
            workflow.id,
            workflow.nodes.len(),
            workflow.connections.len()
        );

        let graph = DependencyGraph::build(workflow);

        // Structural validation happens before any node changes state.
        if graph.has_cycle(workflow) {
            tracing::error!("❌ Workflow '{}' contains a cycle", workflow.id);
            return structural_failure(workflow, "workflow graph contains a cycle");
        }

        let selected = match select_triggers(workflow, trigger_node_id) {
            Ok(selected) => selected,
            Err(message) => {
                tracing::error!("❌ Workflow '{}': {}", workflow.id, message);
                return structural_failure(workflow, &message);
            }
        };
        tracing::debug!("🎯 Selected trigger nodes: {:?}", selected);

        let node_map: HashMap<&str, &WorkflowNode> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        // Activate the selected triggers with the serialized context.
        let mut states: HashMap<String, NodeExecutionState> = HashMap::new();
        let serialized_context =
            serde_json::to_string(trigger_context).unwrap_or_else(|_| "{}".to_string());
        for trigger_id in &selected {
            record_state(
                &mut states,
                observer,
                trigger_id,
                NodeExecutionState::Success { result: serialized_context.clone() },
            );
        }

        // Forward reach from the triggers, then backward closure so every
        // ancestor whose output the active subgraph might need is present,
        // without waking unrelated sibling triggers.
        let mut reachable = graph.reachable_from(&selected);
        let transposed = graph.transpose();
        let mut backward: VecDeque<String> = reachable.iter().cloned().collect();
        while let Some(current) = backward.pop_front() {
            if let Some(sources) = transposed.get(&current) {
                for source in sources {
                    if reachable.insert(source.clone()) {
                        backward.push_back(source.clone());
                    }
                }
            }
        }

        // Restricted in-degree: only edges between two reachable non-trigger
        // nodes count, since triggers are already resolved.
        let schedulable: HashSet<&str> = workflow
            .nodes
            .iter()
            .filter(|n| !n.is_trigger() && reachable.contains(&n.id))
            .map(|n| n.id.as_str())
            .collect();

        let mut in_degree: HashMap<String, usize> =
            schedulable.iter().map(|id| (id.to_string(), 0)).collect();
        for (source, targets) in &graph.adjacency {
            if !schedulable.contains(source.as_str()) {
                continue;
            }
            for target in targets {
                if let Some(depth) = in_degree.get_mut(target) {
                    *depth += 1;
                }
            }
        }

        // Seed the queue in node declaration order so FIFO traversal stays
        // deterministic for a deterministic input graph.
        let mut queue: VecDeque<String> = VecDeque::new();
        for node in &workflow.nodes {
            if in_degree.get(&node.id) == Some(&0) {
                queue.push_back(node.id.clone());
            }
        }

        while let Some(node_id) = queue.pop_front() {
            // Guard against duplicate seeding.
            if states.contains_key(&node_id) {
                continue;
            }
            let Some(node) = node_map.get(node_id.as_str()) else {
                continue;
            };

            // Inbound explicit wires restricted to reachable sources; wires
            // from triggers only count when that trigger was selected.
            let inbound: Vec<&WorkflowNodeConnection> = workflow
                .connections
                .iter()
                .filter(|c| c.target_node_id == node_id)
                .filter(|c| reachable.contains(&c.source_node_id))
                .filter(|c| match node_map.get(c.source_node_id.as_str()) {
                    Some(source) if source.is_trigger() => selected.contains(&c.source_node_id),
                    Some(_) => true,
                    None => false,
                })
                .collect();

            // OR-join: a node with inbound wires runs if at least one of
            // them is satisfied; with none it runs unconditionally.
            let gate_open = inbound.is_empty()
                || inbound
                    .iter()
                    .any(|c| connection_satisfied(c, &node_map, &states));

            if gate_open {
                record_state(&mut states, observer, &node_id, NodeExecutionState::Running);

                let ctx = RunContext { workflow, states: &states };
                let outcome = self.interpreter.evaluate(node, &ctx).await;
                let state = match outcome {
                    Ok(result) => {
                        tracing::info!("✅ Node '{}' completed", node_id);
                        NodeExecutionState::Success { result }
                    }
                    Err(e) => {
                        tracing::error!("❌ Node '{}' failed: {}", node_id, e);
                        NodeExecutionState::Failed { error: e.to_string() }
                    }
                };
                record_state(&mut states, observer, &node_id, state);
            } else {
                tracing::debug!("⏭️ Node '{}' skipped: no inbound condition satisfied", node_id);
                record_state(
                    &mut states,
                    observer,
                    &node_id,
                    NodeExecutionState::Skipped { reason: SKIP_SENTINEL.to_string() },
                );
            }

            // Skips propagate exactly like completions so downstream joins
            // see the edge as unsatisfied instead of stalling the walk.
            if let Some(successors) = graph.adjacency.get(&node_id) {
                for successor in successors {
                    if let Some(depth) = in_degree.get_mut(successor) {
                        *depth = depth.saturating_sub(1);
                        if *depth == 0 {
                            queue.push_back(successor.clone());
                        }
                    }
                }
            }
        }

        let (success, message) = aggregate_result(workflow, &states);
        let duration = run_start.elapsed();
        if success {
            tracing::info!("🎉 Workflow '{}' run completed in {:?}", workflow.id, duration);
        } else {
            tracing::warn!(
                "⚠️ Workflow '{}' run failed in {:?}: {}",
                workflow.id,
                duration,
                message
            );
        }

        RunResult { workflow_id: workflow.id.clone(), success, node_states: states, message }
    }
}

/// Entry-point selection per the invocation kind.
fn select_triggers(workflow: &Workflow, trigger_node_id: Option<&str>) -> Result<Vec<String>, String> {
    let triggers: Vec<&WorkflowNode> =
        workflow.nodes.iter().filter(|n| n.is_trigger()).collect();
    if triggers.is_empty() {
        return Err("workflow has no trigger node".to_string());
    }

    match trigger_node_id {
        Some(requested) => {
            if triggers.iter().any(|t| t.id == requested) {
                Ok(vec![requested.to_string()])
            } else {
                Err(format!("trigger node '{}' not found", requested))
            }
        }
        None => {
            let manual: Vec<String> = triggers
                .iter()
                .filter(|t| {
                    matches!(&t.kind, NodeKind::Trigger { trigger_type, .. } if trigger_type == "manual")
                })
                .map(|t| t.id.clone())
                .collect();
            if manual.is_empty() {
                Err("workflow has no manual trigger node".to_string())
            } else {
                Ok(manual)
            }
        }
    }
}

/// Record a state transition and notify the observer, in that order.
fn record_state(
    states: &mut HashMap<String, NodeExecutionState>,
    observer: Option<&dyn RunObserver>,
    node_id: &str,
    state: NodeExecutionState,
) {
    states.insert(node_id.to_string(), state);
    if let (Some(observer), Some(state)) = (observer, states.get(node_id)) {
        observer.on_node_state(node_id, state);
    }
}

/// Edge predicate evaluation against the source node's final state.
///
/// Skipped sources (including the Success-with-sentinel form) never satisfy
/// any predicate. A blank predicate defaults to "true" when the source is a
/// Condition/Logic node and to plain success gating otherwise. Unrecognized
/// text is compiled as a regex over the source's result.
fn connection_satisfied(
    connection: &WorkflowNodeConnection,
    node_map: &HashMap<&str, &WorkflowNode>,
    states: &HashMap<String, NodeExecutionState>,
) -> bool {
    let Some(source_state) = states.get(&connection.source_node_id) else {
        return false;
    };
    match source_state {
        NodeExecutionState::Skipped { .. } => return false,
        NodeExecutionState::Success { result } if result == SKIP_SENTINEL => return false,
        _ => {}
    }

    let raw = connection.condition.as_deref().unwrap_or("");
    let source_is_gate = node_map
        .get(connection.source_node_id.as_str())
        .map(|n| matches!(n.kind, NodeKind::Condition { .. } | NodeKind::Logic { .. }))
        .unwrap_or(false);
    let condition = if raw.trim().is_empty() && source_is_gate { "true" } else { raw };

    let normalized = condition.trim().to_lowercase();
    match normalized.as_str() {
        "error" | "failed" | "on_error" => source_state.is_failed(),
        "success" | "ok" | "on_success" => source_state.is_success(),
        "" => source_state.is_success(),
        "true" | "false" => match source_state.result_text() {
            Some(result) => parse_boolean_like(result) == (normalized == "true"),
            None => false,
        },
        _ => match source_state.result_text() {
            Some(result) => Regex::new(condition)
                .map(|re| re.is_match(result))
                .unwrap_or(false),
            None => false,
        },
    }
}

/// A failure is caught when an error-branch out of the failed node ended in
/// a successful handler.
fn is_error_branch(condition: Option<&str>) -> bool {
    matches!(
        condition.map(|c| c.trim().to_lowercase()).as_deref(),
        Some("error" | "failed" | "on_error")
    )
}

/// Run-level verdict: failed nodes are tolerated only when explicitly caught.
fn aggregate_result(
    workflow: &Workflow,
    states: &HashMap<String, NodeExecutionState>,
) -> (bool, String) {
    let mut uncaught: Vec<String> = states
        .iter()
        .filter(|(_, state)| state.is_failed())
        .filter(|(node_id, _)| {
            !workflow.connections.iter().any(|c| {
                c.source_node_id == **node_id
                    && is_error_branch(c.condition.as_deref())
                    && matches!(
                        states.get(&c.target_node_id),
                        Some(NodeExecutionState::Success { .. })
                    )
            })
        })
        .map(|(node_id, _)| node_id.clone())
        .collect();

    if uncaught.is_empty() {
        (true, "workflow completed".to_string())
    } else {
        uncaught.sort();
        (false, format!("uncaught node failures: {}", uncaught.join(", ")))
    }
}

fn structural_failure(workflow: &Workflow, message: &str) -> RunResult {
    RunResult {
        workflow_id: workflow.id.clone(),
        success: false,
        node_states: HashMap::new(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatch::{ActionOutcome, ActionParameter};
    use crate::workflow::types::{
        ComparisonOperator, ExtractMode, ExtractSpec, LogicOperator, ParameterValue,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Dispatcher stub: echoes the "text" parameter unless an outcome was
    /// pinned for the action type. Records every call for assertions.
    struct StubDispatcher {
        outcomes: HashMap<String, ActionOutcome>,
        calls: Mutex<Vec<(String, Vec<ActionParameter>)>>,
    }

    impl StubDispatcher {
        fn new() -> Self {
            Self { outcomes: HashMap::new(), calls: Mutex::new(Vec::new()) }
        }

        fn with_outcome(mut self, action_type: &str, outcome: ActionOutcome) -> Self {
            self.outcomes.insert(action_type.to_string(), outcome);
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ActionDispatcher for StubDispatcher {
        async fn invoke(
            &self,
            action_type: &str,
            parameters: &[ActionParameter],
        ) -> Result<ActionOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((action_type.to_string(), parameters.to_vec()));
            if let Some(outcome) = self.outcomes.get(action_type) {
                return Ok(outcome.clone());
            }
            let text = parameters
                .iter()
                .find(|p| p.name == "text")
                .map(|p| p.value.clone())
                .unwrap_or_default();
            Ok(ActionOutcome::ok(text))
        }
    }

    /// Observer stub collecting transitions in order.
    struct RecordingObserver {
        transitions: Mutex<Vec<(String, NodeExecutionState)>>,
    }

    impl RecordingObserver {
        fn new() -> Self {
            Self { transitions: Mutex::new(Vec::new()) }
        }
    }

    impl RunObserver for RecordingObserver {
        fn on_node_state(&self, node_id: &str, state: &NodeExecutionState) {
            self.transitions
                .lock()
                .unwrap()
                .push((node_id.to_string(), state.clone()));
        }
    }

    fn trigger(id: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Trigger { trigger_type: "manual".into(), schedule: None },
        }
    }

    fn cron_trigger(id: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Trigger {
                trigger_type: "cron".into(),
                schedule: Some("0 */1 * * * *".into()),
            },
        }
    }

    fn execute(id: &str, action: &str, config: Vec<(&str, ParameterValue)>) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Execute {
                action_type: action.into(),
                action_config: config.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            },
        }
    }

    fn condition(
        id: &str,
        left: ParameterValue,
        right: ParameterValue,
        operator: ComparisonOperator,
    ) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Condition { left, right, operator },
        }
    }

    fn logic(id: &str, operator: LogicOperator) -> WorkflowNode {
        WorkflowNode { id: id.into(), name: id.into(), kind: NodeKind::Logic { operator } }
    }

    fn json_extract(id: &str, source: ParameterValue, expression: &str) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            name: id.into(),
            kind: NodeKind::Extract(ExtractSpec {
                mode: ExtractMode::Json,
                source,
                expression: expression.into(),
                group: 0,
                default_value: String::new(),
                others: vec![],
                start_index: 0,
                length: -1,
                use_fixed: false,
                fixed_value: String::new(),
                random_min: 0,
                random_max: 100,
                random_string_length: 8,
                random_string_charset: String::new(),
            }),
        }
    }

    fn wire(source: &str, target: &str) -> WorkflowNodeConnection {
        WorkflowNodeConnection {
            source_node_id: source.into(),
            target_node_id: target.into(),
            condition: None,
        }
    }

    fn wire_if(source: &str, target: &str, condition: &str) -> WorkflowNodeConnection {
        WorkflowNodeConnection {
            source_node_id: source.into(),
            target_node_id: target.into(),
            condition: Some(condition.into()),
        }
    }

    fn workflow(nodes: Vec<WorkflowNode>, connections: Vec<WorkflowNodeConnection>) -> Workflow {
        Workflow { id: "wf-test".into(), name: "test".into(), nodes, connections }
    }

    fn engine(dispatcher: StubDispatcher) -> (ExecutionEngine, Arc<StubDispatcher>) {
        let shared = Arc::new(dispatcher);
        (ExecutionEngine::new(shared.clone()), shared)
    }

    async fn run(engine: &ExecutionEngine, wf: &Workflow) -> RunResult {
        engine.execute(wf, None, &BTreeMap::new(), None).await
    }

    #[tokio::test]
    async fn manual_trigger_runs_wired_execute_node() {
        let (engine, dispatcher) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                execute("e", "echo", vec![("text", ParameterValue::literal("hi"))]),
            ],
            vec![wire("t", "e")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(
            result.node_states["e"],
            NodeExecutionState::Success { result: "hi".into() }
        );
        assert_eq!(dispatcher.call_count(), 1);
    }

    #[tokio::test]
    async fn condition_node_compares_static_values() {
        let (engine, _) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                condition(
                    "c",
                    ParameterValue::literal("5"),
                    ParameterValue::literal("3"),
                    ComparisonOperator::Gt,
                ),
            ],
            vec![wire("t", "c")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success);
        assert_eq!(
            result.node_states["c"],
            NodeExecutionState::Success { result: "true".into() }
        );
    }

    #[tokio::test]
    async fn error_branch_catches_failed_node() {
        let dispatcher = StubDispatcher::new()
            .with_outcome("flaky", ActionOutcome::err("upstream exploded"));
        let (engine, _) = engine(dispatcher);
        let wf = workflow(
            vec![
                trigger("t"),
                execute("a", "flaky", vec![]),
                execute("b", "echo", vec![("text", ParameterValue::literal("recovered"))]),
            ],
            vec![wire("t", "a"), wire_if("a", "b", "error")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success, "{}", result.message);
        assert!(result.node_states["a"].is_failed());
        assert_eq!(
            result.node_states["b"],
            NodeExecutionState::Success { result: "recovered".into() }
        );
    }

    #[tokio::test]
    async fn uncaught_failure_fails_the_run() {
        let dispatcher = StubDispatcher::new()
            .with_outcome("flaky", ActionOutcome::err("upstream exploded"));
        let (engine, _) = engine(dispatcher);
        let wf = workflow(
            vec![trigger("t"), execute("a", "flaky", vec![])],
            vec![wire("t", "a")],
        );

        let result = run(&engine, &wf).await;
        assert!(!result.success);
        assert!(result.message.contains("a"));
    }

    #[tokio::test]
    async fn json_extraction_runs_inside_a_workflow() {
        let (engine, _) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                json_extract("x", ParameterValue::literal(r#"{"a":[{"b":1}]}"#), "a[0].b"),
            ],
            vec![wire("t", "x")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success);
        assert_eq!(
            result.node_states["x"],
            NodeExecutionState::Success { result: "1".into() }
        );
    }

    #[tokio::test]
    async fn reference_dependencies_order_unwired_nodes() {
        // Two conditions read "fetch" with no wires between them at all;
        // the inferred edges must still run fetch first.
        let (engine, dispatcher) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                condition(
                    "c1",
                    ParameterValue::reference("fetch"),
                    ParameterValue::literal("3"),
                    ComparisonOperator::Gt,
                ),
                condition(
                    "c2",
                    ParameterValue::reference("fetch"),
                    ParameterValue::literal("3"),
                    ComparisonOperator::Lt,
                ),
                execute("fetch", "echo", vec![("text", ParameterValue::literal("5"))]),
            ],
            vec![wire("t", "fetch")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(dispatcher.call_count(), 1);
        assert_eq!(
            result.node_states["c1"],
            NodeExecutionState::Success { result: "true".into() }
        );
        assert_eq!(
            result.node_states["c2"],
            NodeExecutionState::Success { result: "false".into() }
        );
    }

    #[tokio::test]
    async fn cycle_fails_before_anything_executes() {
        let (engine, dispatcher) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![trigger("t"), execute("a", "echo", vec![]), execute("b", "echo", vec![])],
            vec![wire("t", "a"), wire("a", "b"), wire("b", "a")],
        );

        let result = run(&engine, &wf).await;
        assert!(!result.success);
        assert!(result.message.contains("cycle"));
        assert!(result.node_states.is_empty());
        assert_eq!(dispatcher.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_triggers_are_structural_failures() {
        let (engine, _) = engine(StubDispatcher::new());

        let no_trigger = workflow(vec![execute("a", "echo", vec![])], vec![]);
        let result = run(&engine, &no_trigger).await;
        assert!(!result.success);
        assert!(result.node_states.is_empty());

        let only_cron = workflow(vec![cron_trigger("cron")], vec![]);
        let result = run(&engine, &only_cron).await;
        assert!(!result.success, "ambient invocation needs a manual trigger");

        let with_manual = workflow(vec![trigger("t")], vec![]);
        let result = with_manual_unknown_trigger(&engine, &with_manual).await;
        assert!(!result.success);
        assert!(result.message.contains("ghost"));
    }

    async fn with_manual_unknown_trigger(engine: &ExecutionEngine, wf: &Workflow) -> RunResult {
        engine.execute(wf, Some("ghost"), &BTreeMap::new(), None).await
    }

    #[tokio::test]
    async fn requested_trigger_activates_only_its_branch() {
        let (engine, dispatcher) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("manual"),
                cron_trigger("nightly"),
                execute("manual-job", "echo", vec![("text", ParameterValue::literal("m"))]),
                execute("nightly-job", "echo", vec![("text", ParameterValue::literal("n"))]),
            ],
            vec![wire("manual", "manual-job"), wire("nightly", "nightly-job")],
        );

        let result = engine
            .execute(&wf, Some("nightly"), &BTreeMap::new(), None)
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(dispatcher.call_count(), 1);
        assert!(result.node_states["nightly-job"].is_success());
        assert!(!result.node_states.contains_key("manual-job"));
        assert!(!result.node_states.contains_key("manual"));
    }

    #[tokio::test]
    async fn false_condition_skips_downstream_chain() {
        let (engine, dispatcher) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                condition(
                    "gate",
                    ParameterValue::literal("1"),
                    ParameterValue::literal("2"),
                    ComparisonOperator::Eq,
                ),
                execute("guarded", "echo", vec![]),
                execute("tail", "echo", vec![]),
            ],
            vec![wire("t", "gate"), wire_if("gate", "guarded", "true"), wire("guarded", "tail")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(
            result.node_states["guarded"],
            NodeExecutionState::Skipped { reason: SKIP_SENTINEL.into() }
        );
        // Skip propagates: the tail is reached, sees a skipped source, skips too.
        assert_eq!(
            result.node_states["tail"],
            NodeExecutionState::Skipped { reason: SKIP_SENTINEL.into() }
        );
        assert_eq!(dispatcher.call_count(), 0);
    }

    #[tokio::test]
    async fn or_join_runs_when_any_branch_is_satisfied() {
        let (engine, _) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                condition(
                    "yes",
                    ParameterValue::literal("1"),
                    ParameterValue::literal("1"),
                    ComparisonOperator::Eq,
                ),
                condition(
                    "no",
                    ParameterValue::literal("1"),
                    ParameterValue::literal("2"),
                    ComparisonOperator::Eq,
                ),
                execute("join", "echo", vec![("text", ParameterValue::literal("ran"))]),
            ],
            vec![
                wire("t", "yes"),
                wire("t", "no"),
                wire_if("yes", "join", "true"),
                wire_if("no", "join", "true"),
            ],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success);
        assert_eq!(
            result.node_states["join"],
            NodeExecutionState::Success { result: "ran".into() }
        );
    }

    #[tokio::test]
    async fn logic_join_combines_condition_branches() {
        let (engine, _) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                condition(
                    "c1",
                    ParameterValue::literal("5"),
                    ParameterValue::literal("3"),
                    ComparisonOperator::Gt,
                ),
                condition(
                    "c2",
                    ParameterValue::literal("a"),
                    ParameterValue::literal("a"),
                    ComparisonOperator::Eq,
                ),
                logic("all", LogicOperator::And),
            ],
            vec![wire("t", "c1"), wire("t", "c2"), wire("c1", "all"), wire("c2", "all")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(
            result.node_states["all"],
            NodeExecutionState::Success { result: "true".into() }
        );
    }

    #[tokio::test]
    async fn trigger_context_is_referencable_downstream() {
        let (engine, _) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![trigger("t"), json_extract("who", ParameterValue::reference("t"), "user")],
            vec![wire("t", "who")],
        );

        let mut context = BTreeMap::new();
        context.insert("user".to_string(), "ada".to_string());
        let result = engine.execute(&wf, None, &context, None).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(
            result.node_states["t"],
            NodeExecutionState::Success { result: r#"{"user":"ada"}"#.into() }
        );
        assert_eq!(
            result.node_states["who"],
            NodeExecutionState::Success { result: "ada".into() }
        );
    }

    #[tokio::test]
    async fn reference_to_failed_node_fails_dependent() {
        let dispatcher =
            StubDispatcher::new().with_outcome("flaky", ActionOutcome::err("boom"));
        let (engine, _) = engine(dispatcher);
        let wf = workflow(
            vec![
                trigger("t"),
                execute("a", "flaky", vec![]),
                execute("b", "echo", vec![("text", ParameterValue::reference("a"))]),
            ],
            vec![wire("t", "a")],
        );

        let result = run(&engine, &wf).await;
        assert!(!result.success);
        assert!(result.node_states["a"].is_failed());
        match &result.node_states["b"] {
            NodeExecutionState::Failed { error } => assert!(error.contains("failed")),
            other => panic!("expected resolution failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn observer_sees_running_before_terminal_states() {
        let (engine, _) = engine(StubDispatcher::new());
        let observer = RecordingObserver::new();
        let wf = workflow(
            vec![
                trigger("t"),
                execute("e", "echo", vec![("text", ParameterValue::literal("hi"))]),
            ],
            vec![wire("t", "e")],
        );

        let result = engine
            .execute(&wf, None, &BTreeMap::new(), Some(&observer))
            .await;
        assert!(result.success);

        let transitions = observer.transitions.lock().unwrap();
        let states_for_e: Vec<&NodeExecutionState> = transitions
            .iter()
            .filter(|(id, _)| id == "e")
            .map(|(_, state)| state)
            .collect();
        assert_eq!(states_for_e.len(), 2);
        assert_eq!(*states_for_e[0], NodeExecutionState::Running);
        assert!(states_for_e[1].is_success());
        // The trigger activation is observable too.
        assert!(transitions.iter().any(|(id, state)| id == "t" && state.is_success()));
    }

    #[tokio::test]
    async fn backward_closure_runs_referenced_ancestors() {
        // "join" is wired from the trigger but reads "side", which no wire
        // reaches; backward reachability must pull "side" into the run.
        let (engine, dispatcher) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                execute("side", "echo", vec![("text", ParameterValue::literal("s"))]),
                execute("join", "echo", vec![("text", ParameterValue::reference("side"))]),
            ],
            vec![wire("t", "join")],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(dispatcher.call_count(), 2);
        assert_eq!(
            result.node_states["join"],
            NodeExecutionState::Success { result: "s".into() }
        );
    }

    #[tokio::test]
    async fn regex_predicates_gate_on_result_text() {
        let (engine, _) = engine(StubDispatcher::new());
        let wf = workflow(
            vec![
                trigger("t"),
                execute("emit", "echo", vec![("text", ParameterValue::literal("deploy-v42"))]),
                execute("matched", "echo", vec![("text", ParameterValue::literal("yes"))]),
                execute("unmatched", "echo", vec![("text", ParameterValue::literal("no"))]),
            ],
            vec![
                wire("t", "emit"),
                wire_if("emit", "matched", r"deploy-v\d+"),
                wire_if("emit", "unmatched", r"rollback-v\d+"),
            ],
        );

        let result = run(&engine, &wf).await;
        assert!(result.success);
        assert!(result.node_states["matched"].is_success());
        assert_eq!(
            result.node_states["unmatched"],
            NodeExecutionState::Skipped { reason: SKIP_SENTINEL.into() }
        );
    }
}

/// Core workflow type definitions
///
/// Defines the fundamental structures for workflows, typed nodes, and conditional
/// connections. These types are serialized/deserialized from JSON for persistence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON in SQLite and handed to the execution engine
/// as immutable input for a single run. Each workflow can have multiple entry
/// points (trigger nodes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-deploy-gate")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    pub nodes: Vec<WorkflowNode>,
    /// List of connections wiring nodes together
    #[serde(default)]
    pub connections: Vec<WorkflowNodeConnection>,
}

/// A single node in the workflow graph
///
/// Nodes represent discrete units (triggers, action invocations, comparisons,
/// boolean joins, data extraction). The kind enum carries the per-variant
/// configuration, so interpreter dispatch is exhaustive and typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node identifier within the workflow (e.g., "n1", "trigger-start")
    pub id: String,
    /// Display name shown in run logs
    #[serde(default)]
    pub name: String,
    /// The typed variant determining execution behavior
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl WorkflowNode {
    /// Whether this node is a trigger (run entry point, never queued for execution).
    pub fn is_trigger(&self) -> bool {
        matches!(self.kind, NodeKind::Trigger { .. })
    }
}

/// Available node kinds for the gearway engine
///
/// Core kinds:
/// - Trigger: run entry point, activated rather than executed
/// - Execute: invokes a named external action with resolved parameters
/// - Condition: compares two resolved values, yields "true"/"false"
/// - Logic: AND/OR join over inbound branch results
/// - Extract: pulls data out of an upstream result (regex/json/substring/...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Run entry point
    /// Expected fields: { "trigger_type": "manual" } or { "trigger_type": "cron", "schedule": "0 */1 * * * *" }
    Trigger {
        trigger_type: String,
        /// Cron expression for scheduler-fired triggers; manual triggers leave this unset
        #[serde(default)]
        schedule: Option<String>,
    },

    /// External action invocation
    /// Expected fields: { "action_type": "http_request", "action_config": { "url": {...} } }
    Execute {
        action_type: String,
        /// Parameter name -> value; ordered so dispatch parameter order is deterministic
        #[serde(default)]
        action_config: BTreeMap<String, ParameterValue>,
    },

    /// Two-sided comparison, result is the literal text "true" or "false"
    /// Expected fields: { "left": {...}, "right": {...}, "operator": "GT" }
    Condition {
        left: ParameterValue,
        right: ParameterValue,
        operator: ComparisonOperator,
    },

    /// Boolean join over incoming branch results
    /// Expected fields: { "operator": "AND" }
    Logic { operator: LogicOperator },

    /// Data extraction from a resolved source value
    /// Expected fields: { "mode": "JSON", "source": {...}, "expression": "a[0].b" }
    Extract(ExtractSpec),
}

/// Comparison operators supported by Condition nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    In,
    NotIn,
}

/// Boolean join operators supported by Logic nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicOperator {
    And,
    Or,
}

/// Extraction strategies supported by Extract nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractMode {
    Regex,
    Json,
    Sub,
    Concat,
    RandomInt,
    RandomString,
}

/// Configuration for an Extract node
///
/// Only `mode` and `source` are mandatory; every other field has a default so
/// workflow documents stay terse. Which fields are read depends on the mode:
/// - REGEX: expression, group, default_value
/// - JSON: expression (dotted path with optional [i] indices), default_value
/// - SUB: start_index, length (negative = to end), default_value
/// - CONCAT: others
/// - RANDOM_INT: use_fixed/fixed_value or random_min/random_max
/// - RANDOM_STRING: use_fixed/fixed_value or random_string_length/random_string_charset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub mode: ExtractMode,
    pub source: ParameterValue,
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub group: usize,
    #[serde(default)]
    pub default_value: String,
    #[serde(default)]
    pub others: Vec<ParameterValue>,
    #[serde(default)]
    pub start_index: i64,
    #[serde(default = "default_sub_length")]
    pub length: i64,
    #[serde(default)]
    pub use_fixed: bool,
    #[serde(default)]
    pub fixed_value: String,
    #[serde(default)]
    pub random_min: i64,
    #[serde(default = "default_random_max")]
    pub random_max: i64,
    #[serde(default = "default_random_string_length")]
    pub random_string_length: i64,
    #[serde(default)]
    pub random_string_charset: String,
}

fn default_sub_length() -> i64 {
    -1
}

fn default_random_max() -> i64 {
    100
}

fn default_random_string_length() -> i64 {
    8
}

/// Connection between two nodes in the workflow graph
///
/// Connections define flow direction from one node to another. The optional
/// condition text is evaluated against the source node's final state to decide
/// whether the target qualifies to run (see the engine's edge predicate rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNodeConnection {
    /// Source node ID
    pub source_node_id: String,
    /// Target node ID
    pub target_node_id: String,
    /// Edge predicate: "error", "success", "true"/"false", a regex, or blank
    #[serde(default)]
    pub condition: Option<String>,
}

/// A node parameter that is either a literal or a reference to another node's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterValue {
    /// Literal text used verbatim
    Static { value: String },
    /// Reference to another node's completed result, resolved at run time
    Node { node_id: String },
}

impl ParameterValue {
    /// Convenience constructor for a literal value.
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Static { value: value.into() }
    }

    /// Convenience constructor for a node reference.
    pub fn reference(node_id: impl Into<String>) -> Self {
        Self::Node { node_id: node_id.into() }
    }

    /// The referenced node id, if this parameter is a reference.
    pub fn referenced_node_id(&self) -> Option<&str> {
        match self {
            Self::Static { .. } => None,
            Self::Node { node_id } => Some(node_id),
        }
    }
}

/// Per-run execution state of a single node
///
/// Held only for the duration of one run in a map keyed by node id; a node
/// absent from the map is Pending. Mutated exclusively by the run loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeExecutionState {
    /// Not yet scheduled
    Pending,
    /// Currently executing (transient, observable via the run observer)
    Running,
    /// Completed with a result text
    Success { result: String },
    /// Gated off by edge predicates; reason is the skip sentinel text
    Skipped { reason: String },
    /// Failed with an error description; the run continues past it
    Failed { error: String },
}

impl NodeExecutionState {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Result text of a successful node, if any.
    pub fn result_text(&self) -> Option<&str> {
        match self {
            Self::Success { result } => Some(result),
            _ => None,
        }
    }
}

impl Default for NodeExecutionState {
    fn default() -> Self {
        Self::Pending
    }
}

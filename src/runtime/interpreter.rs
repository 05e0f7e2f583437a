/// Node evaluation handlers for the five node kinds
///
/// This module contains the actual evaluation logic for each node kind:
/// - Trigger: resolved at selection time (never evaluated here)
/// - Execute: external action invocation via the dispatcher boundary
/// - Condition: type-sensitive two-sided comparison
/// - Logic: AND/OR join over inbound branch results
/// - Extract: regex/json/substring/concat/random extraction
///
/// Every handler returns the node's result text; an Err becomes a
/// `Failed` state on the node without stopping the run.

use crate::runtime::dispatch::{ActionDispatcher, ActionParameter};
use crate::runtime::SKIP_SENTINEL;
use crate::workflow::types::{
    ComparisonOperator, ExtractMode, ExtractSpec, LogicOperator, NodeExecutionState, NodeKind,
    ParameterValue, Workflow, WorkflowNode,
};
use anyhow::{anyhow, bail, Result};
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default charset for RANDOM_STRING extraction: upper + lower alphanumerics.
const DEFAULT_RANDOM_CHARSET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Read-only view of a run handed to the interpreters
///
/// Borrows the workflow and the live state map owned by the run loop; the
/// node currently being evaluated never appears in `states` with a terminal
/// state, so interpreters only ever read already-settled ancestors.
pub struct RunContext<'a> {
    pub workflow: &'a Workflow,
    pub states: &'a HashMap<String, NodeExecutionState>,
}

/// Node interpreter that evaluates a single node per call
///
/// Holds the dispatcher used by Execute nodes; everything else is pure
/// computation over the run context.
pub struct NodeInterpreter {
    dispatcher: Arc<dyn ActionDispatcher>,
}

impl NodeInterpreter {
    pub fn new(dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Evaluate a single node, returning its result text.
    pub async fn evaluate(&self, node: &WorkflowNode, ctx: &RunContext<'_>) -> Result<String> {
        tracing::debug!("🚀 Evaluating node: {} ({})", node.id, node.name);

        match &node.kind {
            NodeKind::Trigger { .. } => {
                // Triggers are activated by the scheduler before the walk begins.
                bail!("trigger node '{}' is resolved at selection time", node.id)
            }
            NodeKind::Execute { action_type, action_config } => {
                self.evaluate_execute(node, action_type, action_config, ctx).await
            }
            NodeKind::Condition { left, right, operator } => {
                evaluate_condition(left, right, *operator, ctx)
            }
            NodeKind::Logic { operator } => Ok(evaluate_logic(node, *operator, ctx)),
            NodeKind::Extract(spec) => evaluate_extract(node, spec, ctx),
        }
    }

    /// Execute node: resolve every config entry and cross the dispatch boundary.
    ///
    /// A blank action type is a configuration failure; a dispatcher error or a
    /// non-success outcome fails the node with the dispatcher's reason.
    async fn evaluate_execute(
        &self,
        node: &WorkflowNode,
        action_type: &str,
        action_config: &BTreeMap<String, ParameterValue>,
        ctx: &RunContext<'_>,
    ) -> Result<String> {
        if action_type.trim().is_empty() {
            bail!("execute node '{}' has no action type configured", node.id);
        }

        let mut parameters = Vec::with_capacity(action_config.len());
        for (name, value) in action_config {
            let resolved = resolve_parameter(value, ctx.states)
                .map_err(|e| anyhow!("parameter '{}': {}", name, e))?;
            parameters.push(ActionParameter { name: name.clone(), value: resolved });
        }

        tracing::debug!(
            "🔌 Dispatching action '{}' for node '{}' with {} parameters",
            action_type,
            node.id,
            parameters.len()
        );

        let outcome = self.dispatcher.invoke(action_type, &parameters).await?;
        if outcome.success {
            Ok(outcome.result_text)
        } else {
            bail!(
                "{}",
                outcome
                    .error
                    .unwrap_or_else(|| format!("action '{}' failed", action_type))
            )
        }
    }
}

/// Resolve a parameter value against the live state map.
///
/// Literals resolve verbatim; references read the referenced node's final
/// state. A reference to a failed or unresolved node is a resolution error
/// that fails the enclosing node.
pub fn resolve_parameter(
    value: &ParameterValue,
    states: &HashMap<String, NodeExecutionState>,
) -> Result<String> {
    match value {
        ParameterValue::Static { value } => Ok(value.clone()),
        ParameterValue::Node { node_id } => match states.get(node_id) {
            Some(NodeExecutionState::Success { result }) => Ok(result.clone()),
            Some(NodeExecutionState::Skipped { reason }) => Ok(reason.clone()),
            Some(NodeExecutionState::Failed { error }) => {
                bail!("referenced node '{}' failed: {}", node_id, error)
            }
            Some(_) => bail!("referenced node '{}' has not completed", node_id),
            None => bail!("referenced node '{}' has no recorded result", node_id),
        },
    }
}

/// Boolean-like text parse used by edge predicates and Logic nodes.
///
/// "true"/"1"/"yes"/"y"/"on" (case-insensitive) are true; everything else,
/// including unparseable text, is false.
pub fn parse_boolean_like(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

fn bool_text(value: bool) -> String {
    if value { "true".to_string() } else { "false".to_string() }
}

/// Condition node: compare two resolved values.
///
/// Two numbers compare numerically, two non-numbers compare as strings
/// (lexicographic for ordering operators), and exactly one number is a
/// type-mismatch error. Membership operators get their own list semantics.
fn evaluate_condition(
    left: &ParameterValue,
    right: &ParameterValue,
    operator: ComparisonOperator,
    ctx: &RunContext<'_>,
) -> Result<String> {
    let left_text = resolve_parameter(left, ctx.states)?;
    let right_text = resolve_parameter(right, ctx.states)?;

    let outcome = match operator {
        ComparisonOperator::Contains => left_text.contains(&right_text),
        ComparisonOperator::NotContains => !left_text.contains(&right_text),
        ComparisonOperator::In => test_membership(&left_text, &right_text)?,
        ComparisonOperator::NotIn => !test_membership(&left_text, &right_text)?,
        _ => match (parse_number(&left_text), parse_number(&right_text)) {
            (Some(l), Some(r)) => compare_numbers(operator, l, r),
            (None, None) => compare_texts(operator, &left_text, &right_text),
            _ => bail!(
                "type mismatch: cannot compare '{}' with '{}'",
                left_text,
                right_text
            ),
        },
    };

    Ok(bool_text(outcome))
}

fn compare_numbers(operator: ComparisonOperator, left: f64, right: f64) -> bool {
    match operator {
        ComparisonOperator::Eq => left == right,
        ComparisonOperator::Ne => left != right,
        ComparisonOperator::Gt => left > right,
        ComparisonOperator::Gte => left >= right,
        ComparisonOperator::Lt => left < right,
        ComparisonOperator::Lte => left <= right,
        _ => false,
    }
}

fn compare_texts(operator: ComparisonOperator, left: &str, right: &str) -> bool {
    match operator {
        ComparisonOperator::Eq => left == right,
        ComparisonOperator::Ne => left != right,
        ComparisonOperator::Gt => left > right,
        ComparisonOperator::Gte => left >= right,
        ComparisonOperator::Lt => left < right,
        ComparisonOperator::Lte => left <= right,
        _ => false,
    }
}

/// IN / NOT_IN membership test.
///
/// The right side parses as a JSON array when it can, otherwise as
/// comma-split trimmed tokens. The list must be homogeneously numeric or
/// non-numeric, and the left side must match the list's side of that split.
fn test_membership(left: &str, raw_list: &str) -> Result<bool> {
    if raw_list.trim().is_empty() {
        return Ok(false);
    }

    let items = parse_membership_list(raw_list);
    if items.is_empty() {
        return Ok(false);
    }

    let parsed: Vec<Option<f64>> = items.iter().map(|item| parse_number(item)).collect();
    let all_numeric = parsed.iter().all(Option::is_some);
    let none_numeric = parsed.iter().all(Option::is_none);
    if !all_numeric && !none_numeric {
        bail!("membership list mixes numeric and non-numeric entries: {}", raw_list);
    }

    match (parse_number(left), all_numeric) {
        (Some(l), true) => Ok(parsed.iter().flatten().any(|item| *item == l)),
        (None, false) => Ok(items.iter().any(|item| item == left)),
        (Some(_), false) => bail!(
            "type mismatch: numeric value '{}' tested against non-numeric list",
            left
        ),
        (None, true) => bail!(
            "type mismatch: non-numeric value '{}' tested against numeric list",
            left
        ),
    }
}

fn parse_membership_list(raw: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
        return items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();
    }
    raw.split(',').map(|token| token.trim().to_string()).collect()
}

/// Logic node: AND/OR over the boolean-parsed results of inbound branches.
///
/// Only connections whose source ended Success (and is not the skip
/// sentinel) qualify; unresolved and skipped branches simply don't vote.
fn evaluate_logic(node: &WorkflowNode, operator: LogicOperator, ctx: &RunContext<'_>) -> String {
    let votes: Vec<bool> = ctx
        .workflow
        .connections
        .iter()
        .filter(|c| c.target_node_id == node.id)
        .filter_map(|c| match ctx.states.get(&c.source_node_id) {
            Some(NodeExecutionState::Success { result }) if result != SKIP_SENTINEL => {
                Some(parse_boolean_like(result))
            }
            _ => None,
        })
        .collect();

    let outcome = match operator {
        LogicOperator::And => !votes.is_empty() && votes.iter().all(|vote| *vote),
        LogicOperator::Or => votes.iter().any(|vote| *vote),
    };

    bool_text(outcome)
}

/// Extract node: pull data out of the resolved source text.
fn evaluate_extract(node: &WorkflowNode, spec: &ExtractSpec, ctx: &RunContext<'_>) -> Result<String> {
    let source_text = resolve_extract_source(node, spec, ctx)?;

    match spec.mode {
        ExtractMode::Regex => Ok(extract_regex(&source_text, spec)),
        ExtractMode::Json => Ok(extract_json(&source_text, spec)),
        ExtractMode::Sub => Ok(extract_substring(&source_text, spec)),
        ExtractMode::Concat => {
            let mut combined = source_text;
            for other in &spec.others {
                combined.push_str(&resolve_parameter(other, ctx.states)?);
            }
            Ok(combined)
        }
        ExtractMode::RandomInt => random_int(spec),
        ExtractMode::RandomString => Ok(random_string(spec)),
    }
}

/// Resolve the extraction source, with the blank-static fallback.
///
/// A blank static source usually means the editor left the field empty and
/// relied on the inbound wire; in that case the first inbound connection
/// whose source ended Success supplies the text instead.
fn resolve_extract_source(
    node: &WorkflowNode,
    spec: &ExtractSpec,
    ctx: &RunContext<'_>,
) -> Result<String> {
    if let ParameterValue::Static { value } = &spec.source {
        if value.trim().is_empty() {
            let upstream = ctx
                .workflow
                .connections
                .iter()
                .filter(|c| c.target_node_id == node.id)
                .find_map(|c| {
                    ctx.states
                        .get(&c.source_node_id)
                        .and_then(|state| state.result_text())
                });
            if let Some(text) = upstream {
                tracing::debug!(
                    "🔎 Blank static source on '{}', using first inbound result instead",
                    node.id
                );
                return Ok(text.to_string());
            }
        }
    }
    resolve_parameter(&spec.source, ctx.states)
}

fn extract_regex(text: &str, spec: &ExtractSpec) -> String {
    let re = match Regex::new(&spec.expression) {
        Ok(re) => re,
        Err(_) => return spec.default_value.clone(),
    };
    match re.captures(text) {
        Some(captures) => captures
            .get(spec.group)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| spec.default_value.clone()),
        None => spec.default_value.clone(),
    }
}

fn extract_json(text: &str, spec: &ExtractSpec) -> String {
    let root: Value = match serde_json::from_str(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => return spec.default_value.clone(),
    };
    match navigate_json(&root, &spec.expression) {
        Some(found) => stringify_json(found),
        None => spec.default_value.clone(),
    }
}

/// Navigate a dotted path with optional bracketed indices per segment,
/// e.g. "a[0].b" or "items[2][0].name".
fn navigate_json<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (key, indices) = parse_path_segment(segment)?;
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

fn parse_path_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    if segment.is_empty() {
        return None;
    }
    let (key, mut remaining) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };
    let mut indices = Vec::new();
    while !remaining.is_empty() {
        if !remaining.starts_with('[') {
            return None;
        }
        let close = remaining.find(']')?;
        indices.push(remaining[1..close].parse::<usize>().ok()?);
        remaining = &remaining[close + 1..];
    }
    Some((key, indices))
}

fn stringify_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Char-indexed substring, clipped to bounds. Negative length means "to end".
fn extract_substring(text: &str, spec: &ExtractSpec) -> String {
    let chars: Vec<char> = text.chars().collect();
    if spec.start_index < 0 || spec.start_index as usize >= chars.len() {
        return spec.default_value.clone();
    }
    let start = spec.start_index as usize;
    let end = if spec.length < 0 {
        chars.len()
    } else {
        (start + spec.length as usize).min(chars.len())
    };
    if end < start {
        return spec.default_value.clone();
    }
    chars[start..end].iter().collect()
}

fn random_int(spec: &ExtractSpec) -> Result<String> {
    if spec.use_fixed {
        let fixed: i64 = spec
            .fixed_value
            .trim()
            .parse()
            .map_err(|_| anyhow!("fixed value '{}' is not an integer", spec.fixed_value))?;
        return Ok(fixed.to_string());
    }
    let low = spec.random_min.min(spec.random_max);
    let high = spec.random_min.max(spec.random_max);
    Ok(rand::thread_rng().gen_range(low..=high).to_string())
}

fn random_string(spec: &ExtractSpec) -> String {
    if spec.use_fixed {
        return spec.fixed_value.clone();
    }
    if spec.random_string_length <= 0 {
        return String::new();
    }
    let charset: Vec<char> = if spec.random_string_charset.is_empty() {
        DEFAULT_RANDOM_CHARSET.chars().collect()
    } else {
        spec.random_string_charset.chars().collect()
    };
    let mut rng = rand::thread_rng();
    (0..spec.random_string_length)
        .map(|_| charset[rng.gen_range(0..charset.len())])
        .collect()
}

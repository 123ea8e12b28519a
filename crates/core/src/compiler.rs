//! Workflow compiler: UI graph → execution request.
//!
//! 1. Each node's `widgets_values` are mapped onto named inputs using the
//!    [`NodeKind`] schema for its type.
//! 2. [`Overrides`] are applied to those literal inputs.
//! 3. Every link is resolved by positional slot lookup and written into
//!    the target node's inputs as a reference, replacing any literal.
//!
//! Compilation never fails. Links that point at missing nodes or
//! out-of-range slots are skipped individually, and every source node
//! appears in the output even if it ends up with no inputs.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::overrides::{self, OverrideTarget, Overrides};
use crate::registry::NodeKind;
use crate::request::{ExecutionNode, ExecutionRequest, InputValue};
use crate::types::NodeId;
use crate::workflow::{Link, WorkflowGraph};

/// Why a link was left out of the compiled request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkSkip {
    #[error("source node {0} does not exist")]
    MissingSource(NodeId),
    #[error("target node {0} does not exist")]
    MissingTarget(NodeId),
    #[error("source node {node} has no output slot {slot}")]
    SourceSlotOutOfRange { node: NodeId, slot: i64 },
    #[error("target node {node} has no input slot {slot}")]
    TargetSlotOutOfRange { node: NodeId, slot: i64 },
}

/// A link resolved to concrete positions in the compiled output.
struct ResolvedLink<'g> {
    target_index: usize,
    input_name: &'g str,
    source_slot: usize,
}

/// Compile a UI workflow graph into an execution request.
pub fn compile(graph: &WorkflowGraph, overrides: &Overrides) -> ExecutionRequest {
    let ids: Vec<String> = graph.nodes.iter().map(|n| n.id.to_string()).collect();
    let kinds: Vec<NodeKind> = graph
        .nodes
        .iter()
        .map(|n| NodeKind::from_class_type(&n.node_type))
        .collect();

    let mut entries: Vec<ExecutionNode> = graph
        .nodes
        .iter()
        .zip(&kinds)
        .map(|(node, &kind)| ExecutionNode {
            inputs: map_widgets(kind, &node.widgets_values),
            class_type: node.node_type.clone(),
            meta: None,
        })
        .collect();

    let targets = ids
        .iter()
        .zip(&kinds)
        .zip(entries.iter_mut())
        .map(|((node_id, &kind), entry)| OverrideTarget {
            node_id: node_id.as_str(),
            kind,
            inputs: &mut entry.inputs,
        })
        .collect();
    overrides::apply(targets, overrides);

    let index: HashMap<NodeId, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id, i))
        .collect();

    for link in &graph.links {
        match resolve_link(graph, &index, link) {
            Ok(resolved) => {
                entries[resolved.target_index].inputs.insert(
                    resolved.input_name.to_string(),
                    InputValue::Link(link.source_id.to_string(), resolved.source_slot),
                );
            }
            Err(reason) => {
                tracing::debug!(link_id = link.id, %reason, "Skipping link");
            }
        }
    }

    let mut request = ExecutionRequest::new();
    for (node_id, entry) in ids.into_iter().zip(entries) {
        request.insert(node_id, entry);
    }
    request
}

/// Map positional widget values onto the kind's named fields. Values
/// beyond the schema, and schema fields without a value, are dropped.
fn map_widgets(kind: NodeKind, widgets: &[Value]) -> IndexMap<String, InputValue> {
    kind.widget_fields()
        .iter()
        .zip(widgets)
        .map(|(name, value)| (name.to_string(), InputValue::Literal(value.clone())))
        .collect()
}

fn resolve_link<'g>(
    graph: &'g WorkflowGraph,
    index: &HashMap<NodeId, usize>,
    link: &Link,
) -> Result<ResolvedLink<'g>, LinkSkip> {
    let source_index = *index
        .get(&link.source_id)
        .ok_or(LinkSkip::MissingSource(link.source_id))?;
    let target_index = *index
        .get(&link.target_id)
        .ok_or(LinkSkip::MissingTarget(link.target_id))?;

    let source = &graph.nodes[source_index];
    let target = &graph.nodes[target_index];

    let source_slot = usize::try_from(link.source_slot)
        .ok()
        .filter(|&slot| slot < source.outputs.len())
        .ok_or(LinkSkip::SourceSlotOutOfRange {
            node: source.id,
            slot: link.source_slot,
        })?;

    let input = usize::try_from(link.target_slot)
        .ok()
        .and_then(|slot| target.inputs.get(slot))
        .ok_or(LinkSkip::TargetSlotOutOfRange {
            node: target.id,
            slot: link.target_slot,
        })?;

    Ok(ResolvedLink {
        target_index,
        input_name: input.name.as_str(),
        source_slot,
    })
}

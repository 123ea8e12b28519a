//! UI workflow graph as saved by the ComfyUI editor.
//!
//! The editor format keeps per-node parameters as a positional
//! `widgets_values` list and stores edges separately in a top-level
//! `links` list. [`crate::compiler`] turns this into the daemon's
//! [`ExecutionRequest`](crate::request::ExecutionRequest).

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::types::{LinkId, NodeId};

/// A UI workflow graph: ordered nodes plus a flat list of links.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl WorkflowGraph {
    /// Look up a node by its id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A single node in the UI graph.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// ComfyUI class type (e.g. "CLIPTextEncode").
    #[serde(rename = "type")]
    pub node_type: String,
    /// Positional literal parameters, before name resolution.
    #[serde(default, deserialize_with = "lenient_widgets")]
    pub widgets_values: Vec<Value>,
    /// Declared input slots, in slot-index order.
    #[serde(default)]
    pub inputs: Vec<InputSlot>,
    /// Declared output slots, in slot-index order.
    #[serde(default)]
    pub outputs: Vec<OutputSlot>,
}

/// A declared input slot on a node.
#[derive(Debug, Clone, Deserialize)]
pub struct InputSlot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub slot_type: String,
    #[serde(default)]
    pub link: Option<LinkId>,
}

/// A declared output slot on a node.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSlot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub slot_type: String,
    #[serde(default)]
    pub links: Option<Vec<LinkId>>,
}

/// A typed edge from one node's output slot to another node's input slot.
///
/// Slot indices are kept signed so that a malformed index is rejected by
/// the compiler (and the link skipped) instead of failing the whole parse.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawLink")]
pub struct Link {
    pub id: LinkId,
    pub source_id: NodeId,
    pub source_slot: i64,
    pub target_id: NodeId,
    pub target_slot: i64,
    /// Data type carried by the link (e.g. "MODEL", "CONDITIONING").
    pub kind: String,
}

/// Links appear either as the editor's compact tuple
/// `[id, origin_id, origin_slot, target_id, target_slot, type]` or as an
/// object with named fields.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLink {
    Tuple(LinkId, NodeId, i64, NodeId, i64, Value),
    Object {
        id: LinkId,
        origin_id: NodeId,
        origin_slot: i64,
        target_id: NodeId,
        target_slot: i64,
        #[serde(rename = "type", default)]
        kind: Value,
    },
}

impl From<RawLink> for Link {
    fn from(raw: RawLink) -> Self {
        let (id, source_id, source_slot, target_id, target_slot, kind) = match raw {
            RawLink::Tuple(id, src, src_slot, dst, dst_slot, kind) => {
                (id, src, src_slot, dst, dst_slot, kind)
            }
            RawLink::Object {
                id,
                origin_id,
                origin_slot,
                target_id,
                target_slot,
                kind,
            } => (id, origin_id, origin_slot, target_id, target_slot, kind),
        };

        Self {
            id,
            source_id,
            source_slot,
            target_id,
            target_slot,
            kind: match kind {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            },
        }
    }
}

/// Some custom nodes store their widgets as an object rather than a list.
/// Those carry no positional values we can map, so treat them as empty.
fn lenient_widgets<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(values) => values,
        _ => Vec::new(),
    })
}

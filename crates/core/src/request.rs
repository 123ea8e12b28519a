//! The daemon's execution-request format.
//!
//! A request maps node ids (strings) to `{ inputs, class_type }`. Each
//! input is either a literal JSON value or a reference to an upstream
//! node's output slot, encoded on the wire as `["<node id>", <slot>]`:
//!
//! ```json
//! {
//!   "6": { "class_type": "CLIPTextEncode",
//!          "inputs": { "text": "a lighthouse", "clip": ["11", 0] } }
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single named input on an execution node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    /// Reference to `(source node id, source output slot)`.
    Link(String, usize),
    /// Any other JSON value.
    Literal(Value),
}

impl InputValue {
    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link(..))
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// One node of an [`ExecutionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionNode {
    #[serde(default)]
    pub inputs: IndexMap<String, InputValue>,
    pub class_type: String,
    /// Editor metadata (`{"title": ...}`) carried by API-format exports.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ExecutionNode {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            inputs: IndexMap::new(),
            class_type: class_type.into(),
            meta: None,
        }
    }
}

/// Node-id-keyed execution graph submitted to `POST /prompt`.
///
/// Node order is preserved so serialized requests follow the source
/// workflow's order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionRequest {
    nodes: IndexMap<String, ExecutionNode>,
}

/// An input whose reference points at a node absent from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub node_id: String,
    pub input: String,
    pub target: String,
}

impl ExecutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_id: impl Into<String>, node: ExecutionNode) {
        self.nodes.insert(node_id.into(), node);
    }

    pub fn get(&self, node_id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExecutionNode)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ExecutionNode)> {
        self.nodes.iter_mut()
    }

    /// Every reference whose target node is not part of this request.
    ///
    /// Compiled requests never have any; pre-compiled requests supplied by
    /// callers are checked with this before submission.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut dangling = Vec::new();
        for (node_id, node) in &self.nodes {
            for (input, value) in &node.inputs {
                if let InputValue::Link(target, _) = value {
                    if !self.nodes.contains_key(target) {
                        dangling.push(DanglingReference {
                            node_id: node_id.clone(),
                            input: input.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
        dangling
    }
}

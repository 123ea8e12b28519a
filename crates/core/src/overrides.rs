//! Per-job field overrides (prompt text, seed, image size, steps,
//! guidance).
//!
//! Each override mutates at most one node: the first node, in node order,
//! whose [`NodeKind`] accepts it. Overrides replace literal values but
//! never an input that is fed by a link. An override with no matching node
//! is ignored.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::registry::{NodeKind, FIXED_SEED_MODE};
use crate::request::{ExecutionRequest, InputValue};

/// Fields a job may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideField {
    Prompt,
    Seed,
    Width,
    Height,
    Steps,
    Guidance,
}

/// Optional per-job overrides, deserialized from the job input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance: Option<f64>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    /// The overrides that are set, in application order.
    fn assignments(&self) -> Vec<(OverrideField, Value)> {
        let mut out = Vec::new();
        if let Some(prompt) = &self.prompt {
            out.push((OverrideField::Prompt, json!(prompt)));
        }
        if let Some(seed) = self.seed {
            out.push((OverrideField::Seed, json!(seed)));
        }
        if let Some(width) = self.width {
            out.push((OverrideField::Width, json!(width)));
        }
        if let Some(height) = self.height {
            out.push((OverrideField::Height, json!(height)));
        }
        if let Some(steps) = self.steps {
            out.push((OverrideField::Steps, json!(steps)));
        }
        if let Some(guidance) = self.guidance {
            out.push((OverrideField::Guidance, json!(guidance)));
        }
        out
    }
}

/// A node's input map as seen by the override pass.
pub(crate) struct OverrideTarget<'a> {
    pub node_id: &'a str,
    pub kind: NodeKind,
    pub inputs: &'a mut IndexMap<String, InputValue>,
}

/// Apply `overrides` to `targets`, which must be in node order.
pub(crate) fn apply(mut targets: Vec<OverrideTarget<'_>>, overrides: &Overrides) {
    for (field, value) in overrides.assignments() {
        let Some((target, input)) = targets
            .iter_mut()
            .find_map(|t| t.kind.override_input(field).map(|input| (t, input)))
        else {
            tracing::debug!(?field, "No node accepts override, ignoring");
            continue;
        };

        if !set_literal(target.inputs, input, value) {
            tracing::debug!(
                ?field,
                node_id = target.node_id,
                input,
                "Override target is fed by a link, leaving it unchanged",
            );
            continue;
        }

        if field == OverrideField::Seed {
            if let Some(mode) = target.kind.seed_mode_input() {
                set_literal(target.inputs, mode, json!(FIXED_SEED_MODE));
            }
        }

        tracing::debug!(?field, node_id = target.node_id, input, "Applied override");
    }
}

/// Apply `overrides` to an already-compiled request, resolving each
/// node's `class_type` through the registry.
pub fn apply_overrides_to_request(request: &mut ExecutionRequest, overrides: &Overrides) {
    if overrides.is_empty() {
        return;
    }
    let targets = request
        .iter_mut()
        .map(|(node_id, node)| OverrideTarget {
            node_id: node_id.as_str(),
            kind: NodeKind::from_class_type(&node.class_type),
            inputs: &mut node.inputs,
        })
        .collect();
    apply(targets, overrides);
}

/// Write a literal unless the input currently holds a link.
fn set_literal(inputs: &mut IndexMap<String, InputValue>, name: &str, value: Value) -> bool {
    match inputs.get(name) {
        Some(existing) if existing.is_link() => false,
        _ => {
            inputs.insert(name.to_string(), InputValue::Literal(value));
            true
        }
    }
}

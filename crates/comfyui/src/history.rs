//! ComfyUI history record types and parser.
//!
//! `GET /history/{prompt_id}` returns an object keyed by prompt id. The
//! entry only appears once the daemon has finished (or failed) the prompt:
//!
//! ```json
//! { "abc": {
//!     "outputs": { "9": { "images": [
//!         { "filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output" } ] } },
//!     "status": { "status_str": "success", "completed": true, "messages": [...] } } }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Full history response, keyed by prompt id.
pub type HistoryResponse = IndexMap<String, HistoryEntry>;

/// History for one prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Per-node outputs, in the order the daemon reports them.
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Output produced by a single node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageArtifact>,
}

/// An image reported in a history record, resolved to bytes via `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage folder (`output`, `temp` or `input`).
    #[serde(rename = "type", default = "default_folder_type")]
    pub kind: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

impl HistoryEntry {
    /// All images across every output node, in node order then listing
    /// order.
    pub fn images(&self) -> Vec<ImageArtifact> {
        self.outputs
            .values()
            .flat_map(|output| output.images.iter().cloned())
            .collect()
    }

    /// Whether the daemon reported the prompt as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            == Some("error")
    }

    /// Whether the daemon has finished executing the prompt.
    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.completed)
    }

    /// The daemon's execution error message, if one was recorded.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        status
            .messages
            .iter()
            .find(|(event, _)| event == "execution_error")
            .map(|(_, payload)| {
                let node = payload
                    .get("node_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown node");
                let message = payload
                    .get("exception_message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("execution error");
                format!("{node}: {}", message.trim())
            })
    }
}

/// Parse a `/history/{prompt_id}` response body.
pub fn parse_history(text: &str) -> Result<HistoryResponse, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_history() {
        let history = parse_history("{}").unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn parse_completed_entry_with_images() {
        let json = r#"{"abc":{"outputs":{"9":{"images":[{"filename":"a.png","subfolder":"","type":"output"},{"filename":"b.png","subfolder":"sub","type":"output"}]},"12":{"images":[{"filename":"c.png","subfolder":"","type":"temp"}]}},"status":{"status_str":"success","completed":true,"messages":[]}}}"#;
        let history = parse_history(json).unwrap();
        let entry = &history["abc"];

        let names: Vec<_> = entry.images().into_iter().map(|i| i.filename).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert_eq!(entry.images()[1].subfolder, "sub");
        assert_eq!(entry.images()[2].kind, "temp");
        assert!(!entry.is_error());
    }

    #[test]
    fn image_without_type_defaults_to_output() {
        let json = r#"{"abc":{"outputs":{"9":{"images":[{"filename":"a.png"}]}}}}"#;
        let history = parse_history(json).unwrap();
        let image = &history["abc"].images()[0];
        assert_eq!(image.kind, "output");
        assert_eq!(image.subfolder, "");
    }

    #[test]
    fn non_image_outputs_are_ignored() {
        let json = r#"{"abc":{"outputs":{"5":{"text":["hello"]}}}}"#;
        let history = parse_history(json).unwrap();
        assert!(history["abc"].images().is_empty());
    }

    #[test]
    fn error_status_exposes_exception_message() {
        let json = r#"{"abc":{"outputs":{},"status":{"status_str":"error","completed":false,"messages":[["execution_start",{"prompt_id":"abc"}],["execution_error",{"prompt_id":"abc","node_id":"3","node_type":"KSampler","exception_message":"CUDA out of memory\n","exception_type":"RuntimeError"}]]}}}"#;
        let history = parse_history(json).unwrap();
        let entry = &history["abc"];

        assert!(entry.is_error());
        assert_eq!(
            entry.error_message().as_deref(),
            Some("KSampler: CUDA out of memory")
        );
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_history("not json at all").is_err());
    }
}

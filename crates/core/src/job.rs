//! Job input and outcome types.

use serde::{Deserialize, Serialize};

use crate::compiler::compile;
use crate::error::{ErrorCategory, JobError, JobFailure, Stage};
use crate::overrides::{apply_overrides_to_request, Overrides};
use crate::request::ExecutionRequest;
use crate::workflow::WorkflowGraph;

/// A job description as received by the worker.
///
/// ```json
/// { "workflow": { "nodes": [...], "links": [...] },
///   "prompt": "a lighthouse at dusk", "seed": 42, "steps": 30 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    /// Workflow to run. When absent the worker's default workflow is used.
    #[serde(default)]
    pub workflow: Option<WorkflowSource>,
    #[serde(flatten)]
    pub overrides: Overrides,
}

/// The two accepted workflow shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkflowSource {
    /// Editor graph; compiled before submission.
    Graph(WorkflowGraph),
    /// Already in the daemon's format; submitted after overrides.
    Request(ExecutionRequest),
}

impl WorkflowSource {
    /// Parse a workflow document in either shape.
    pub fn from_json(text: &str) -> Result<Self, JobError> {
        serde_json::from_str(text).map_err(|e| {
            JobError::InvalidInput(format!(
                "Workflow is neither an editor graph nor an execution request: {e}"
            ))
        })
    }

    /// Produce the execution request for this workflow with `overrides`
    /// applied. Both shapes converge here.
    pub fn into_request(self, overrides: &Overrides) -> Result<ExecutionRequest, JobError> {
        let request = match self {
            Self::Graph(graph) => {
                if graph.nodes.is_empty() {
                    return Err(JobError::InvalidInput("Workflow graph has no nodes".into()));
                }
                compile(&graph, overrides)
            }
            Self::Request(mut request) => {
                if request.is_empty() {
                    return Err(JobError::InvalidInput(
                        "Execution request has no nodes".into(),
                    ));
                }
                apply_overrides_to_request(&mut request, overrides);
                request
            }
        };

        if let Some(dangling) = request.dangling_references().first() {
            return Err(JobError::InvalidInput(format!(
                "Node '{}' input '{}' references missing node '{}'",
                dangling.node_id, dangling.input, dangling.target
            )));
        }

        Ok(request)
    }
}

/// A completed job: the daemon's prompt id and base64-encoded images in
/// output order.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSuccess {
    pub prompt_id: String,
    pub images: Vec<String>,
}

/// Wire shape returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResponse {
    Success {
        prompt_id: String,
        images: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seed: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    Failed {
        stage: Stage,
        error_kind: &'static str,
        category: ErrorCategory,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
}

impl JobResponse {
    /// Build the response for a finished job, echoing the applied seed and
    /// prompt on success.
    pub fn from_result(result: Result<JobSuccess, JobFailure>, overrides: &Overrides) -> Self {
        match result {
            Ok(success) => Self::Success {
                prompt_id: success.prompt_id,
                images: success.images,
                seed: overrides.seed,
                prompt: overrides.prompt.clone(),
            },
            Err(failure) => Self::Failed {
                stage: failure.stage,
                error_kind: failure.error.kind(),
                category: failure.error.category(),
                error: failure.error.to_string(),
                traceback: Some(failure.traceback()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure category, or `None` on success.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Success { .. } => None,
            Self::Failed { category, .. } => Some(*category),
        }
    }
}

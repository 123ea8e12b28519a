//! Domain model for running ComfyUI image-generation jobs.
//!
//! Pure, I/O-light building blocks shared by the daemon client and the
//! worker: the UI workflow graph, the daemon's execution-request format,
//! the node schema registry, the workflow compiler, job overrides, the
//! model-volume validator, and the job error taxonomy.

pub mod compiler;
pub mod error;
pub mod job;
pub mod overrides;
pub mod registry;
pub mod request;
pub mod types;
pub mod volume;
pub mod workflow;

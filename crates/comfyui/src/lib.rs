//! ComfyUI daemon client and job lifecycle.
//!
//! Provides the REST client for the daemon's HTTP endpoints, typed
//! history records, the supervisor that launches and health-checks a
//! local daemon process, and the orchestrator that submits a compiled
//! request, polls for completion and downloads the produced images.

pub mod api;
pub mod history;
pub mod orchestrator;
pub mod poll;
pub mod supervisor;

//! Serverless worker: runs one ComfyUI job per invocation, either as a
//! one-shot CLI command or behind a small HTTP server.

pub mod config;
pub mod handler;
pub mod server;

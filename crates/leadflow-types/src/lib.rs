//! Shared domain types for the Leadflow orchestration core.
//!
//! Workflow definitions, executions, queued webhooks, approval requests,
//! monitoring events, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitoring;
pub mod webhook;
pub mod workflow;

//! Infrastructure layer for Leadflow.
//!
//! Implements the repository traits from `leadflow-core` on SQLite, the
//! `WorkflowEngine` port over HTTP, inbound webhook verification and the
//! config file loader.

pub mod config;
pub mod engine;
pub mod sqlite;
pub mod webhook;

//! HTTP request handlers.

pub mod approval;
pub mod callback;
pub mod event;
pub mod execution;
pub mod queue;
pub mod webhook;
pub mod workflow;

//! Leadflow core: orchestration logic over abstract repositories.
//!
//! Nothing in this crate performs IO directly. Persistence sits behind the
//! traits in [`repository`], the workflow engine behind [`engine::WorkflowEngine`].

pub mod approval;
pub mod backoff;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod jobs;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod scheduler;

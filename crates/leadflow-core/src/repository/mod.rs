//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (leadflow-infra) implements. The core crate never depends on any
//! specific storage technology.
//!
//! Every method that changes a status is a compare-and-set: it names the
//! state it expects to move out of and reports whether the row moved.
//! Callers treat `false` as "another worker got there first".

pub mod approval;
pub mod monitoring;
pub mod webhook;
pub mod workflow;

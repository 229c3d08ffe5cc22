//! HTTP layer for Leadflow.
//!
//! Unauthenticated inbound routes (signed webhooks, engine callbacks,
//! health) plus the API-key protected management API at `/api/v1/`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;

//! Request extractors for the management API.

pub mod auth;
pub mod query;

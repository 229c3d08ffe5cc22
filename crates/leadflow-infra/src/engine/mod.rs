//! External workflow engine clients.

pub mod http;

pub use http::HttpWorkflowEngine;

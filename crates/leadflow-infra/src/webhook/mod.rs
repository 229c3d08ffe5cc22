//! Inbound webhook verification and normalization.

pub mod envelope;
pub mod secrets;
pub mod signature;

pub use envelope::{EnvelopeError, Route, WebhookEnvelope};
pub use secrets::{WebhookRejection, WebhookSecrets};
pub use signature::SignatureError;

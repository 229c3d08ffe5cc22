//! Shared-secret registry for inbound webhooks and engine callbacks.
//!
//! Secrets are keyed by workflow name. Targeted routes use the workflow's
//! own secret when one is registered and fall back to the default secret;
//! the generic route always uses the default.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use leadflow_types::config::{EngineConfig, WebhookConfig};
use leadflow_types::error::ErrorKind;
use reqwest::header::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use super::envelope::{EnvelopeError, Route, WebhookEnvelope};
use super::signature::{SignatureError, verify_headers};

/// Why an inbound request was turned away.
#[derive(Debug, thiserror::Error)]
pub enum WebhookRejection {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl WebhookRejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WebhookRejection::Signature(e) => e.kind(),
            WebhookRejection::Envelope(e) => e.kind(),
        }
    }
}

pub struct WebhookSecrets {
    by_workflow: DashMap<String, SecretString>,
    default_secret: Option<SecretString>,
    callback_secret: Option<SecretString>,
    max_age: Duration,
    allow_unsigned: bool,
    default_priority: i32,
}

impl WebhookSecrets {
    pub fn new(webhook: &WebhookConfig, engine: &EngineConfig, default_priority: i32) -> Self {
        let by_workflow = DashMap::new();
        for (name, secret) in &webhook.secrets {
            by_workflow.insert(name.clone(), SecretString::from(secret.clone()));
        }
        if webhook.allow_unsigned {
            tracing::warn!("unsigned webhooks are accepted; do not use this outside development");
        }
        Self {
            by_workflow,
            default_secret: webhook.default_secret.clone().map(SecretString::from),
            callback_secret: engine.callback_secret.clone().map(SecretString::from),
            max_age: Duration::from_secs(webhook.max_age_secs),
            allow_unsigned: webhook.allow_unsigned,
            default_priority,
        }
    }

    /// Register or replace the secret for a workflow.
    pub fn register(&self, workflow_name: &str, secret: &str) {
        self.by_workflow
            .insert(workflow_name.to_string(), SecretString::from(secret.to_string()));
        tracing::info!(workflow = workflow_name, "registered webhook secret");
    }

    pub fn unregister(&self, workflow_name: &str) -> bool {
        self.by_workflow.remove(workflow_name).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_workflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_workflow.is_empty()
    }

    /// Verify the request signature for `route`, then normalize it.
    pub fn verify_request(
        &self,
        route: &Route,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookEnvelope, WebhookRejection> {
        if !self.allow_unsigned {
            let scoped = match route {
                Route::Targeted { workflow_name } => self.by_workflow.get(workflow_name),
                Route::Generic => None,
            };
            let secret = scoped
                .as_deref()
                .or(self.default_secret.as_ref())
                .ok_or_else(|| SignatureError::NoSecret(route.label().to_string()))?;
            verify_headers(
                secret.expose_secret().as_bytes(),
                headers,
                body,
                Utc::now(),
                self.max_age,
            )?;
        }

        Ok(WebhookEnvelope::from_request(
            route,
            headers,
            body,
            self.default_priority,
        )?)
    }

    /// Verify an engine completion callback. Without a configured callback
    /// secret every callback is accepted.
    pub fn verify_callback(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        match &self.callback_secret {
            Some(secret) => verify_headers(
                secret.expose_secret().as_bytes(),
                headers,
                body,
                Utc::now(),
                self.max_age,
            ),
            None => Ok(()),
        }
    }
}

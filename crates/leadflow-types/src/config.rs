//! Configuration types for the orchestration core.
//!
//! `OrchestratorConfig` mirrors `{data_dir}/config.toml`. Every section and
//! field has a default, so an empty file (or no file) is a valid config.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub webhook: WebhookConfig,
    pub queue: QueueConfig,
    pub engine: EngineConfig,
    pub approval: ApprovalConfig,
    pub monitoring: MonitoringConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
}

/// Inbound webhook verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Replay window: requests whose timestamp is further than this from
    /// now are rejected.
    pub max_age_secs: u64,
    /// Secret used when no per-workflow secret is registered.
    pub default_secret: Option<String>,
    /// Per-workflow secrets keyed by workflow name.
    pub secrets: HashMap<String, String>,
    /// Accept unsigned requests. Local development only.
    pub allow_unsigned: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 300,
            default_secret: None,
            secrets: HashMap::new(),
            allow_unsigned: false,
        }
    }
}

/// Durable queue behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    /// Backoff steps in seconds. The last step repeats.
    pub backoff_secs: Vec<u64>,
    pub batch_size: u32,
    /// Rows `processing` longer than this are treated as abandoned.
    pub processing_timeout_secs: u64,
    pub default_priority: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_secs: vec![5, 30, 300],
            batch_size: 25,
            processing_timeout_secs: 600,
            default_priority: 5,
        }
    }
}

/// External workflow engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Per-request timeout for engine calls.
    pub request_timeout_secs: u64,
    /// In-call attempts for a start request that fails transiently.
    pub start_attempts: u32,
    /// A `running` execution older than this is failed with `timeout`.
    pub execution_timeout_secs: u64,
    /// A `pending` execution with no start in flight and no open approval
    /// is picked up by the recovery sweep after this long.
    pub pending_grace_secs: u64,
    /// Secret for verifying completion callbacks. Unset disables verification.
    pub callback_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678/api/v1".to_string(),
            api_key: None,
            request_timeout_secs: 30,
            start_attempts: 3,
            execution_timeout_secs: 3600,
            pending_grace_secs: 600,
            callback_secret: None,
        }
    }
}

/// Approval gate and auto-approver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub default_expiry_hours: i64,
    /// Minimum confidence (0-100) for automatic approval.
    pub auto_approve_threshold: f64,
    /// Auto-approvals allowed per definition per UTC day.
    pub auto_approve_daily_cap: u32,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_expiry_hours: 24,
            auto_approve_threshold: 90.0,
            auto_approve_daily_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub retention_days: i64,
    pub cleanup_batch_size: u32,
    /// Window for the health endpoint's error rate.
    pub error_window_minutes: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            cleanup_batch_size: 500,
            error_window_minutes: 60,
        }
    }
}

/// Maintenance job schedules, human-readable or cron.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub process_queue: String,
    pub retry_failed: String,
    pub expire_approvals: String,
    pub cleanup_events: String,
    pub sync_registry: String,
    pub poll_executions: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            process_queue: "every 30 seconds".to_string(),
            retry_failed: "every 5 minutes".to_string(),
            expire_approvals: "hourly".to_string(),
            cleanup_events: "daily".to_string(),
            sync_registry: "every 30 minutes".to_string(),
            poll_executions: "every 1 minute".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Schedule string for a maintenance job by its name. Unknown names get
    /// an empty string, which disables the job.
    pub fn schedule_for(&self, job: &str) -> &str {
        match job {
            "process_queue_batch" => &self.process_queue,
            "retry_failed_webhooks" => &self.retry_failed,
            "expire_old_approvals" => &self.expire_approvals,
            "cleanup_old_events" => &self.cleanup_events,
            "sync_registry" => &self.sync_registry,
            "poll_running_executions" => &self.poll_executions,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.webhook.max_age_secs, 300);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.backoff_secs, vec![5, 30, 300]);
        assert_eq!(config.approval.auto_approve_threshold, 90.0);
        assert_eq!(config.approval.default_expiry_hours, 24);
        assert_eq!(config.engine.pending_grace_secs, 600);
        assert_eq!(config.monitoring.retention_days, 30);
        assert_eq!(config.scheduler.process_queue, "every 30 seconds");
    }

    #[test]
    fn empty_toml_is_default() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.webhook.secrets.is_empty());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
[queue]
max_retries = 5

[webhook.secrets]
lead-nurture = "s3cret"
"#,
        )
        .unwrap();
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.batch_size, 25);
        assert_eq!(
            config.webhook.secrets.get("lead-nurture").map(String::as_str),
            Some("s3cret")
        );
    }
}

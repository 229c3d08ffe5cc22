//! Query parameters for list endpoints.
//!
//! Enum-valued filters arrive as strings and are parsed here so that a bad
//! value produces the usual validation envelope.

use std::str::FromStr;

use chrono::{Duration, Utc};
use leadflow_types::approval::ApprovalFilter;
use leadflow_types::monitoring::EventFilter;
use leadflow_types::workflow::ExecutionFilter;
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::AppError;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 500;

fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = String>,
{
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<T>().map_err(AppError::Validation))
        .transpose()
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize, Default)]
pub struct WorkflowListQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecutionListQuery {
    pub workflow_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl ExecutionListQuery {
    pub fn into_filter(self) -> Result<ExecutionFilter, AppError> {
        Ok(ExecutionFilter {
            workflow_id: self.workflow_id,
            status: parse_opt(self.status.as_deref())?,
            limit: Some(clamp_limit(self.limit)),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ApprovalListQuery {
    /// Defaults to `pending`; `all` lists every status.
    pub status: Option<String>,
    pub workflow_id: Option<Uuid>,
    pub priority: Option<String>,
    pub limit: Option<u32>,
}

impl ApprovalListQuery {
    pub fn into_filter(self) -> Result<ApprovalFilter, AppError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => Some(leadflow_types::approval::ApprovalStatus::Pending),
            Some("all") => None,
            Some(other) => parse_opt(Some(other))?,
        };
        Ok(ApprovalFilter {
            status,
            workflow_id: self.workflow_id,
            priority: parse_opt(self.priority.as_deref())?,
            limit: Some(clamp_limit(self.limit)),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

impl WebhookListQuery {
    pub fn parts(
        &self,
    ) -> Result<(Option<leadflow_types::webhook::WebhookStatus>, u32), AppError> {
        Ok((parse_opt(self.status.as_deref())?, clamp_limit(self.limit)))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct EventQuery {
    /// Look back this many minutes. Defaults to one day.
    pub since_minutes: Option<i64>,
    pub severity: Option<String>,
    pub event_type: Option<String>,
    pub workflow_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub limit: Option<u32>,
}

impl EventQuery {
    pub fn into_filter(self) -> Result<EventFilter, AppError> {
        Ok(EventFilter {
            since: Some(Utc::now() - lookback(self.since_minutes)?),
            min_severity: parse_opt(self.severity.as_deref())?,
            event_type: parse_opt(self.event_type.as_deref())?,
            workflow_id: self.workflow_id,
            execution_id: self.execution_id,
            limit: Some(clamp_limit(self.limit)),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct WindowQuery {
    pub since_minutes: Option<i64>,
    pub limit: Option<u32>,
}

impl WindowQuery {
    pub fn window(&self) -> Result<Duration, AppError> {
        lookback(self.since_minutes)
    }

    pub fn limit(&self) -> u32 {
        clamp_limit(self.limit)
    }
}

fn lookback(minutes: Option<i64>) -> Result<Duration, AppError> {
    match minutes {
        None => Ok(Duration::days(1)),
        Some(m) if m > 0 => Ok(Duration::minutes(m)),
        Some(m) => Err(AppError::Validation(format!(
            "since_minutes must be positive, got {m}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_types::approval::{ApprovalPriority, ApprovalStatus};
    use leadflow_types::monitoring::Severity;

    #[test]
    fn approvals_default_to_pending() {
        let filter = ApprovalListQuery::default().into_filter().unwrap();
        assert_eq!(filter.status, Some(ApprovalStatus::Pending));
        assert_eq!(filter.limit, Some(DEFAULT_LIMIT));

        let all = ApprovalListQuery {
            status: Some("all".into()),
            priority: Some("high".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(all.status, None);
        assert_eq!(all.priority, Some(ApprovalPriority::High));
    }

    #[test]
    fn bad_enum_values_are_validation_errors() {
        let err = ExecutionListQuery {
            status: Some("exploded".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn event_filter_parses_severity_and_clamps_limit() {
        let filter = EventQuery {
            severity: Some("error".into()),
            limit: Some(10_000),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.min_severity, Some(Severity::Error));
        assert_eq!(filter.limit, Some(MAX_LIMIT));
        assert!(filter.since.is_some());
    }

    #[test]
    fn lookback_must_be_positive() {
        assert!(lookback(Some(0)).is_err());
        assert_eq!(lookback(Some(15)).unwrap(), Duration::minutes(15));
    }
}

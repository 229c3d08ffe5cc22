//! Wire-level types exchanged with the external workflow engine.

use serde::{Deserialize, Serialize};

use crate::workflow::ExecutionResult;

/// A workflow as listed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWorkflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    /// Tags double as trigger-event names when sync creates a local row.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The engine's acknowledgement of a start call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedExecution {
    pub external_execution_id: String,
}

/// Polled state of a remote execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteExecutionState {
    /// Still queued or running in the engine.
    Running,
    Finished { result: ExecutionResult },
    /// The engine has no record of it.
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_workflow_defaults() {
        let wf: RemoteWorkflow = serde_json::from_str(r#"{"id":"7","name":"nurture"}"#).unwrap();
        assert!(!wf.active);
        assert!(wf.tags.is_empty());
    }

    #[test]
    fn finished_state_carries_result() {
        let state = RemoteExecutionState::Finished {
            result: ExecutionResult::Success { output: None },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "finished");
        assert_eq!(json["result"]["status"], "success");
    }
}

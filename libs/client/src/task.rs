//! Polling of asynchronous appliance tasks.
//!
//! Mutating calls may answer `202 Accepted` with a task uri in `Location`;
//! the call is only complete once the task reaches a terminal state.

use std::fmt;

use hwm_reconcile::with_retry;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::http::HttpClient;
use crate::ResourceClient;

const FAILURE_STATES: &[&str] = &["Error", "Terminated", "Killed"];

#[derive(Debug)]
enum TaskPoll {
    Running(String),
    Failed(ClientError),
}

impl TaskPoll {
    fn is_transient(&self) -> bool {
        match self {
            Self::Running(_) => true,
            Self::Failed(e) => e.is_transient(),
        }
    }
}

impl fmt::Display for TaskPoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(state) => write!(f, "task still {state}"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Poll `uri` until the task finishes; returns the final task document.
pub(crate) async fn wait_for_task(client: &HttpClient, uri: &str) -> Result<Value, ClientError> {
    debug!(task = uri, "Waiting for task");

    let result = with_retry(client.settings().task_policy, TaskPoll::is_transient, || async move {
        let task = client.fetch(uri).await.map_err(TaskPoll::Failed)?;
        let state = task
            .get("taskState")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();

        if state == "Completed" {
            Ok(task)
        } else if state == "Warning" {
            warn!(task = uri, message = %task_error(&task), "Task completed with warnings");
            Ok(task)
        } else if FAILURE_STATES.contains(&state.as_str()) {
            Err(TaskPoll::Failed(ClientError::Task {
                uri: uri.to_string(),
                message: task_error(&task),
                state,
            }))
        } else {
            Err(TaskPoll::Running(state))
        }
    })
    .await;

    result.map_err(|e| match e.into_inner() {
        TaskPoll::Failed(err) => err,
        TaskPoll::Running(state) => ClientError::Task {
            uri: uri.to_string(),
            state,
            message: "did not finish within the polling budget".to_string(),
        },
    })
}

/// The uri of the resource a finished task created or modified.
pub(crate) fn resource_uri(task: &Value) -> Option<String> {
    task.pointer("/associatedResource/resourceUri")
        .and_then(Value::as_str)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
}

fn task_error(task: &Value) -> String {
    task.pointer("/taskErrors/0/message")
        .and_then(Value::as_str)
        .unwrap_or("no error details reported")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_uri() {
        let task = json!({"associatedResource": {"resourceUri": "/rest/server-profiles/1"}});
        assert_eq!(resource_uri(&task).as_deref(), Some("/rest/server-profiles/1"));
        assert_eq!(resource_uri(&json!({"associatedResource": {"resourceUri": ""}})), None);
        assert_eq!(resource_uri(&json!({})), None);
    }

    #[test]
    fn test_task_error() {
        let task = json!({"taskErrors": [{"message": "Drive count mismatch"}]});
        assert_eq!(task_error(&task), "Drive count mismatch");
        assert_eq!(task_error(&json!({})), "no error details reported");
    }
}

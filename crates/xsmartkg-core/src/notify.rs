//! User-visible notifications and refresh signals.

use std::fmt;

use serde::Serialize;

/// One-shot, user-visible notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// The backend finished building the graph
    BuildSucceeded {
        task_id: String,
        entities_count: u64,
        relations_count: u64,
    },
    /// The backend reported the task as failed
    BuildFailed {
        task_id: String,
        detail: Option<String>,
    },
    /// The task was cancelled on the backend
    BuildCancelled { task_id: String },
    /// The live channel could not be re-established
    ConnectionLost { task_id: String, attempts: u32 },
    /// The form was refused before anything was sent
    UploadRejected { reason: String },
    /// The upload request itself failed; no task was created
    UploadFailed { reason: String },
    TaskDeleted { task_id: String },
    TaskCancelRequested { task_id: String },
    GraphSpaceCreated { name: String },
    /// A history or space action failed
    ActionFailed { action: String, reason: String },
}

impl Notification {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notification::BuildFailed { .. }
                | Notification::ConnectionLost { .. }
                | Notification::UploadRejected { .. }
                | Notification::UploadFailed { .. }
                | Notification::ActionFailed { .. }
        )
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::BuildSucceeded {
                entities_count,
                relations_count,
                ..
            } => write!(
                f,
                "Knowledge graph built: {} entities, {} relations",
                entities_count, relations_count
            ),
            Notification::BuildFailed { detail, .. } => write!(
                f,
                "Build failed: {}",
                detail.as_deref().unwrap_or("unknown error")
            ),
            Notification::BuildCancelled { task_id } => write!(f, "Task {} was cancelled", task_id),
            Notification::ConnectionLost { task_id, attempts } => write!(
                f,
                "Lost connection to task {} after {} reconnect attempts",
                task_id, attempts
            ),
            Notification::UploadRejected { reason } => write!(f, "{}", reason),
            Notification::UploadFailed { reason } => write!(f, "Upload failed: {}", reason),
            Notification::TaskDeleted { task_id } => write!(f, "Task {} deleted", task_id),
            Notification::TaskCancelRequested { task_id } => {
                write!(f, "Cancellation requested for task {}", task_id)
            }
            Notification::GraphSpaceCreated { name } => write!(f, "Graph space {} created", name),
            Notification::ActionFailed { action, reason } => {
                write!(f, "{} failed: {}", action, reason)
            }
        }
    }
}

/// Dependent views that should reload after a task finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum RefreshTarget {
    History,
    GraphPreview { graph_space_name: String },
}

/// Receives notifications and refresh signals.
///
/// The shell implements this to surface events to the user.
pub trait ConsoleEmitter: Send + Sync {
    fn notify(&self, notification: Notification);

    fn refresh(&self, target: RefreshTarget);
}

/// No-op implementation for testing
pub struct NoOpEmitter;

impl ConsoleEmitter for NoOpEmitter {
    fn notify(&self, _notification: Notification) {}

    fn refresh(&self, _target: RefreshTarget) {}
}

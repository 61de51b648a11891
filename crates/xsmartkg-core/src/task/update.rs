//! Partial task updates and the inbound frame parser.
//!
//! Live frames and polled snapshots are both turned into a [`ProgressUpdate`]:
//! every field is optional and only the present ones are applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::{FileStatus, TaskStatus};
use crate::api::TaskResponse;

/// How raw `progress` numbers from the backend are read.
///
/// The client always stores an integer percentage in `0..=100`. The backend
/// reports percentages on both the live channel and the task records, so
/// `Percent` is the default; `Fraction` is for deployments reporting `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressScale {
    #[default]
    Percent,
    Fraction,
}

impl ProgressScale {
    /// Normalize a raw value to a percentage. NaN and negative values yield `None`.
    pub fn to_percent(self, raw: f64) -> Option<u8> {
        if !raw.is_finite() || raw < 0.0 {
            return None;
        }
        let percent = match self {
            ProgressScale::Percent => raw,
            ProgressScale::Fraction => raw * 100.0,
        };
        // epsilon keeps 0.29 * 100.0 from flooring to 28
        Some((percent + 1e-9).floor().clamp(0.0, 100.0) as u8)
    }
}

/// Update for one file record, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub name: String,
    pub status: Option<FileStatus>,
    pub progress: Option<u8>,
}

/// A partial task update. `None` means "not present, leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: Option<u8>,
    pub status: Option<TaskStatus>,
    pub message: Option<String>,
    pub entities_count: Option<u64>,
    pub relations_count: Option<u64>,
    pub files: Option<Vec<FileUpdate>>,
    pub error_message: Option<String>,
    pub current_file: Option<String>,
    pub total_files: Option<u64>,
}

impl ProgressUpdate {
    /// Build an update from a point-in-time task record.
    pub fn from_snapshot(task: &TaskResponse, scale: ProgressScale) -> Self {
        let files = task
            .file_names
            .iter()
            .map(|f| FileUpdate {
                name: f.name.clone(),
                status: f.status.as_deref().and_then(FileStatus::parse),
                progress: f.progress.and_then(|p| scale.to_percent(p)),
            })
            .collect();

        Self {
            progress: scale.to_percent(task.progress),
            status: TaskStatus::parse(&task.status),
            message: None,
            entities_count: Some(task.entities_count),
            relations_count: Some(task.relations_count),
            files: Some(files),
            error_message: task.error_message.clone().filter(|m| !m.is_empty()),
            current_file: task.current_file.clone(),
            total_files: Some(task.total_files),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A parsed live frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Task id from the `{type, task_id, data}` envelope, if the frame had one.
    pub task_id: Option<String>,
    pub update: ProgressUpdate,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not an object")]
    NotAnObject,
}

#[derive(Debug, Deserialize)]
struct WireUpdate {
    progress: Option<f64>,
    status: Option<String>,
    message: Option<String>,
    entities_count: Option<u64>,
    relations_count: Option<u64>,
    file_names: Option<Vec<WireFile>>,
    error_message: Option<String>,
    current_file: Option<String>,
    total_files: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    name: String,
    status: Option<String>,
    progress: Option<f64>,
}

/// Parse one text frame from the live channel.
///
/// An envelope `{type, task_id, data: {...}}` is unwrapped one level. The
/// data-less `task_completed` and `task_cancelled` envelopes carry their
/// status in `type`.
pub fn parse_frame(text: &str, scale: ProgressScale) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut object) = value else {
        return Err(FrameError::NotAnObject);
    };

    let kind = object.get("type").and_then(Value::as_str).map(str::to_string);
    let envelope_task_id = object
        .get("task_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let (task_id, payload) = match object.remove("data") {
        Some(data @ Value::Object(_)) => (envelope_task_id, data),
        Some(other) => {
            // not an envelope, keep the field where it was
            object.insert("data".to_string(), other);
            (None, Value::Object(object))
        }
        None if kind.is_some() => (envelope_task_id, Value::Object(object)),
        None => (None, Value::Object(object)),
    };

    let wire: WireUpdate = serde_json::from_value(payload)?;
    let mut update = wire.into_update(scale);
    if update.status.is_none() {
        update.status = kind.as_deref().and_then(status_from_kind);
    }
    Ok(Frame { task_id, update })
}

fn status_from_kind(kind: &str) -> Option<TaskStatus> {
    match kind {
        "task_completed" => Some(TaskStatus::Completed),
        "task_cancelled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

impl WireUpdate {
    fn into_update(self, scale: ProgressScale) -> ProgressUpdate {
        let status = self.status.as_deref().filter(|s| !s.is_empty()).and_then(|s| {
            let parsed = TaskStatus::parse(s);
            if parsed.is_none() {
                tracing::debug!(status = %s, "Ignoring unknown task status");
            }
            parsed
        });

        let files = self.file_names.map(|files| {
            files
                .into_iter()
                .map(|f| FileUpdate {
                    status: f.status.as_deref().and_then(FileStatus::parse),
                    progress: f.progress.and_then(|p| scale.to_percent(p)),
                    name: f.name,
                })
                .collect()
        });

        ProgressUpdate {
            progress: self.progress.and_then(|p| scale.to_percent(p)),
            status,
            message: self.message.filter(|m| !m.is_empty()),
            entities_count: self.entities_count,
            relations_count: self.relations_count,
            files,
            error_message: self.error_message.filter(|m| !m.is_empty()),
            current_file: self.current_file.filter(|f| !f.is_empty()),
            total_files: self.total_files,
        }
    }
}

//! Client-side view of one extraction task and the merge rule that updates it.

use serde::Serialize;

use super::status::{FileStatus, TaskStatus};
use super::update::{FileUpdate, ProgressUpdate};

/// Progress of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProgress {
    pub name: String,
    pub status: FileStatus,
    /// Percentage, `0..=100`
    pub progress: u8,
}

/// Live view of a task, mutated only through [`TaskState::apply`].
///
/// Merge rule:
/// - fields absent from an update are left unchanged
/// - status only moves up (`pending < running < terminal`); once terminal it is frozen
/// - progress, counts and per-file progress never decrease
/// - `message`, `current_file` and `error_message` are frozen once terminal
///
/// Together these make the merge idempotent and order-tolerant, so live
/// frames and polled snapshots can be applied in any interleaving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    /// Percentage, `0..=100`
    pub progress: u8,
    pub entities_count: u64,
    pub relations_count: u64,
    pub files: Vec<FileProgress>,
    pub message: Option<String>,
    /// Only set when the task failed
    pub error_message: Option<String>,
    pub current_file: Option<String>,
    pub total_files: Option<u64>,
}

/// What an [`TaskState::apply`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
    /// The update moved the task into a terminal status.
    pub became_terminal: bool,
}

impl TaskState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            entities_count: 0,
            relations_count: 0,
            files: Vec::new(),
            message: None,
            error_message: None,
            current_file: None,
            total_files: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of files that finished successfully.
    pub fn completed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Completed)
            .count()
    }

    /// Merge a partial update into the task.
    pub fn apply(&mut self, update: &ProgressUpdate) -> Applied {
        let before = self.clone();
        let was_terminal = self.is_terminal();

        if !was_terminal {
            if let Some(status) = update.status {
                if status.rank() > self.status.rank() {
                    self.status = status;
                }
            }
            if let Some(message) = &update.message {
                self.message = Some(message.clone());
            }
            if let Some(current_file) = &update.current_file {
                self.current_file = Some(current_file.clone());
            }
        }

        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress);
            if progress > 0 && self.status == TaskStatus::Pending {
                self.status = TaskStatus::Running;
            }
        }
        if let Some(count) = update.entities_count {
            self.entities_count = self.entities_count.max(count);
        }
        if let Some(count) = update.relations_count {
            self.relations_count = self.relations_count.max(count);
        }
        if let Some(total) = update.total_files {
            self.total_files = Some(self.total_files.map_or(total, |t| t.max(total)));
        }
        if let Some(files) = &update.files {
            self.merge_files(files);
        }

        match self.status {
            TaskStatus::Completed => self.settle_completed(),
            TaskStatus::Failed if !was_terminal => {
                self.error_message = update
                    .error_message
                    .clone()
                    .or_else(|| update.message.clone());
            }
            _ => {}
        }

        Applied {
            changed: *self != before,
            became_terminal: !was_terminal && self.is_terminal(),
        }
    }

    fn merge_files(&mut self, updates: &[FileUpdate]) {
        for update in updates {
            match self.files.iter_mut().find(|f| f.name == update.name) {
                Some(file) => {
                    if let Some(status) = update.status {
                        if status.rank() > file.status.rank() {
                            file.status = status;
                        }
                    }
                    if let Some(progress) = update.progress {
                        file.progress = file.progress.max(progress);
                    }
                }
                None => self.files.push(FileProgress {
                    name: update.name.clone(),
                    status: update.status.unwrap_or(FileStatus::Pending),
                    progress: update.progress.unwrap_or(0),
                }),
            }
        }
    }

    /// A completed task reports every file as done.
    fn settle_completed(&mut self) {
        self.progress = 100;
        for file in &mut self.files {
            file.status = FileStatus::Completed;
            file.progress = 100;
        }
    }
}

//! Build console: the upload-and-build flow around one [`TaskTracker`], plus
//! the task history and graph space calls.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::api::{ColumnMapping, ExcelMode, TaskList, TaskQuery, TaskResponse, UploadFile, UploadRequest};
use crate::config::{Config, UploadLimits};
use crate::error::{ApiError, ConsoleError};
use crate::notify::{Notification, RefreshTarget};
use crate::prompt::PromptTemplate;
use crate::task::TaskStatus;
use crate::tracker::{TaskTracker, TrackerOptions, TrackerSnapshot};
use crate::ConsoleContext;

/// Everything the user fills in before submitting a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadForm {
    pub files: Vec<UploadFile>,
    pub graph_space_name: String,
    pub excel_mode: ExcelMode,
    pub custom_prompt: Option<String>,
    pub column_mapping: Option<ColumnMapping>,
    pub workflow_config: Option<serde_json::Value>,
}

impl UploadForm {
    pub fn new(graph_space_name: impl Into<String>) -> Self {
        Self {
            graph_space_name: graph_space_name.into(),
            ..Self::default()
        }
    }

    /// Use a rendered template as the extraction prompt.
    pub fn apply_template(
        &mut self,
        template: &PromptTemplate,
        values: &BTreeMap<String, String>,
    ) {
        self.custom_prompt = Some(template.render(values));
    }

    /// Check the form against the client-side limits.
    pub fn validate(&self, limits: &UploadLimits) -> Result<(), String> {
        if self.files.is_empty() {
            return Err("Select at least one file".to_string());
        }
        if self.graph_space_name.trim().is_empty() {
            return Err("Graph space name is required".to_string());
        }
        for file in &self.files {
            let allowed = file
                .extension()
                .is_some_and(|ext| limits.allowed_extensions.contains(&ext));
            if !allowed {
                return Err(format!(
                    "{}: unsupported file type, expected one of {}",
                    file.name,
                    limits.allowed_extensions.join(" ")
                ));
            }
            if file.size() > limits.max_file_bytes {
                return Err(format!(
                    "{}: file is larger than {} MB",
                    file.name,
                    limits.max_file_bytes / (1024 * 1024)
                ));
            }
        }
        if self.excel_mode == ExcelMode::Mapping
            && self.column_mapping.as_ref().map_or(true, ColumnMapping::is_empty)
        {
            return Err("Mapping mode requires a column mapping".to_string());
        }
        Ok(())
    }

    fn into_request(self, user_id: Option<String>) -> UploadRequest {
        UploadRequest {
            files: self.files,
            graph_space_name: self.graph_space_name.trim().to_string(),
            excel_mode: self.excel_mode,
            custom_prompt: self.custom_prompt,
            column_mapping: self.column_mapping,
            workflow_config: self.workflow_config,
            user_id,
        }
    }
}

/// Where the console is in the build flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Uploading,
    /// Pending or running
    Tracking { task_id: String, status: TaskStatus },
    Terminal { task_id: String, status: TaskStatus },
    /// Live channel gave up; `status` is the last one seen
    ConnectionLost { task_id: String, status: TaskStatus },
}

impl Phase {
    fn from_snapshot(snapshot: &TrackerSnapshot) -> Self {
        let task_id = snapshot.task.task_id.clone();
        let status = snapshot.task.status;
        if status.is_terminal() {
            Phase::Terminal { task_id, status }
        } else if snapshot.connection_lost() {
            Phase::ConnectionLost { task_id, status }
        } else {
            Phase::Tracking { task_id, status }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Uploading,
    Tracking,
}

struct Inner {
    mode: Mode,
    tracker: TaskTracker,
}

/// The build console.
///
/// Dropping it stops any tracking session.
pub struct BuildConsole {
    ctx: ConsoleContext,
    inner: Mutex<Inner>,
}

impl BuildConsole {
    pub fn new(ctx: ConsoleContext) -> Self {
        let tracker = TaskTracker::new(ctx.seams(), TrackerOptions::from(&ctx.config));
        Self {
            ctx,
            inner: Mutex::new(Inner {
                mode: Mode::Idle,
                tracker,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub async fn phase(&self) -> Phase {
        let inner = self.inner.lock().await;
        match inner.mode {
            Mode::Idle => Phase::Idle,
            Mode::Uploading => Phase::Uploading,
            Mode::Tracking => inner
                .tracker
                .snapshot()
                .map(|s| Phase::from_snapshot(&s))
                .unwrap_or(Phase::Idle),
        }
    }

    /// Snapshots of the task currently tracked, if any.
    pub async fn subscribe(&self) -> Option<watch::Receiver<TrackerSnapshot>> {
        self.inner.lock().await.tracker.subscribe()
    }

    /// Validate, upload and start tracking the created task.
    pub async fn submit(&self, form: UploadForm) -> Result<TaskResponse, ConsoleError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.mode == Mode::Uploading || inner.tracker.is_active() {
                return Err(ConsoleError::Busy);
            }
            if let Err(reason) = form.validate(&self.ctx.config.upload) {
                tracing::info!(reason = %reason, "Upload rejected");
                self.ctx
                    .emitter
                    .notify(Notification::UploadRejected { reason: reason.clone() });
                return Err(ConsoleError::Validation(reason));
            }
            inner.tracker.stop();
            inner.mode = Mode::Uploading;
        }

        let request = form.into_request(self.ctx.config.user_id.clone());
        tracing::info!(
            graph_space = %request.graph_space_name,
            files = request.files.len(),
            "Submitting build"
        );
        let result = self.ctx.api.upload(&request).await.and_then(|task| {
            if task.task_id.trim().is_empty() {
                return Err(ApiError::Decode(
                    "upload response has no task id".to_string(),
                ));
            }
            Ok(task)
        });

        let mut inner = self.inner.lock().await;
        match result {
            Ok(task) => {
                tracing::info!(task_id = %task.task_id, "Build task created");
                inner.mode = Mode::Tracking;
                inner
                    .tracker
                    .start_in(&task.task_id, Some(request.graph_space_name.clone()));
                Ok(task)
            }
            Err(e) => {
                tracing::error!(error = %e, "Upload failed");
                inner.mode = Mode::Idle;
                self.ctx.emitter.notify(Notification::UploadFailed {
                    reason: upload_reason(&e),
                });
                Err(e.into())
            }
        }
    }

    /// Track an existing task, e.g. one picked from the history.
    pub async fn follow(&self, task_id: &str) -> Result<watch::Receiver<TrackerSnapshot>, ConsoleError> {
        let mut inner = self.inner.lock().await;
        if inner.mode == Mode::Uploading || inner.tracker.is_active() {
            return Err(ConsoleError::Busy);
        }
        inner.mode = Mode::Tracking;
        Ok(inner.tracker.start(task_id))
    }

    /// Stop tracking and return to idle.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.tracker.shutdown().await;
        inner.mode = Mode::Idle;
    }

    /// One page of the task history. `None` lists every status.
    pub async fn history(
        &self,
        status: Option<TaskStatus>,
        page: u32,
    ) -> Result<TaskList, ConsoleError> {
        let query = TaskQuery {
            user_id: self.ctx.config.user_id.clone(),
            page: page.max(1),
            limit: self.ctx.config.history_page_size,
            status,
        };
        let result = self.ctx.api.list_tasks(&query).await;
        self.report("Load history", result)
    }

    pub async fn detail(&self, task_id: &str) -> Result<TaskResponse, ConsoleError> {
        let result = self.ctx.api.get_task(task_id).await;
        self.report("Load task", result)
    }

    pub async fn delete(&self, task_id: &str) -> Result<(), ConsoleError> {
        let result = self.ctx.api.delete_task(task_id).await;
        self.report("Delete task", result)?;
        tracing::info!(task_id = %task_id, "Task deleted");
        self.ctx.emitter.notify(Notification::TaskDeleted {
            task_id: task_id.to_string(),
        });
        self.ctx.emitter.refresh(RefreshTarget::History);
        Ok(())
    }

    /// Ask the backend to cancel. The tracker sees the outcome through its
    /// usual channels.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ConsoleError> {
        let result = self.ctx.api.cancel_task(task_id).await;
        self.report("Cancel task", result)?;
        self.ctx.emitter.notify(Notification::TaskCancelRequested {
            task_id: task_id.to_string(),
        });
        self.ctx.emitter.refresh(RefreshTarget::History);
        Ok(())
    }

    /// Form template for rebuilding a task. Files have to be chosen again.
    pub async fn reprocess(&self, task_id: &str) -> Result<UploadForm, ConsoleError> {
        let task = self.detail(task_id).await?;
        Ok(UploadForm::new(task.graph_space_name))
    }

    pub async fn graph_spaces(&self) -> Result<Vec<String>, ConsoleError> {
        let result = self.ctx.api.list_graph_spaces().await;
        self.report("Load graph spaces", result)
    }

    pub async fn create_graph_space(&self, name: &str) -> Result<(), ConsoleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConsoleError::Validation(
                "Graph space name is required".to_string(),
            ));
        }
        let result = self.ctx.api.create_graph_space(name).await;
        self.report("Create graph space", result)?;
        self.ctx.emitter.notify(Notification::GraphSpaceCreated {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Surface a failed collaborator call as `ActionFailed`.
    fn report<T>(&self, action: &str, result: Result<T, ApiError>) -> Result<T, ConsoleError> {
        result.map_err(|e| {
            tracing::warn!(action, error = %e, "Console action failed");
            self.ctx.emitter.notify(Notification::ActionFailed {
                action: action.to_string(),
                reason: e.to_string(),
            });
            ConsoleError::Api(e)
        })
    }
}

fn upload_reason(error: &ApiError) -> String {
    match error {
        ApiError::Server { status, message } if message.trim().is_empty() => {
            format!("server returned {}", status)
        }
        ApiError::Server { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

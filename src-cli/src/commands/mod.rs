//! Console commands.
//!
//! Each command returns data; printing happens in [`execute`] so the
//! commands can be tested against a mock backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use serde::Serialize;
use tokio::sync::watch;

use xsmartkg_core::api::{ColumnMapping, ExcelMode, TaskList, TaskResponse, UploadFile};
use xsmartkg_core::task::ProgressScale;
use xsmartkg_core::{
    BuildConsole, LinkState, PromptTemplate, TaskStatus, TrackerSnapshot, UploadForm,
};

use crate::error::{CommandError, CommandResult};


#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload files and build a knowledge graph
    Upload(UploadArgs),
    /// Follow an existing task until it finishes
    Watch { task_id: String },
    /// List build tasks
    Tasks {
        /// all, pending, running, completed, failed or cancelled
        #[arg(long, default_value = "all")]
        status: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show one task
    Show { task_id: String },
    /// Delete a task
    Delete { task_id: String },
    /// Ask the backend to cancel a running task
    Cancel { task_id: String },
    /// Rebuild a task's graph space from new files
    Reprocess {
        task_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        detach: bool,
    },
    /// List graph spaces
    Spaces,
    /// Create a graph space
    CreateSpace { name: String },
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Target graph space
    #[arg(long, short = 's')]
    pub space: String,
    /// auto, text or mapping
    #[arg(long, default_value = "auto")]
    pub excel_mode: ExcelMode,
    /// Extra extraction instructions
    #[arg(long)]
    pub prompt: Option<String>,
    /// Prompt template JSON file with `{name}` placeholders
    #[arg(long, conflicts_with = "prompt")]
    pub prompt_template: Option<PathBuf>,
    /// Template variable as NAME=VALUE, overriding its default
    #[arg(long = "var", value_parser = parse_var, requires = "prompt_template")]
    pub vars: Vec<(String, String)>,
    /// Column mapping JSON file, required for `--excel-mode mapping`
    #[arg(long)]
    pub mapping: Option<PathBuf>,
    /// Workflow node configuration JSON file
    #[arg(long)]
    pub workflow_config: Option<PathBuf>,
    /// Return once the task is created
    #[arg(long)]
    pub detach: bool,
}

/// How results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn print<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) {
        if self.json {
            match serde_json::to_string(value) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(error = %e, "Failed to serialize output"),
            }
        } else {
            println!("{}", text(value));
        }
    }
}

/// Run one command against the console and print its result.
pub async fn execute(console: &BuildConsole, command: Command, out: Output) -> CommandResult<()> {
    let scale = console.config().progress_scale;
    match command {
        Command::Upload(args) => {
            let detach = args.detach;
            let form = upload_form(args).await?;
            let task = submit(console, form).await?;
            out.print(&task, |t| format!("Created task {}", t.task_id));
            if !detach {
                follow(console, out).await?;
            }
        }
        Command::Watch { task_id } => {
            console.follow(&task_id).await?;
            follow(console, out).await?;
        }
        Command::Tasks { status, page } => {
            let list = list_tasks(console, &status, page).await?;
            out.print(&list, |l| render_list(l, scale));
        }
        Command::Show { task_id } => {
            let task = console.detail(&task_id).await?;
            out.print(&task, |t| render_task_detail(t, scale));
        }
        Command::Delete { task_id } => console.delete(&task_id).await?,
        Command::Cancel { task_id } => console.cancel(&task_id).await?,
        Command::Reprocess {
            task_id,
            files,
            detach,
        } => {
            let mut form = console.reprocess(&task_id).await?;
            form.files = read_files(&files).await?;
            let task = submit(console, form).await?;
            out.print(&task, |t| {
                format!("Created task {} in {}", t.task_id, t.graph_space_name)
            });
            if !detach {
                follow(console, out).await?;
            }
        }
        Command::Spaces => {
            let spaces = console.graph_spaces().await?;
            out.print(&spaces, |s| s.join("\n"));
        }
        Command::CreateSpace { name } => console.create_graph_space(&name).await?,
    }
    Ok(())
}

pub async fn submit(console: &BuildConsole, form: UploadForm) -> CommandResult<TaskResponse> {
    Ok(console.submit(form).await?)
}

/// Turn the upload arguments into a form, reading files from disk.
pub async fn upload_form(args: UploadArgs) -> CommandResult<UploadForm> {
    let column_mapping = match &args.mapping {
        Some(path) => Some(read_json::<ColumnMapping>(path).await?),
        None => None,
    };
    let workflow_config = match &args.workflow_config {
        Some(path) => Some(read_json::<serde_json::Value>(path).await?),
        None => None,
    };

    let mut form = UploadForm {
        files: read_files(&args.files).await?,
        graph_space_name: args.space,
        excel_mode: args.excel_mode,
        custom_prompt: args.prompt,
        column_mapping,
        workflow_config,
    };
    if let Some(path) = &args.prompt_template {
        let template = read_json::<PromptTemplate>(path).await?;
        let values: BTreeMap<String, String> = args.vars.into_iter().collect();
        form.apply_template(&template, &values);
    }
    Ok(form)
}

/// `NAME=VALUE`; the value may itself contain `=`.
fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got `{}`", raw)),
    }
}

async fn read_files(paths: &[PathBuf]) -> CommandResult<Vec<UploadFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = UploadFile::from_path(path).await.map_err(|e| {
            CommandError::invalid_input(format!("{}: {}", path.display(), e))
        })?;
        files.push(file);
    }
    Ok(files)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CommandResult<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CommandError::invalid_input(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| CommandError::invalid_input(format!("{}: {}", path.display(), e)))
}

pub async fn list_tasks(console: &BuildConsole, status: &str, page: u32) -> CommandResult<TaskList> {
    let status = parse_status_filter(status)?;
    Ok(console.history(status, page).await?)
}

/// `all` lists every status.
pub fn parse_status_filter(value: &str) -> CommandResult<Option<TaskStatus>> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    TaskStatus::parse(value)
        .map(Some)
        .ok_or_else(|| CommandError::invalid_input(format!("unknown status filter: {}", value)))
}

/// Print progress until the tracked task finishes. Ctrl+C stops tracking.
pub async fn follow(console: &BuildConsole, out: Output) -> CommandResult<TrackerSnapshot> {
    let Some(rx) = console.subscribe().await else {
        return Err(CommandError::internal("no task is being tracked"));
    };

    let snapshot = tokio::select! {
        snapshot = watch_progress(rx, out) => snapshot,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping tracker");
            None
        }
    };
    console.reset().await;

    let Some(snapshot) = snapshot else {
        return Err(CommandError::internal("tracking stopped before the task finished"));
    };
    outcome(snapshot)
}

async fn watch_progress(
    mut rx: watch::Receiver<TrackerSnapshot>,
    out: Output,
) -> Option<TrackerSnapshot> {
    let mut last_line = String::new();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        let line = render_progress(&snapshot);
        if line != last_line {
            out.print(&snapshot, |_| line.clone());
            last_line = line;
        }
        if snapshot.finished {
            return Some(snapshot);
        }
        if rx.changed().await.is_err() {
            let snapshot = rx.borrow().clone();
            return snapshot.finished.then_some(snapshot);
        }
    }
}

/// Map the final snapshot to the command result.
pub fn outcome(snapshot: TrackerSnapshot) -> CommandResult<TrackerSnapshot> {
    let task = &snapshot.task;
    if task.status == TaskStatus::Failed {
        return Err(CommandError::build_failed(
            &task.task_id,
            task.error_message.as_deref(),
        ));
    }
    if let LinkState::Lost { attempts } = snapshot.link {
        return Err(CommandError::connection_lost(&task.task_id, attempts));
    }
    if !task.is_terminal() {
        return Err(CommandError::internal(
            "tracking stopped before the task finished",
        ));
    }
    Ok(snapshot)
}

pub fn render_progress(snapshot: &TrackerSnapshot) -> String {
    let task = &snapshot.task;
    let mut line = format!(
        "[{}] {:>3}%  entities {}  relations {}",
        task.status, task.progress, task.entities_count, task.relations_count
    );
    if !task.files.is_empty() {
        line.push_str(&format!(
            "  files {}/{}",
            task.completed_files(),
            task.total_files.unwrap_or(task.files.len() as u64)
        ));
    }
    if let Some(current) = task.current_file.as_deref().filter(|_| !task.is_terminal()) {
        line.push_str(&format!("  ({})", current));
    }
    match &snapshot.link {
        LinkState::Reconnecting { attempt } => {
            line.push_str(&format!("  reconnecting #{}", attempt))
        }
        LinkState::Lost { .. } => line.push_str("  connection lost"),
        _ => {}
    }
    line
}

fn render_task_row(task: &TaskResponse, scale: ProgressScale) -> String {
    format!(
        "{}  {:<20}  {:<10}  {:>3}%  {} entities  {} relations  {}",
        task.task_id,
        task.graph_space_name,
        task.status,
        display_percent(task.progress, scale),
        task.entities_count,
        task.relations_count,
        task.gmt_created
    )
}

fn render_list(list: &TaskList, scale: ProgressScale) -> String {
    if list.tasks.is_empty() {
        return "No tasks".to_string();
    }
    let mut lines: Vec<String> = list
        .tasks
        .iter()
        .map(|task| render_task_row(task, scale))
        .collect();
    lines.push(format!("page {} · {} tasks", list.page, list.total));
    lines.join("\n")
}

fn render_task_detail(task: &TaskResponse, scale: ProgressScale) -> String {
    let mut lines = vec![render_task_row(task, scale)];
    for file in &task.file_names {
        lines.push(format!(
            "  {}  {}  {}",
            file.name,
            file.status.as_deref().unwrap_or("-"),
            file.progress
                .map(|p| format!("{}%", display_percent(p, scale)))
                .unwrap_or_default()
        ));
    }
    if let Some(error) = task.error_message.as_deref().filter(|e| !e.is_empty()) {
        lines.push(format!("  error: {}", error));
    }
    lines.join("\n")
}

/// Same normalization the tracker applies to live progress.
fn display_percent(raw: f64, scale: ProgressScale) -> u8 {
    scale.to_percent(raw).unwrap_or(0)
}

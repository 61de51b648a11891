//! Request and response shapes of the knowledge-graph serve API.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// Timestamp format used by `gmt_created` / `completed_at`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-file record inside a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub file_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Point-in-time task record, as returned by upload, detail and listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    #[serde(default)]
    pub graph_space_name: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub entities_count: u64,
    #[serde(default)]
    pub relations_count: u64,
    #[serde(default)]
    pub file_names: Vec<FileInfo>,
    #[serde(default)]
    pub gmt_created: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskResponse {
    pub fn parsed_status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.gmt_created, TIMESTAMP_FORMAT).ok()
    }

    pub fn completed_at(&self) -> Option<NaiveDateTime> {
        self.completed_at
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok())
    }
}

/// One page of the task history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<TaskResponse>,
    #[serde(default)]
    pub total: u64,
    #[serde(default = "first_page")]
    pub page: u32,
}

fn first_page() -> u32 {
    1
}

/// Query for the task history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub user_id: Option<String>,
    pub page: u32,
    pub limit: u32,
    /// `None` lists every status
    pub status: Option<TaskStatus>,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            page: 1,
            limit: 10,
            status: None,
        }
    }
}

/// How spreadsheet files are turned into triplets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcelMode {
    /// LLM semantic extraction
    #[default]
    Auto,
    /// Rows flattened to text
    Text,
    /// Structured extraction via [`ColumnMapping`]
    Mapping,
}

impl ExcelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExcelMode::Auto => "auto",
            ExcelMode::Text => "text",
            ExcelMode::Mapping => "mapping",
        }
    }
}

impl FromStr for ExcelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ExcelMode::Auto),
            "text" => Ok(ExcelMode::Text),
            "mapping" | "manual" => Ok(ExcelMode::Mapping),
            other => Err(format!("unknown excel mode: {other}")),
        }
    }
}

/// One relation extracted from a pair of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMapping {
    pub subject_column: String,
    pub predicate: String,
    pub object_column: String,
}

/// Column mapping for [`ExcelMode::Mapping`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub entity_columns: Vec<String>,
    #[serde(default)]
    pub relation_configs: Vec<RelationMapping>,
}

impl ColumnMapping {
    /// Mapping for a single `subject -[predicate]-> object` relation.
    pub fn single(subject: &str, predicate: &str, object: &str) -> Self {
        Self {
            entity_columns: [subject, object]
                .into_iter()
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            relation_configs: vec![RelationMapping {
                subject_column: subject.to_string(),
                predicate: predicate.to_string(),
                object_column: object.to_string(),
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_columns.is_empty() && self.relation_configs.is_empty()
    }
}

/// A file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, named after its file name.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    /// Lowercased extension including the dot, e.g. `.xlsx`.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rfind('.')
            .map(|idx| self.name[idx..].to_ascii_lowercase())
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Multipart upload that creates a build task.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
    pub graph_space_name: String,
    pub excel_mode: ExcelMode,
    pub custom_prompt: Option<String>,
    pub column_mapping: Option<ColumnMapping>,
    /// Workflow node configuration, sent as JSON text
    pub workflow_config: Option<serde_json::Value>,
    pub user_id: Option<String>,
}

/// `{success, error}` body returned by delete / space creation.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ActionResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphSpaces {
    #[serde(default)]
    pub spaces: Vec<String>,
}

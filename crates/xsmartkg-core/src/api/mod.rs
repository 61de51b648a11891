//! Backend API client abstraction
//!
//! [`KgApi`] is the seam between the console and the knowledge-graph serve
//! endpoints. [`HttpKgApi`] is the reqwest implementation; tests substitute
//! in-memory fakes.

mod http;
mod types;

pub use http::{HttpKgApi, SERVE_PATH};
pub use types::{
    ColumnMapping, ExcelMode, FileInfo, RelationMapping, TaskList, TaskQuery, TaskResponse,
    UploadFile, UploadRequest,
};

use async_trait::async_trait;

use crate::error::ApiResult;

/// Knowledge-graph serve API
#[async_trait]
pub trait KgApi: Send + Sync {
    /// Upload files and create a build task.
    async fn upload(&self, request: &UploadRequest) -> ApiResult<TaskResponse>;

    /// Point-in-time task record. Also used as the polling endpoint.
    async fn get_task(&self, task_id: &str) -> ApiResult<TaskResponse>;

    /// One page of the task history.
    async fn list_tasks(&self, query: &TaskQuery) -> ApiResult<TaskList>;

    async fn delete_task(&self, task_id: &str) -> ApiResult<()>;

    async fn cancel_task(&self, task_id: &str) -> ApiResult<()>;

    async fn list_graph_spaces(&self) -> ApiResult<Vec<String>>;

    async fn create_graph_space(&self, name: &str) -> ApiResult<()>;
}

//! reqwest implementation of [`KgApi`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

use super::types::{ActionResponse, GraphSpaces};
use super::{KgApi, TaskList, TaskQuery, TaskResponse, UploadRequest};
use crate::error::{ApiError, ApiResult};

/// Mount point of the knowledge-graph serve endpoints.
pub const SERVE_PATH: &str = "/api/v2/serve/knowledge_graph";

/// Uploads can carry several large spreadsheets.
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for the knowledge-graph serve API
#[derive(Clone)]
pub struct HttpKgApi {
    http: reqwest::Client,
    base_url: String,
    upload_timeout: Duration,
}

impl HttpKgApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, SERVE_PATH, path)
    }

    /// Fail on non-2xx, carrying the response body as the message.
    async fn check(resp: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Server {
                status: code,
                message: body,
            });
        }
        Ok(resp)
    }

    async fn parse<R: DeserializeOwned>(resp: reqwest::Response) -> ApiResult<R> {
        Self::check(resp)
            .await?
            .json::<R>()
            .await
            .map_err(|e| ApiError::Decode(format!("response body: {}", e)))
    }

    /// Map a `{success, error}` body to a result. Empty bodies count as success.
    async fn parse_action(resp: reqwest::Response) -> ApiResult<()> {
        let body = Self::check(resp).await?.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(());
        }
        match serde_json::from_str::<ActionResponse>(&body) {
            Ok(ActionResponse { success: false, error }) => Err(ApiError::Rejected(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => Ok(()),
        }
    }

    fn upload_form(request: &UploadRequest) -> ApiResult<Form> {
        let mut form = Form::new();
        for file in &request.files {
            let part = Part::bytes(file.bytes.clone()).file_name(file.name.clone());
            form = form.part("files", part);
        }

        form = form
            .text("graph_space_name", request.graph_space_name.clone())
            .text("excel_mode", request.excel_mode.as_str());

        if let Some(prompt) = request.custom_prompt.as_ref().filter(|p| !p.is_empty()) {
            form = form.text("custom_prompt", prompt.clone());
        }
        if let Some(mapping) = &request.column_mapping {
            let json = serde_json::to_string(mapping)
                .map_err(|e| ApiError::Encode(format!("column_mapping: {}", e)))?;
            form = form.text("column_mapping", json);
        }
        if let Some(config) = &request.workflow_config {
            let json = serde_json::to_string(config)
                .map_err(|e| ApiError::Encode(format!("workflow_config: {}", e)))?;
            form = form.text("workflow_config", json);
        }
        if let Some(user_id) = &request.user_id {
            form = form.text("user_id", user_id.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl KgApi for HttpKgApi {
    async fn upload(&self, request: &UploadRequest) -> ApiResult<TaskResponse> {
        let form = Self::upload_form(request)?;
        tracing::debug!(
            files = request.files.len(),
            space = %request.graph_space_name,
            "Uploading build request"
        );
        let resp = self
            .http
            .post(self.url("/upload"))
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn get_task(&self, task_id: &str) -> ApiResult<TaskResponse> {
        let resp = self
            .http
            .get(self.url(&format!("/tasks/{}", task_id)))
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn list_tasks(&self, query: &TaskQuery) -> ApiResult<TaskList> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(user_id) = &query.user_id {
            params.push(("user_id", user_id.clone()));
        }
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }

        let resp = self
            .http
            .get(self.url("/tasks"))
            .query(&params)
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn delete_task(&self, task_id: &str) -> ApiResult<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/tasks/{}", task_id)))
            .send()
            .await?;
        Self::parse_action(resp).await
    }

    async fn cancel_task(&self, task_id: &str) -> ApiResult<()> {
        let resp = self
            .http
            .post(self.url(&format!("/tasks/{}/cancel", task_id)))
            .send()
            .await?;
        Self::parse_action(resp).await
    }

    async fn list_graph_spaces(&self) -> ApiResult<Vec<String>> {
        let resp = self.http.get(self.url("/spaces")).send().await?;
        let spaces: GraphSpaces = Self::parse(resp).await?;
        Ok(spaces.spaces)
    }

    async fn create_graph_space(&self, name: &str) -> ApiResult<()> {
        let resp = self
            .http
            .post(self.url("/spaces"))
            .json(&serde_json::json!({ "space_name": name }))
            .send()
            .await?;
        Self::parse_action(resp).await
    }
}

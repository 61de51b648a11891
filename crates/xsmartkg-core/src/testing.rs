//! In-memory fakes for the API, live channel, timer and emitter seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::api::{KgApi, TaskList, TaskQuery, TaskResponse, UploadRequest};
use crate::error::{ApiError, ApiResult, TransportError};
use crate::live::{LiveConnection, LiveTransport};
use crate::notify::{ConsoleEmitter, Notification, RefreshTarget};
use crate::retry::Scheduler;

pub fn task(task_id: &str, status: &str, progress: f64) -> TaskResponse {
    serde_json::from_value(json!({
        "task_id": task_id,
        "graph_space_name": "demo",
        "status": status,
        "progress": progress,
        "total_files": 2,
        "entities_count": 0,
        "relations_count": 0,
        "file_names": [],
        "gmt_created": "2026-03-01 09:15:00"
    }))
    .unwrap()
}

/// One scripted connection attempt.
pub enum Script {
    Refuse,
    /// Deliver the frames, then the peer closes.
    Close(Vec<String>),
    /// Deliver the frames, then stay open until we close.
    Hold(Vec<String>),
}

#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<VecDeque<Script>>,
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveTransport for FakeTransport {
    async fn connect(&self, _task_id: &str) -> Result<Box<dyn LiveConnection>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // unscripted attempts are refused
        let script = self.scripts.lock().unwrap().pop_front();
        let (frames, hold) = match script {
            None | Some(Script::Refuse) => {
                return Err(TransportError::Connect("connection refused".into()))
            }
            Some(Script::Close(frames)) => (frames, false),
            Some(Script::Hold(frames)) => (frames, true),
        };
        Ok(Box::new(FakeConnection {
            frames: frames.into(),
            hold,
            closes: self.closes.clone(),
        }))
    }
}

struct FakeConnection {
    frames: VecDeque<String>,
    hold: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveConnection for FakeConnection {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame));
        }
        if self.hold {
            futures::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted API. `get_task` replays `polls` and repeats the last one.
#[derive(Default)]
pub struct FakeApi {
    pub upload_result: Mutex<Option<Result<TaskResponse, (u16, String)>>>,
    pub polls: Mutex<VecDeque<TaskResponse>>,
    pub last_poll: Mutex<Option<TaskResponse>>,
    pub tasks: Mutex<Vec<TaskResponse>>,
    pub reject_actions: Mutex<Option<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn with_upload(result: Result<TaskResponse, (u16, String)>) -> Self {
        let api = Self::default();
        *api.upload_result.lock().unwrap() = Some(result);
        api
    }

    pub fn with_polls(polls: Vec<TaskResponse>) -> Self {
        let api = Self::default();
        *api.polls.lock().unwrap() = polls.into();
        api
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn action(&self) -> ApiResult<()> {
        match self.reject_actions.lock().unwrap().clone() {
            Some(reason) => Err(ApiError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KgApi for FakeApi {
    async fn upload(&self, request: &UploadRequest) -> ApiResult<TaskResponse> {
        self.record(format!("upload:{}", request.graph_space_name));
        match self.upload_result.lock().unwrap().clone() {
            Some(Ok(task)) => Ok(task),
            Some(Err((status, message))) => Err(ApiError::Server { status, message }),
            None => Err(ApiError::Server {
                status: 500,
                message: "no upload scripted".into(),
            }),
        }
    }

    async fn get_task(&self, task_id: &str) -> ApiResult<TaskResponse> {
        self.record(format!("get:{}", task_id));
        let next = self.polls.lock().unwrap().pop_front();
        let mut last = self.last_poll.lock().unwrap();
        if let Some(task) = next {
            *last = Some(task);
        }
        last.clone().ok_or_else(|| ApiError::Server {
            status: 404,
            message: "Task not found".into(),
        })
    }

    async fn list_tasks(&self, query: &TaskQuery) -> ApiResult<TaskList> {
        self.record(format!(
            "list:{}",
            query.status.map(|s| s.as_str()).unwrap_or("all")
        ));
        let tasks: Vec<TaskResponse> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| query.status.is_none() || t.parsed_status() == query.status)
            .cloned()
            .collect();
        Ok(TaskList {
            total: tasks.len() as u64,
            tasks,
            page: query.page,
        })
    }

    async fn delete_task(&self, task_id: &str) -> ApiResult<()> {
        self.record(format!("delete:{}", task_id));
        self.action()
    }

    async fn cancel_task(&self, task_id: &str) -> ApiResult<()> {
        self.record(format!("cancel:{}", task_id));
        self.action()
    }

    async fn list_graph_spaces(&self) -> ApiResult<Vec<String>> {
        self.record("spaces".into());
        Ok(vec!["demo".into()])
    }

    async fn create_graph_space(&self, name: &str) -> ApiResult<()> {
        self.record(format!("create_space:{}", name));
        self.action()
    }
}

/// Returns immediately and records every requested delay.
#[derive(Default)]
pub struct InstantScheduler {
    pub delays: Mutex<Vec<Duration>>,
}

impl InstantScheduler {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for InstantScheduler {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub struct RecordingEmitter {
    pub notifications: Mutex<Vec<Notification>>,
    pub refreshes: Mutex<Vec<RefreshTarget>>,
}

impl RecordingEmitter {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn refreshes(&self) -> Vec<RefreshTarget> {
        self.refreshes.lock().unwrap().clone()
    }
}

impl ConsoleEmitter for RecordingEmitter {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }

    fn refresh(&self, target: RefreshTarget) {
        self.refreshes.lock().unwrap().push(target);
    }
}

//! Task progress tracking
//!
//! A [`TaskTracker`] follows at most one task at a time. Each tracked task
//! gets a session made of three tokio tasks:
//!
//! - a live listener pumping frames from the [`LiveTransport`]
//! - an optional poller fetching the task record on an interval
//! - a reducer that owns the [`TaskState`] and is the only writer
//!
//! Producers send events over one mpsc channel, so updates from both sources
//! are applied one at a time. Observers read [`TrackerSnapshot`]s through a
//! watch channel. The session ends on a terminal status, on reconnect
//! exhaustion, or when the tracker stops it; every exit path closes the live
//! channel and stops the poller.

mod listener;
mod poller;
mod session;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::KgApi;
use crate::config::{Config, PollingConfig};
use crate::live::LiveTransport;
use crate::notify::ConsoleEmitter;
use crate::retry::{RetryPolicy, Scheduler};
use crate::task::{ProgressScale, TaskState};

use session::run_session;

/// State of the live channel as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Connected,
    /// Waiting to retry; `attempt` is 1-based
    Reconnecting { attempt: u32 },
    Closed,
    /// Reconnect budget exhausted
    Lost { attempts: u32 },
}

/// What observers of a tracked task see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    pub task: TaskState,
    pub link: LinkState,
    /// The session has ended and released its resources.
    pub finished: bool,
}

impl TrackerSnapshot {
    fn initial(task_id: &str) -> Self {
        Self {
            task: TaskState::new(task_id),
            link: LinkState::Connecting,
            finished: false,
        }
    }

    pub fn connection_lost(&self) -> bool {
        matches!(self.link, LinkState::Lost { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerOptions {
    pub retry: RetryPolicy,
    pub polling: PollingConfig,
    pub progress_scale: ProgressScale,
}

impl From<&Config> for TrackerOptions {
    fn from(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            polling: config.polling.clone(),
            progress_scale: config.progress_scale,
        }
    }
}

/// The injectable dependencies of a tracker.
#[derive(Clone)]
pub struct TrackerSeams {
    pub api: Arc<dyn KgApi>,
    pub transport: Arc<dyn LiveTransport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub emitter: Arc<dyn ConsoleEmitter>,
}

struct Session {
    task_id: String,
    cancel: CancellationToken,
    state: watch::Receiver<TrackerSnapshot>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Follows one task at a time.
///
/// Dropping the tracker stops the current session.
pub struct TaskTracker {
    seams: TrackerSeams,
    options: TrackerOptions,
    session: Option<Session>,
}

impl TaskTracker {
    pub fn new(seams: TrackerSeams, options: TrackerOptions) -> Self {
        Self {
            seams,
            options,
            session: None,
        }
    }

    /// Start tracking `task_id`, ending any current session first.
    pub fn start(&mut self, task_id: &str) -> watch::Receiver<TrackerSnapshot> {
        self.start_in(task_id, None)
    }

    /// Like [`start`](Self::start), with the graph space known up front so
    /// completion can refresh its preview.
    pub fn start_in(
        &mut self,
        task_id: &str,
        graph_space_name: Option<String>,
    ) -> watch::Receiver<TrackerSnapshot> {
        self.stop();

        let (state_tx, state_rx) = watch::channel(TrackerSnapshot::initial(task_id));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session(
            task_id.to_string(),
            graph_space_name,
            self.seams.clone(),
            self.options.clone(),
            state_tx,
            cancel.clone(),
        ));

        self.session = Some(Session {
            task_id: task_id.to_string(),
            cancel,
            state: state_rx.clone(),
            handle: Some(handle),
        });
        state_rx
    }

    /// Stop the current session without waiting for it to wind down.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(task_id = %session.task_id, "Stopping tracker session");
        }
    }

    /// Stop the current session and wait until its resources are released.
    pub async fn shutdown(&mut self) -> Option<TrackerSnapshot> {
        let mut session = self.session.take()?;
        session.cancel.cancel();
        if let Some(handle) = session.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task_id = %session.task_id, error = %e, "Tracker session panicked");
            }
        }
        let snapshot = session.state.borrow().clone();
        Some(snapshot)
    }

    /// Wait for the current session to end on its own.
    pub async fn wait(&mut self) -> Option<TrackerSnapshot> {
        let session = self.session.as_mut()?;
        if let Some(handle) = session.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task_id = %session.task_id, error = %e, "Tracker session panicked");
            }
        }
        let snapshot = session.state.borrow().clone();
        Some(snapshot)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.task_id.as_str())
    }

    pub fn snapshot(&self) -> Option<TrackerSnapshot> {
        self.session.as_ref().map(|s| s.state.borrow().clone())
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<TrackerSnapshot>> {
        self.session.as_ref().map(|s| s.state.clone())
    }

    /// A session exists and has not finished.
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.state.borrow().finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::notify::{Notification, RefreshTarget};
    use crate::task::{FileStatus, TaskStatus};
    use crate::testing::{task, FakeApi, FakeTransport, InstantScheduler, RecordingEmitter, Script};

    struct Harness {
        api: Arc<FakeApi>,
        transport: Arc<FakeTransport>,
        scheduler: Arc<InstantScheduler>,
        emitter: Arc<RecordingEmitter>,
    }

    impl Harness {
        fn new(api: FakeApi, scripts: Vec<Script>) -> Self {
            Self {
                api: Arc::new(api),
                transport: Arc::new(FakeTransport::new(scripts)),
                scheduler: Arc::new(InstantScheduler::default()),
                emitter: Arc::new(RecordingEmitter::default()),
            }
        }

        fn tracker(&self, polling: bool) -> TaskTracker {
            let options = TrackerOptions {
                polling: PollingConfig {
                    enabled: polling,
                    ..PollingConfig::default()
                },
                ..TrackerOptions::default()
            };
            TaskTracker::new(
                TrackerSeams {
                    api: self.api.clone(),
                    transport: self.transport.clone(),
                    scheduler: self.scheduler.clone(),
                    emitter: self.emitter.clone(),
                },
                options,
            )
        }
    }

    async fn wait(tracker: &mut TaskTracker) -> TrackerSnapshot {
        tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .expect("session did not finish")
            .unwrap()
    }

    fn frames(frames: &[&str]) -> Vec<String> {
        frames.iter().map(|f| f.to_string()).collect()
    }

    #[tokio::test]
    async fn test_live_frames_drive_task_to_completion() {
        let harness = Harness::new(
            FakeApi::default(),
            vec![Script::Hold(frames(&[
                r#"{"type":"progress","task_id":"T1","data":{"status":"pending","file_names":[{"name":"a.pdf","status":"pending"},{"name":"b.docx","status":"pending"}]}}"#,
                r#"{"type":"progress","task_id":"T1","data":{"progress":40,"status":"running","entities_count":12,"file_names":[{"name":"a.pdf","status":"completed","progress":100}]}}"#,
                r#"{"type":"progress","task_id":"T1","data":{"status":"completed","entities_count":40,"relations_count":15}}"#,
            ]))],
        );
        let mut tracker = harness.tracker(false);
        tracker.start_in("T1", Some("demo".into()));

        let snapshot = wait(&mut tracker).await;

        assert!(snapshot.finished);
        assert_eq!(snapshot.link, LinkState::Closed);
        assert_eq!(snapshot.task.status, TaskStatus::Completed);
        assert_eq!(snapshot.task.progress, 100);
        assert_eq!(snapshot.task.entities_count, 40);
        assert_eq!(snapshot.task.relations_count, 15);
        assert!(snapshot
            .task
            .files
            .iter()
            .all(|f| f.status == FileStatus::Completed && f.progress == 100));

        assert_eq!(harness.transport.connects(), 1);
        assert_eq!(harness.transport.closes(), 1);
        assert_eq!(
            harness.emitter.notifications(),
            vec![Notification::BuildSucceeded {
                task_id: "T1".into(),
                entities_count: 40,
                relations_count: 15,
            }]
        );
        assert!(harness.emitter.refreshes().contains(&RefreshTarget::GraphPreview {
            graph_space_name: "demo".into()
        }));
        assert!(!tracker.is_active());
    }

    #[tokio::test]
    async fn test_reconnects_stop_at_ceiling() {
        let harness = Harness::new(
            FakeApi::default(),
            vec![Script::Close(frames(&[r#"{"status":"running","progress":20}"#]))],
        );
        let mut tracker = harness.tracker(false);
        tracker.start("T1");

        let snapshot = wait(&mut tracker).await;

        // initial connect plus ten reconnects, never an eleventh
        assert_eq!(harness.transport.connects(), 11);
        assert_eq!(harness.scheduler.delays(), vec![Duration::from_secs(3); 10]);
        assert_eq!(snapshot.link, LinkState::Lost { attempts: 10 });
        assert!(snapshot.connection_lost());
        assert_eq!(snapshot.task.status, TaskStatus::Running);
        assert_eq!(snapshot.task.progress, 20);
        assert_eq!(
            harness.emitter.notifications(),
            vec![Notification::ConnectionLost {
                task_id: "T1".into(),
                attempts: 10,
            }]
        );
    }

    #[tokio::test]
    async fn test_cancel_broadcast_after_refused_connect() {
        let harness = Harness::new(
            FakeApi::default(),
            vec![
                Script::Refuse,
                Script::Hold(frames(&[
                    r#"{"type":"progress","task_id":"T1","data":{"progress":12.5,"status":"running"}}"#,
                    r#"{"type":"task_cancelled","task_id":"T1"}"#,
                ])),
            ],
        );
        let mut tracker = harness.tracker(false);
        tracker.start("T1");

        let snapshot = wait(&mut tracker).await;

        assert_eq!(harness.transport.connects(), 2);
        assert_eq!(harness.scheduler.delays(), vec![Duration::from_secs(3)]);
        assert_eq!(snapshot.task.status, TaskStatus::Cancelled);
        assert_eq!(snapshot.task.progress, 12);
        assert_eq!(snapshot.link, LinkState::Closed);
        assert_eq!(
            harness.emitter.notifications(),
            vec![Notification::BuildCancelled {
                task_id: "T1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_poll_reaches_terminal_first() {
        let harness = Harness::new(
            FakeApi::with_polls(vec![
                task("T1", "processing", 50.0),
                task("T1", "completed", 100.0),
            ]),
            vec![Script::Hold(Vec::new())],
        );
        let mut tracker = harness.tracker(true);
        tracker.start("T1");

        let snapshot = wait(&mut tracker).await;

        assert_eq!(snapshot.task.status, TaskStatus::Completed);
        assert_eq!(snapshot.task.progress, 100);
        assert_eq!(harness.transport.closes(), 1);
        assert_eq!(harness.scheduler.delays()[0], Duration::from_secs(5));
        assert!(harness.api.calls().iter().all(|c| c == "get:T1"));
        assert_eq!(harness.emitter.notifications().len(), 1);
        // graph space learned from the polled record
        assert!(harness.emitter.refreshes().contains(&RefreshTarget::GraphPreview {
            graph_space_name: "demo".into()
        }));
    }

    #[tokio::test]
    async fn test_duplicate_terminal_from_both_sources_notifies_once() {
        let harness = Harness::new(
            FakeApi::with_polls(vec![task("T1", "completed", 100.0)]),
            vec![Script::Hold(frames(&[r#"{"status":"completed"}"#]))],
        );
        let mut tracker = harness.tracker(true);
        tracker.start("T1");

        let snapshot = wait(&mut tracker).await;

        assert_eq!(snapshot.task.status, TaskStatus::Completed);
        assert_eq!(harness.emitter.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_surfaces_server_message() {
        let harness = Harness::new(
            FakeApi::default(),
            vec![Script::Hold(frames(&[
                r#"{"status":"running","progress":50}"#,
                r#"{"type":"progress","task_id":"T1","data":{"status":"failed","message":"LLM quota exceeded"}}"#,
            ]))],
        );
        let mut tracker = harness.tracker(false);
        tracker.start("T1");

        let snapshot = wait(&mut tracker).await;

        assert_eq!(snapshot.task.status, TaskStatus::Failed);
        assert_eq!(snapshot.task.progress, 50);
        assert_eq!(
            snapshot.task.error_message.as_deref(),
            Some("LLM quota exceeded")
        );
        assert_eq!(
            harness.emitter.notifications(),
            vec![Notification::BuildFailed {
                task_id: "T1".into(),
                detail: Some("LLM quota exceeded".into()),
            }]
        );
        assert_eq!(harness.emitter.refreshes(), vec![RefreshTarget::History]);
    }

    #[tokio::test]
    async fn test_dropping_tracker_releases_channel() {
        let harness = Harness::new(
            FakeApi::default(),
            vec![Script::Hold(frames(&[r#"{"status":"running"}"#]))],
        );
        let mut tracker = harness.tracker(true);
        let mut rx = tracker.start("T1");

        rx.wait_for(|s| s.task.status == TaskStatus::Running)
            .await
            .unwrap();
        drop(tracker);

        let last = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.finished))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(last.link, LinkState::Closed);
        assert_eq!(last.task.status, TaskStatus::Running);
        assert_eq!(harness.transport.closes(), 1);
        assert!(harness.emitter.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_start_replaces_previous_session() {
        let harness = Harness::new(
            FakeApi::default(),
            vec![
                Script::Hold(Vec::new()),
                Script::Hold(frames(&[r#"{"status":"completed"}"#])),
            ],
        );
        let mut tracker = harness.tracker(false);
        let mut first = tracker.start("T1");
        first.wait_for(|s| s.link == LinkState::Connected).await.unwrap();

        tracker.start("T2");
        assert_eq!(tracker.task_id(), Some("T2"));

        let done = tokio::time::timeout(Duration::from_secs(5), first.wait_for(|s| s.finished))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(done.task.task_id, "T1");

        let snapshot = wait(&mut tracker).await;
        assert_eq!(snapshot.task.task_id, "T2");
        assert_eq!(harness.transport.closes(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_release() {
        let harness = Harness::new(FakeApi::default(), vec![Script::Hold(Vec::new())]);
        let mut tracker = harness.tracker(true);
        let mut rx = tracker.start("T1");
        rx.wait_for(|s| s.link == LinkState::Connected).await.unwrap();

        let snapshot = tracker.shutdown().await.unwrap();

        assert!(snapshot.finished);
        assert_eq!(harness.transport.closes(), 1);
        assert_eq!(tracker.task_id(), None);
        assert!(tracker.shutdown().await.is_none());
    }
}

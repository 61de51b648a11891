//! Per-task session: one reducer owning the task state, fed by the listener
//! and poller through a single channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::TaskResponse;
use crate::error::TransportError;
use crate::notify::{ConsoleEmitter, Notification, RefreshTarget};
use crate::retry::RetryBudget;
use crate::task::{parse_frame, ProgressScale, ProgressUpdate, TaskState, TaskStatus};

use super::listener::run_listener;
use super::poller::run_poller;
use super::{LinkState, TrackerOptions, TrackerSeams, TrackerSnapshot};

const EVENT_BUFFER: usize = 64;

/// Inputs to the session reducer.
#[derive(Debug)]
pub(crate) enum TrackerEvent {
    /// Raw text frame from the live channel
    Frame(String),
    /// Task record from the poller
    Snapshot(TaskResponse),
    LiveConnected,
    LiveClosed { error: Option<TransportError> },
}

/// Reducer → listener.
#[derive(Debug)]
pub(crate) enum ListenerCommand {
    Reconnect { attempt: u32, delay: Duration },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Reconnect { attempt: u32, delay: Duration },
    /// Terminal status reached or reconnects exhausted
    Done,
}

/// Owns the task state for one session. Synchronous so every transition is
/// testable without a runtime.
pub(crate) struct Reducer {
    task: TaskState,
    link: LinkState,
    budget: RetryBudget,
    scale: ProgressScale,
    graph_space_name: Option<String>,
    emitter: Arc<dyn ConsoleEmitter>,
}

impl Reducer {
    pub(crate) fn new(
        task_id: &str,
        options: &TrackerOptions,
        graph_space_name: Option<String>,
        emitter: Arc<dyn ConsoleEmitter>,
    ) -> Self {
        Self {
            task: TaskState::new(task_id),
            link: LinkState::Connecting,
            budget: RetryBudget::new(options.retry.clone()),
            scale: options.progress_scale,
            graph_space_name,
            emitter,
        }
    }

    pub(crate) fn snapshot(&self, finished: bool) -> TrackerSnapshot {
        TrackerSnapshot {
            task: self.task.clone(),
            link: self.link.clone(),
            finished,
        }
    }

    fn link_is_open(&self) -> bool {
        !matches!(self.link, LinkState::Closed | LinkState::Lost { .. })
    }

    pub(crate) fn handle(&mut self, event: TrackerEvent) -> Step {
        match event {
            TrackerEvent::Frame(text) => match parse_frame(&text, self.scale) {
                Ok(frame) => {
                    if let Some(id) = frame.task_id.filter(|id| *id != self.task.task_id) {
                        tracing::warn!(
                            task_id = %self.task.task_id,
                            frame_task_id = %id,
                            "Dropping frame for another task"
                        );
                        return Step::Continue;
                    }
                    self.apply(&frame.update)
                }
                Err(e) => {
                    tracing::warn!(task_id = %self.task.task_id, error = %e, "Dropping malformed frame");
                    Step::Continue
                }
            },
            TrackerEvent::Snapshot(record) => {
                if record.task_id != self.task.task_id {
                    tracing::warn!(
                        task_id = %self.task.task_id,
                        polled_task_id = %record.task_id,
                        "Dropping snapshot for another task"
                    );
                    return Step::Continue;
                }
                if self.graph_space_name.is_none() && !record.graph_space_name.is_empty() {
                    self.graph_space_name = Some(record.graph_space_name.clone());
                }
                self.apply(&ProgressUpdate::from_snapshot(&record, self.scale))
            }
            TrackerEvent::LiveConnected => {
                self.link = LinkState::Connected;
                Step::Continue
            }
            TrackerEvent::LiveClosed { error } => self.live_closed(error),
        }
    }

    fn apply(&mut self, update: &ProgressUpdate) -> Step {
        let applied = self.task.apply(update);
        if applied.became_terminal {
            self.finish();
            return Step::Done;
        }
        Step::Continue
    }

    fn live_closed(&mut self, error: Option<TransportError>) -> Step {
        if self.task.is_terminal() {
            self.link = LinkState::Closed;
            return Step::Continue;
        }

        match &error {
            Some(e) => tracing::warn!(task_id = %self.task.task_id, error = %e, "Live channel failed"),
            None => tracing::info!(task_id = %self.task.task_id, "Live channel closed by server"),
        }

        match self.budget.next_attempt() {
            Some((attempt, delay)) => {
                self.link = LinkState::Reconnecting { attempt };
                Step::Reconnect { attempt, delay }
            }
            None => {
                let attempts = self.budget.attempts();
                tracing::error!(
                    task_id = %self.task.task_id,
                    attempts,
                    "Giving up on live channel"
                );
                self.link = LinkState::Lost { attempts };
                self.emitter.notify(Notification::ConnectionLost {
                    task_id: self.task.task_id.clone(),
                    attempts,
                });
                Step::Done
            }
        }
    }

    /// Runs once, on the transition into a terminal status.
    fn finish(&mut self) {
        let task_id = self.task.task_id.clone();
        self.link = LinkState::Closed;
        tracing::info!(task_id = %task_id, status = %self.task.status, "Task finished");

        match self.task.status {
            TaskStatus::Completed => {
                self.emitter.notify(Notification::BuildSucceeded {
                    task_id,
                    entities_count: self.task.entities_count,
                    relations_count: self.task.relations_count,
                });
                self.emitter.refresh(RefreshTarget::History);
                if let Some(name) = &self.graph_space_name {
                    self.emitter.refresh(RefreshTarget::GraphPreview {
                        graph_space_name: name.clone(),
                    });
                }
            }
            TaskStatus::Failed => {
                self.emitter.notify(Notification::BuildFailed {
                    task_id,
                    detail: self.task.error_message.clone(),
                });
                self.emitter.refresh(RefreshTarget::History);
            }
            TaskStatus::Cancelled => {
                self.emitter.notify(Notification::BuildCancelled { task_id });
                self.emitter.refresh(RefreshTarget::History);
            }
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }
}

/// Drive one session until it finishes or `cancel` fires.
pub(crate) async fn run_session(
    task_id: String,
    graph_space_name: Option<String>,
    seams: TrackerSeams,
    options: TrackerOptions,
    state_tx: watch::Sender<TrackerSnapshot>,
    cancel: CancellationToken,
) {
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
    let (command_tx, command_rx) = mpsc::channel(1);
    let workers = cancel.child_token();

    let listener = tokio::spawn(run_listener(
        task_id.clone(),
        seams.transport.clone(),
        seams.scheduler.clone(),
        event_tx.clone(),
        command_rx,
        workers.clone(),
    ));
    let poller = options.polling.enabled.then(|| {
        tokio::spawn(run_poller(
            task_id.clone(),
            seams.api.clone(),
            seams.scheduler.clone(),
            options.polling.clone(),
            event_tx.clone(),
            workers.clone(),
        ))
    });
    drop(event_tx);

    let mut reducer = Reducer::new(&task_id, &options, graph_space_name, seams.emitter.clone());
    tracing::info!(task_id = %task_id, "Tracking task");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(task_id = %task_id, "Tracking cancelled");
                break;
            }
            event = event_rx.recv() => event,
        };
        let Some(event) = event else { break };

        let step = reducer.handle(event);
        state_tx.send_replace(reducer.snapshot(false));

        match step {
            Step::Continue => {}
            Step::Reconnect { attempt, delay } => {
                if command_tx
                    .send(ListenerCommand::Reconnect { attempt, delay })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Step::Done => break,
        }
    }

    // closes the live channel and clears the poll timer on every exit path
    workers.cancel();
    drop(event_rx);
    if let Err(e) = listener.await {
        tracing::warn!(task_id = %task_id, error = %e, "Live listener panicked");
    }
    if let Some(poller) = poller {
        if let Err(e) = poller.await {
            tracing::warn!(task_id = %task_id, error = %e, "Poller panicked");
        }
    }

    if reducer.link_is_open() {
        reducer.link = LinkState::Closed;
    }
    state_tx.send_replace(reducer.snapshot(true));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::testing::{task, RecordingEmitter};

    fn reducer(emitter: Arc<RecordingEmitter>) -> Reducer {
        let options = TrackerOptions {
            retry: RetryPolicy::fixed(2, Duration::from_secs(3)),
            ..TrackerOptions::default()
        };
        Reducer::new("T1", &options, Some("demo".into()), emitter)
    }

    fn frame(json: &str) -> TrackerEvent {
        TrackerEvent::Frame(json.to_string())
    }

    #[test]
    fn test_frames_for_other_tasks_are_dropped() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter);

        let step = r.handle(frame(
            r#"{"type":"progress","task_id":"T2","data":{"status":"completed"}}"#,
        ));
        assert_eq!(step, Step::Continue);
        assert_eq!(r.task.status, TaskStatus::Pending);

        r.handle(frame(
            r#"{"type":"progress","task_id":"T1","data":{"progress":30,"status":"processing"}}"#,
        ));
        assert_eq!(r.task.status, TaskStatus::Running);
        assert_eq!(r.task.progress, 30);
    }

    #[test]
    fn test_malformed_frame_is_ignored() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter.clone());
        assert_eq!(r.handle(frame("not json")), Step::Continue);
        assert_eq!(r.task, TaskState::new("T1"));
        assert!(emitter.notifications().is_empty());
    }

    #[test]
    fn test_completion_notifies_once_and_refreshes() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter.clone());

        let step = r.handle(frame(
            r#"{"status":"completed","entities_count":40,"relations_count":15}"#,
        ));
        assert_eq!(step, Step::Done);
        // a late duplicate changes nothing
        assert_eq!(r.handle(frame(r#"{"status":"completed"}"#)), Step::Continue);

        assert_eq!(
            emitter.notifications(),
            vec![Notification::BuildSucceeded {
                task_id: "T1".into(),
                entities_count: 40,
                relations_count: 15,
            }]
        );
        assert_eq!(
            emitter.refreshes(),
            vec![
                RefreshTarget::History,
                RefreshTarget::GraphPreview {
                    graph_space_name: "demo".into()
                }
            ]
        );
        assert_eq!(r.link, LinkState::Closed);
    }

    #[test]
    fn test_failure_carries_message() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter.clone());

        r.handle(frame(r#"{"status":"failed","message":"LLM quota exceeded"}"#));

        assert_eq!(r.task.error_message.as_deref(), Some("LLM quota exceeded"));
        assert_eq!(
            emitter.notifications(),
            vec![Notification::BuildFailed {
                task_id: "T1".into(),
                detail: Some("LLM quota exceeded".into()),
            }]
        );
        assert_eq!(emitter.refreshes(), vec![RefreshTarget::History]);
    }

    #[test]
    fn test_polled_snapshot_merges() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter);

        r.handle(TrackerEvent::Snapshot(task("T1", "processing", 55.0)));
        assert_eq!(r.task.status, TaskStatus::Running);
        assert_eq!(r.task.progress, 55);
        assert_eq!(r.task.total_files, Some(2));

        assert_eq!(
            r.handle(TrackerEvent::Snapshot(task("T9", "completed", 100.0))),
            Step::Continue
        );
        assert_eq!(r.task.status, TaskStatus::Running);
    }

    #[test]
    fn test_close_uses_budget_then_gives_up() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter.clone());

        r.handle(TrackerEvent::LiveConnected);
        r.handle(frame(r#"{"status":"running","progress":20}"#));

        let closed = || TrackerEvent::LiveClosed { error: None };
        assert_eq!(
            r.handle(closed()),
            Step::Reconnect {
                attempt: 1,
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(r.link, LinkState::Reconnecting { attempt: 1 });

        // a successful reconnect does not refill the budget
        r.handle(TrackerEvent::LiveConnected);
        assert_eq!(
            r.handle(closed()),
            Step::Reconnect {
                attempt: 2,
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(r.handle(closed()), Step::Done);

        assert_eq!(r.link, LinkState::Lost { attempts: 2 });
        assert_eq!(r.task.status, TaskStatus::Running);
        assert_eq!(
            emitter.notifications(),
            vec![Notification::ConnectionLost {
                task_id: "T1".into(),
                attempts: 2,
            }]
        );
    }

    #[test]
    fn test_cancel_broadcast_finishes_session() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter.clone());
        r.handle(frame(r#"{"status":"running","progress":20}"#));

        let step = r.handle(frame(r#"{"type":"task_cancelled","task_id":"T1"}"#));

        assert_eq!(step, Step::Done);
        assert_eq!(r.task.status, TaskStatus::Cancelled);
        assert_eq!(r.task.progress, 20);
        assert_eq!(
            emitter.notifications(),
            vec![Notification::BuildCancelled {
                task_id: "T1".into()
            }]
        );
        // the broadcast for another task is still filtered
        let mut other = reducer(Arc::new(RecordingEmitter::default()));
        assert_eq!(
            other.handle(frame(r#"{"type":"task_cancelled","task_id":"T2"}"#)),
            Step::Continue
        );
        assert_eq!(other.task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_close_after_terminal_does_not_reconnect() {
        let emitter = Arc::new(RecordingEmitter::default());
        let mut r = reducer(emitter);

        r.handle(frame(r#"{"status":"cancelled"}"#));
        assert_eq!(
            r.handle(TrackerEvent::LiveClosed { error: None }),
            Step::Continue
        );
        assert_eq!(r.budget.attempts(), 0);
    }
}

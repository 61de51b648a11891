//! Polling fallback: periodically fetches the task record.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::KgApi;
use crate::config::PollingConfig;
use crate::retry::Scheduler;

use super::session::TrackerEvent;

pub(crate) async fn run_poller(
    task_id: String,
    api: Arc<dyn KgApi>,
    scheduler: Arc<dyn Scheduler>,
    polling: PollingConfig,
    events: mpsc::Sender<TrackerEvent>,
    cancel: CancellationToken,
) {
    let mut wait = polling.initial_delay();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = scheduler.sleep(wait) => {}
        }
        wait = polling.interval();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = api.get_task(&task_id) => result,
        };

        match result {
            Ok(task) => {
                if events.send(TrackerEvent::Snapshot(task)).await.is_err() {
                    break;
                }
            }
            // a failed poll is retried on the next tick
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "Task poll failed"),
        }
    }

    tracing::debug!(task_id = %task_id, "Poller stopped");
}

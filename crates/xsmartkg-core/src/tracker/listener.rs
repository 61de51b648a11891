//! Live channel pump.
//!
//! Connects, forwards text frames to the session reducer and reports when the
//! channel closes. Whether to reconnect is decided by the reducer, which
//! answers every `LiveClosed` with a [`ListenerCommand`] or by cancelling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::live::LiveTransport;
use crate::retry::Scheduler;

use super::session::{ListenerCommand, TrackerEvent};

pub(crate) async fn run_listener(
    task_id: String,
    transport: Arc<dyn LiveTransport>,
    scheduler: Arc<dyn Scheduler>,
    events: mpsc::Sender<TrackerEvent>,
    mut commands: mpsc::Receiver<ListenerCommand>,
    cancel: CancellationToken,
) {
    let mut delay = None;

    loop {
        if let Some(delay) = delay.take() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = scheduler.sleep(delay) => {}
            }
        }

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = transport.connect(&task_id) => result,
        };

        let error = match connected {
            Ok(mut conn) => {
                tracing::debug!(task_id = %task_id, "Live channel open");
                if events.send(TrackerEvent::LiveConnected).await.is_err() {
                    conn.close().await;
                    break;
                }

                loop {
                    let frame = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        frame = conn.next_frame() => Some(frame),
                    };
                    let Some(frame) = frame else {
                        conn.close().await;
                        tracing::debug!(task_id = %task_id, "Live channel closed by client");
                        return;
                    };

                    match frame {
                        Some(Ok(text)) => {
                            if events.send(TrackerEvent::Frame(text)).await.is_err() {
                                conn.close().await;
                                return;
                            }
                        }
                        Some(Err(e)) => break Some(e),
                        None => break None,
                    }
                }
            }
            Err(e) => Some(e),
        };

        if events.send(TrackerEvent::LiveClosed { error }).await.is_err() {
            break;
        }

        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => command,
        };
        match command {
            Some(ListenerCommand::Reconnect { attempt, delay: wait }) => {
                tracing::info!(
                    task_id = %task_id,
                    attempt,
                    delay_ms = wait.as_millis() as u64,
                    "Reconnecting live channel"
                );
                delay = Some(wait);
            }
            None => break,
        }
    }

    tracing::debug!(task_id = %task_id, "Live listener stopped");
}

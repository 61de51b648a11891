//! xSmartKG Core - Client logic for the knowledge-graph build console
//!
//! This crate contains everything between the user's build request and the
//! backend, including:
//! - Typed REST client for the knowledge-graph serve API (reqwest)
//! - Live task channel over WebSocket (tokio-tungstenite)
//! - Idempotent task reducer fed by live frames and polled snapshots
//! - Task tracker with bounded reconnects and a polling fallback
//! - Build console state machine, task history and graph spaces
//! - Extraction prompt templates

pub mod api;
pub mod config;
pub mod console;
pub mod error;
pub mod live;
pub mod notify;
pub mod prompt;
pub mod retry;
pub mod task;
pub mod tracker;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use api::{HttpKgApi, KgApi, TaskResponse, UploadFile};
pub use config::Config;
pub use console::{BuildConsole, Phase, UploadForm};
pub use error::{ApiError, ConsoleError, TransportError};
pub use live::{LiveTransport, WsTransport};
pub use notify::{ConsoleEmitter, NoOpEmitter, Notification, RefreshTarget};
pub use prompt::{PromptTemplate, TemplateVariable};
pub use retry::{RetryPolicy, Scheduler, TokioScheduler};
pub use task::{TaskState, TaskStatus};
pub use tracker::{LinkState, TaskTracker, TrackerSnapshot};

use tracker::TrackerSeams;

/// Process-wide dependencies, built once at startup and passed explicitly.
#[derive(Clone)]
pub struct ConsoleContext {
    pub config: Config,
    pub api: Arc<dyn KgApi>,
    pub transport: Arc<dyn LiveTransport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub emitter: Arc<dyn ConsoleEmitter>,
}

impl ConsoleContext {
    /// Wire the HTTP and WebSocket clients for `config.base_url`.
    pub fn new(config: Config, emitter: Arc<dyn ConsoleEmitter>) -> Self {
        let api = HttpKgApi::new(config.base_url.clone()).with_upload_timeout(config.upload_timeout());
        let transport = WsTransport::new(config.base_url.clone(), config.live_path.clone());
        tracing::debug!(base_url = %config.base_url, "Console context ready");

        Self {
            api: Arc::new(api),
            transport: Arc::new(transport),
            scheduler: Arc::new(TokioScheduler),
            emitter,
            config,
        }
    }

    pub fn seams(&self) -> TrackerSeams {
        TrackerSeams {
            api: self.api.clone(),
            transport: self.transport.clone(),
            scheduler: self.scheduler.clone(),
            emitter: self.emitter.clone(),
        }
    }
}

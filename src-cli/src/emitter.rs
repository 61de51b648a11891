use serde::Serialize;
use xsmartkg_core::{ConsoleEmitter, Notification, RefreshTarget};

/// Prints notifications to stderr, or as JSON lines on stdout with `--json`.
pub struct TerminalEmitter {
    json: bool,
}

#[derive(Serialize)]
struct NotificationLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl TerminalEmitter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl ConsoleEmitter for TerminalEmitter {
    fn notify(&self, notification: Notification) {
        if self.json {
            let line = NotificationLine {
                event: "notification",
                notification: &notification,
            };
            match serde_json::to_string(&line) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(error = %e, "Failed to serialize notification"),
            }
        } else if notification.is_error() {
            eprintln!("error: {}", notification);
        } else {
            eprintln!("{}", notification);
        }
    }

    // no dependent views in a terminal
    fn refresh(&self, target: RefreshTarget) {
        tracing::debug!(view = ?target, "Refresh requested");
    }
}

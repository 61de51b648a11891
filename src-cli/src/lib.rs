mod commands;
mod emitter;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use xsmartkg_core::{BuildConsole, Config, ConsoleContext};

pub use commands::{Command, Output};
pub use emitter::TerminalEmitter;
pub use error::{CommandError, CommandResult};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub user_id: Option<String>,
    pub json: bool,
    pub verbose: bool,
}

/// Initialize logging with the given default directives.
///
/// Directives from `RUST_LOG` apply first; logs go to stderr so stdout stays
/// parseable.
pub fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring log directive {}: {}", directive, e),
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: file, environment, then command-line flags.
pub fn resolve_config(options: &GlobalOptions) -> Config {
    let mut config = match &options.config_path {
        Some(path) => {
            let mut config = Config::load(path);
            config.apply_env();
            config
        }
        None => Config::load_or_default(),
    };
    if let Some(base_url) = &options.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(user_id) = &options.user_id {
        config.user_id = Some(user_id.clone());
    }
    config
}

/// Run one command and exit non-zero on failure.
pub fn run(options: GlobalOptions, command: Command) {
    if options.verbose {
        init_logging(&["xsmartkg=debug", "xsmartkg_core=debug", "xsmartkg_lib=debug"]);
    } else {
        init_logging(&["xsmartkg=info", "xsmartkg_core=info", "xsmartkg_lib=info"]);
    }

    let out = Output { json: options.json };
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create tokio runtime");
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async {
        let config = resolve_config(&options);
        tracing::debug!(base_url = %config.base_url, "Configuration resolved");
        let ctx = ConsoleContext::new(config, Arc::new(TerminalEmitter::new(out.json)));
        let console = BuildConsole::new(ctx);
        commands::execute(&console, command, out).await
    });

    if let Err(e) = result {
        if out.json {
            out.print(&e, |_| String::new());
        } else {
            eprintln!("error: {}", e);
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"base_url": "http://kg.internal:5670", "user_id": "file-user", "history_page_size": 20}"#,
        )
        .unwrap();

        let config = resolve_config(&GlobalOptions {
            config_path: Some(path),
            user_id: Some("cli-user".into()),
            ..GlobalOptions::default()
        });

        assert_eq!(config.user_id.as_deref(), Some("cli-user"));
        assert_eq!(config.history_page_size, 20);

        let config = resolve_config(&GlobalOptions {
            config_path: Some(temp_dir.path().join("settings.json")),
            base_url: Some("http://localhost:9000".into()),
            ..GlobalOptions::default()
        });
        assert_eq!(config.base_url, "http://localhost:9000");
    }
}

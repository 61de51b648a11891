use std::path::PathBuf;

use clap::Parser;
use xsmartkg_lib::{Command, GlobalOptions};

#[derive(Parser, Debug)]
#[command(name = "xsmartkg")]
#[command(about = "Build knowledge graphs on an xSmartKG backend and follow their progress")]
struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend origin, e.g. http://localhost:5670
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// User id sent with uploads and history queries
    #[arg(long = "user", global = true)]
    user_id: Option<String>,

    /// Print results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let args = Args::parse();

    xsmartkg_lib::run(
        GlobalOptions {
            config_path: args.config,
            base_url: args.base_url,
            user_id: args.user_id,
            json: args.json,
            verbose: args.verbose,
        },
        args.command,
    );
}

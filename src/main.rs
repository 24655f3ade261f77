//! taskdesk binary.
//!
//! Parses the command line, runs one command against the workspace under
//! `--root`, and turns a failure into an error envelope plus exit code
//! (2 user error, 3 policy refusal, 4 store or I/O failure).

use clap::Parser;
use taskdesk::cli::Cli;
use taskdesk::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Longest `RUST_LOG` value taken into account.
const MAX_FILTER_LEN: usize = 4096;

fn main() {
    init_tracing();

    let command = infer_command_name_from_args();
    let cli = Cli::parse();
    let json = cli.errors_as_json();
    if let Err(err) = cli.run() {
        let _ = emit_error(&command, &err, json);
        std::process::exit(err.exit_code());
    }
}

/// Diagnostics go to stderr and stay off unless `RUST_LOG` names a usable
/// filter; stdout is reserved for command output and events.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(std::env::var("RUST_LOG").ok()))
        .init();
}

fn log_filter(raw: Option<String>) -> EnvFilter {
    raw.as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty() && raw.len() <= MAX_FILTER_LEN)
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("off"))
}

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! `sqlrsd`: the daemon binary (§6.3). Spawned by the CLI's Orchestrator, not
//! meant to be run directly by end users.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sqlrs_daemon::startup::{self, DaemonArgs};
use tracing::error;

/// Startup marker prefix written to the log file before the tracing
/// subscriber is installed (§9.1), so a supervising CLI can find the byte
/// offset where this process's run begins.
const STARTUP_MARKER_PREFIX: &str = "--- sqlrsd: starting (pid: ";

#[derive(Parser, Debug)]
#[command(name = "sqlrsd")]
struct Args {
    #[arg(long)]
    listen: SocketAddr,
    #[arg(long = "run-dir")]
    run_dir: PathBuf,
    #[arg(long = "write-engine-json")]
    write_engine_json: Option<PathBuf>,
    #[arg(long = "idle-timeout", value_parser = parse_duration)]
    idle_timeout: Option<Duration>,
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    version: String,
}

/// Parses `<n>s`, `<n>m`, `<n>h`, or a bare integer number of seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    let (digits, unit) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&trimmed[..trimmed.len() - 1], c),
        _ => (trimmed, 's'),
    };
    let n: u64 = digits.parse().map_err(|_| format!("invalid duration: {raw}"))?;
    let secs = match unit {
        's' => n,
        'm' => n * 60,
        'h' => n * 3600,
        other => return Err(format!("unknown duration unit '{other}' in {raw}")),
    };
    Ok(Duration::from_secs(secs))
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let logs_dir = sqlrs_core::paths::logs_dir(&args.run_dir);
    if let Err(e) = write_startup_marker(&logs_dir) {
        eprintln!("failed to write startup marker: {e}");
    }
    let _log_guard = setup_logging(&logs_dir);

    let state_store_root = sqlrs_core::paths::state_store_root();
    let daemon_args = DaemonArgs {
        listen: args.listen,
        run_dir: args.run_dir,
        state_store_root,
        write_engine_json: args.write_engine_json,
        idle_timeout: args.idle_timeout,
        version: args.version,
    };

    if let Err(e) = startup::run(daemon_args).await {
        error!(error = %e, "daemon exited with error");
        std::process::exit(1);
    }
}

fn write_startup_marker(logs_dir: &std::path::Path) -> std::io::Result<()> {
    use std::io::Write;
    std::fs::create_dir_all(logs_dir)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("engine.log"))?;
    writeln!(file, "{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id())
}

fn setup_logging(logs_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let file_appender = tracing_appender::rolling::never(logs_dir, "engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_suffix() {
        assert_eq!(parse_duration("600s").unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn parses_bare_integer_as_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("not-a-duration").is_err());
    }
}

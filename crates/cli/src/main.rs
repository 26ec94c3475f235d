//! `sqlrs`: the client CLI (§6.3). Every subcommand that needs a live daemon
//! routes through the Orchestrator for discovery/autostart before issuing
//! its request.

mod client;
mod orchestrator;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlrs_core::proto::{PrepareRequest, RunRequest};

use crate::client::DaemonClient;

#[derive(Parser)]
#[command(name = "sqlrs", version, about = "Local database engine daemon client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a prepare job (psql or liquibase) and optionally wait for it
    Prepare {
        #[arg(long, value_enum)]
        kind: PrepareKindArg,
        #[arg(long)]
        image: String,
        /// psql: repeated `-f <file>` / `-c <sql>` / session flags
        #[arg(long = "psql-arg")]
        psql_args: Vec<String>,
        #[arg(long)]
        liquibase_changelog: Option<String>,
        #[arg(long)]
        liquibase_exec_mode: Option<String>,
        /// Wait for the job to reach a terminal state before returning
        #[arg(long)]
        wait: bool,
        /// Stream job events to stdout while waiting
        #[arg(long)]
        follow: bool,
    },
    /// Show the status of a prepare job
    Status { job_id: String },
    /// Cancel a prepare job
    Cancel { job_id: String },
    /// Instance operations
    Instances {
        #[command(subcommand)]
        command: InstancesCommand,
    },
    /// State operations
    States {
        #[command(subcommand)]
        command: StatesCommand,
    },
    /// Name (alias) operations
    Names {
        #[command(subcommand)]
        command: NamesCommand,
    },
    /// Exec `psql`/`liquibase` against an already-provisioned instance
    Run {
        instance: String,
        #[arg(long, value_enum, default_value = "psql")]
        kind: PrepareKindArg,
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Config operations
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Daemon lifecycle
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PrepareKindArg {
    Psql,
    Liquibase,
}

impl From<PrepareKindArg> for sqlrs_core::model::PrepareKind {
    fn from(k: PrepareKindArg) -> Self {
        match k {
            PrepareKindArg::Psql => sqlrs_core::model::PrepareKind::Psql,
            PrepareKindArg::Liquibase => sqlrs_core::model::PrepareKind::Liquibase,
        }
    }
}

#[derive(Subcommand)]
enum InstancesCommand {
    List,
    Get { instance_ref: String },
    Rm {
        instance_ref: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum StatesCommand {
    List,
    Get { state_id: String },
    Rm {
        state_id: String,
        #[arg(long)]
        recurse: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum NamesCommand {
    List,
    Get { name: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Get {
        #[arg(default_value = "")]
        path: String,
        /// Show only the override layer, rather than the merged effective view
        #[arg(long)]
        raw: bool,
    },
    Set { path: String, value: String },
    Rm { path: String },
}

#[derive(Subcommand)]
enum DaemonCommand {
    Start,
    Stop,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let run_dir = orchestrator::default_run_dir();

    match cli.command {
        Commands::Daemon { command } => run_daemon_command(command, &run_dir).await,
        other => {
            let http = reqwest::Client::new();
            let state = orchestrator::ensure_daemon(
                &daemon_exe_path()?,
                &run_dir,
                None,
                Duration::from_secs(30),
                &orchestrator::default_log_path(&run_dir),
                &http,
            )
            .await
            .context("failed to discover or start the daemon")?;
            let client = DaemonClient::new(&state.endpoint, &state.auth_token)?;
            run_client_command(other, &client).await
        }
    }
}

async fn run_client_command(command: Commands, client: &DaemonClient) -> Result<()> {
    match command {
        Commands::Prepare {
            kind,
            image,
            psql_args,
            liquibase_changelog,
            liquibase_exec_mode,
            wait,
            follow,
        } => {
            let request = PrepareRequest {
                prepare_kind: kind.into(),
                image_id: image,
                plan_only: false,
                snapshot_mode: "always".to_string(),
                psql_args,
                liquibase_changelog,
                liquibase_exec_mode,
            };
            let accepted = client.submit_prepare(&request).await?;
            println!("job_id: {}", accepted.job_id);
            if follow {
                for event in client.job_events(accepted.job_id.as_str()).await? {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            if wait || follow {
                loop {
                    let status = client.get_job(accepted.job_id.as_str()).await?;
                    if status.status.is_terminal() {
                        println!("{}", serde_json::to_string_pretty(&status)?);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
            Ok(())
        }
        Commands::Status { job_id } => {
            let status = client.get_job(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Cancel { job_id } => {
            let status = client.cancel_job(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Instances { command } => run_instances_command(command, client).await,
        Commands::States { command } => run_states_command(command, client).await,
        Commands::Names { command } => run_names_command(command, client).await,
        Commands::Run { instance, kind, args } => {
            let request = RunRequest {
                prepare_kind: kind.into(),
                instance_ref: instance,
                args,
            };
            for event in client.run(&request).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Commands::Config { command } => run_config_command(command, client).await,
        Commands::Daemon { .. } => unreachable!("handled before discovery"),
    }
}

async fn run_instances_command(command: InstancesCommand, client: &DaemonClient) -> Result<()> {
    match command {
        InstancesCommand::List => {
            let entries = client.list_instances().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        InstancesCommand::Get { instance_ref } => {
            let entry = client.get_instance(&instance_ref).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        InstancesCommand::Rm { instance_ref, force, dry_run } => {
            let result = client.delete_instance(&instance_ref, force, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

async fn run_states_command(command: StatesCommand, client: &DaemonClient) -> Result<()> {
    match command {
        StatesCommand::List => {
            let entries = client.list_states().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        StatesCommand::Get { state_id } => {
            let entry = client.get_state(&state_id).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        StatesCommand::Rm { state_id, recurse, force, dry_run } => {
            let result = client.delete_state(&state_id, recurse, force, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

async fn run_names_command(command: NamesCommand, client: &DaemonClient) -> Result<()> {
    match command {
        NamesCommand::List => {
            let entries = client.list_names().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        NamesCommand::Get { name } => {
            let entry = client.get_name(&name).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
    }
    Ok(())
}

async fn run_config_command(command: ConfigCommand, client: &DaemonClient) -> Result<()> {
    match command {
        ConfigCommand::Get { path, raw } => {
            let value = client.get_config(&path, !raw).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        ConfigCommand::Set { path, value } => {
            let parsed: serde_json::Value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            client.set_config(&path, parsed).await?;
        }
        ConfigCommand::Rm { path } => {
            client.remove_config(&path).await?;
        }
    }
    Ok(())
}

async fn run_daemon_command(command: DaemonCommand, run_dir: &std::path::Path) -> Result<()> {
    let http = reqwest::Client::new();
    match command {
        DaemonCommand::Start => {
            let state = orchestrator::ensure_daemon(
                &daemon_exe_path()?,
                run_dir,
                None,
                Duration::from_secs(30),
                &orchestrator::default_log_path(run_dir),
                &http,
            )
            .await
            .context("failed to start the daemon")?;
            println!("daemon listening on {}", state.endpoint);
            Ok(())
        }
        DaemonCommand::Status => match orchestrator::discover(run_dir, &http).await {
            Ok(state) => {
                println!("running (pid {}) on {}", state.pid, state.endpoint);
                Ok(())
            }
            Err(_) => {
                println!("not running");
                Ok(())
            }
        },
        DaemonCommand::Stop => {
            let state = orchestrator::discover(run_dir, &http).await.context("daemon is not running")?;
            send_terminate(state.pid).await?;
            println!("stop requested for pid {}", state.pid);
            Ok(())
        }
    }
}

/// Sends a graceful-shutdown signal to the daemon process, shelling out to
/// the platform's process-control tool rather than linking a signals crate
/// (the same "shell out to a CLI binary" idiom this crate's Runtime/StateFS
/// backends use).
#[cfg(unix)]
async fn send_terminate(pid: u32) -> Result<()> {
    let status = tokio::process::Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await?;
    if !status.success() {
        anyhow::bail!("kill -TERM {pid} failed");
    }
    Ok(())
}

#[cfg(not(unix))]
async fn send_terminate(pid: u32) -> Result<()> {
    let status = tokio::process::Command::new("taskkill").args(["/PID", &pid.to_string()]).status().await?;
    if !status.success() {
        anyhow::bail!("taskkill /PID {pid} failed");
    }
    Ok(())
}

/// Resolves the `sqlrsd` binary next to this one (the normal install layout
/// for a workspace's paired daemon/CLI binaries).
fn daemon_exe_path() -> Result<PathBuf> {
    let mut path = std::env::current_exe().context("failed to resolve current executable path")?;
    path.set_file_name(if cfg!(windows) { "sqlrsd.exe" } else { "sqlrsd" });
    Ok(path)
}

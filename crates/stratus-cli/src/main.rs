//! stratus: CI build-agent VM fleet manager.
//!
//! ```text
//! stratus --config pool.toml replenish --partition 4
//! stratus --config pool.toml garbage-collect
//! stratus --config pool.toml --ids 812,10.1.4.17 kill-all --force
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "stratus",
    about = "Stratus: keeps pools of CI build-agent VMs at size",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Pool configuration file.
    #[arg(short, long, global = true, default_value = "pool.toml")]
    config: PathBuf,

    /// Only act on these VM ids or IP addresses (comma separated).
    #[arg(long, global = true, value_delimiter = ',')]
    ids: Vec<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and provision VMs up to the pool size, without registering them
    Provision {
        /// VMs per parallel worker (default: one worker for the whole delta)
        #[arg(short, long)]
        partition: Option<u32>,
    },
    /// Create, provision and register VMs up to the pool size
    Replenish {
        /// VMs per parallel worker (default: one worker for the whole delta)
        #[arg(short, long)]
        partition: Option<u32>,
    },
    /// Delete VMs no longer backed by an active agent
    GarbageCollect {
        /// Print the campaign report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete VMs whose agents are disabled or missing, and orphaned agents
    Reap,
    /// Register existing VMs with the backend again
    ReRegister,
    /// Run the provision stages again on existing VMs
    ReProvision,
    /// Run the check stages on existing VMs
    Check,
    /// Print `id - ip - name - hostname - pool` for every VM
    DumpState,
    /// Delete every VM in the pool and its agent definitions
    KillAll {
        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,
    },
    /// Delete every VM that is not running
    KillNotRunning {
        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,
    },
    /// Drain agents on old VMs so a later garbage collection replaces them
    Hunt {
        /// Minimum VM age in days
        #[arg(long)]
        age: u64,
        /// Maximum number of agents to drain
        #[arg(long)]
        size: usize,
    },
    /// Stop the agents on the VMs selected with --ids from taking new builds
    Drain,
    /// Run an ad hoc script or directory on the pool's VMs
    Run {
        #[arg(long, value_enum)]
        kind: RunKind,
        /// Script file, or directory containing setup.sh
        #[arg(long)]
        file: PathBuf,
        /// Argument passed to the script (repeatable)
        #[arg(long = "arg")]
        args: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RunKind {
    Script,
    Directory,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("stratus=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let ctx = commands::Context::load(&cli.config)?;
    let ids = &cli.ids;

    match cli.command {
        Commands::Provision { partition } => commands::provision::fill(&ctx, partition, false).await,
        Commands::Replenish { partition } => commands::provision::fill(&ctx, partition, true).await,
        Commands::GarbageCollect { json } => commands::collect::garbage_collect(&ctx, json).await,
        Commands::Reap => commands::collect::reap(&ctx).await,
        Commands::Hunt { age, size } => commands::collect::hunt(&ctx, age, size).await,
        Commands::Drain => commands::collect::drain(&ctx, ids).await,
        Commands::ReRegister => commands::maintain::reregister(&ctx, ids).await,
        Commands::ReProvision => commands::maintain::reprovision(&ctx, ids).await,
        Commands::Check => commands::maintain::check(&ctx, ids).await,
        Commands::Run { kind, file, args } => {
            let kind = match kind {
                RunKind::Script => stratus_stages::StageKind::Script { path: file, args },
                RunKind::Directory => stratus_stages::StageKind::Directory { path: file, args },
            };
            commands::maintain::run(&ctx, ids, kind).await
        }
        Commands::DumpState => commands::state::dump(&ctx, ids).await,
        Commands::KillAll { force } => commands::kill::kill_all(&ctx, ids, force).await,
        Commands::KillNotRunning { force } => commands::kill::kill_not_running(&ctx, ids, force).await,
    }
}

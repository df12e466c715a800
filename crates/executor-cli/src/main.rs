use anyhow::Result;
use clap::{Parser, Subcommand};
use executor_core::InterruptGuard;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;

#[derive(Parser)]
#[command(name = "substrate")]
#[command(about = "Run commands through local, SSH and Kubernetes executors", long_about = None)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command and wait for it to finish
    Run {
        /// Executor name from the config ("local" always exists)
        executor: String,

        /// Shell command to run
        command: String,

        /// Stop the task after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Keep the output directory instead of erasing it
        #[arg(short, long)]
        keep_output: bool,
    },

    /// Run a master command with agents that are stopped when it ends
    Cluster {
        /// Executor name from the config
        executor: String,

        /// Master command
        master: String,

        /// Agent command, repeatable
        #[arg(short, long = "agent")]
        agents: Vec<String>,

        /// Stop the cluster after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Keep the output directories instead of erasing them
        #[arg(short, long)]
        keep_output: bool,
    },

    /// List configured executors
    Executors {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show or initialize the config file
    Config {
        /// Print the config file path
        #[arg(long)]
        path: bool,

        /// Write a sample config file
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    use Commands::*;

    match cli.command {
        Run {
            executor,
            command,
            timeout,
            keep_output,
        } => {
            let config = commands::load_config()?;
            let guard = InterruptGuard::install()?;
            commands::run::run(&config, &guard, &executor, &command, timeout, keep_output).await?;
        }
        Cluster {
            executor,
            master,
            agents,
            timeout,
            keep_output,
        } => {
            let config = commands::load_config()?;
            let guard = InterruptGuard::install()?;
            commands::cluster::run(&config, &guard, &executor, &master, &agents, timeout, keep_output)
                .await?;
        }
        Executors { json } => {
            let config = commands::load_config()?;
            commands::executors::run(&config, json).await?;
        }
        Config { path, init } => {
            commands::config::run(path, init).await?;
        }
    }

    Ok(())
}

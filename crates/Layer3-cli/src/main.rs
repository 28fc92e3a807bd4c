//! Hive CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use hive_exec::{Engine, EngineConfig, ShellType};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hive - run and supervise shell commands
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Shell to use (bash, zsh, sh, fish, powershell, pwsh, cmd)
    #[arg(long, global = true)]
    shell: Option<ShellType>,

    /// Working directory for spawned processes
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Timeout in milliseconds
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a shell command to completion
    Exec {
        command: String,

        /// Print output as it arrives
        #[arg(short, long)]
        stream: bool,

        /// Report progress lines
        #[arg(short, long)]
        progress: bool,
    },
    /// Run commands joined by the shell's pipe operator
    Pipe {
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Start a program without a shell and wait for it
    Spawn {
        /// Command line, split with shell quoting rules
        command_line: String,
    },
    /// List shells and where they were found
    Shells {
        /// Probe versions too
        #[arg(long)]
        versions: bool,
    },
    /// Translate a command between shell dialects
    Translate {
        from: ShellType,
        to: ShellType,
        command: String,
    },
    /// Show the effective environment (secrets redacted)
    Env {
        /// Profile to apply (development, testing, staging, production)
        #[arg(long)]
        profile: Option<String>,

        /// Load variables from a dotenv file first
        #[arg(long)]
        dotenv: Option<PathBuf>,
    },
    /// Interactive session: one shell, commands read from stdin
    Session,
    /// Engine and host status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = EngineConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        EngineConfig::default()
    });
    if let Some(shell) = args.shell {
        config.preferred_shell = Some(shell);
    }
    if let Some(cwd) = &args.cwd {
        config.cwd = Some(cwd.clone());
    }
    config.supervisor.handle_signals = true;

    let engine = Engine::builder().config(config).build()?;
    let opts = cli::GlobalOpts {
        shell: args.shell,
        timeout: args.timeout,
        json: args.json,
    };

    let code = match args.command {
        Command::Exec {
            command,
            stream,
            progress,
        } => cli::exec(&engine, &opts, &command, stream, progress).await,
        Command::Pipe { commands } => cli::pipe(&engine, &opts, &commands).await,
        Command::Spawn { command_line } => cli::spawn(&engine, &opts, &command_line).await,
        Command::Shells { versions } => cli::shells(&engine, &opts, versions).await,
        Command::Translate { from, to, command } => {
            println!("{}", engine.translate(&command, from, to));
            Ok(0)
        }
        Command::Env { profile, dotenv } => {
            cli::env(&engine, &opts, profile.as_deref(), dotenv.as_deref())
        }
        Command::Session => cli::session(&engine, &opts).await,
        Command::Status => cli::status(&engine, &opts),
    };

    engine.destroy().await;

    let code = code?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

//! Subcommand handlers
//!
//! Each handler returns the exit code the CLI should finish with.

use anyhow::{bail, Context};
use futures::StreamExt;
use hive_exec::{Engine, ExecOptions, ProcessResult, SessionOptions, ShellType, StreamKind};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Flags shared by every subcommand
pub struct GlobalOpts {
    pub shell: Option<ShellType>,
    pub timeout: Option<u64>,
    pub json: bool,
}

impl GlobalOpts {
    fn exec_options(&self) -> ExecOptions {
        let mut options = ExecOptions::new();
        if let Some(shell) = self.shell {
            options = options.with_shell(shell);
        }
        if let Some(ms) = self.timeout {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }
}

fn exit_code(result: &ProcessResult) -> i32 {
    match result.exit_code() {
        Some(code) => code,
        // 128 + signal, the shell convention
        None => 137,
    }
}

fn print_result(result: &ProcessResult, opts: &GlobalOpts, echo_output: bool) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if echo_output {
        print!("{}", result.stdout());
        eprint!("{}", result.stderr());
    }
    if result.truncated() {
        eprintln!("[output truncated]");
    }
    tracing::debug!("{}", result.summary());
    Ok(())
}

pub async fn exec(
    engine: &Engine,
    opts: &GlobalOpts,
    command: &str,
    stream: bool,
    progress: bool,
) -> anyhow::Result<i32> {
    let options = opts.exec_options();

    let result = if progress {
        engine
            .exec_with_progress(command, options, |p| {
                let percent = p.percent.map(|v| format!("{:5.1}%", v)).unwrap_or_default();
                eprintln!("[progress {}] {}", percent, p.message);
            })
            .await?
    } else if stream {
        let mut output = engine.exec_streaming(command, options).await?;
        let stdout = std::io::stdout();
        while let Some(chunk) = output.next().await {
            match chunk.stream {
                StreamKind::Stdout => {
                    let mut out = stdout.lock();
                    out.write_all(chunk.text.as_bytes())?;
                    out.flush()?;
                }
                StreamKind::Stderr => eprint!("{}", chunk.text),
            }
        }
        let result = output.finish().await?;
        print_result(&result, opts, false)?;
        return Ok(exit_code(&result));
    } else {
        engine.exec(command, options).await?
    };

    print_result(&result, opts, true)?;
    Ok(exit_code(&result))
}

pub async fn pipe(engine: &Engine, opts: &GlobalOpts, commands: &[String]) -> anyhow::Result<i32> {
    let result = engine.pipe(commands, opts.exec_options()).await?;
    print_result(&result, opts, true)?;
    Ok(exit_code(&result))
}

/// Spawn detached, then wait on the registry for the exit
pub async fn spawn(engine: &Engine, opts: &GlobalOpts, command_line: &str) -> anyhow::Result<i32> {
    let Some(parts) = shlex::split(command_line) else {
        bail!("unbalanced quotes in '{}'", command_line);
    };
    let Some((program, args)) = parts.split_first() else {
        bail!("empty command line");
    };

    let pid = engine.spawn(program, args, opts.exec_options()).await?;
    let record = engine
        .get_process(pid)
        .with_context(|| format!("pid {} was not registered", pid))?;

    let wait = engine.registry().wait(record.id);
    let finished = match opts.timeout {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), wait).await {
            Ok(record) => record,
            Err(_) => {
                engine.kill_graceful(pid).await?;
                bail!("'{}' (pid {}) timed out after {}ms", command_line, pid, ms);
            }
        },
        None => wait.await,
    };
    let finished = finished.context("process record disappeared")?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        print!("{}", finished.stdout);
        eprint!("{}", finished.stderr);
    }
    Ok(finished.exit_code.unwrap_or(137))
}

pub async fn shells(engine: &Engine, opts: &GlobalOpts, versions: bool) -> anyhow::Result<i32> {
    let preferred = engine.preferred_shell();
    let mut infos = Vec::new();
    for shell in ShellType::all() {
        let info = if versions {
            engine.shell_info(shell).await
        } else {
            let path = engine.shells().locate(shell);
            hive_exec::ShellInfo {
                shell_type: shell,
                available: path.is_some(),
                path,
                version: None,
            }
        };
        infos.push(info);
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(0);
    }

    for info in infos {
        let marker = if info.shell_type == preferred { "*" } else { " " };
        let path = info
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into());
        match info.version {
            Some(version) => println!("{} {:<11} {}  ({})", marker, info.shell_type.as_str(), path, version),
            None => println!("{} {:<11} {}", marker, info.shell_type.as_str(), path),
        }
    }
    Ok(0)
}

pub fn env(
    engine: &Engine,
    opts: &GlobalOpts,
    profile: Option<&str>,
    dotenv: Option<&Path>,
) -> anyhow::Result<i32> {
    if let Some(profile) = profile {
        engine.env().set_profile(profile.parse()?);
    }
    if let Some(path) = dotenv {
        let count = engine.env().import_dotenv(path)?;
        tracing::info!(count, path = %path.display(), "Imported dotenv file");
    }

    let vars = engine.env().get_filtered();
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&vars)?);
    } else {
        for (key, value) in vars {
            println!("{}={}", key, value);
        }
    }
    Ok(0)
}

/// Line-by-line REPL over one long-lived shell
pub async fn session(engine: &Engine, opts: &GlobalOpts) -> anyhow::Result<i32> {
    let sessions = engine.sessions();
    let info = sessions.create_session(SessionOptions {
        shell: opts.shell,
        ..Default::default()
    })?;
    eprintln!("session {} ({} pid {}), 'exit' to quit", info.id, info.shell, info.pid);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }

        let output = sessions.send_to_session(&info.id, line).await?;
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
        std::io::stdout().flush()?;
        if output.closed {
            eprintln!("shell exited");
            break;
        }
    }

    if sessions.get_session(&info.id).is_some() {
        sessions.close_session(&info.id).await?;
    }
    Ok(0)
}

pub fn status(engine: &Engine, opts: &GlobalOpts) -> anyhow::Result<i32> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&engine.system_info())?);
    } else {
        print!("{}", engine.status_report());
    }
    Ok(0)
}

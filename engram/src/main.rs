//! engram - background capture daemon for personal activity
//!
//! Captures edited files, clipboard text, and shell commands into a
//! searchable document store, filtered for secret leakage.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Databases: $XDG_DATA_HOME/engram/ (~/.local/share/engram/)
//! - Logs: $XDG_STATE_HOME/engram/engram.log (~/.local/state/engram/)
//! - Config: $XDG_CONFIG_HOME/engram/config.toml (~/.config/engram/config.toml)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engram_core::watcher::{daemon_status, start_daemon, stop_daemon, StopOutcome, WatcherDaemon};
use engram_core::{Config, WatcherState};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Background capture daemon for personal activity")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the capture daemon
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },
}

#[derive(Subcommand)]
enum WatchCommand {
    /// Start the capture daemon
    Start {
        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status and watched directories
    Status,
    /// Register a directory for file capture
    Add {
        /// Directory to watch
        dir: PathBuf,

        /// Watch only the directory itself, not its subdirectories
        #[arg(long)]
        no_recursive: bool,
    },
    /// Unregister a watched directory
    Remove {
        /// Directory to stop watching
        dir: PathBuf,
    },
    /// List watched directories
    List,
    /// Run the daemon loop in this process (used by `start`)
    #[command(hide = true)]
    Run {
        /// File to create once the collectors are running
        #[arg(long)]
        ready_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let Command::Watch { command } = cli.command;
    match command {
        WatchCommand::Start { foreground } => cmd_start(&config, foreground),
        WatchCommand::Stop => cmd_stop(&config),
        WatchCommand::Status => cmd_status(&config),
        WatchCommand::Add { dir, no_recursive } => cmd_add(&dir, !no_recursive),
        WatchCommand::Remove { dir } => cmd_remove(&dir),
        WatchCommand::List => cmd_list(),
        WatchCommand::Run { ready_file } => cmd_run(&config, ready_file),
    }
}

fn cmd_start(config: &Config, foreground: bool) -> Result<()> {
    let _log_guard = if foreground {
        Some(engram_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        // The background child initializes its own logging in `run`.
        None
    };

    let pid = start_daemon(config, foreground).context("failed to start daemon")?;
    if !foreground {
        println!("Daemon running (pid {})", pid);
        println!("Logs: {}", Config::log_path().display());
    }
    Ok(())
}

fn cmd_stop(config: &Config) -> Result<()> {
    match stop_daemon(config).context("failed to stop daemon")? {
        StopOutcome::Stopped { pid, forced: false } => {
            println!("Daemon stopped (pid {})", pid);
        }
        StopOutcome::Stopped { pid, forced: true } => {
            println!("Daemon killed after timeout (pid {})", pid);
        }
        StopOutcome::NotRunning => println!("Daemon is not running"),
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let status = daemon_status(config).context("failed to read daemon status")?;

    if status.running {
        println!("Daemon: running (pid {})", status.pid.unwrap_or(0));
        if let Some(started) = status.started_at {
            println!("Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    } else {
        println!("Daemon: not running");
    }
    if let Some(note) = status.note {
        println!("Note: {}", note);
    }
    println!("Watched directories: {}", status.watched_directories);
    Ok(())
}

fn cmd_add(dir: &PathBuf, recursive: bool) -> Result<()> {
    let resolved = dir
        .canonicalize()
        .with_context(|| format!("directory does not exist: {}", dir.display()))?;
    if !resolved.is_dir() {
        anyhow::bail!("not a directory: {}", resolved.display());
    }

    let state = open_state()?;
    let entry = state
        .add_directory(&resolved, recursive)
        .context("failed to register directory")?;
    println!(
        "Watching {}{}",
        entry.path.display(),
        if entry.recursive { "" } else { " (non-recursive)" }
    );
    println!("A running daemon picks this up on its next restart.");
    Ok(())
}

fn cmd_remove(dir: &PathBuf) -> Result<()> {
    let state = open_state()?;
    // Try the path as given first, then resolved, so directories that no
    // longer exist on disk can still be unregistered.
    let removed = state.remove_directory(dir).context("failed to remove directory")?
        || match dir.canonicalize() {
            Ok(resolved) => state
                .remove_directory(&resolved)
                .context("failed to remove directory")?,
            Err(_) => false,
        };

    if removed {
        println!("Stopped watching {}", dir.display());
    } else {
        println!("{} was not being watched", dir.display());
    }
    Ok(())
}

fn cmd_list() -> Result<()> {
    let state = open_state()?;
    let dirs = state.list_directories().context("failed to list directories")?;

    if dirs.is_empty() {
        println!("No watched directories. Add one with `engram watch add <dir>`.");
        return Ok(());
    }

    for dir in dirs {
        println!(
            "{}  {}  added {}",
            dir.path.display(),
            if dir.recursive { "recursive" } else { "flat" },
            dir.added_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

fn cmd_run(config: &Config, ready_file: Option<PathBuf>) -> Result<()> {
    let _log_guard =
        engram_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("engram daemon process starting");
    let mut daemon = WatcherDaemon::new(config).context("failed to build daemon")?;
    daemon.run(ready_file.as_deref()).context("daemon failed")?;
    Ok(())
}

fn open_state() -> Result<WatcherState> {
    WatcherState::open(&Config::state_db_path()).context("failed to open state database")
}

//! Kiyomi daemon with a console front-end.

use clap::{Parser, Subcommand};
use kiyomi::executor::CliExecutor;
use kiyomi::kiyomi_dirs::DataPaths;
use kiyomi::notify::{ChannelSink, NotificationSink, TelegramSink};
use kiyomi::session::{SessionLimits, SessionManager, continuation};
use kiyomi::text::split_chunks;
use kiyomi::{App, KiyomiConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Console replies are chunked like chat messages.
const REPLY_CHUNK_CHARS: usize = 4000;

/// Kiyomi: a personal AI assistant daemon.
#[derive(Parser)]
#[command(name = "kiyomi", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run background jobs and chat on stdin/stdout (default).
    Run,

    /// Print the saved work session, recent history and pending reminders.
    Status,

    /// Write a default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(KiyomiConfig::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::Status => {
            let config = KiyomiConfig::load_or_default(&config_path)?;
            print_status(&config);
            Ok(())
        }
        Command::Run => {
            let config = KiyomiConfig::load_or_default(&config_path)?;
            let _guard = init_tracing(&config.data_paths());
            info!(config = %config_path.display(), "loaded configuration");
            run(config).await
        }
    }
}

/// Stderr plus a daily-rotated file under the data directory.
fn init_tracing(paths: &DataPaths) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiyomi=info,warn"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = paths.logs_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        warn!(dir = %log_dir.display(), "cannot create log directory; logging to stderr only");
        return None;
    }

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "kiyomi.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    Some(guard)
}

async fn run(config: KiyomiConfig) -> anyhow::Result<()> {
    println!("Kiyomi v{}", env!("CARGO_PKG_VERSION"));

    let executor = Arc::new(CliExecutor::from_config(&config.executor)?);

    let sink: Arc<dyn NotificationSink> = match TelegramSink::from_config(&config.telegram) {
        Some(telegram) => {
            info!("proactive messages go to Telegram");
            Arc::new(telegram)
        }
        None => {
            let (sink, mut rx) = ChannelSink::pair();
            tokio::spawn(async move {
                while let Some(text) = rx.recv().await {
                    println!("\n🔔 {text}\n");
                }
            });
            Arc::new(sink)
        }
    };

    let app = App::build(config, executor, sink)?;
    app.start().await;
    let handler = app.handler();

    println!("Ready. Type a message, /help for commands, Ctrl+D or Ctrl+C to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
        };
        match line {
            Ok(Some(text)) => {
                if text.trim().is_empty() {
                    continue;
                }
                let reply = handler.handle_text(&text).await;
                for chunk in split_chunks(&reply, REPLY_CHUNK_CHARS) {
                    println!("{chunk}\n");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

fn print_status(config: &KiyomiConfig) {
    let paths = config.data_paths();
    let sessions = SessionManager::new(&paths, SessionLimits::from(&config.session));

    println!("Data directory: {}", paths.root().display());
    // The running daemon owns the live session; never expire it from here.
    let now = chrono::Utc::now();
    match sessions.peek_persisted() {
        Some(session) if session.is_expired_at(sessions.limits().timeout, now) => println!(
            "\nNo active work session (last one idle since {}).",
            session.last_activity.format("%Y-%m-%d %H:%M UTC")
        ),
        Some(session) => println!("\n{}", continuation::session_summary(&session, now)),
        None => println!("\nNo active work session."),
    }

    let history = sessions.history();
    if !history.is_empty() {
        println!("\nRecent sessions:");
        for entry in history.iter().rev().take(5) {
            println!(
                "  {} {} ({} steps)",
                entry.ended_at.format("%Y-%m-%d %H:%M"),
                entry.task.as_deref().unwrap_or("untitled"),
                entry.steps_completed
            );
        }
    }

    let reminders = kiyomi::jobs::reminders::ReminderStore::new(paths.reminders_file()).list_pending();
    println!("\nPending reminders: {}", reminders.len());
    for reminder in reminders {
        println!("  {}", reminder.describe(config.schedule.utc_offset_hours));
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    KiyomiConfig::default().save_to_file(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

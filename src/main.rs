use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lookerctl::app::{self, App};
use lookerctl::config::Config;
use lookerctl::looker::http::format_api_error;
use lookerctl::looker::{ApiError, LookerClient};
use lookerctl::manifest::Manifest;
use lookerctl::reconcile::{ReconcileError, UserReconciler};
use lookerctl::state::{State, DEFAULT_STATE_FILE};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Declarative user management for Looker
#[derive(Parser, Debug)]
#[command(name = "lookerctl", version = lookerctl::VERSION, about, long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file holding managed user records
    #[arg(long, global = true, default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,

    /// Looker instance URL, overrides config and environment
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log level; RUST_LOG takes precedence when set
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Cancel the whole command after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, update and delete users until Looker matches the manifest
    Apply {
        /// Manifest of desired users
        #[arg(short, long, default_value = "users.yaml")]
        file: PathBuf,

        /// Print the plan without calling Looker
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-read every managed user from Looker
    Refresh,
    /// Start managing an existing Looker user
    Import {
        /// Name to manage the user under
        name: String,
        /// Looker user id
        id: String,
    },
    /// Delete one managed user, or all of them
    Destroy { name: Option<String> },
    /// Print the managed users recorded in state
    Show {
        /// Dump the raw records as YAML
        #[arg(long)]
        yaml: bool,
    },
    /// Write a config file
    Init {
        #[arg(long)]
        url: String,
        #[arg(long)]
        client_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(level: LogLevel, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if matches!(level, LogLevel::Off) => return Ok(None),
        Err(_) => EnvFilter::new(format!("lookerctl={}", level.as_directive())),
    };

    let (writer, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(true)
        .with_thread_ids(false)
        .with_file(log_file.is_some())
        .with_line_number(log_file.is_some())
        .init();

    tracing::info!("lookerctl {} started with log level: {:?}", lookerctl::VERSION, level);

    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {}", describe_error(&err));
            ExitCode::FAILURE
        }
    }
}

/// Prefer the friendly API message over the raw error chain
fn describe_error(err: &anyhow::Error) -> String {
    if let Some(reconcile) = err.chain().find_map(|e| e.downcast_ref::<ReconcileError>()) {
        return format!("{}: {}", err, reconcile.display_message());
    }
    if let Some(api) = err.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
        return format!("{}: {}", err, format_api_error(api));
    }
    format!("{err:#}")
}

fn spawn_cancel_triggers(cancel: &CancellationToken, timeout: Option<u64>) {
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight operation");
            eprintln!("Interrupted, cancelling...");
            token.cancel();
        }
    });

    if let Some(secs) = timeout {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::warn!("Timed out after {}s, cancelling", secs);
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
    }
}

async fn run(args: Args) -> Result<()> {
    // Commands that never talk to Looker
    match &args.command {
        Command::Show { yaml } => return show(&State::load(&args.state)?, *yaml),
        Command::Init { url, client_id } => {
            return init(args.config.as_deref(), url, client_id.as_deref())
        }
        Command::Apply {
            file,
            dry_run: true,
        } => {
            let desired = Manifest::load(file)?.desired_users()?;
            let state = State::load(&args.state)?;
            for (name, action) in app::plan(&state, &desired) {
                println!("{:<8} {}", action.label(), name);
            }
            return Ok(());
        }
        _ => {}
    }

    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env();
    if let Some(url) = &args.base_url {
        config.base_url = Some(url.clone());
    }
    let connection = config.connection()?;

    let client = LookerClient::new(
        &connection.base_url,
        &connection.api_version,
        &connection.client_id,
        &connection.client_secret,
        connection.request_timeout,
    )?;
    tracing::info!("Using Looker API at {}", client.api_url(""));

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, args.timeout);

    let reconciler = UserReconciler::new(client, config.reconciler_options());
    let state = State::load(&args.state)?;
    let mut app = App::new(reconciler, state, args.state.clone(), cancel);

    match args.command {
        Command::Apply { file, .. } => {
            let desired = Manifest::load(&file)?.desired_users()?;
            let summary = app.apply(&desired).await?;
            println!("Apply complete: {summary}");
        }
        Command::Refresh => {
            let dropped = app.refresh().await?;
            for name in &dropped {
                println!("dropped  {name} (no longer in Looker)");
            }
            println!("Refreshed {} user(s)", app.state().users.len());
        }
        Command::Import { name, id } => {
            app.import(&name, &id).await?;
            println!("Imported Looker user {id} as `{name}`");
        }
        Command::Destroy { name } => {
            let destroyed = app.destroy(name.as_deref()).await?;
            for name in &destroyed {
                println!("deleted  {name}");
            }
        }
        Command::Show { .. } | Command::Init { .. } => {}
    }

    Ok(())
}

fn show(state: &State, yaml: bool) -> Result<()> {
    if yaml {
        print!("{}", serde_yaml::to_string(&state.users)?);
        return Ok(());
    }

    if state.users.is_empty() {
        println!("No managed users");
        return Ok(());
    }

    println!(
        "{:<16} {:<8} {:<32} {:<12} LAST UPDATED",
        "NAME", "ID", "EMAIL", "ROLES"
    );
    for (name, user) in &state.users {
        let roles: Vec<&str> = user.role_ids.iter().map(String::as_str).collect();
        println!(
            "{:<16} {:<8} {:<32} {:<12} {}",
            name,
            user.external_id.as_deref().unwrap_or("-"),
            user.email.as_deref().unwrap_or("-"),
            if roles.is_empty() {
                "-".to_string()
            } else {
                roles.join(",")
            },
            user.last_updated().unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn init(path: Option<&Path>, url: &str, client_id: Option<&str>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path().context("Could not determine the config directory")?,
    };

    Config::init(&path, url, client_id)?;
    println!("Wrote {}", path.display());
    Ok(())
}

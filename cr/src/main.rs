//! cr - codereload command-line entry point

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use codereload::cli::{Cli, Command, get_log_path};
use codereload::config::Config;
use codereload::coordinator::Coordinator;
use codereload::domain::BuildResult;
use codereload::host::{ArtifactDirLoader, CommandBackend, FsManifestReader};
use codereload::ipc::{self, ReloadClient};
use codereload::probe;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so problems go to stderr
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { socket } => cmd_serve(&config, socket).await,
        Command::Reload { subject, local, socket } => {
            let result = if local {
                reload_local(&config, &subject).await?
            } else {
                reload_remote(&config, socket, &subject).await?
            };
            print_result(&result);
            if !result.is_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Probe { dir } => cmd_probe(&config, dir),
        Command::Ping { socket } => cmd_ping(&config, socket).await,
        Command::Stop { socket } => cmd_stop(&config, socket).await,
    }
}

/// Wire the coordinator to the filesystem collaborators from config
fn build_coordinator(config: &Config) -> Result<Coordinator> {
    debug!("build_coordinator: called");
    let loader = ArtifactDirLoader::from_config(config);
    loader.load_all().context("Failed to load artifacts")?;

    Ok(Coordinator::new(
        config.coordinator_config(),
        Arc::new(CommandBackend::from_config(config)),
        Arc::new(loader),
        Arc::new(FsManifestReader::from_config(config)),
    ))
}

fn socket_path(config: &Config, socket: Option<PathBuf>) -> PathBuf {
    socket.unwrap_or_else(|| config.ipc.socket_path())
}

/// Run the coordinator and socket adapter until a signal or a Shutdown message
async fn cmd_serve(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    debug!("cmd_serve: called");
    let (handle, coordinator_task) = build_coordinator(config)?.spawn();
    handle
        .probe_environment()
        .await
        .context("Coordinator stopped during environment probe")?;

    let socket_path = socket_path(config, socket);
    let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let server_task = tokio::spawn(ipc::serve(listener, handle.clone(), shutdown_tx));

    info!(socket = %socket_path.display(), "Reload server started");
    println!("Serving reload requests on {}", socket_path.display());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = shutdown_rx.recv() => info!("Shutdown message received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
            _ = shutdown_rx.recv() => info!("Shutdown message received"),
        }
    }

    info!("Reload server shutting down");
    server_task.abort();
    let _ = handle.shutdown().await;
    let _ = coordinator_task.await;
    ipc::cleanup_socket(&socket_path);
    println!("Reload server stopped");
    Ok(())
}

/// Build in this process with a throwaway coordinator
async fn reload_local(config: &Config, subject: &str) -> Result<BuildResult> {
    debug!(%subject, "reload_local: called");
    let (handle, coordinator_task) = build_coordinator(config)?.spawn();
    let result = handle.reload(subject).await.context("Reload failed")?;
    let _ = handle.shutdown().await;
    let _ = coordinator_task.await;
    Ok(result)
}

async fn reload_remote(config: &Config, socket: Option<PathBuf>, subject: &str) -> Result<BuildResult> {
    debug!(%subject, "reload_remote: called");
    let mut client = ReloadClient::with_socket_path(socket_path(config, socket));
    if let Some(timeout) = config.coordinator_config().reply_timeout {
        client = client.with_reload_timeout(timeout);
    }
    client
        .reload(subject)
        .await
        .context("Could not reach the reload server (is `cr serve` running?)")
}

fn print_result(result: &BuildResult) {
    print!("{}", result.output);
    let _ = std::io::stdout().flush();
    if result.is_ok() {
        eprintln!("{}", "Reload succeeded".green());
    } else {
        let headline = result.headline();
        eprintln!("{} {}", format!("({})", headline.kind).red().bold(), headline.message.red());
    }
}

fn cmd_probe(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.output_dir());
    debug!(dir = %dir.display(), "cmd_probe: called");
    if probe::probe_symlinks(&dir) {
        println!("{} symlinks can be created in {}", "ok:".green(), dir.display());
    } else {
        println!(
            "{} symlinks cannot be created in {}; build outputs will be copied (slower)",
            "warning:".yellow(),
            dir.display()
        );
    }
    Ok(())
}

async fn cmd_ping(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    debug!("cmd_ping: called");
    let client = ReloadClient::with_socket_path(socket_path(config, socket));
    if !client.socket_exists() {
        println!("Reload server is not running");
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("Reload server is alive and responsive");
            println!("Version: {}", version);
        }
        Err(e) => {
            debug!(error = %e, "cmd_ping: ping failed");
            println!("Reload socket exists but the server is not responding");
            println!("Error: {}", e);
        }
    }
    Ok(())
}

async fn cmd_stop(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    debug!("cmd_stop: called");
    let client = ReloadClient::with_socket_path(socket_path(config, socket));
    if !client.socket_exists() {
        println!("Reload server is not running");
        return Ok(());
    }

    client.shutdown().await.context("Failed to stop reload server")?;
    println!("Reload server stopping");
    Ok(())
}

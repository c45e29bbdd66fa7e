#![warn(missing_docs)]
//! # signal-sync binary
//!
//! Headless terminal client: reads commands from stdin and prints the
//! dashboard whenever the displayed state changes.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use signal_sync_app::{AppError, CycleOutcome, SyncConfig, SyncCoordinator, app_version};
use signal_sync_transport::{Endpoints, HttpBackend, StagedImage};
use signal_sync_ui::{DashboardSnapshot, UiState, project_dashboard};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "commands: capture | stage <path> | detect <path> | status | quit";

/// CLI entry point.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(stage = "startup", action = "fail", %error, "signal-sync stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config = SyncConfig::from_env()?;
    let endpoints = Endpoints::new(&config.base_url)?;
    let backend = HttpBackend::new(endpoints.clone(), config.request_timeout())?;
    let coordinator = Arc::new(SyncCoordinator::new(config, Arc::new(backend))?);

    info!(
        stage = "startup",
        action = "ready",
        version = app_version(),
        base_url = %endpoints.base(),
        camera_stream = %endpoints.camera_stream_url(),
        "signal-sync started"
    );
    println!("signal-sync {}", app_version());
    println!("{HELP}");

    let shutdown = CancellationToken::new();
    let render = tokio::spawn(render_loop(
        coordinator.subscribe_ui(),
        coordinator.subscribe_elapsed(),
        shutdown.clone(),
    ));
    coordinator.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                warn!(stage = "input", action = "read", %error, "stdin closed");
                break;
            }
        };
        if !dispatch(&coordinator, line.trim()).await {
            break;
        }
    }

    coordinator.shutdown();
    shutdown.cancel();
    if let Err(error) = render.await {
        warn!(stage = "render", action = "join", %error, "render task ended abnormally");
    }
    Ok(())
}

/// Handles one command line. Returns `false` when the client should exit.
async fn dispatch(coordinator: &Arc<SyncCoordinator>, line: &str) -> bool {
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "quit" | "exit" => return false,
        "status" => print!("{}", coordinator.dashboard()),
        "capture" => spawn_cycle(coordinator, None),
        "stage" => match load_image(argument).await {
            Ok(image) => coordinator.stage_image(image),
            Err(message) => eprintln!("{message}"),
        },
        "detect" => match load_image(argument).await {
            Ok(image) => spawn_cycle(coordinator, Some(image)),
            Err(message) => eprintln!("{message}"),
        },
        other => eprintln!("unknown command {other:?}; {HELP}"),
    }
    true
}

// Cycles run detached; a trigger while one runs reports busy.
fn spawn_cycle(coordinator: &Arc<SyncCoordinator>, image: Option<StagedImage>) {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        let outcome = match image {
            Some(image) => coordinator.upload_and_detect(image).await,
            None => coordinator.capture().await,
        };
        match outcome {
            CycleOutcome::Busy => eprintln!("a request is already in flight"),
            CycleOutcome::Failed(_) => {}
            CycleOutcome::Applied { .. } | CycleOutcome::Superseded { .. } => {
                info!(stage = "request_cycle", action = "done", "cycle complete");
            }
        }
    });
}

async fn load_image(path: &str) -> Result<StagedImage, String> {
    if path.is_empty() {
        return Err("missing image path".to_string());
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|error| format!("cannot read {path}: {error}"))?;
    let file_name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    StagedImage::new(file_name, bytes).map_err(|error| error.to_string())
}

// Elapsed ticks alone print a single line instead of the whole dashboard.
async fn render_loop(
    mut ui: watch::Receiver<UiState>,
    mut elapsed: watch::Receiver<String>,
    shutdown: CancellationToken,
) {
    let mut last_rendered: Option<DashboardSnapshot> = None;
    loop {
        let snapshot = project_dashboard(&ui.borrow_and_update(), &elapsed.borrow_and_update());
        match &last_rendered {
            Some(last) if *last == snapshot => {}
            Some(last) if same_apart_from_elapsed(last, &snapshot) => {
                println!("elapsed    {}", snapshot.elapsed);
            }
            _ => {
                print!("{snapshot}");
                println!();
            }
        }
        last_rendered = Some(snapshot);

        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = ui.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = elapsed.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

fn same_apart_from_elapsed(last: &DashboardSnapshot, next: &DashboardSnapshot) -> bool {
    *last
        == DashboardSnapshot {
            elapsed: last.elapsed.clone(),
            ..next.clone()
        }
}

use schlieren_common::config::{Config, SnapshotConfig};
use schlieren_common::settings::SettingsHandle;
use schlieren_common::status::StreamStatus;
use schlieren_engine::control::{ControlCommand, HELP};
use schlieren_engine::recorder::{encoder, Recorder};
use schlieren_engine::sink::DisplayFeed;
use schlieren_engine::{snapshot, EngineExit, StreamEngine};
use schlieren_source::{AnySource, Backoff, FrameSource};
use schlieren_viewer::ViewerState;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = ?config.source.kind,
        input = config.source.input,
        filter = %config.processing.filter,
        colormap = %config.processing.colormap,
        recording = config.recording.enabled,
        viewer = config.viewer.enabled,
        "starting schlieren engine"
    );

    // Recording and the ffmpeg source both shell out to ffmpeg.
    encoder::check_ffmpeg_available().await;

    let (initial, adjustments) = config.settings().sanitized();
    for adjustment in &adjustments {
        warn!(%adjustment, "configured value adjusted");
    }
    let settings = SettingsHandle::new(initial);

    let source = match AnySource::from_config(&config.source) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid source configuration");
            std::process::exit(1);
        }
    };
    info!(source = source.describe(), "source configured");

    let backoff = Backoff::new(
        Duration::from_millis(config.source.reconnect_backoff_ms),
        Duration::from_millis(config.source.max_backoff_ms),
    );
    let mut engine = StreamEngine::new(source, settings.clone()).with_backoff(backoff);

    let recorder = config.recording.enabled.then(|| {
        let feed = engine.add_recorder("video", config.recording.queue_capacity);
        tokio::spawn(Recorder::new(config.recording.clone()).run(feed))
    });

    let mut handle = engine.start();
    let display = handle.display();
    let status = handle.status();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let viewer = config.viewer.enabled.then(|| {
        let state = ViewerState::new(display.clone(), status.clone(), config.viewer.jpeg_quality);
        let bind = config.viewer.bind.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = schlieren_viewer::serve(&bind, state, shutdown).await {
                error!(error = %e, "viewer failed");
            }
        })
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break None;
            }
            result = handle.wait() => break Some(result),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&line, &settings, &display, &status, &config.snapshot).await {
                        break None;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "control input closed");
                    stdin_open = false;
                }
            },
        }
    };

    let result = match finished {
        Some(result) => result,
        None => handle.stop().await,
    };
    let _ = shutdown_tx.send(true);

    if let Some(recorder) = recorder {
        match recorder.await {
            Ok(Ok(summary)) => info!(
                files = summary.files.len(),
                frames = summary.frames,
                "recording saved"
            ),
            Ok(Err(e)) => error!(error = %e, "recording failed"),
            Err(e) => error!(error = %e, "recorder task panicked"),
        }
    }
    if let Some(viewer) = viewer {
        let _ = viewer.await;
    }

    match result {
        Ok(EngineExit::EndOfStream) => info!("source exhausted"),
        Ok(EngineExit::Stopped) => info!("stopped"),
        Err(e) => {
            error!(error = %e, "engine failed");
            std::process::exit(1);
        }
    }
}

/// Handle one control line. Returns false when the operator asked to quit.
async fn handle_line(
    line: &str,
    settings: &SettingsHandle,
    display: &DisplayFeed,
    status: &watch::Receiver<StreamStatus>,
    snapshots: &SnapshotConfig,
) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    let command = match line.parse::<ControlCommand>() {
        Ok(c) => c,
        Err(e) => {
            println!("{e}");
            return true;
        }
    };
    if let Some(text) = command.apply(settings) {
        println!("{text}");
        return true;
    }
    match command {
        ControlCommand::Snapshot => match snapshot::save_latest(snapshots, display).await {
            Ok(path) => println!("saved {}", path.display()),
            Err(e) => println!("snapshot failed: {e}"),
        },
        ControlCommand::Status => println!("{}", describe_status(&status.borrow())),
        ControlCommand::Help => println!("{HELP}"),
        ControlCommand::Quit => return false,
        _ => {}
    }
    true
}

fn describe_status(status: &StreamStatus) -> String {
    let mut text = format!(
        "{} frames={} reconnects={}",
        status.connection, status.frames_processed, status.reconnects
    );
    if status.recording {
        text.push_str(" recording");
    }
    if !status.message.is_empty() {
        text.push_str(" | ");
        text.push_str(&status.message);
    }
    text
}

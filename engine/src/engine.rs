use schlieren_common::frame::{PublishedFrame, TimestampedFrame};
use schlieren_common::settings::{Settings, SettingsHandle};
use schlieren_common::status::{ConnectionState, StreamStatus};
use schlieren_source::{Backoff, FrameSource, SourceError, StreamHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::filter::FilterPipeline;
use crate::processor::FrameProcessor;
use crate::sink::{DisplayFeed, Publisher, RecordingFeed};

/// How long `stop` waits for the worker before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Why the worker ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    Stopped,
    /// A finite source delivered its last frame.
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source failed: {0}")]
    Source(#[from] SourceError),
    #[error("worker task failed: {0}")]
    Worker(String),
    #[error("worker did not stop within {0:?} and was aborted")]
    Aborted(Duration),
}

/// A configured session: one source, one settings snapshot, the sinks.
/// Nothing runs until [`StreamEngine::start`].
pub struct StreamEngine<S> {
    source: S,
    settings: SettingsHandle,
    publisher: Publisher,
    processor: FrameProcessor,
    backoff: Backoff,
}

impl<S: FrameSource + 'static> StreamEngine<S> {
    pub fn new(source: S, settings: SettingsHandle) -> Self {
        Self {
            source,
            settings,
            publisher: Publisher::new(),
            processor: FrameProcessor::default(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_pipeline(mut self, pipeline: FilterPipeline) -> Self {
        self.processor = FrameProcessor::new(Arc::new(pipeline));
        self
    }

    /// How long a full recording queue may hold up a cycle before that
    /// recorder is detached.
    pub fn with_recorder_stall(mut self, stall: Duration) -> Self {
        self.publisher = self.publisher.with_recorder_stall(stall);
        self
    }

    pub fn display(&self) -> DisplayFeed {
        self.publisher.display()
    }

    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.publisher.status()
    }

    pub fn add_recorder(&mut self, name: impl Into<String>, capacity: usize) -> RecordingFeed {
        self.publisher.add_recorder(name, capacity)
    }

    /// Spawn the worker on the current runtime.
    pub fn start(self) -> EngineHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let display = self.publisher.display();
        let status = self.publisher.status();
        let settings = self.settings.clone();
        info!(source = self.source.describe(), "starting stream engine");
        let task = tokio::spawn(self.run(stop_rx));
        EngineHandle {
            stop_tx,
            task,
            display,
            status,
            settings,
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) -> Result<EngineExit, EngineError> {
        let StreamEngine {
            mut source,
            settings,
            mut publisher,
            mut processor,
            backoff,
        } = self;
        let mut settings_rx = settings.subscribe();
        let mut handle = StreamHandle::new(backoff);
        let pipeline = Arc::clone(processor.pipeline());
        let mut total_hint = None;
        let mut frames: u64 = 0;

        publisher.update_status(|s| s.running = true);

        let result = loop {
            if *stop.borrow() {
                break Ok(EngineExit::Stopped);
            }

            // ---- connect ------------------------------------------------------
            if !handle.is_streaming() {
                handle.mark_connecting();
                publisher.connection(
                    ConnectionState::Connecting,
                    format!("connecting to {}", source.describe()),
                );

                let opened = tokio::select! {
                    r = source.open() => r,
                    _ = stop.changed() => break Ok(EngineExit::Stopped),
                };
                match opened {
                    Ok(()) => {
                        handle.mark_streaming();
                        processor.reset();
                        // Finite sources only know their length once opened.
                        total_hint = source.frame_count_hint();
                        let reconnects = handle.reconnects();
                        info!(
                            source = source.describe(),
                            reconnects,
                            total = total_hint,
                            "source streaming"
                        );
                        publisher.update_status(|s| {
                            s.connection = ConnectionState::Streaming;
                            s.reconnects = reconnects;
                            s.total_frames = total_hint;
                            s.message.clear();
                        });
                    }
                    Err(e) if e.is_recoverable() => {
                        handle.mark_error(e.to_string());
                        let delay = handle.next_backoff();
                        warn!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "unable to connect to source"
                        );
                        publisher.connection(
                            ConnectionState::Error,
                            format!("Unable to connect to stream ({e}). Retrying..."),
                        );
                        if wait_or_stop(delay, &mut stop).await {
                            break Ok(EngineExit::Stopped);
                        }
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "source cannot be opened");
                        publisher.connection(ConnectionState::Error, e.to_string());
                        break Err(EngineError::Source(e));
                    }
                }
            }

            // ---- one cycle ----------------------------------------------------
            let next = tokio::select! {
                r = source.next_frame() => r,
                _ = stop.changed() => break Ok(EngineExit::Stopped),
            };
            let frame = match next {
                Ok(frame) => frame,
                Err(SourceError::EndOfStream) => {
                    info!(frames, "source reached end of stream");
                    publisher.connection(ConnectionState::Disconnected, "end of stream");
                    break Ok(EngineExit::EndOfStream);
                }
                Err(e) if e.is_recoverable() => {
                    handle.mark_disconnected(e.to_string());
                    source.close().await;
                    let delay = handle.next_backoff();
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "source dropped, reconnecting"
                    );
                    publisher.connection(
                        ConnectionState::Disconnected,
                        format!("Stream lost ({e}). Reconnecting..."),
                    );
                    if wait_or_stop(delay, &mut stop).await {
                        break Ok(EngineExit::Stopped);
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "source failed");
                    publisher.connection(ConnectionState::Error, e.to_string());
                    break Err(EngineError::Source(e));
                }
            };

            let snapshot = *settings_rx.borrow_and_update();
            processor = match process_blocking(processor, frame, snapshot).await {
                Ok((p, published)) => {
                    publisher.publish(published).await;
                    p
                }
                Err(e) => {
                    error!(error = %e, "processing cycle panicked, starting a fresh session");
                    FrameProcessor::new(Arc::clone(&pipeline))
                }
            };

            frames += 1;
            publisher.update_status(|s| s.frames_processed = frames);
            if frames % 100 == 0 {
                debug!(total = frames, "frames processed");
                if let Some(total) = total_hint.filter(|t| *t > 0) {
                    let percent = frames as f64 / total as f64 * 100.0;
                    info!(frames, total, percent = format!("{percent:.1}"), "progress");
                }
            }
        };

        source.close().await;
        publisher.close_recorders();
        publisher.update_status(|s| {
            s.running = false;
            if s.connection == ConnectionState::Streaming {
                s.connection = ConnectionState::Disconnected;
            }
        });
        info!(frames, "stream engine stopped");
        result
    }
}

async fn process_blocking(
    mut processor: FrameProcessor,
    frame: TimestampedFrame,
    settings: Settings,
) -> Result<(FrameProcessor, PublishedFrame), EngineError> {
    tokio::task::spawn_blocking(move || {
        let published = processor.process(frame, &settings);
        (processor, published)
    })
    .await
    .map_err(|e| EngineError::Worker(e.to_string()))
}

/// Sleep for `delay`; true if a stop was requested meanwhile.
async fn wait_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *stop.borrow(),
        _ = stop.changed() => true,
    }
}

/// Running engine. Dropping the handle stops the worker at its next safe
/// point, like [`EngineHandle::stop`] without the bounded wait.
pub struct EngineHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<EngineExit, EngineError>>,
    display: DisplayFeed,
    status: watch::Receiver<StreamStatus>,
    settings: SettingsHandle,
}

impl EngineHandle {
    pub fn display(&self) -> DisplayFeed {
        self.display.clone()
    }

    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to end on its own (end of stream or fatal error).
    pub async fn wait(&mut self) -> Result<EngineExit, EngineError> {
        (&mut self.task)
            .await
            .map_err(|e| EngineError::Worker(e.to_string()))?
    }

    /// Ask the worker to exit after the current cycle, releasing the source
    /// and closing recorders. Aborts it after [`STOP_TIMEOUT`].
    pub async fn stop(mut self) -> Result<EngineExit, EngineError> {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(STOP_TIMEOUT, &mut self.task).await {
            Ok(joined) => joined.map_err(|e| EngineError::Worker(e.to_string()))?,
            Err(_) => {
                warn!(
                    timeout_ms = STOP_TIMEOUT.as_millis() as u64,
                    "worker did not stop in time, aborting"
                );
                self.task.abort();
                Err(EngineError::Aborted(STOP_TIMEOUT))
            }
        }
    }
}

//! Fan-out of published frames to the display and recording sinks, and of
//! connection status to observers.
//!
//! The display sink coalesces: it only ever holds the newest frame, so a
//! slow viewer sees fewer frames but never slows capture down. Recording
//! sinks get every frame in capture order through a bounded queue; a full
//! queue applies backpressure instead of dropping, up to a stall limit
//! after which the recorder is detached and recording is reported aborted.

use schlieren_common::frame::PublishedFrame;
use schlieren_common::status::{ConnectionState, StreamStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Longest a full recording queue may hold up a processing cycle.
pub const RECORDER_STALL: Duration = Duration::from_millis(1500);

/// Latest published frame, `None` until the first cycle completes.
pub type DisplayFeed = watch::Receiver<Option<Arc<PublishedFrame>>>;

/// Receiving end handed to a recorder task.
pub type RecordingFeed = mpsc::Receiver<Arc<PublishedFrame>>;

struct RecorderSink {
    name: String,
    tx: mpsc::Sender<Arc<PublishedFrame>>,
}

pub struct Publisher {
    display: watch::Sender<Option<Arc<PublishedFrame>>>,
    recorders: Vec<RecorderSink>,
    status: watch::Sender<StreamStatus>,
    recorder_stall: Duration,
}

impl Publisher {
    pub fn new() -> Self {
        let (display, _) = watch::channel(None);
        let (status, _) = watch::channel(StreamStatus::default());
        Self {
            display,
            recorders: Vec::new(),
            status,
            recorder_stall: RECORDER_STALL,
        }
    }

    pub fn with_recorder_stall(mut self, stall: Duration) -> Self {
        self.recorder_stall = stall;
        self
    }

    pub fn display(&self) -> DisplayFeed {
        self.display.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Attach an ordered, lossless sink. `capacity` frames may queue up
    /// before publishing waits on the consumer.
    pub fn add_recorder(&mut self, name: impl Into<String>, capacity: usize) -> RecordingFeed {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.recorders.push(RecorderSink {
            name: name.into(),
            tx,
        });
        let recording = !self.recorders.is_empty();
        self.update_status(|s| s.recording = recording);
        rx
    }

    pub fn recorder_count(&self) -> usize {
        self.recorders.len()
    }

    /// Deliver one frame to every sink. Recorders whose task has gone away,
    /// or whose queue stays full for longer than the stall limit, are
    /// detached; the display keeps running.
    pub async fn publish(&mut self, frame: PublishedFrame) {
        let frame = Arc::new(frame);
        self.display.send_replace(Some(Arc::clone(&frame)));

        let mut failed = Vec::new();
        for (i, sink) in self.recorders.iter().enumerate() {
            let sent = tokio::time::timeout(self.recorder_stall, sink.tx.send(Arc::clone(&frame)));
            match sent.await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    error!(
                        recorder = sink.name,
                        seq = frame.seq,
                        "recorder stopped, recording aborted"
                    );
                    failed.push(i);
                }
                Err(_) => {
                    error!(
                        recorder = sink.name,
                        seq = frame.seq,
                        stall_ms = self.recorder_stall.as_millis() as u64,
                        "recorder stalled, recording aborted"
                    );
                    failed.push(i);
                }
            }
        }
        if !failed.is_empty() {
            for i in failed.into_iter().rev() {
                self.recorders.remove(i);
            }
            let recording = !self.recorders.is_empty();
            self.update_status(|s| {
                s.recording = recording;
                s.message = "recording aborted".into();
            });
        }
    }

    /// Publish connection state with a status message.
    pub fn connection(&self, state: ConnectionState, message: impl Into<String>) {
        let message = message.into();
        self.update_status(|s| {
            s.connection = state;
            s.message = message;
        });
    }

    pub fn update_status(&self, f: impl FnOnce(&mut StreamStatus)) {
        self.status.send_modify(|s| {
            f(s);
            s.touch();
        });
    }

    /// Close every recording queue so recorders can flush and finish.
    pub fn close_recorders(&mut self) {
        if !self.recorders.is_empty() {
            info!(count = self.recorders.len(), "closing recording sinks");
        }
        self.recorders.clear();
        self.update_status(|s| s.recording = false);
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schlieren_common::frame::{Frame, Layout};

    fn published(seq: u64) -> PublishedFrame {
        let frame = Frame::filled(2, 2, Layout::Gray, seq as u8);
        PublishedFrame {
            seq,
            captured_at_ms: seq as i64,
            raw: frame.clone(),
            processed: frame,
            differenced: true,
        }
    }

    #[tokio::test]
    async fn display_keeps_only_the_latest_frame() {
        let mut publisher = Publisher::new();
        let display = publisher.display();
        assert!(display.borrow().is_none());
        for seq in 0..5 {
            publisher.publish(published(seq)).await;
        }
        assert_eq!(display.borrow().as_ref().map(|f| f.seq), Some(4));
    }

    #[tokio::test]
    async fn recorders_receive_every_frame_in_order() {
        let mut publisher = Publisher::new();
        let mut feed = publisher.add_recorder("test", 16);
        assert!(publisher.status().borrow().recording);
        for seq in 0..10 {
            publisher.publish(published(seq)).await;
        }
        publisher.close_recorders();
        let mut seen = Vec::new();
        while let Some(frame) = feed.recv().await {
            seen.push(frame.seq);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dead_recorder_is_detached_without_stopping_display() {
        let mut publisher = Publisher::new();
        let feed = publisher.add_recorder("broken", 4);
        drop(feed);
        let display = publisher.display();
        publisher.publish(published(1)).await;
        publisher.publish(published(2)).await;
        assert_eq!(publisher.recorder_count(), 0);
        let status = publisher.status().borrow().clone();
        assert!(!status.recording);
        assert_eq!(status.message, "recording aborted");
        assert_eq!(display.borrow().as_ref().map(|f| f.seq), Some(2));
    }

    #[tokio::test]
    async fn stalled_recorder_is_detached_after_the_stall_limit() {
        let mut publisher = Publisher::new().with_recorder_stall(Duration::from_millis(20));
        // Held but never read: the queue fills after the first frame.
        let mut feed = publisher.add_recorder("stuck", 1);
        let display = publisher.display();

        let started = std::time::Instant::now();
        for seq in 0..3 {
            publisher.publish(published(seq)).await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(publisher.recorder_count(), 0);
        let status = publisher.status().borrow().clone();
        assert!(!status.recording);
        assert_eq!(status.message, "recording aborted");
        assert_eq!(display.borrow().as_ref().map(|f| f.seq), Some(2));

        assert_eq!(feed.recv().await.map(|f| f.seq), Some(0));
        assert!(feed.recv().await.is_none());
    }
}

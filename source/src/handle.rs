use schlieren_common::status::ConnectionState;
use std::time::Duration;
use tracing::debug;

/// Reconnect delay. Doubles after every failed attempt up to `max`; with
/// `max == initial` this is a fixed retry window.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn fixed(window: Duration) -> Self {
        Self::new(window, window)
    }

    /// Delay to wait now; advances the next delay.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

/// Connection state machine for one source:
/// `Disconnected → Connecting → Streaming`, with `Error` after a failed
/// connect and `Disconnected` after a dropped stream.
#[derive(Debug, Clone, Default)]
pub struct StreamHandle {
    state: ConnectionState,
    backoff: Backoff,
    connects: u64,
    last_error: Option<String>,
}

impl StreamHandle {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
            connects: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ConnectionState::Streaming
    }

    /// Successful opens so far. Anything above one is a reconnect.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    pub fn reconnects(&self) -> u64 {
        self.connects.saturating_sub(1)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn mark_connecting(&mut self) {
        self.transition(ConnectionState::Connecting);
    }

    pub fn mark_streaming(&mut self) {
        self.connects += 1;
        self.last_error = None;
        self.backoff.reset();
        self.transition(ConnectionState::Streaming);
    }

    /// The stream dropped after having been up.
    pub fn mark_disconnected(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.transition(ConnectionState::Disconnected);
    }

    /// A connect attempt failed.
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.transition(ConnectionState::Error);
    }

    pub fn next_backoff(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "source state change");
        }
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_never_grows() {
        let mut b = Backoff::fixed(Duration::from_secs(1));
        for _ in 0..5 {
            assert_eq!(b.next_delay(), Duration::from_secs(1));
        }
    }

    #[test]
    fn exponential_backoff_caps_and_resets() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn tracks_reconnects() {
        let mut handle = StreamHandle::new(Backoff::default());
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        handle.mark_connecting();
        handle.mark_streaming();
        assert!(handle.is_streaming());
        assert_eq!(handle.reconnects(), 0);

        handle.mark_disconnected("connection reset");
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(handle.last_error(), Some("connection reset"));

        handle.mark_connecting();
        handle.mark_error("refused");
        assert_eq!(handle.state(), ConnectionState::Error);

        handle.mark_connecting();
        handle.mark_streaming();
        assert_eq!(handle.reconnects(), 1);
        assert!(handle.last_error().is_none());
    }
}

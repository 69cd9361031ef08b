use serde::Serialize;
use std::fmt;

/// Connection state of a frame source as tracked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status notification published by the engine for observers (viewer, CLI).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamStatus {
    pub connection: ConnectionState,
    /// False once the worker has exited (end of stream, stop, or fatal error).
    pub running: bool,
    /// Human-readable status text; empty when there is nothing to report.
    pub message: String,
    pub frames_processed: u64,
    /// Length of a finite source, known once it has been opened.
    pub total_frames: Option<u64>,
    pub reconnects: u64,
    pub recording: bool,
    pub updated_at_ms: i64,
}

impl StreamStatus {
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_state_in_snake_case() {
        let status = StreamStatus {
            connection: ConnectionState::Streaming,
            running: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"connection\":\"streaming\""));
        assert!(json.contains("\"running\":true"));
        assert!(json.contains("\"total_frames\":null"));
    }
}

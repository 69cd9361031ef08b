use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use schlieren_common::frame::TimestampedFrame;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{decode_blocking, FrameSource, SourceError};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
///
/// Feed arbitrary chunks with [`push`](Self::push) and drain complete parts
/// with [`next_part`](Self::next_part). Boundaries split across chunks are
/// handled by keeping a tail of the buffer between calls.
pub struct MultipartParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    part_start: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let name = boundary.trim_start_matches("--");
        Self {
            boundary: format!("--{name}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            part_start: 0,
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParseState::SeekingBoundary;
        self.part_start = 0;
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete part body, if one is buffered.
    pub fn next_part(&mut self) -> Option<Vec<u8>> {
        let blen = self.boundary.len();
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        self.buffer.advance(pos + blen);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > blen {
                            let excess = self.buffer.len() - blen;
                            self.buffer.advance(excess);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    self.buffer.advance(pos + HEADER_END.len());
                    self.part_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let pending = &self.buffer[self.part_start..];
                    let Some(pos) = find_subsequence(pending, &self.boundary) else {
                        // Avoid re-scanning old data on the next call
                        self.part_start = self.buffer.len().saturating_sub(blen);
                        return None;
                    };
                    let part_end = self.part_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..part_end].ends_with(b"\r\n") {
                        part_end - 2
                    } else {
                        part_end
                    };
                    let body = self.buffer[..end].to_vec();
                    self.buffer.advance(part_end + blen);
                    self.state = ParseState::SeekingHeaderEnd;
                    if !body.is_empty() {
                        return Some(body);
                    }
                }
            }
        }
    }
}

impl Default for MultipartParser {
    fn default() -> Self {
        Self::new(DEFAULT_BOUNDARY)
    }
}

/// Extract the boundary name from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

fn http_client(request_timeout: Option<Duration>) -> Result<reqwest::Client, SourceError> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| SourceError::Config(e.to_string()))
}

fn silent_for(timeout: Duration) -> SourceError {
    SourceError::Unavailable(format!("no data for {} ms", timeout.as_millis()))
}

// =============================================================================
// Multipart stream source
// =============================================================================

/// Live HTTP MJPEG stream (`multipart/x-mixed-replace`).
///
/// A server that stays silent for longer than the read timeout, while
/// connecting or mid-stream, is reported as a drop.
pub struct MjpegSource {
    url: String,
    client: reqwest::Client,
    read_timeout: Duration,
    stream: Option<ByteStream>,
    parser: MultipartParser,
    seq: u64,
}

impl MjpegSource {
    pub fn new(url: &str, read_timeout: Duration) -> Result<Self, SourceError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SourceError::Config(format!("not an HTTP URL: {url}")));
        }
        Ok(Self {
            url: url.to_string(),
            client: http_client(None)?,
            read_timeout,
            stream: None,
            parser: MultipartParser::default(),
            seq: 0,
        })
    }
}

impl FrameSource for MjpegSource {
    fn describe(&self) -> String {
        format!("mjpeg:{}", self.url)
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        self.stream = None;
        info!(url = self.url, "connecting to MJPEG stream");
        let response = tokio::time::timeout(self.read_timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| silent_for(self.read_timeout))?
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

        info!(status = %response.status(), boundary, "connected to MJPEG stream");
        self.parser = MultipartParser::new(&boundary);
        self.stream = Some(Box::pin(response.bytes_stream()));
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<TimestampedFrame, SourceError> {
        let read_timeout = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(SourceError::NotOpen)?;
        loop {
            while let Some(jpeg) = self.parser.next_part() {
                let bytes = jpeg.len();
                match decode_blocking(jpeg).await? {
                    Ok(frame) => {
                        let seq = self.seq;
                        self.seq += 1;
                        debug!(seq, bytes, "decoded MJPEG part");
                        return Ok(TimestampedFrame::new(frame, seq));
                    }
                    Err(e) => warn!(error = %e, bytes, "skipping undecodable MJPEG part"),
                }
            }

            let next = tokio::time::timeout(read_timeout, stream.next())
                .await
                .map_err(|_| silent_for(read_timeout))?;
            match next {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => return Err(SourceError::Unavailable(e.to_string())),
                None => {
                    return Err(SourceError::Unavailable(
                        "stream closed by server".into(),
                    ))
                }
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.parser.reset();
    }
}

// =============================================================================
// Snapshot polling source
// =============================================================================

/// Polling-based fallback: periodically fetch single JPEG frames.
pub struct PollingSource {
    url: String,
    client: reqwest::Client,
    period: Duration,
    ticker: Option<Interval>,
    seq: u64,
}

impl PollingSource {
    /// Each fetch, headers and body, must complete within `read_timeout`.
    pub fn new(url: &str, fps: f64, read_timeout: Duration) -> Result<Self, SourceError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(SourceError::Config(format!("invalid polling rate {fps}")));
        }
        Ok(Self {
            url: url.to_string(),
            client: http_client(Some(read_timeout))?,
            period: Duration::from_secs_f64(1.0 / fps),
            ticker: None,
            seq: 0,
        })
    }
}

impl FrameSource for PollingSource {
    fn describe(&self) -> String {
        format!("polling:{}", self.url)
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<TimestampedFrame, SourceError> {
        let ticker = self.ticker.as_mut().ok_or(SourceError::NotOpen)?;
        loop {
            ticker.tick().await;

            let resp = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(SourceError::Unavailable(format!(
                    "HTTP status {}",
                    resp.status().as_u16()
                )));
            }
            let body = resp
                .bytes()
                .await
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;

            match decode_blocking(body.to_vec()).await? {
                Ok(frame) => {
                    let seq = self.seq;
                    self.seq += 1;
                    return Ok(TimestampedFrame::new(frame, seq));
                }
                Err(e) => warn!(error = %e, "failed to decode polled frame, skipping"),
            }
        }
    }

    async fn close(&mut self) {
        self.ticker = None;
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

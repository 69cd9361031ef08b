//! Display surface: a small HTTP server that streams the latest raw and
//! processed frames as multipart MJPEG and reports engine status as JSON.
//!
//! The server only ever reads the newest published frame, so slow clients
//! skip frames instead of holding up processing.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use schlieren_common::frame::{Frame, PublishedFrame};
use schlieren_common::status::StreamStatus;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub const BOUNDARY: &str = "frame";

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Real-Time BOS Viewer</title>
<style>
  body { margin: 0; background: #111; color: #ddd; font-family: sans-serif; }
  main { display: flex; gap: 8px; padding: 8px; }
  figure { flex: 1; margin: 0; }
  img { width: 100%; background: #000; }
  #status { padding: 0 8px; font-family: monospace; }
</style>
</head>
<body>
<main>
  <figure><img src="/raw.mjpg" alt="raw"><figcaption>Raw</figcaption></figure>
  <figure><img src="/bos.mjpg" alt="bos"><figcaption>BOS</figcaption></figure>
</main>
<pre id="status"></pre>
<script>
  async function poll() {
    try {
      const s = await (await fetch('/status')).json();
      document.getElementById('status').textContent =
        `${s.connection}  frames=${s.frames_processed}  reconnects=${s.reconnects}` +
        `${s.recording ? '  REC' : ''}  ${s.message}`;
    } catch (e) {}
  }
  setInterval(poll, 1000);
  poll();
</script>
</body>
</html>
"#;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("failed to bind to {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Which half of a published frame a stream shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Raw,
    Processed,
}

impl StreamKind {
    fn pick(self, frame: &PublishedFrame) -> Frame {
        match self {
            StreamKind::Raw => frame.raw.clone(),
            StreamKind::Processed => frame.processed.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ViewerState {
    display: watch::Receiver<Option<Arc<PublishedFrame>>>,
    status: watch::Receiver<StreamStatus>,
    jpeg_quality: u8,
}

impl ViewerState {
    pub fn new(
        display: watch::Receiver<Option<Arc<PublishedFrame>>>,
        status: watch::Receiver<StreamStatus>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            display,
            status,
            jpeg_quality,
        }
    }
}

pub fn router(state: ViewerState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/raw.mjpg", get(raw_stream))
        .route("/bos.mjpg", get(bos_stream))
        .route("/bos.jpg", get(bos_still))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: ViewerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ViewerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ViewerError::Bind(addr.to_string(), e))?;
    info!(addr, "viewer listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ViewerError::Serve)?;
    info!("viewer stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /status
async fn status(State(state): State<Arc<ViewerState>>) -> Json<StreamStatus> {
    Json(state.status.borrow().clone())
}

/// GET /raw.mjpg
async fn raw_stream(State(state): State<Arc<ViewerState>>) -> Response {
    mjpeg_response(&state, StreamKind::Raw)
}

/// GET /bos.mjpg
async fn bos_stream(State(state): State<Arc<ViewerState>>) -> Response {
    mjpeg_response(&state, StreamKind::Processed)
}

/// GET /bos.jpg: the current processed frame as a single JPEG.
async fn bos_still(State(state): State<Arc<ViewerState>>) -> Response {
    let latest = state.display.borrow().clone();
    let Some(frame) = latest else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no frame yet").into_response();
    };
    let image = StreamKind::Processed.pick(&frame);
    let quality = state.jpeg_quality;
    match tokio::task::spawn_blocking(move || image.encode_jpeg(quality)).await {
        Ok(Ok(jpeg)) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to encode still");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn mjpeg_response(state: &ViewerState, kind: StreamKind) -> Response {
    debug!(stream = ?kind, "MJPEG client connected");
    let body = mjpeg_body(state.display.clone(), kind, state.jpeg_quality);
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

/// Multipart body that emits the current frame, then every newer one.
/// Frames published while a part is being encoded are skipped.
pub fn mjpeg_body(
    display: watch::Receiver<Option<Arc<PublishedFrame>>>,
    kind: StreamKind,
    quality: u8,
) -> Body {
    let stream = futures_util::stream::unfold((display, true), move |(mut rx, first)| async move {
        let mut first = first;
        loop {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            first = false;
            let latest = rx.borrow_and_update().clone();
            let Some(frame) = latest else {
                continue;
            };
            let image = kind.pick(&frame);
            match tokio::task::spawn_blocking(move || image.encode_jpeg(quality)).await {
                Ok(Ok(jpeg)) => {
                    let part = Ok::<_, std::io::Error>(multipart_part(&jpeg));
                    return Some((part, (rx, false)));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, seq = frame.seq, "failed to encode frame, skipping")
                }
                Err(e) => warn!(error = %e, "spawn_blocking failed"),
            }
        }
    });
    Body::from_stream(stream)
}

/// One `--frame` part carrying a JPEG.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(jpeg.len() + 96);
    out.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            jpeg.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schlieren_common::frame::Layout;
    use schlieren_common::status::ConnectionState;

    fn published(seq: u64) -> Arc<PublishedFrame> {
        Arc::new(PublishedFrame {
            seq,
            captured_at_ms: 0,
            raw: Frame::filled(8, 8, Layout::Rgb, 30),
            processed: Frame::filled(8, 8, Layout::Rgb, 220),
            differenced: true,
        })
    }

    #[test]
    fn part_framing() {
        let part = multipart_part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
    }

    #[tokio::test]
    async fn stream_sends_current_frame_then_ends_with_engine() {
        let (tx, rx) = watch::channel(Some(published(1)));
        let body = mjpeg_body(rx, StreamKind::Processed, 80);
        drop(tx);
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
        let start = bytes.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let jpeg = &bytes[start..bytes.len() - 2];
        let decoded = Frame::decode(jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
        assert!(decoded.sample(4, 4, 0) > 200);
    }

    #[tokio::test]
    async fn status_endpoint_reports_latest() {
        let (_display_tx, display) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(StreamStatus::default());
        let state = Arc::new(ViewerState::new(display, status_rx, 80));

        status_tx.send_modify(|s| {
            s.connection = ConnectionState::Error;
            s.message = "Unable to connect to stream. Retrying...".into();
        });
        let Json(reported) = status(State(state)).await;
        assert_eq!(reported.connection, ConnectionState::Error);
        assert!(reported.message.contains("Retrying"));
        let json = serde_json::to_value(&reported).unwrap();
        assert_eq!(json["connection"], "error");
    }

    #[tokio::test]
    async fn still_without_frame_is_unavailable() {
        let (_display_tx, display) = watch::channel(None);
        let (_status_tx, status_rx) = watch::channel(StreamStatus::default());
        let state = Arc::new(ViewerState::new(display, status_rx, 80));
        let response = bos_still(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

//! Live browser streaming: CDP screencast → WebSocket / MJPEG relay.
//!
//! - `WS  /stream/:session_id?url=…`  — JSON frames + control commands
//! - `GET /stream/:session_id/mjpeg`  — multipart/x-mixed-replace stream
//! - `GET /stream/:session_id/status` — lease state for the session
//!
//! Lifecycle: acquire (or reuse) a pool lease, start the CDP screencast,
//! relay frames until the client disconnects, stop the screencast, release
//! the lease only if this handler acquired it.

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::page::{
    EventScreencastFrame, ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams,
    StopScreencastParams,
};
use chromiumoxide::page::Page;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
}

/// JSON control commands accepted on the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Command {
    Navigate { url: String },
    Click { selector: String },
    Scroll { direction: Option<String> },
    Type { selector: String, text: String },
    Stop,
}

async fn start_screencast(page: &Page, quality: u32, max_width: u32) {
    let mut params = StartScreencastParams::default();
    params.format = Some(StartScreencastFormat::Jpeg);
    params.quality = Some(i64::from(quality));
    params.max_width = Some(i64::from(max_width));
    params.every_nth_frame = Some(1);
    if let Err(err) = page.execute(params).await {
        tracing::warn!(error = %err, "failed to start screencast");
    }
}

async fn stop_screencast(page: &Page) {
    if let Err(err) = page.execute(StopScreencastParams::default()).await {
        tracing::debug!(error = %err, "failed to stop screencast");
    }
}

async fn ack_frame(page: &Page, session_id: i64) {
    let _ = page.execute(ScreencastFrameAckParams::new(session_id)).await;
}

/// Resolve the page for a session: an existing lease, or a fresh one.
/// Returns the page and the lease to release on teardown (if fresh).
async fn session_page(
    state: &AppState,
    session_id: &str,
) -> Option<(Page, Option<wr_crawl::Lease>)> {
    if let Some(page) = state.pool.lookup_by_session(session_id).await {
        return Some((page, None));
    }
    let lease = state.pool.acquire(session_id).await?;
    Some((lease.page.clone(), Some(lease)))
}

async fn apply_command(page: &Page, command: Command) -> bool {
    match command {
        Command::Navigate { url } => {
            if let Err(err) = page.goto(url.as_str()).await {
                tracing::warn!(error = %err, "stream navigate failed");
            }
            true
        }
        Command::Click { selector } => {
            let script = format!(
                "(() => {{ const el = document.querySelector('{selector}'); if (el) el.click(); }})()"
            );
            let _ = page.evaluate(script).await;
            true
        }
        Command::Scroll { direction } => {
            let delta = if direction.as_deref() == Some("up") { -400 } else { 400 };
            let _ = page.evaluate(format!("window.scrollBy(0, {delta})")).await;
            true
        }
        Command::Type { selector, text } => {
            let escaped = text.replace('\\', "\\\\").replace('\'', "\\'");
            let script = format!(
                "(() => {{ const el = document.querySelector('{selector}'); if (el) {{ \
                 el.focus(); el.value = '{escaped}'; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); }} }})()"
            );
            let _ = page.evaluate(script).await;
            true
        }
        Command::Stop => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WS /stream/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn websocket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| relay(socket, state, session_id, query.url))
}

async fn relay(socket: WebSocket, state: AppState, session_id: String, url: Option<String>) {
    let Some((page, lease)) = session_page(&state, &session_id).await else {
        let (mut tx, _) = socket.split();
        let _ = tx
            .send(Message::Text(
                serde_json::json!({"type": "error", "message": "browser pool saturated"}).to_string(),
            ))
            .await;
        return;
    };

    if let Some(url) = url {
        if let Err(err) = page.goto(url.as_str()).await {
            tracing::warn!(session_id, error = %err, "initial stream navigation failed");
        }
    }

    let mut frames = match page.event_listener::<EventScreencastFrame>().await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(session_id, error = %err, "screencast listener failed");
            if let Some(lease) = lease {
                state.pool.release(&lease).await;
            }
            return;
        }
    };

    start_screencast(
        &page,
        state.settings.browser.stream_quality,
        state.settings.browser.stream_max_width,
    )
    .await;
    tracing::info!(session_id, "stream started");

    let (mut tx, mut rx) = socket.split();
    loop {
        tokio::select! {
            frame = frames.next() => {
                let Some(frame) = frame else { break };
                ack_frame(&page, frame.session_id).await;
                let payload = serde_json::json!({
                    "type": "frame",
                    "data": frame.data,
                    "timestamp_ms": chrono::Utc::now().timestamp_millis(),
                });
                if tx.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            inbound = rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Command>(&text) {
                            Ok(command) => {
                                if !apply_command(&page, command).await {
                                    break;
                                }
                            }
                            Err(_) => {
                                let _ = tx.send(Message::Text(
                                    serde_json::json!({"type": "error", "message": "unknown action"})
                                        .to_string(),
                                )).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    stop_screencast(&page).await;
    if let Some(lease) = lease {
        state.pool.release(&lease).await;
    }
    tracing::info!(session_id, "stream ended");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /stream/:session_id/mjpeg
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MJPEG_BOUNDARY: &str = "wraithframe";

pub async fn mjpeg(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // MJPEG only attaches to an existing streaming session.
    let Some(page) = state.pool.lookup_by_session(&session_id).await else {
        return Err(ApiError::not_found("no active session with that id"));
    };

    let mut frames = page
        .event_listener::<EventScreencastFrame>()
        .await
        .map_err(|e| ApiError::internal(format!("screencast listener failed: {e}")))?;

    start_screencast(
        &page,
        state.settings.browser.stream_quality,
        state.settings.browser.stream_max_width,
    )
    .await;

    let body_stream = async_stream::stream! {
        while let Some(frame) = frames.next().await {
            ack_frame(&page, frame.session_id).await;
            let Ok(jpeg) = base64::engine::general_purpose::STANDARD.decode(AsRef::<[u8]>::as_ref(&frame.data)) else {
                continue;
            };
            let mut chunk = Vec::with_capacity(jpeg.len() + 128);
            chunk.extend_from_slice(
                format!(
                    "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                    jpeg.len()
                )
                .as_bytes(),
            );
            chunk.extend_from_slice(&jpeg);
            chunk.extend_from_slice(b"\r\n");
            yield Ok::<_, std::convert::Infallible>(chunk);
        }
    };

    Ok((
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
        )],
        Body::from_stream(body_stream),
    )
        .into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /stream/:session_id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let pool = state.pool.status().await;
    let slot = pool
        .slots
        .iter()
        .find(|s| s.session_id.as_deref() == Some(session_id.as_str()));
    Json(serde_json::json!({
        "session_id": session_id,
        "active": slot.is_some(),
        "slot": slot,
        "pool": { "free": pool.free, "leased": pool.leased, "size": pool.pool_size },
    }))
}

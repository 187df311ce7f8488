//! MediaStream Server (C6). Terminates the carrier's bidirectional media
//! WebSocket for the transfer-to-human hold leg: plays a synthesized hold
//! prompt on loop while the caller waits, and VAD-buffers whatever the
//! caller says into utterances handed to [`models::external::Stt`].
//!
//! Connection bookkeeping mirrors the allocation registry `media`'s UDP
//! `Relay` used to keep in-flight sessions inspectable, generalized here to
//! one entry per `streamSid` instead of per UDP allocation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dto::media_stream::{InboundStreamEvent, OutboundMediaMessage};
use futures_util::{SinkExt, StreamExt};
use models::codec;
use models::config::{VAD_ENERGY_THRESHOLD, VAD_SILENCE_MS};
use models::external::fakes::{SilentStt, ToneTts};
use models::external::{Stt, Tts};
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// One live carrier media-stream session, tracked so the registry can report
/// how many hold legs are active and tear down their writer task on `stop`.
struct Connection {
    call_sid: String,
    call_type: String,
    hold_writer: AbortHandle,
}

#[derive(Clone)]
struct AppState {
    connections: Arc<RwLock<HashMap<String, Connection>>>,
    tts: Arc<dyn Tts>,
    stt: Arc<dyn Stt>,
}

async fn health(State(state): State<AppState>) -> String {
    let active = state.connections.read().await.len();
    format!("ok active_streams={active}")
}

async fn stream_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Renders the held prompt once via [`Tts`] and loops the resulting frames
/// at 20 ms cadence until the writer task is aborted (on `stop` or a fresh
/// `start` for the same `streamSid`).
async fn run_hold_writer(stream_sid: String, tts: Arc<dyn Tts>, outbound: tokio::sync::mpsc::Sender<Message>) {
    let prompt = match tts.speak("Please hold, we're connecting you to a representative now.", "Polly.Olivia", "en-AU").await {
        Ok(audio) => audio,
        Err(error) => {
            tracing::warn!(%error, stream_sid, "hold prompt synthesis failed, falling back to silence");
            Vec::new()
        }
    };
    let frames = codec::frame(&prompt);
    let mut loop_frames = codec::LoopingFrames::new(frames);
    let mut ticker = tokio::time::interval(Duration::from_millis(codec::FRAME_DURATION_MS as u64));

    loop {
        ticker.tick().await;
        let frame = loop_frames.next().expect("LoopingFrames is infinite");
        let payload = BASE64.encode(&frame);
        let msg = OutboundMediaMessage::new(stream_sid.clone(), payload);
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(error) => {
                tracing::error!(%error, stream_sid, "failed to serialize outbound media frame");
                continue;
            }
        };
        if outbound.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}

/// Tracks VAD state across `media` events for a single stream: accumulates
/// PCM while the caller is speaking and flushes to STT once silence has held
/// for [`VAD_SILENCE_MS`].
struct Utterance {
    buffered_pcm: Vec<i16>,
    silence_ms: u64,
}

impl Utterance {
    fn new() -> Self {
        Self { buffered_pcm: Vec::new(), silence_ms: 0 }
    }

    /// Returns the accumulated utterance once a trailing silence gap closes
    /// it out, resetting internal state for the next one.
    fn push_frame(&mut self, pcm: &[i16]) -> Option<Vec<i16>> {
        let energy = codec::frame_energy(pcm);
        if energy >= VAD_ENERGY_THRESHOLD {
            self.buffered_pcm.extend_from_slice(pcm);
            self.silence_ms = 0;
            None
        } else if self.buffered_pcm.is_empty() {
            None
        } else {
            self.silence_ms += codec::FRAME_DURATION_MS as u64;
            if self.silence_ms >= VAD_SILENCE_MS {
                Some(std::mem::take(&mut self.buffered_pcm))
            } else {
                None
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<Message>(32);

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut stream_sid: Option<String> = None;
    let mut utterance = Utterance::new();

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let event: InboundStreamEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, "malformed media-stream frame, ignoring");
                continue;
            }
        };

        match event {
            InboundStreamEvent::Connected { protocol } => {
                tracing::info!(?protocol, "media-stream connected");
            }
            InboundStreamEvent::Start { stream_sid: sid, start } => {
                let call_type = start.custom_parameters.get("callType").cloned().unwrap_or_else(|| "unknown".to_string());
                tracing::info!(stream_sid = %sid, call_sid = %start.call_sid, call_type, "media-stream started");

                let hold_writer = if call_type == "transfer" {
                    tokio::spawn(run_hold_writer(sid.clone(), state.tts.clone(), outbound_tx.clone())).abort_handle()
                } else {
                    // Non-transfer streams don't get hold music; spawn a no-op task so
                    // every connection has a uniform abort handle to tear down.
                    tokio::spawn(std::future::ready(())).abort_handle()
                };

                let mut connections = state.connections.write().await;
                if let Some(previous) = connections.remove(&sid) {
                    previous.hold_writer.abort();
                }
                connections.insert(sid.clone(), Connection { call_sid: start.call_sid.clone(), call_type, hold_writer });
                stream_sid = Some(sid);
            }
            InboundStreamEvent::Media { stream_sid: sid, media } => {
                let raw = match BASE64.decode(media.payload.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        tracing::warn!(%error, stream_sid = %sid, "malformed media payload, dropping frame");
                        continue;
                    }
                };
                let pcm = codec::decode(&raw);
                if let Some(utterance_pcm) = utterance.push_frame(&pcm) {
                    let mulaw = codec::encode(&utterance_pcm);
                    match state.stt.transcribe(&mulaw).await {
                        Ok((text, confidence)) if !text.trim().is_empty() => {
                            tracing::info!(stream_sid = %sid, confidence, "transcribed barge-in utterance: {text}");
                        }
                        Ok(_) => {}
                        Err(error) => tracing::warn!(%error, stream_sid = %sid, "transcription failed"),
                    }
                }
            }
            InboundStreamEvent::Mark { stream_sid: sid, mark } => {
                tracing::debug!(stream_sid = %sid, ?mark, "playback mark acknowledged");
            }
            InboundStreamEvent::Stop { stream_sid: sid } => {
                tracing::info!(stream_sid = %sid, "media-stream stopped");
                break;
            }
        }
    }

    if let Some(sid) = stream_sid {
        if let Some(connection) = state.connections.write().await.remove(&sid) {
            connection.hold_writer.abort();
            tracing::info!(stream_sid = %sid, call_sid = %connection.call_sid, call_type = %connection.call_type, "media-stream connection torn down");
        }
    }
    writer_task.abort();
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState { connections: Arc::new(RwLock::new(HashMap::new())), tts: Arc::new(ToneTts), stt: Arc::new(SilentStt) };

    let app = Router::new().route("/health", get(health)).route("/stream", get(stream_ws)).with_state(state);

    let port: u16 = std::env::var("MEDIA_STREAM_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8083);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "media-stream service starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind media-stream listener");
            return;
        }
    };

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "media-stream server exited with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_flushes_after_sustained_silence() {
        let mut utterance = Utterance::new();
        let loud = vec![i16::MAX / 2; codec::FRAME_SAMPLES];
        let silent = vec![0i16; codec::FRAME_SAMPLES];

        assert!(utterance.push_frame(&loud).is_none());
        assert!(!utterance.buffered_pcm.is_empty());

        let silence_frames_needed = (VAD_SILENCE_MS / codec::FRAME_DURATION_MS as u64) as usize;
        let mut flushed = None;
        for _ in 0..silence_frames_needed {
            flushed = utterance.push_frame(&silent);
        }
        assert!(flushed.is_some());
        assert!(utterance.buffered_pcm.is_empty());
    }

    #[test]
    fn leading_silence_never_starts_an_utterance() {
        let mut utterance = Utterance::new();
        let silent = vec![0i16; codec::FRAME_SAMPLES];
        for _ in 0..10 {
            assert!(utterance.push_frame(&silent).is_none());
        }
    }
}

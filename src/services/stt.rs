//! WebSocket streaming speech-to-text adapter, per spec §4.3/§6.
//!
//! New code — the teacher's `stt/mod.rs` wraps a local ONNX model, not a
//! network client — grounded on `tokio-tungstenite` (already in the
//! teacher's dependency set) and on
//! `examples/original_source/mate/services/stt/stt_whisper_remote.py` for
//! the wire shape: binary PCM out, `{"text": "..."}` JSON in, with a fixed
//! hallucination-phrase strip and a residual-length floor.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::audio::capture::CaptureGuard;
use crate::error::{MateError, Result};

/// Known dataset-bias boilerplate Whisper-style models occasionally emit
/// on silence or noise, per spec §4.3. Stripped before the length check.
const HALLUCINATION_PHRASES: &[&str] = &[
    "Untertitel der Amara.org-Community",
    "Untertitelung des ZDF",
    "Copyright WDR",
    "Vielen Dank.",
    "Thank you for watching",
    "Thanks for watching",
    "Das Video wurde von der Amara.org-Community untertitelt",
];

/// Minimum residual length (characters) for a transcript to be forwarded,
/// per spec §4.3.
const MIN_RESIDUAL_LEN: usize = 8;

#[derive(Debug, Deserialize)]
struct SttMessage {
    text: Option<String>,
}

/// Streaming speech-to-text over a WebSocket connection, per spec §4.3.
pub struct SttAdapter {
    endpoint: String,
}

impl SttAdapter {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }

    /// Open a WebSocket session, forward captured PCM frames as binary
    /// frames, and yield successive transcript deltas as the server's
    /// cumulative transcript grows, per spec §4.3/§5/§8 property 9.
    ///
    /// `on_open` fires once the socket is established; `on_close` fires
    /// exactly once when the session ends, for any reason.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Stt`] if the WebSocket connection cannot be
    /// established.
    pub async fn transcribe_stream<FOpen, FClose>(
        &self,
        mut capture: CaptureGuard,
        on_open: FOpen,
        on_close: FClose,
    ) -> Result<mpsc::Receiver<String>>
    where
        FOpen: FnOnce() + Send + 'static,
        FClose: FnOnce() + Send + 'static,
    {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.endpoint)
            .await
            .map_err(|e| MateError::Stt(format!("connect to {}: {e}", self.endpoint)))?;
        on_open();
        let (mut sink, mut source) = ws_stream.split();

        let (tx, rx) = mpsc::channel::<String>(32);

        tokio::spawn(async move {
            let mut cumulative = String::new();

            loop {
                tokio::select! {
                    frame = capture.next_frame() => {
                        match frame {
                            Some(frame) => {
                                if sink.send(Message::Binary(frame.to_le_bytes().into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    msg = source.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(delta) = handle_message(&text, &mut cumulative) {
                                    if tx.send(delta).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("stt websocket error: {e}");
                                break;
                            }
                        }
                    }
                }
            }

            let _ = sink.close().await;
            on_close();
            debug!("stt session closed, final cumulative transcript: {cumulative:?}");
        });

        Ok(rx)
    }

    /// TCP reachability only; the registry performs the full probe with a
    /// 200-OK check per spec §4.2.
    #[must_use]
    pub fn config_str(&self) -> String {
        format!("stt endpoint={}", self.endpoint)
    }
}

/// Parse one server message, strip hallucination phrases, and return the
/// new suffix if the residual text is long enough, per spec §4.3.
fn handle_message(raw: &str, cumulative: &mut String) -> Option<String> {
    let parsed: SttMessage = serde_json::from_str(raw).ok()?;
    let mut text = parsed.text?;

    for phrase in HALLUCINATION_PHRASES {
        text = text.replace(phrase, "");
    }
    let text = text.trim();

    if text.len() <= MIN_RESIDUAL_LEN {
        return None;
    }

    if text.len() <= cumulative.len() && cumulative.starts_with(text) {
        return None;
    }

    let delta = if cumulative.is_empty() || !text.starts_with(cumulative.as_str()) {
        text.to_string()
    } else {
        text[cumulative.len()..].to_string()
    };

    if delta.is_empty() {
        return None;
    }

    info!("stt delta: {delta:?}");
    *cumulative = text.to_string();
    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_hallucination_phrase() {
        let mut cumulative = String::new();
        let raw = r#"{"text":"Untertitel der Amara.org-Community hallo welt wie geht es dir"}"#;
        let delta = handle_message(raw, &mut cumulative);
        assert_eq!(delta.as_deref(), Some("hallo welt wie geht es dir"));
    }

    #[test]
    fn rejects_short_residual() {
        let mut cumulative = String::new();
        let raw = r#"{"text":"ja"}"#;
        assert_eq!(handle_message(raw, &mut cumulative), None);
    }

    #[test]
    fn emits_delta_from_cumulative() {
        let mut cumulative = "hallo".to_string();
        let raw = r#"{"text":"hallo welt wie geht"}"#;
        let delta = handle_message(raw, &mut cumulative);
        assert_eq!(delta.as_deref(), Some(" welt wie geht"));
        assert_eq!(cumulative, "hallo welt wie geht");
    }

    #[test]
    fn ignores_messages_without_text_field() {
        let mut cumulative = String::new();
        let raw = r#"{"status":"ok"}"#;
        assert_eq!(handle_message(raw, &mut cumulative), None);
    }

    #[test]
    fn concatenated_deltas_equal_final_cumulative() {
        let mut cumulative = String::new();
        let mut out = String::new();

        let d1 = handle_message(r#"{"text":"hallo welt"}"#, &mut cumulative).unwrap();
        out.push_str(&d1);
        let d2 = handle_message(r#"{"text":"hallo welt wie geht es dir"}"#, &mut cumulative).unwrap();
        out.push_str(&d2);

        assert_eq!(out, cumulative);
    }
}

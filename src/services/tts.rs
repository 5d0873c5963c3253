//! Queued text-to-speech adapter, per spec §4.3/§6.
//!
//! New code — the teacher has no TTS concern at all — grounded on the
//! OpenAI-compatible `POST /audio/speech` contract named in spec §6 and on
//! `examples/original_source/mate/services/tts/tts_openedai_speech.py` for
//! the background-worker/queue shape (`speak` enqueues, a worker drains
//! and hands bytes to the audio engine).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::audio::engine::PcmSource;
use crate::audio::AudioEngine;
use crate::error::{MateError, Result};

/// Audio container the remote synthesizer is asked to return.
#[derive(Debug, Clone, Copy)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
    input: &'a str,
}

/// Synthesize one sentence against the OpenAI-compatible endpoint and
/// return the raw audio bytes, per spec §6's TTS wire contract.
async fn synthesize(
    client: &reqwest::Client,
    endpoint: &str,
    voice: &str,
    format: AudioFormat,
    text: &str,
) -> Result<Vec<u8>> {
    let body = SpeechRequest {
        model: "tts-1",
        voice,
        response_format: format.as_str(),
        speed: 1.0,
        input: text,
    };
    let resp = client
        .post(format!("{endpoint}/audio/speech"))
        .json(&body)
        .send()
        .await
        .map_err(|e| MateError::Tts(format!("request to {endpoint}: {e}")))?;
    if !resp.status().is_success() {
        return Err(MateError::Tts(format!(
            "synthesis request failed with status {}",
            resp.status()
        )));
    }
    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| MateError::Tts(format!("reading response body: {e}")))
}

/// Queued text-to-speech adapter, per spec §4.3. `speak` enqueues a
/// sentence for background synthesis and playback; `render_sentence`
/// synthesizes to a file directly, for phrase-cache warmup.
pub struct TtsAdapter {
    endpoint: String,
    voice: String,
    client: reqwest::Client,
    tx: mpsc::UnboundedSender<String>,
    stop: Arc<AtomicBool>,
    idle: Arc<Notify>,
    pending: Arc<std::sync::atomic::AtomicUsize>,
}

impl TtsAdapter {
    /// Construct the adapter and spawn its background synthesis worker.
    #[must_use]
    pub fn new(endpoint: String, voice: String, engine: Arc<AudioEngine>) -> Self {
        let client = reqwest::Client::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let stop = Arc::new(AtomicBool::new(false));
        let idle = Arc::new(Notify::new());
        let pending = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let worker_client = client.clone();
        let worker_endpoint = endpoint.clone();
        let worker_voice = voice.clone();
        let worker_stop = stop.clone();
        let worker_idle = idle.clone();
        let worker_pending = pending.clone();

        tokio::spawn(async move {
            while let Some(sentence) = rx.recv().await {
                if worker_stop.load(Ordering::Relaxed) {
                    worker_pending.fetch_sub(1, Ordering::Relaxed);
                    if worker_pending.load(Ordering::Relaxed) == 0 {
                        worker_idle.notify_waiters();
                    }
                    continue;
                }
                match synthesize(
                    &worker_client,
                    &worker_endpoint,
                    &worker_voice,
                    AudioFormat::Mp3,
                    &sentence,
                )
                .await
                {
                    Ok(bytes) => {
                        if let Err(e) = engine.play_audio(16_000, PcmSource::Encoded(bytes)) {
                            warn!("tts playback enqueue failed: {e}");
                        }
                    }
                    Err(e) => warn!("tts synthesis failed for sentence: {e}"),
                }
                worker_pending.fetch_sub(1, Ordering::Relaxed);
                if worker_pending.load(Ordering::Relaxed) == 0 {
                    worker_idle.notify_waiters();
                }
            }
        });

        Self {
            endpoint,
            voice,
            client,
            tx,
            stop,
            idle,
            pending,
        }
    }

    /// Enqueue a sentence for background synthesis and playback.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Tts`] if the worker task has exited.
    pub fn speak(&self, sentence: &str) -> Result<()> {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(sentence.to_string())
            .map_err(|_| MateError::Tts("synthesis worker has exited".into()))
    }

    /// Synthesize `sentence` to `path` in `format`, for phrase-cache
    /// warmup; bypasses the playback queue entirely.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Tts`] on a request failure, or
    /// [`MateError::Io`] if the file cannot be written.
    pub async fn render_sentence(
        &self,
        sentence: &str,
        path: &std::path::Path,
        format: AudioFormat,
    ) -> Result<()> {
        let bytes = synthesize(&self.client, &self.endpoint, &self.voice, format, sentence).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        debug!("rendered phrase cache entry {}", path.display());
        Ok(())
    }

    /// Set the stop signal: queued-but-not-yet-synthesized sentences are
    /// dropped without being spoken, per spec §4.5's `skip_all_and_say`.
    pub fn set_stop_signal(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Clear a previously-set stop signal.
    pub fn clear_stop_signal(&self) {
        self.stop.store(false, Ordering::Relaxed);
    }

    /// Await until every enqueued sentence has been processed (spoken or
    /// dropped by the stop signal).
    pub async fn wait_until_done(&self) {
        while self.pending.load(Ordering::Relaxed) > 0 {
            self.idle.notified().await;
        }
    }

    #[must_use]
    pub fn config_str(&self) -> String {
        format!("tts endpoint={} voice={}", self.endpoint, self.voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn audio_format_maps_to_wire_string() {
        assert_eq!(AudioFormat::Mp3.as_str(), "mp3");
        assert_eq!(AudioFormat::Wav.as_str(), "wav");
    }

    #[tokio::test]
    async fn synthesize_posts_to_audio_speech_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake-mp3-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let bytes = synthesize(&client, &server.uri(), "alloy", AudioFormat::Mp3, "hallo welt")
            .await
            .expect("synthesis should succeed");
        assert_eq!(bytes, b"fake-mp3-bytes");
    }

    #[tokio::test]
    async fn synthesize_surfaces_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = synthesize(&client, &server.uri(), "alloy", AudioFormat::Mp3, "hallo")
            .await
            .unwrap_err();
        assert!(matches!(err, MateError::Tts(_)));
    }

    #[tokio::test]
    async fn render_sentence_writes_bytes_to_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"cached-phrase".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let out_path = dir.path().join("nested").join("greeting.mp3");

        let adapter = TtsAdapter {
            endpoint: server.uri(),
            voice: "alloy".to_string(),
            client: reqwest::Client::new(),
            tx: mpsc::unbounded_channel().0,
            stop: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(Notify::new()),
            pending: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        };

        adapter
            .render_sentence("hallo", &out_path, AudioFormat::Mp3)
            .await
            .expect("render should succeed");

        let written = tokio::fs::read(&out_path).await.expect("file should exist");
        assert_eq!(written, b"cached-phrase");
    }
}

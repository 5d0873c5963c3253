//! Voice I/O façade: phrase pools, earcons, and the wake-word-gated input
//! cycle, per spec §4.5.
//!
//! Grounded on `examples/original_source/mate/human_speech_agent.py`
//! (phrase pools, `_get_cache_file_name`, `get_human_input`,
//! `skip_all_and_say`) and `interrupt_speech_thread.py` (interrupt-thread
//! start/stop). The phrase-cache filename is `md5(sentence)[:8] + ".mp3"`
//! under `paths::tts_cache_dir()`, exactly as spec §4.5/§6 specifies.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::engine::PcmSource;
use crate::audio::AudioEngine;
use crate::error::{MateError, Result};
use crate::paths;
use crate::services::{SttAdapter, TtsAdapter, WakewordAdapter};

/// Phrases spoken when an in-progress response is interrupted by the wake
/// word, per spec §4.5.
const ABORT_SPEECH_CHOICES: &[&str] = &["Ja, bitte?", "Ich höre.", "Was gibt's?"];

/// Phrases spoken after the wake word is heard, before transcription.
const HI_CHOICES: &[&str] = &["Hallo!", "Ja?", "Ich höre zu."];

/// Phrases spoken when the conversation ends.
const BYE_CHOICES: &[&str] = &["Tschüss!", "Bis bald!", "Auf Wiedersehen."];

/// Phrases spoken once at startup.
const INIT_GREETINGS: &[&str] = &["Ich bin bereit.", "Hallo, wie kann ich helfen?"];

/// Phrases spoken when the sanity filter rejects the transcript.
const DID_NOT_UNDERSTAND: &[&str] = &["Das habe ich nicht verstanden.", "Wie bitte?"];

/// Phrases used to explain what the assistant can do.
const EXPLAIN_SENTENCE: &[&str] =
    &["Ich kann zuhören, antworten und Geräte steuern, wenn du mich darum bittest."];

fn pick<'a>(pool: &[&'a str]) -> &'a str {
    pool.choose(&mut rand::thread_rng()).copied().unwrap_or(pool[0])
}

/// Cache filename for a rendered phrase, per spec §4.5/§6:
/// `md5(sentence)[:8] + ".mp3"`.
#[must_use]
pub fn cache_file_name(sentence: &str) -> String {
    let digest = format!("{:x}", md5::compute(sentence.as_bytes()));
    format!("{}.mp3", &digest[..8])
}

/// Voice I/O façade combining the audio engine, wake word detector, STT
/// and TTS adapters into the input/output cycle described by spec §4.5.
pub struct SpeechAgent {
    engine: Arc<AudioEngine>,
    wakeword: Arc<WakewordAdapter>,
    tts: Arc<TtsAdapter>,
    interrupt_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl SpeechAgent {
    #[must_use]
    pub fn new(engine: Arc<AudioEngine>, wakeword: Arc<WakewordAdapter>, tts: Arc<TtsAdapter>) -> Self {
        Self {
            engine,
            wakeword,
            tts,
            interrupt_cancel: std::sync::Mutex::new(None),
        }
    }

    /// Speak one phrase through the queued TTS worker.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Tts`] if the worker has exited.
    pub fn say(&self, sentence: &str) -> Result<()> {
        self.tts.speak(sentence)
    }

    /// Speak a built-in phrase, playing the warmed-up cache entry under
    /// `tts_cache/<md5_8hex>.mp3` directly if one exists, falling back to
    /// live synthesis via [`Self::say`] on a cache miss, per spec §4.5.
    fn say_cached(&self, sentence: &str) -> Result<()> {
        let path = paths::tts_cache_dir().join(cache_file_name(sentence));
        match std::fs::read(&path) {
            Ok(bytes) => self.engine.play_audio(self.engine.sample_rate(), PcmSource::Encoded(bytes)),
            Err(_) => self.say(sentence),
        }
    }

    pub fn say_hi(&self) -> Result<()> {
        self.say_cached(pick(HI_CHOICES))
    }

    pub fn say_bye(&self, farewell: Option<&str>) -> Result<()> {
        self.say_cached(farewell.unwrap_or_else(|| pick(BYE_CHOICES)))
    }

    pub fn say_init_greeting(&self) -> Result<()> {
        self.say_cached(pick(INIT_GREETINGS))
    }

    pub fn say_did_not_understand(&self) -> Result<()> {
        self.say_cached(pick(DID_NOT_UNDERSTAND))
    }

    pub fn say_abort_speech(&self) -> Result<()> {
        self.say_cached(pick(ABORT_SPEECH_CHOICES))
    }

    pub fn say_explain(&self) -> Result<()> {
        self.say_cached(pick(EXPLAIN_SENTENCE))
    }

    /// Drop everything still queued for synthesis, then speak `sentence`
    /// once the queue has drained, per spec §4.5's `skip_all_and_say`.
    /// `sentence` is looked up in the phrase cache the same way the
    /// `say_*` helpers are, since this is always called with a pooled
    /// phrase rather than free-form LLM output.
    pub async fn skip_all_and_say(&self, sentence: &str) -> Result<()> {
        self.tts.set_stop_signal();
        self.tts.wait_until_done().await;
        self.tts.clear_stop_signal();
        self.say_cached(sentence)
    }

    /// Play a bundled earcon from `paths::sounds_dir()` by filename.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if the file cannot be read or decoded.
    fn play_sound(&self, filename: &str) -> Result<()> {
        let path = paths::sounds_dir().join(filename);
        let bytes = std::fs::read(&path)
            .map_err(|e| MateError::Audio(format!("reading sound asset {}: {e}", path.display())))?;
        self.engine.play_audio(self.engine.sample_rate(), PcmSource::Encoded(bytes))
    }

    /// Earcon played right before recording begins.
    pub fn engage_input_beep(&self) -> Result<()> {
        self.play_sound("deskviewerbeep.mp3")
    }

    /// Earcon played once the wake word has been detected.
    pub fn beep_positive(&self) -> Result<()> {
        self.play_sound("computerbeep_26.mp3")
    }

    /// Earcon played when the sanity filter rejects the input.
    pub fn beep_error(&self) -> Result<()> {
        self.play_sound("denybeep1.mp3")
    }

    /// Earcon played while the assistant is waiting on an LLM reply.
    pub fn processing_sound(&self) -> Result<()> {
        self.play_sound("processing.mp3")
    }

    /// One full input cycle, per spec §4.5: stop any in-flight recording,
    /// wait for playback to finish, beep, optionally wait for the wake
    /// word, beep again, then stream transcription deltas from `stt`.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if a capture session cannot be opened,
    /// or [`MateError::Stt`] if the transcription session cannot connect.
    pub async fn get_human_input(
        &self,
        stt: &SttAdapter,
        wait_for_wakeword: bool,
    ) -> Result<mpsc::Receiver<String>> {
        self.engine.stop_playback();
        self.engine.wait_until_playback_finished().await;
        self.engage_input_beep()?;

        if wait_for_wakeword {
            let stop = CancellationToken::new();
            let heard = self.wakeword.listen(&self.engine, stop).await?;
            if !heard {
                return Err(MateError::WakeWord("wake word listener stopped without detection".into()));
            }
        }

        self.beep_positive()?;
        let capture = self.engine.record_stream()?;
        stt.transcribe_stream(
            capture,
            || debug!("stt session opened"),
            || debug!("stt session closed"),
        )
        .await
    }

    /// Warm the phrase cache: render every built-in phrase that is not
    /// already cached, per spec §4.5.
    ///
    /// # Errors
    ///
    /// Returns the first rendering error encountered.
    pub async fn warmup_cache(&self) -> Result<()> {
        let pools: &[&[&str]] = &[
            ABORT_SPEECH_CHOICES,
            HI_CHOICES,
            BYE_CHOICES,
            INIT_GREETINGS,
            DID_NOT_UNDERSTAND,
            EXPLAIN_SENTENCE,
        ];
        let cache_dir = paths::tts_cache_dir();
        for pool in pools {
            for phrase in *pool {
                let path = cache_dir.join(cache_file_name(phrase));
                if path.exists() {
                    continue;
                }
                self.tts
                    .render_sentence(phrase, &path, crate::services::AudioFormat::Mp3)
                    .await?;
                info!("cached phrase: {phrase}");
            }
        }
        Ok(())
    }

    /// Start the background wake-word listener that interrupts an
    /// in-progress response, per spec §4.5/`interrupt_speech_thread.py`.
    /// A second call replaces the previous listener.
    pub fn start_speech_interrupt_thread(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        *self.interrupt_cancel.lock().expect("interrupt cancel lock poisoned") = Some(cancel.clone());

        let agent = self.clone();
        tokio::spawn(async move {
            match agent.wakeword.listen(&agent.engine, cancel).await {
                Ok(true) => {
                    if let Err(e) = agent.skip_all_and_say(pick(ABORT_SPEECH_CHOICES)).await {
                        warn!("abort-speech interrupt failed: {e}");
                    }
                }
                Ok(false) => debug!("interrupt listener stopped without detection"),
                Err(e) => warn!("interrupt listener error: {e}"),
            }
        });
    }

    /// Stop the background wake-word listener started by
    /// [`Self::start_speech_interrupt_thread`], if any.
    pub fn stop_speech_interrupt_thread(&self) {
        if let Some(cancel) = self.interrupt_cancel.lock().expect("interrupt cancel lock poisoned").take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_file_name_is_eight_hex_chars_plus_mp3_extension() {
        let name = cache_file_name("hallo welt");
        assert!(name.ends_with(".mp3"));
        assert_eq!(name.len(), 8 + 4);
        assert!(name[..8].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_file_name_is_deterministic() {
        assert_eq!(cache_file_name("guten tag"), cache_file_name("guten tag"));
    }

    #[test]
    fn cache_file_name_differs_for_different_input() {
        assert_ne!(cache_file_name("hallo"), cache_file_name("tschuess"));
    }

    #[test]
    fn pick_returns_a_pool_member() {
        let chosen = pick(HI_CHOICES);
        assert!(HI_CHOICES.contains(&chosen));
    }
}

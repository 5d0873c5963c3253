//! End-to-end conversation loop, per spec §4.6.
//!
//! Grounded on `examples/original_source/mate/steamdeck_mate.py`'s
//! `listen_and_choose_mode`/`ask_llm` (wake-word-gated input → sanity
//! filter → mode selection → streaming LLM reply → per-sentence TTS) and
//! on `examples/saorsa-labs-fae/src/bin/cli.rs` for `CancellationToken`
//! shutdown wiring.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::AudioEngine;
use crate::config::{ConversationConfig, VocalmateConfig};
use crate::error::{MateError, Result};
use crate::paths;
use crate::prompt::{HistoryEntry, Mode, PromptManager};
use crate::registry::{Capability, Registry};
use crate::services::{LlmAdapter, SttAdapter, TtsAdapter, WakewordAdapter};
use crate::speech_agent::SpeechAgent;
use crate::text;

/// Owns the long-lived components and runs the turn loop described by
/// spec §4.6. The TTS provider is selected once at the start of [`run`];
/// STT and LLM providers are re-selected every turn so the registry's
/// periodic reprobing can route around a provider that goes down
/// mid-session.
pub struct Orchestrator {
    engine: Arc<AudioEngine>,
    registry: Arc<Registry>,
    wakeword: Arc<WakewordAdapter>,
    prompt: AsyncMutex<PromptManager>,
    conversation: ConversationConfig,
}

impl Orchestrator {
    /// Construct every long-lived component from `config`. Does not yet
    /// touch the network: provider selection happens in [`run`] once the
    /// registry has probed at least once.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Audio`] if the audio devices cannot be opened,
    /// [`MateError::Config`] if the service manifest cannot be loaded or
    /// the wake word detector cannot be constructed.
    pub fn new(config: &VocalmateConfig) -> Result<Self> {
        let engine = Arc::new(AudioEngine::new(&config.audio)?);
        let registry = Arc::new(Registry::load(&config.registry)?);
        let wakeword = Arc::new(WakewordAdapter::new(&config.wakeword, &paths::wakeword_dir())?);
        let prompt = AsyncMutex::new(PromptManager::new(Mode::ModusSelection, config.prompt.locale.clone()));
        Ok(Self {
            engine,
            registry,
            wakeword,
            prompt,
            conversation: config.conversation.clone(),
        })
    }

    /// Run the conversation loop until `cancel` fires, per spec §4.6.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::NoProvider`] if the TTS capability has no
    /// available provider at startup, per spec §4.2/§7 (this is the one
    /// fatal provider-selection failure: without a TTS voice the
    /// assistant cannot speak at all, so it cannot proceed).
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.registry.start().await;

        let tts_record = self.registry.best(Capability::Tts)?;
        let tts_endpoint = tts_record
            .def
            .endpoint
            .clone()
            .ok_or_else(|| MateError::Config(format!("TTS service '{}' has no endpoint", tts_record.name)))?;
        let tts_voice = tts_record.def.voice.clone().unwrap_or_else(|| "alloy".to_string());
        let tts = Arc::new(TtsAdapter::new(tts_endpoint, tts_voice, self.engine.clone()));
        let speech = Arc::new(SpeechAgent::new(self.engine.clone(), self.wakeword.clone(), tts));

        let (warmup_result, greet_result) =
            tokio::join!(speech.warmup_cache(), async { speech.say_init_greeting() });
        if let Err(e) = warmup_result {
            warn!("phrase cache warmup failed: {e}");
        }
        greet_result?;

        speech.start_speech_interrupt_thread();
        let outcome = self.turn_loop(&speech, &cancel).await;
        speech.stop_speech_interrupt_thread();

        self.registry.stop().await;
        self.engine.close();
        outcome
    }

    async fn turn_loop(&self, speech: &Arc<SpeechAgent>, cancel: &CancellationToken) -> Result<()> {
        let mut wake_word_required = true;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let stt = match self.select_stt() {
                Ok(stt) => stt,
                Err(e) => {
                    warn!("no STT provider available: {e}");
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                    }
                    continue;
                }
            };

            let mut rx = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                result = speech.get_human_input(&stt, wake_word_required) => match result {
                    Ok(rx) => rx,
                    Err(e) => {
                        warn!("input cycle failed: {e}");
                        wake_word_required = true;
                        continue;
                    }
                },
            };

            let mut full_text = String::new();
            while let Some(delta) = rx.recv().await {
                full_text.push_str(&delta);
            }

            if full_text.trim().is_empty() {
                wake_word_required = true;
                continue;
            }

            if !text::is_sane_input(
                &full_text,
                f64::from(self.conversation.sanity_threshold),
                f64::from(self.conversation.sanity_threshold_short),
            ) {
                if let Err(e) = speech.beep_error() {
                    warn!("beep_error failed: {e}");
                }
                wake_word_required = false;
                continue;
            }
            wake_word_required = true;

            if text::is_conversation_ending(&full_text) {
                if let Err(e) = speech.say_bye(None) {
                    warn!("say_bye failed: {e}");
                }
                continue;
            }

            if let Err(e) = speech.processing_sound() {
                warn!("processing_sound failed: {e}");
            }

            if let Err(e) = self.handle_turn(speech, &full_text).await {
                warn!("turn failed: {e}");
                if let Err(e) = speech.say_did_not_understand() {
                    warn!("say_did_not_understand failed: {e}");
                }
            }
        }
    }

    /// Classify `user_text` into a [`Mode`] via a one-off MODUS_SELECTION
    /// call, switch the prompt manager's active mode, and stream the
    /// real reply in that mode, per spec §4.4/§4.6.
    async fn handle_turn(&self, speech: &Arc<SpeechAgent>, user_text: &str) -> Result<()> {
        let selection_reply = self.query_mode_selection(user_text).await?;
        let mode = parse_selected_mode(&selection_reply);
        info!("selected mode: {}", mode.as_str());

        {
            let mut prompt = self.prompt.lock().await;
            prompt.set_mode(mode);
        }

        if mode == Mode::Exit {
            speech.say_bye(None)?;
            return Ok(());
        }

        self.ask_llm(speech, user_text).await
    }

    /// A single, non-streamed MODUS_SELECTION query: builds an ephemeral
    /// two-entry history (the MODUS_SELECTION system prompt plus the raw
    /// user text) so classification never pollutes a mode's persistent
    /// history, per spec §4.4.
    async fn query_mode_selection(&self, user_text: &str) -> Result<String> {
        let llm = self.select_llm()?;
        let system_prompt = {
            let mut prompt = self.prompt.lock().await;
            prompt.set_mode(Mode::ModusSelection);
            prompt.get_system_prompt(&std::collections::HashMap::new())
        };
        let history = vec![
            HistoryEntry::system(system_prompt),
            HistoryEntry::user(user_text.to_string()),
        ];
        let mut chunks = llm.chat(&history).await?;
        let mut reply = String::new();
        while let Some(chunk) = chunks.recv().await {
            reply.push_str(&chunk);
        }
        Ok(reply)
    }

    /// Stream the LLM's reply for the prompt manager's current mode,
    /// speaking each completed sentence as it arrives, per spec
    /// §4.6's `ask_llm(stream_sentences=True)`.
    async fn ask_llm(&self, speech: &Arc<SpeechAgent>, user_text: &str) -> Result<()> {
        let llm = self.select_llm()?;

        let history_snapshot = {
            let mut prompt = self.prompt.lock().await;
            prompt.add_user_entry(user_text);
            prompt.reduce_history(self.conversation.history_token_limit);
            prompt.history().to_vec()
        };

        let mut chunks = llm.chat(&history_snapshot).await?;
        let mut full_response = String::new();
        let mut buffer = String::new();

        while let Some(chunk) = chunks.recv().await {
            let cleaned = text::clean_markdown(&chunk);
            full_response.push_str(&cleaned);
            buffer.push_str(&cleaned);

            let sentences = text::split_sentences(&buffer);
            if sentences.len() > 1 {
                for sentence in &sentences[..sentences.len() - 1] {
                    if let Some(sanitized) = text::sanitize_sentence(sentence) {
                        speech.say(&sanitized)?;
                    }
                }
                buffer = sentences.last().cloned().unwrap_or_default();
            }
        }

        if let Some(sanitized) = text::sanitize_sentence(&buffer) {
            speech.say(&sanitized)?;
        }

        let mut prompt = self.prompt.lock().await;
        prompt.add_assistant_entry(&full_response);
        Ok(())
    }

    fn select_stt(&self) -> Result<SttAdapter> {
        let record = self.registry.best(Capability::Stt)?;
        let endpoint = record
            .def
            .endpoint
            .clone()
            .ok_or_else(|| MateError::Config(format!("STT service '{}' has no endpoint", record.name)))?;
        Ok(SttAdapter::new(endpoint))
    }

    fn select_llm(&self) -> Result<LlmAdapter> {
        let record = self.registry.best(Capability::Llm)?;
        let endpoint = record
            .def
            .endpoint
            .clone()
            .ok_or_else(|| MateError::Config(format!("LLM service '{}' has no endpoint", record.name)))?;
        let model = record.def.ollama_model.clone().unwrap_or_else(|| "llama3".to_string());
        Ok(LlmAdapter::new(endpoint, model))
    }

    /// Render the registry's status table, for a fatal-no-provider
    /// diagnostic at startup, per spec §4.2/§7.
    #[must_use]
    pub fn status_table(&self) -> String {
        self.registry.status_table()
    }
}

/// Parse the mode name from a MODUS_SELECTION reply's first line, falling
/// back to [`Mode::Chat`] on anything [`Mode::parse`] rejects or on a mode
/// outside [`Mode::SELECTABLE`] (the model echoing `MODUS_SELECTION`
/// itself is not a valid conversation mode), per spec §4.4/§4.6.
fn parse_selected_mode(reply: &str) -> Mode {
    let first_line = reply.lines().next().unwrap_or("");
    match Mode::parse(first_line) {
        Ok(mode) if Mode::SELECTABLE.contains(&mode) => mode,
        _ => Mode::Chat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_selected_mode_reads_the_first_line() {
        assert_eq!(parse_selected_mode("EXIT"), Mode::Exit);
        assert_eq!(parse_selected_mode("chat"), Mode::Chat);
        assert_eq!(parse_selected_mode("LEDCONTROL\nTurning on the lights."), Mode::LedControl);
    }

    #[test]
    fn parse_selected_mode_falls_back_to_chat_on_garbage() {
        assert_eq!(parse_selected_mode("I'm not sure what you mean."), Mode::Chat);
        assert_eq!(parse_selected_mode(""), Mode::Chat);
        assert_eq!(parse_selected_mode("MODUS_SELECTION"), Mode::Chat);
    }
}

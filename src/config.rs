//! Configuration types for the voice assistant core.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MateError, Result};

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VocalmateConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Wake word detection (MFCC+DTW keyword spotter).
    pub wakeword: WakewordConfig,
    /// Conversation loop settings.
    pub conversation: ConversationConfig,
    /// Service registry settings.
    pub registry: RegistryConfig,
    /// Prompt/history manager settings.
    pub prompt: PromptConfig,
}

impl VocalmateConfig {
    /// Load configuration layered as: defaults, then an optional TOML file,
    /// then environment variable overrides from spec §6.
    ///
    /// A missing `path` is not an error; a present-but-unparsable file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)
                    .map_err(|e| MateError::Config(format!("{}: {e}", p.display())))?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply the environment variable overrides from spec §6 on top of
    /// whatever file-derived or default configuration already holds.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AUDIO_MICROPHONE_DEVICE") {
            self.audio.microphone_device = v.parse().ok();
        }
        if let Ok(v) = std::env::var("AUDIO_PLAYBACK_DEVICE") {
            self.audio.playback_device = v.parse().ok();
        }
        if let Ok(v) = std::env::var("WAKEWORD") {
            self.wakeword.word = v;
        }
        if let Ok(v) = std::env::var("WAKEWORD_THRESHOLD") {
            if let Ok(n) = v.parse::<u32>() {
                self.wakeword.threshold = n.min(500);
            }
        }
        if let Ok(v) = std::env::var("LLM_ENDPOINT") {
            self.registry.llm_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("STT_ENDPOINT") {
            self.registry.stt_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("TTS_ENDPOINT") {
            self.registry.tts_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("PICOVOICE_ACCESS_KEY") {
            self.wakeword.access_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENROUTER_API_KEY") {
            self.registry.api_key = Some(v);
        }
    }

    /// `LOG_LEVEL` mapped onto a `tracing` filter directive, per SPEC_FULL §A.1.
    /// `RUST_LOG`, if set, takes precedence entirely.
    #[must_use]
    pub fn log_filter() -> String {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            return rust_log;
        }
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
        match level.to_ascii_uppercase().as_str() {
            "DEBUG" => "debug",
            "INFO" => "info",
            "WARNING" => "warn",
            "ERROR" => "error",
            "CRITICAL" => "error",
            _ => "info",
        }
        .to_string()
    }
}

/// Audio I/O configuration. Capture and playback are both fixed at 16 kHz
/// mono per spec §4.1; only device selection is configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Engine sample rate in Hz, fixed at 16 kHz by spec §4.1.
    pub sample_rate: u32,
    /// Frame buffer size in samples, fixed at 1024 by spec §4.1.
    pub buffer_size: u32,
    /// Input device index. `None` or `-1` selects the first device named
    /// "default" (case-insensitive), per spec §3/§6.
    pub microphone_device: Option<i32>,
    /// Output device index, same selection rule as `microphone_device`.
    pub playback_device: Option<i32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            buffer_size: 1024,
            microphone_device: None,
            playback_device: None,
        }
    }
}

/// Wake word detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    /// Wake word name, default "computer" per spec §6.
    pub word: String,
    /// Sensitivity threshold, 0-500; sensitivity = value/500, default 250.
    pub threshold: u32,
    /// Credential for vendor wake-word backends that require one.
    pub access_key: Option<String>,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            word: "computer".to_string(),
            threshold: 250,
            access_key: None,
        }
    }
}

impl WakewordConfig {
    /// Sensitivity in `[0.0, 1.0]`, derived from `threshold / 500`.
    #[must_use]
    pub fn sensitivity(&self) -> f32 {
        self.threshold as f32 / 500.0
    }
}

/// Conversation loop tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Sanity-filter credit threshold, default 0.15 per spec §4.7.
    pub sanity_threshold: f32,
    /// Relaxed sanity threshold for inputs of at most five tokens.
    pub sanity_threshold_short: f32,
    /// Token budget passed to `reduce_history` before each LLM call.
    pub history_token_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            sanity_threshold: 0.15,
            sanity_threshold_short: 0.10,
            history_token_limit: 3000,
        }
    }
}

/// Service registry configuration: manifest location plus env-sourced
/// defaults that flow into adapter construction when the manifest omits
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path to the YAML service manifest, default `remote_services.yml`
    /// per spec §6.
    pub manifest_path: String,
    /// Probe interval in seconds, default 3 per spec §4.2.
    pub probe_interval_secs: u64,
    /// TCP probe timeout in seconds, default 2 per spec §4.2/§5.
    pub probe_timeout_secs: u64,
    pub llm_endpoint: Option<String>,
    pub stt_endpoint: Option<String>,
    pub tts_endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            manifest_path: "remote_services.yml".to_string(),
            probe_interval_secs: 3,
            probe_timeout_secs: 2,
            llm_endpoint: None,
            stt_endpoint: None,
            tts_endpoint: None,
            api_key: None,
        }
    }
}

/// Prompt/history manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Locale tag used to format the date/weekday primer prepended to
    /// each mode's system prompt.
    pub locale: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            locale: "de_DE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_spec_compliant() {
        let config = VocalmateConfig::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.buffer_size, 1024);
        assert_eq!(config.wakeword.word, "computer");
        assert_eq!(config.wakeword.threshold, 250);
        assert_eq!(config.registry.probe_interval_secs, 3);
        assert_eq!(config.registry.probe_timeout_secs, 2);
    }

    #[test]
    fn wakeword_sensitivity_is_threshold_over_500() {
        let config = WakewordConfig {
            threshold: 250,
            ..Default::default()
        };
        assert!((config.sensitivity() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        let key_word = "WAKEWORD";
        let key_thresh = "WAKEWORD_THRESHOLD";
        let orig_word = std::env::var_os(key_word);
        let orig_thresh = std::env::var_os(key_thresh);

        unsafe { std::env::set_var(key_word, "jarvis") };
        unsafe { std::env::set_var(key_thresh, "400") };
        let mut config = VocalmateConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.wakeword.word, "jarvis");
        assert_eq!(config.wakeword.threshold, 400);

        match orig_word {
            Some(v) => unsafe { std::env::set_var(key_word, v) },
            None => unsafe { std::env::remove_var(key_word) },
        }
        match orig_thresh {
            Some(v) => unsafe { std::env::set_var(key_thresh, v) },
            None => unsafe { std::env::remove_var(key_thresh) },
        }
    }

    #[test]
    fn threshold_override_is_clamped_to_500() {
        let key = "WAKEWORD_THRESHOLD";
        let orig = std::env::var_os(key);
        unsafe { std::env::set_var(key, "999") };
        let mut config = VocalmateConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.wakeword.threshold, 500);
        match orig {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = VocalmateConfig::load(Some(Path::new("/nonexistent/vocalmate.toml")))
            .expect("missing file should not be an error");
        assert_eq!(config.audio.sample_rate, 16_000);
    }

    #[test]
    fn log_filter_maps_warning_to_warn() {
        let key = "LOG_LEVEL";
        let orig = std::env::var_os(key);
        unsafe { std::env::remove_var("RUST_LOG") };
        unsafe { std::env::set_var(key, "WARNING") };
        assert_eq!(VocalmateConfig::log_filter(), "warn");
        match orig {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}

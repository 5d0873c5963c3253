//! Error types for the voice assistant core.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum MateError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Service registry error (manifest loading, probing, selection).
    #[error("registry error: {0}")]
    Registry(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model inference error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Wake word detection error.
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Configuration error. Fatal at startup per spec.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// No available provider for a required capability.
    #[error("no available provider for {0}")]
    NoProvider(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MateError>;

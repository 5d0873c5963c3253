//! Concrete capability adapters, per spec §4.3.
//!
//! Each adapter implements its own capability interface directly (no
//! shared trait object / inheritance hierarchy), per spec §9's design
//! note: a capability interface plus one concrete adapter per provider is
//! enough for this scale, and a trait object would only add indirection
//! where the registry already does the provider selection.

pub mod llm;
pub mod stt;
pub mod tts;
pub mod wakeword;

pub use llm::LlmAdapter;
pub use stt::SttAdapter;
pub use tts::{AudioFormat, TtsAdapter};
pub use wakeword::WakewordAdapter;

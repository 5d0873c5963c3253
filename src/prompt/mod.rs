//! Conversation mode and history management, per spec §4.4.
//!
//! Grounded on
//! `examples/original_source/mate/services/llm/prompt_manager_interface.py`'s
//! `Mode`/`PromptManager`/`RemoveOldestStrategy`, adapted from Python's
//! dataclass-and-ABC shape to an enum-keyed map with an explicit reduction
//! loop.

pub mod templates;
pub mod tokenizer;

use std::collections::HashMap;

use chrono::{Datelike, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::error::{MateError, Result};

/// Conversation mode, per spec's GLOSSARY and §3's `Mode` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    ModusSelection,
    Chat,
    LedControl,
    Status,
    Exit,
    GarbageInput,
}

impl Mode {
    /// All modes a response to MODUS_SELECTION may legally name.
    pub const SELECTABLE: [Mode; 5] = [
        Mode::Exit,
        Mode::GarbageInput,
        Mode::LedControl,
        Mode::Status,
        Mode::Chat,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::ModusSelection => "MODUS_SELECTION",
            Mode::Chat => "CHAT",
            Mode::LedControl => "LEDCONTROL",
            Mode::Status => "STATUS",
            Mode::Exit => "EXIT",
            Mode::GarbageInput => "GARBAGEINPUT",
        }
    }

    /// Parse a mode name. The orchestrator uses this on the first line of
    /// the model's MODUS_SELECTION reply, per spec §4.4/§4.6, falling
    /// back to [`Mode::Chat`] on an unrecognized name rather than failing
    /// the turn.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Config`] if `name` does not match a known
    /// mode.
    pub fn parse(name: &str) -> Result<Mode> {
        match name.trim().to_uppercase().as_str() {
            "MODUS_SELECTION" => Ok(Mode::ModusSelection),
            "CHAT" => Ok(Mode::Chat),
            "LEDCONTROL" => Ok(Mode::LedControl),
            "STATUS" => Ok(Mode::Status),
            "EXIT" => Ok(Mode::Exit),
            "GARBAGEINPUT" => Ok(Mode::GarbageInput),
            other => Err(MateError::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// One turn of conversation history, per spec §3.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
    #[must_use]
    pub fn system(content: String) -> Self {
        Self { role: "system".to_string(), content }
    }

    #[must_use]
    pub fn user(content: String) -> Self {
        Self { role: "user".to_string(), content }
    }

    #[must_use]
    pub fn assistant(content: String) -> Self {
        Self { role: "assistant".to_string(), content }
    }
}

/// Per-mode conversation history and system-prompt access, per spec §4.4.
pub struct PromptManager {
    current_mode: Mode,
    histories: HashMap<Mode, Vec<HistoryEntry>>,
    locale: String,
}

impl PromptManager {
    #[must_use]
    pub fn new(initial_mode: Mode, locale: String) -> Self {
        let mut manager = Self {
            current_mode: initial_mode,
            histories: HashMap::new(),
            locale,
        };
        manager.empty_history();
        manager
    }

    /// Switch the active mode. Every [`Mode`] variant has a history slot,
    /// so this cannot fail for a value already typed as `Mode`; callers
    /// parsing a mode name from the model's own MODUS_SELECTION reply
    /// should use [`Mode::parse`] first and fall back to [`Mode::Chat`]
    /// on an unrecognized name, per spec §4.4/§4.6.
    pub fn set_mode(&mut self, mode: Mode) {
        self.current_mode = mode;
        self.histories.entry(mode).or_insert_with(Vec::new);
        if self.histories[&mode].is_empty() {
            self.empty_history();
        }
        info!("mode set to {}", mode.as_str());
    }

    /// Reset the current mode's history to a single system entry: a
    /// date/weekday/locale primer followed by the mode's template, per
    /// spec §4.4.
    pub fn empty_history(&mut self) {
        let system_prompt = self.get_system_prompt(&HashMap::new());
        self.histories.insert(self.current_mode, vec![HistoryEntry::system(system_prompt)]);
    }

    /// Append a user turn to the current mode's history.
    pub fn add_user_entry(&mut self, content: &str) {
        self.history_mut().push(HistoryEntry::user(content.to_string()));
    }

    /// Append an assistant turn to the current mode's history.
    pub fn add_assistant_entry(&mut self, content: &str) {
        self.history_mut().push(HistoryEntry::assistant(content.to_string()));
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        self.histories.get(&self.current_mode).map_or(&[], Vec::as_slice)
    }

    fn history_mut(&mut self) -> &mut Vec<HistoryEntry> {
        self.histories.entry(self.current_mode).or_insert_with(Vec::new)
    }

    #[must_use]
    pub fn count_tokens(text: &str) -> usize {
        tokenizer::count_tokens(text)
    }

    #[must_use]
    pub fn count_history_tokens(&self) -> usize {
        self.history().iter().map(|e| Self::count_tokens(&e.content)).sum()
    }

    /// Remove entries oldest-first, skipping index 0 (the leading system
    /// entry), until the history fits within `token_limit`, per spec
    /// §4.4/§9's "reduction strategy must preserve index 0" invariant.
    ///
    /// If the limit cannot be reached with only the system entry
    /// remaining, logs a warning and leaves the history as-is.
    pub fn reduce_history(&mut self, token_limit: usize) {
        loop {
            let total = self.count_history_tokens();
            if total <= token_limit {
                return;
            }
            let history = self.history_mut();
            if history.len() <= 1 {
                warn!("history reduced to system entry only but still exceeds token limit ({total} > {token_limit})");
                return;
            }
            let removed = history.remove(1);
            debug!("reduced history: dropped entry to stay under {token_limit} tokens: {:?}", removed.content);
        }
    }

    /// Render the current mode's system prompt with `context` merged into
    /// a default date/weekday/locale primer, per spec §4.4.
    #[must_use]
    pub fn get_system_prompt(&self, context: &HashMap<String, String>) -> String {
        let now = Utc::now();
        let primer = format!(
            "Today is {}, {:02}.{:02}.{} at {:02}:{:02} UTC. Locale: {}.",
            weekday_name(now.weekday()),
            now.day(),
            now.month(),
            now.year(),
            now.hour(),
            now.minute(),
            self.locale,
        );
        let body = templates::system_prompt_for(self.current_mode);
        let combined = format!("{primer} {body}");
        templates::substitute_placeholders(&combined, context)
    }

    #[must_use]
    pub fn current_mode(&self) -> Mode {
        self.current_mode
    }
}

fn weekday_name(weekday: chrono::Weekday) -> &'static str {
    match weekday {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_starts_with_exactly_one_system_entry() {
        let manager = PromptManager::new(Mode::Chat, "de_DE".to_string());
        assert_eq!(manager.history().len(), 1);
        assert_eq!(manager.history()[0].role, "system");
    }

    #[test]
    fn mode_parse_roundtrips_through_as_str() {
        for mode in Mode::SELECTABLE {
            assert_eq!(Mode::parse(mode.as_str()).unwrap(), mode);
        }
    }

    #[test]
    fn mode_parse_rejects_unknown_name() {
        assert!(Mode::parse("NOT_A_MODE").is_err());
    }

    #[test]
    fn add_entries_appends_in_order() {
        let mut manager = PromptManager::new(Mode::Chat, "de_DE".to_string());
        manager.add_user_entry("hallo");
        manager.add_assistant_entry("hi!");
        let history = manager.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, "user");
        assert_eq!(history[2].role, "assistant");
    }

    #[test]
    fn reduce_history_never_removes_index_zero() {
        let mut manager = PromptManager::new(Mode::Chat, "de_DE".to_string());
        for i in 0..50 {
            manager.add_user_entry(&format!("entry number {i} with some extra padding text"));
        }
        manager.reduce_history(20);
        assert_eq!(manager.history()[0].role, "system");
    }

    #[test]
    fn reduce_history_stops_when_only_system_entry_remains() {
        let mut manager = PromptManager::new(Mode::Chat, "de_DE".to_string());
        manager.add_user_entry("a somewhat long message to push the token count up a little");
        manager.reduce_history(0);
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn switching_mode_preserves_other_modes_history() {
        let mut manager = PromptManager::new(Mode::Chat, "de_DE".to_string());
        manager.add_user_entry("hallo");
        manager.set_mode(Mode::LedControl);
        assert_eq!(manager.history().len(), 1);
        manager.set_mode(Mode::Chat);
        assert_eq!(manager.history().len(), 2);
    }
}

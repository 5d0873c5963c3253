//! Free-text utilities shared by the orchestrator, per spec §4.7.
//!
//! Grounded directly on `examples/original_source/mate/utils.py`:
//! `clean_str_from_markdown`, `is_sane_input_german`, and
//! `is_conversation_ending`, plus a minimal abbreviation-aware sentence
//! splitter for `ask_llm`'s streaming-sentence mode (spec §4.6).

use std::sync::LazyLock;

/// Core German vocabulary credited at full confidence, per spec §4.7.
/// A compact stand-in for the Swadesh-list lookup in the source; these
/// are the closed-class words (pronouns, articles, question words,
/// common verbs) that a from-scratch Swadesh table would also cover.
const COMMON_GERMAN_WORDS: &[&str] = &[
    "wie", "was", "wer", "wo", "wann", "warum", "welche", "welcher", "welches",
    "mir", "dir", "uns", "euch", "ihnen", "ihm", "ihr", "du", "ich", "er", "sie", "es", "wir",
    "ein", "eine", "einen", "einem", "einer", "eines", "der", "die", "das", "den", "dem", "des",
    "ist", "sind", "war", "waren", "wird", "werden", "wurde", "wurden", "kann", "koennen", "koennte", "koennten",
    "hat", "haben", "hatte", "hatten", "geht", "gehen", "ging", "gingen",
    "ueber", "unter", "vor", "nach", "bei", "mit", "ohne", "fuer", "gegen", "um", "zu", "aus", "von", "auf",
    "erzaehle", "erzaehl", "sage", "sag", "zeige", "zeig", "mache", "mach", "gib", "gebe",
    "bitte", "danke", "ja", "nein", "vielleicht", "heute", "morgen", "gestern",
    "uhr", "zeit", "tag", "woche", "monat", "jahr",
    "schoen", "gut", "schlecht", "gross", "klein", "alt", "neu", "kurz", "lang",
    "witz", "gedicht", "geschichte", "lied", "musik", "film", "buch",
    "mal", "einmal", "zweimal", "noch", "schon", "jetzt", "spaeter", "frueher",
    "hallo", "tschuess", "wiedersehen", "abend", "mittag",
    "mein", "dein", "sein", "unser", "euer",
];

const GERMAN_PREFIXES: &[&str] = &["ge", "be", "ver", "er", "ent", "zer", "ab", "an", "auf", "aus", "ein", "vor", "zu", "um"];
const GERMAN_SUFFIXES: &[&str] = &["en", "st", "t", "e", "et", "est", "te", "ten", "er", "ung", "keit", "heit", "lich", "bar", "ig", "isch", "sam"];

/// Phrases indicating the user wants to end the conversation, per spec
/// §4.7. Matched fuzzily at score >= 80.
const END_PHRASES: &[&str] = &[
    "stop chat", "exit", "bye", "finish",
    "halt stoppen", "chat beenden", "auf wiedersehen", "tschuess", "ende", "schluss",
];

static END_PHRASE_TABLE: LazyLock<Vec<&'static str>> = LazyLock::new(|| END_PHRASES.to_vec());

/// Clean LLM output of markdown/formatting artifacts before TTS, per spec
/// §4.7: newlines become ". ", doubled punctuation-then-period collapses,
/// a space is inserted after a sentence-ending period with no following
/// whitespace, and numbered-enumeration fragments like ".1." are removed.
#[must_use]
pub fn clean_markdown(text: &str) -> String {
    let mut buffer = text.replace('\n', ". ");
    buffer = collapse_doubled_punctuation(&buffer);
    buffer = space_after_period(&buffer);
    buffer = strip_enumeration_fragments(&buffer);
    buffer
}

/// `([?:!.,])\.` -> `$1` — drop a period immediately following another
/// punctuation mark.
fn collapse_doubled_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '?' | ':' | '!' | '.' | ',') && i + 1 < chars.len() && chars[i + 1] == '.' {
            out.push(c);
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// `(?<!\d)\.(?![\d\s])` -> `". "` — insert a space after a period that
/// isn't between two digits and isn't already followed by whitespace.
fn space_after_period(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if c == '.' {
            let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
            let next = chars.get(i + 1).copied();
            let next_is_digit_or_space = next.map(|n| n.is_ascii_digit() || n.is_whitespace()).unwrap_or(true);
            if !prev_is_digit && !next_is_digit_or_space {
                out.push(' ');
            }
        }
    }
    out
}

/// `\.\d+\.` -> `.` — collapse numbered-list fragments like "item.1.next".
fn strip_enumeration_fragments(text: &str) -> String {
    let bytes: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '.' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == '.' {
                out.push('.');
                i = j + 1;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Decide whether `input` contains a sufficient proportion of valid
/// German words to be worth sending to the LLM, per spec §4.7.
/// Credits: 1.0 for dictionary/common words, 0.9 for prefix+suffix,
/// 0.7 for suffix only, 0.5 for prefix only, 0.8 for an umlaut/ß
/// character, else 0. The threshold relaxes from `threshold` to
/// `short_threshold` for inputs with 5 or fewer qualifying tokens.
#[must_use]
pub fn is_sane_input(input: &str, threshold: f64, short_threshold: f64) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return false;
    }

    let mut valid_credit = 0.0;
    let mut total = 0usize;

    for raw_token in trimmed.split_whitespace() {
        let word: String = raw_token
            .trim_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        if word.is_empty() || !word.chars().all(|c| c.is_alphabetic()) {
            continue;
        }
        if word.chars().count() <= 1 && !matches!(word.as_str(), "a" | "i" | "o" | "u") {
            continue;
        }

        total += 1;
        if COMMON_GERMAN_WORDS.contains(&word.as_str()) {
            valid_credit += 1.0;
            continue;
        }

        let has_prefix = GERMAN_PREFIXES.iter().any(|p| word.starts_with(p));
        let has_suffix = GERMAN_SUFFIXES.iter().any(|s| word.ends_with(s));
        if has_prefix && has_suffix {
            valid_credit += 0.9;
        } else if has_suffix {
            valid_credit += 0.7;
        } else if has_prefix {
            valid_credit += 0.5;
        } else if word.contains(['ä', 'ö', 'ü', 'ß']) {
            valid_credit += 0.8;
        }
    }

    if total == 0 {
        return false;
    }

    let adjusted_threshold = if total <= 5 { short_threshold.min(threshold) } else { threshold };
    (valid_credit / total as f64) >= adjusted_threshold
}

/// Whether `sentence` fuzzily matches a known goodbye/abort phrase at
/// score >= 80, per spec §4.7.
#[must_use]
pub fn is_conversation_ending(sentence: &str) -> bool {
    let lowered = sentence.to_lowercase();
    END_PHRASE_TABLE
        .iter()
        .any(|phrase| strsim::normalized_levenshtein(&lowered, phrase) * 100.0 >= 80.0
            || lowered.contains(phrase))
}

/// Split `text` into sentences on `.`/`!`/`?` followed by whitespace or
/// end of string, per spec §9's "minimal splitter respecting
/// abbreviations" design note. Common German abbreviations are not
/// treated as sentence boundaries.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    const ABBREVIATIONS: &[&str] = &["z.b", "d.h", "u.a", "etc", "ca", "bzw", "usw"];

    let mut sentences = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let lower_tail = current.to_lowercase();
            let is_abbreviation = ABBREVIATIONS.iter().any(|a| lower_tail.trim_end_matches('.').ends_with(a));
            let at_boundary = chars.get(i + 1).map(|n| n.is_whitespace()).unwrap_or(true);
            if at_boundary && !is_abbreviation {
                sentences.push(current.trim().to_string());
                current.clear();
            }
        }
        i += 1;
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

/// Strip leading/trailing markdown emphasis punctuation and discard
/// sentences with no alphanumeric content, per spec §4.6's per-sentence
/// cleanup pass.
#[must_use]
pub fn sanitize_sentence(sentence: &str) -> Option<String> {
    let cleaned: String = sentence
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`' | '"' | '\''))
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.chars().any(|c| c.is_alphanumeric() || "äöüÄÖÜß".contains(c)) {
        Some(cleaned)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_markdown_replaces_newlines_with_period_space() {
        assert_eq!(clean_markdown("zeile eins\nzeile zwei"), "zeile eins. zeile zwei");
    }

    #[test]
    fn clean_markdown_collapses_punctuation_then_period() {
        assert_eq!(clean_markdown("wirklich?."), "wirklich?");
    }

    #[test]
    fn clean_markdown_inserts_space_after_period_between_words() {
        assert_eq!(clean_markdown("ende.anfang"), "ende. anfang");
    }

    #[test]
    fn clean_markdown_preserves_decimal_numbers() {
        assert_eq!(clean_markdown("das sind 3.5 kilometer"), "das sind 3.5 kilometer");
    }

    #[test]
    fn clean_markdown_strips_enumeration_fragments() {
        assert_eq!(clean_markdown("erstens.1.zweitens"), "erstens.zweitens");
    }

    #[test]
    fn is_sane_input_accepts_common_german_sentence() {
        assert!(is_sane_input("wie geht es dir heute", 0.15, 0.10));
    }

    #[test]
    fn is_sane_input_rejects_random_noise() {
        assert!(!is_sane_input("xqz fkjw plqr zzzz", 0.15, 0.10));
    }

    #[test]
    fn is_sane_input_rejects_empty_string() {
        assert!(!is_sane_input("   ", 0.15, 0.10));
    }

    #[test]
    fn is_sane_input_relaxes_threshold_for_short_input() {
        assert!(is_sane_input("danke", 0.15, 0.10));
    }

    #[test]
    fn is_conversation_ending_matches_german_farewell() {
        assert!(is_conversation_ending("auf wiedersehen"));
    }

    #[test]
    fn is_conversation_ending_matches_english_phrase() {
        assert!(is_conversation_ending("ok bye"));
    }

    #[test]
    fn is_conversation_ending_rejects_unrelated_sentence() {
        assert!(!is_conversation_ending("wie spaet ist es"));
    }

    #[test]
    fn split_sentences_splits_on_terminal_punctuation() {
        let sentences = split_sentences("Hallo Welt. Wie geht es dir? Gut!");
        assert_eq!(sentences, vec!["Hallo Welt.", "Wie geht es dir?", "Gut!"]);
    }

    #[test]
    fn split_sentences_keeps_trailing_incomplete_fragment() {
        let sentences = split_sentences("Erster Satz. Unvollstaendiger Rest");
        assert_eq!(sentences, vec!["Erster Satz.", "Unvollstaendiger Rest"]);
    }

    #[test]
    fn sanitize_sentence_strips_markdown_emphasis() {
        assert_eq!(sanitize_sentence("**wichtig**").as_deref(), Some("wichtig"));
    }

    #[test]
    fn sanitize_sentence_discards_punctuation_only_residue() {
        assert_eq!(sanitize_sentence("..."), None);
    }
}

//! cl100k-compatible BPE token counting, per spec §4.4's
//! `count_tokens`/`count_history_tokens` contract.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base ranks are bundled"))
}

/// Count the number of cl100k tokens `text` would encode to.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    bpe().encode_with_special_tokens(text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero_tokens() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn longer_text_has_more_tokens_than_shorter_prefix() {
        let short = count_tokens("hallo");
        let long = count_tokens("hallo wie geht es dir heute an diesem schoenen tag");
        assert!(long > short);
    }

    #[test]
    fn count_is_deterministic() {
        let text = "Es ist Montag, der 01.08.2026 um 10:00 UTC.";
        assert_eq!(count_tokens(text), count_tokens(text));
    }
}

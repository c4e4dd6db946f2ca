//! Message normalization and whole-word matching.
//!
//! A message is reduced to lowercase tokens after stripping quoting and
//! emphasis characters. Single-word phrases match a whole token; multi-word
//! phrases match a contiguous run of tokens. Substrings never match.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Quoting/emphasis characters removed before tokenizing.
static RE_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"`*_]"#).expect("strip regex"));

/// Token separators: whitespace and sentence punctuation.
static RE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s,.;:!?]+").expect("split regex"));

/// A message prepared for matching.
#[derive(Debug, Clone, Default)]
pub struct NormalizedMessage {
    /// Tokens in message order (duplicates kept) for phrase matching.
    pub sequence: Vec<String>,
    /// Unique tokens for whole-word lookups.
    pub tokens: HashSet<String>,
}

impl NormalizedMessage {
    pub fn new(raw: &str) -> Self {
        let sequence = split_tokens(raw);
        let tokens = sequence.iter().cloned().collect();
        Self { sequence, tokens }
    }

    pub fn has_token(&self, word: &str) -> bool {
        self.tokens.contains(word)
    }

    /// True when `phrase` (already tokenized) occurs in the message.
    pub fn contains_phrase(&self, phrase: &[String]) -> bool {
        match phrase {
            [] => false,
            [word] => self.tokens.contains(word),
            _ => self
                .sequence
                .windows(phrase.len())
                .any(|w| w == phrase),
        }
    }
}

/// Normalize and split into tokens, keeping order.
pub fn split_tokens(raw: &str) -> Vec<String> {
    let lowered = RE_STRIP.replace_all(raw, "").to_lowercase();
    RE_SPLIT
        .split(&lowered)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokenize a configured phrase the same way messages are tokenized.
///
/// Phrases that reduce to nothing (e.g. a lone quote character) yield an
/// empty list and never match.
pub fn phrase_tokens(phrase: &str) -> Vec<String> {
    split_tokens(phrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_emphasis_and_lowercases() {
        let m = NormalizedMessage::new("Where's the **WDL**, please?!");
        assert_eq!(m.sequence, vec!["wheres", "the", "wdl", "please"]);
        assert!(m.has_token("wheres"));
    }

    #[test]
    fn whole_word_only() {
        let m = NormalizedMessage::new("farmland downloads");
        assert!(!m.contains_phrase(&phrase_tokens("farm")));
        assert!(!m.contains_phrase(&phrase_tokens("download")));
    }

    #[test]
    fn phrases_need_contiguous_tokens() {
        let m = NormalizedMessage::new("help with the tree farm please");
        assert!(m.contains_phrase(&phrase_tokens("the tree farm")));
        assert!(!m.contains_phrase(&phrase_tokens("the nether tree farm")));

        let scattered = NormalizedMessage::new("the farm by the tree");
        assert!(!scattered.contains_phrase(&phrase_tokens("the tree farm")));
    }

    #[test]
    fn empty_phrase_never_matches() {
        let m = NormalizedMessage::new("\"quoted\"");
        assert!(phrase_tokens("\"").is_empty());
        assert!(!m.contains_phrase(&phrase_tokens("\"")));
    }
}

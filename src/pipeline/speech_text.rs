//! Text cleanup before synthesis.
//!
//! Deterministic in its input, so audio stays a function of the summary
//! text and the cache key remains sound.

use std::sync::LazyLock;

use regex::Regex;

/// Longer input is cut back to whole sentences under this length.
const MAX_SPEECH_CHARS: usize = 400;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[@#]\w+").unwrap());

/// Normalize punctuation, drop links and social handles, cap the length.
pub fn prepare_for_speech(text: &str) -> String {
    let text = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{2014}', '\u{2013}'], "-")
        .replace('&', " and ");
    let text = URL_RE.replace_all(&text, "");
    let text = HANDLE_RE.replace_all(&text, "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if text.chars().count() <= MAX_SPEECH_CHARS {
        return text;
    }
    cap_at_sentence(&text, MAX_SPEECH_CHARS)
}

/// Keep whole sentences while they fit; hard-cut at a word if even the first
/// sentence is too long.
fn cap_at_sentence(text: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for sentence in split_sentences(text) {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + sentence.chars().count() > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(sentence);
    }
    if !out.is_empty() {
        return out;
    }

    let mut cut = String::new();
    for word in text.split_whitespace() {
        if cut.chars().count() + word.chars().count() + 1 > max_chars {
            break;
        }
        if !cut.is_empty() {
            cut.push(' ');
        }
        cut.push_str(word);
    }
    cut
}

/// Split text into sentences at .!? boundaries.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    // Remainder
    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_symbols_links_and_handles() {
        let out = prepare_for_speech(
            "\u{201c}Rates\u{201d} rise \u{2014} Fed & banks react https://t.co/abc @reuters #markets",
        );
        assert_eq!(out, "\"Rates\" rise - Fed and banks react");
    }

    #[test]
    fn long_text_is_cut_at_sentence_boundary() {
        let sentence = "The committee met again this week to discuss the budget.";
        let text = vec![sentence; 20].join(" ");
        let out = prepare_for_speech(&text);
        assert!(out.chars().count() <= MAX_SPEECH_CHARS);
        assert!(out.ends_with('.'));
        assert!(out.starts_with(sentence));
    }

    #[test]
    fn single_overlong_sentence_is_cut_at_word() {
        let text = "word ".repeat(200);
        let out = prepare_for_speech(&text);
        assert!(!out.is_empty());
        assert!(out.chars().count() <= MAX_SPEECH_CHARS);
        assert!(out.ends_with("word"));
    }

    #[test]
    fn splits_on_terminal_punctuation() {
        assert_eq!(
            split_sentences("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        assert_eq!(split_sentences("Version 2.5 shipped."), vec!["Version 2.5 shipped."]);
    }
}

//! Splitting assistant replies into deliverable chunks.

use regex::Regex;
use std::sync::LazyLock;

/// How a reply is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Blank-line separated paragraphs (text replies).
    Paragraphs,
    /// Sentences (replies to voice messages).
    Sentences,
}

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("hardcoded regex"));

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【[^】]*】").expect("hardcoded regex"));

/// Split on one or more blank lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    for piece in PARAGRAPH_BREAK.split(text) {
        push_trimmed(&mut paragraphs, piece);
    }
    paragraphs
}

/// Split after `.`, `!` or `?` when followed by whitespace or the end of the
/// text. A `.` right after a digit never ends a sentence, so "2.5" and
/// "version 3. " stay intact.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        let terminator = matches!(ch, '.' | '!' | '?');
        let at_boundary = next.map_or(true, char::is_whitespace);
        let after_digit = prev.is_some_and(|p| p.is_ascii_digit());

        if terminator && at_boundary && !after_digit {
            let end = index + ch.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
        prev = Some(ch);
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Remove `【…】` citation markers left by assistant file search.
pub fn strip_citations(text: &str) -> String {
    CITATION_MARKER.replace_all(text, "").trim().to_string()
}

/// Cut chunks longer than `max_chars` characters, preferring the last
/// newline, then the last space, inside the window.
pub fn fit_to_limit(chunks: Vec<String>, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return chunks;
    }

    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut remaining = chunk.as_str();
        while remaining.chars().count() > max_chars {
            let window_end = remaining
                .char_indices()
                .nth(max_chars)
                .map_or(remaining.len(), |(i, _)| i);
            let window = &remaining[..window_end];
            let split_at = window
                .rfind('\n')
                .or_else(|| window.rfind(' '))
                .filter(|&i| i > 0)
                .unwrap_or(window_end);

            push_trimmed(&mut out, &remaining[..split_at]);
            remaining = remaining[split_at..].trim_start();
        }
        push_trimmed(&mut out, remaining);
    }
    out
}

/// Split, strip citations, drop empties and enforce the length limit.
pub fn prepare_chunks(text: &str, policy: SplitPolicy, max_chars: usize) -> Vec<String> {
    let pieces = match policy {
        SplitPolicy::Paragraphs => split_paragraphs(text),
        SplitPolicy::Sentences => split_sentences(text),
    };

    let cleaned = pieces
        .iter()
        .map(|piece| strip_citations(piece))
        .filter(|piece| !piece.is_empty())
        .collect();

    fit_to_limit(cleaned, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardcoded_patterns() {
        assert!(PARAGRAPH_BREAK.is_match("a\n\nb"));
        assert!(PARAGRAPH_BREAK.is_match("a\n \t\n\n b"));
        assert!(!PARAGRAPH_BREAK.is_match("a\nb"));
        assert!(CITATION_MARKER.is_match("x【4:0†source】"));
        assert!(!CITATION_MARKER.is_match("x[4:0]"));
    }

    #[test]
    fn test_paragraph_round_trip() {
        let chunks = prepare_chunks("A.\n\nB.\n\nC.", SplitPolicy::Paragraphs, 4096);
        assert_eq!(chunks, vec!["A.", "B.", "C."]);
    }

    #[test]
    fn test_paragraphs_with_citations() {
        let text = "First point【4:0†source】.\n\n【1:2†notes.pdf】\n\nSecond 【foo】point.";
        let chunks = prepare_chunks(text, SplitPolicy::Paragraphs, 4096);
        assert_eq!(chunks, vec!["First point.", "Second point."]);
    }

    #[test]
    fn test_paragraphs_tolerate_whitespace_lines() {
        let chunks = split_paragraphs("\n\none\n  \n\n two\nstill two\n\n\n");
        assert_eq!(chunks, vec!["one", "two\nstill two"]);
    }

    #[test]
    fn test_sentences_keep_decimals() {
        let chunks = split_sentences("It costs 2.5 dollars. Really? Yes! Version 3. ok");
        assert_eq!(
            chunks,
            vec!["It costs 2.5 dollars.", "Really?", "Yes!", "Version 3. ok"]
        );
    }

    #[test]
    fn test_sentences_without_terminator() {
        assert_eq!(split_sentences("no punctuation here"), vec!["no punctuation here"]);
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_sentence_policy_strips_citations() {
        let chunks = prepare_chunks(
            "Hello there【3:1†a】. 【9:9†b】 How are you?",
            SplitPolicy::Sentences,
            4096,
        );
        assert_eq!(chunks, vec!["Hello there.", "How are you?"]);
    }

    #[test]
    fn test_strip_citations() {
        assert_eq!(strip_citations("plain"), "plain");
        assert_eq!(strip_citations("a【x】b【y】"), "ab");
        assert_eq!(strip_citations("【only】"), "");
    }

    #[test]
    fn test_fit_to_limit_prefers_spaces() {
        let chunks = fit_to_limit(vec!["aaaa bbbb cccc".to_string()], 10);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn test_fit_to_limit_hard_cut_and_multibyte() {
        let chunks = fit_to_limit(vec!["ééééé".to_string()], 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);

        let short = fit_to_limit(vec!["short".to_string()], 100);
        assert_eq!(short, vec!["short"]);
    }
}

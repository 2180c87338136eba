//! Split an assistant reply into the separate messages sent to the channel.
//!
//! Paragraphs (separated by one or more blank lines) become individual chunks. Each chunk is
//! trimmed and stripped of file-search citation markers such as `【4:0†source】 `.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:\r?\n){2,}").expect("valid regex"));

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"【[^】]*】\s+").expect("valid regex"));

/// Lazily split `text` into chunks. The iterator is `Clone`, so the same split can be replayed.
pub fn split_message(text: &str) -> Chunks<'_> {
    Chunks { rest: text }
}

/// Iterator over the chunks of a reply. Empty chunks (e.g. whitespace-only paragraphs) are skipped.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.rest.is_empty() {
            let piece = match BLANK_LINES.find(self.rest) {
                Some(m) => {
                    let piece = &self.rest[..m.start()];
                    self.rest = &self.rest[m.end()..];
                    piece
                }
                None => std::mem::take(&mut self.rest),
            };
            if let Some(chunk) = clean_chunk(piece) {
                return Some(chunk);
            }
        }
        None
    }
}

fn clean_chunk(piece: &str) -> Option<Cow<'_, str>> {
    let trimmed = piece.trim();
    let cleaned = match CITATION_MARKER.replace_all(trimmed, "") {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
        Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
    };
    (!cleaned.is_empty()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_paragraphs_and_strips_citations() {
        let chunks: Vec<_> = split_message("Hello\n\n【1】 World").collect();
        assert_eq!(chunks, vec!["Hello", "World"]);
    }

    #[test]
    fn no_separator_yields_single_trimmed_chunk() {
        let chunks: Vec<_> = split_message("  one line\nsecond line \n").collect();
        assert_eq!(chunks, vec!["one line\nsecond line"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert_eq!(split_message("").count(), 0);
        assert_eq!(split_message(" \n\n \n\n").count(), 0);
    }

    #[test]
    fn runs_of_blank_lines_are_one_boundary() {
        let chunks: Vec<_> = split_message("a\n\n\n\n\nb\r\n\r\nc").collect();
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn strips_markers_inside_a_chunk() {
        let chunks: Vec<_> =
            split_message("Precio: $10 【4:0†precios.pdf】 por mes.\n\nGracias 【4:1†faq】  ").collect();
        assert_eq!(chunks, vec!["Precio: $10 por mes.", "Gracias 【4:1†faq】"]);
    }

    #[test]
    fn iterator_is_restartable() {
        let chunks = split_message("x\n\ny");
        let first: Vec<_> = chunks.clone().collect();
        let second: Vec<_> = chunks.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}

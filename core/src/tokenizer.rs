use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::BTreeSet;

lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

/// Lazy stream of normalized terms over a text buffer.
///
/// Letter runs are lower-cased and stemmed, digit runs are kept as-is, and
/// any other printable ASCII character becomes a one-character term.
/// Whitespace, control characters and non-ASCII bytes separate terms.
/// Cloning the stream restarts it from the clone's position.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Rewind to the start of the buffer.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    fn chop(&mut self, n: usize) -> &'a str {
        let text = self.text;
        let start = self.pos;
        self.pos += n;
        &text[start..self.pos]
    }

    fn chop_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let text = self.text;
        let bytes = text.as_bytes();
        let start = self.pos;
        let mut end = start;
        while end < bytes.len() && pred(bytes[end]) {
            end += 1;
        }
        self.pos = end;
        // Both bounds sit next to ASCII bytes, so they are char boundaries.
        &text[start..end]
    }
}

impl Iterator for Tokens<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() && !bytes[self.pos].is_ascii_graphic() {
            self.pos += 1;
        }
        let first = *bytes.get(self.pos)?;

        if first.is_ascii_digit() {
            return Some(self.chop_while(|b| b.is_ascii_digit()).to_string());
        }
        if first.is_ascii_alphabetic() {
            let word = self.chop_while(|b| b.is_ascii_alphabetic()).to_ascii_lowercase();
            return Some(stem(&word));
        }
        Some(self.chop(1).to_string())
    }
}

fn stem(word: &str) -> String {
    let stemmed = STEMMER.stem(word);
    if stemmed.is_empty() {
        return word.to_string();
    }
    stemmed.into_owned()
}

/// Start a lazy term stream over `text`.
pub fn tokens(text: &str) -> Tokens<'_> {
    Tokens::new(text)
}

/// Tokenize text into its full term sequence, in order, duplicates kept.
pub fn tokenize(text: &str) -> Vec<String> {
    tokens(text).collect()
}

/// Distinct terms of a query string, in sorted order.
pub fn query_terms(text: &str) -> BTreeSet<String> {
    tokens(text).collect()
}

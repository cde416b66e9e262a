// Copyright 2018 Datalith Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The English analyzer: split on whitespace and punctuation, lowercase,
//! drop stop words, and emit `(term, token-position, byte-offset)` in source
//! order.
//!
//! Positions count every token, including dropped stop words, so that
//! adjacency in the original text survives filtering.

use std::collections::HashSet;

lazy_static! {
    static ref STOP_WORDS: HashSet<&'static str> = {
        [
            "a", "an", "and", "are", "as", "at", "be", "but", "by", "can",
            "do", "for", "from", "had", "has", "have", "he", "her", "his",
            "how", "i", "if", "in", "into", "is", "it", "its", "me", "my",
            "no", "not", "of", "on", "or", "our", "over", "she", "so",
            "such", "that", "the", "their", "them", "then", "there",
            "these", "they", "this", "to", "under", "up", "was", "we",
            "were", "what", "when", "where", "which", "who", "whose",
            "why", "will", "with", "you", "your",
        ].iter().cloned().collect()
    };
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub term: String,
    /// Token position in the source, counting stop words.
    pub position: u32,
    /// Byte offset of the token's start in the source.
    pub offset: u32,
}

pub fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.contains(term)
}

/// Analyze `text` into index tokens.
pub fn analyze(text: &str) -> Vec<Token> {
    let mut tokens = vec![];
    let mut position: u32 = 0;
    let mut start: Option<usize> = None;

    let mut flush = |start: &mut Option<usize>, end: usize, position: &mut u32, tokens: &mut Vec<Token>| {
        if let Some(begin) = start.take() {
            let term = text[begin..end].to_lowercase();
            if !is_stop_word(&term) {
                tokens.push(Token {
                    term: term,
                    position: *position,
                    offset: begin as u32,
                });
            }
            *position += 1;
        }
    };

    for (index, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(index);
            }
        } else {
            flush(&mut start, index, &mut position, &mut tokens);
        }
    }
    flush(&mut start, text.len(), &mut position, &mut tokens);

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_lowercases_and_splits() {
        let tokens = analyze("Hello, World! hello");
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(vec!["hello", "world", "hello"], terms);
        assert_eq!(vec![0, 1, 2], tokens.iter().map(|t| t.position).collect::<Vec<u32>>());
    }

    #[test]
    fn test_stop_words_dropped_but_positions_kept() {
        let tokens = analyze("The quick red fox");
        let terms: Vec<(&str, u32)> = tokens.iter().map(|t| (t.term.as_str(), t.position)).collect();
        // "the" occupies position 0 but is not emitted.
        assert_eq!(vec![("quick", 1), ("red", 2), ("fox", 3)], terms);
    }

    #[test]
    fn test_offsets_are_byte_offsets() {
        let tokens = analyze("red  fox");
        assert_eq!(0, tokens[0].offset);
        assert_eq!(5, tokens[1].offset);
    }
}

//! Chief-complaint keyword frequency.
//!
//! No stemming and no phrase detection.

use std::collections::{BTreeSet, HashMap};

use triage_core::{normalize_stop_words, KeywordCount};

const MIN_TOKEN_CHARS: usize = 3;

/// Lowercase, drop non-alphabetic characters, split on whitespace, then
/// discard short tokens and stop words. `stop_words` must already be lowercase.
pub fn tokenize_complaint(text: &str, stop_words: &BTreeSet<String>) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();

    cleaned
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !stop_words.contains(*token))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct KeywordTally {
    count: usize,
    first_seen: usize,
}

/// Ranks keywords by count; ties keep first-seen order.
#[derive(Debug)]
pub struct KeywordFrequencyAnalyzer {
    stop_words: BTreeSet<String>,
    tallies: HashMap<String, KeywordTally>,
}

impl KeywordFrequencyAnalyzer {
    /// Stop words match case-insensitively.
    pub fn new(stop_words: &BTreeSet<String>) -> Self {
        Self {
            stop_words: normalize_stop_words(stop_words),
            tallies: HashMap::new(),
        }
    }

    pub fn record(&mut self, complaint: &str) {
        for token in tokenize_complaint(complaint, &self.stop_words) {
            let next_rank = self.tallies.len();
            self.tallies
                .entry(token)
                .or_insert(KeywordTally {
                    count: 0,
                    first_seen: next_rank,
                })
                .count += 1;
        }
    }

    pub fn top(self, n: usize) -> Vec<KeywordCount> {
        let mut ranked: Vec<(String, KeywordTally)> = self.tallies.into_iter().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        ranked
            .into_iter()
            .take(n)
            .map(|(keyword, tally)| KeywordCount {
                keyword,
                count: tally.count,
            })
            .collect()
    }
}

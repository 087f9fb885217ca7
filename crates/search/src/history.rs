#![forbid(unsafe_code)]

use std::collections::VecDeque;

pub const SUGGESTION_LIMIT: usize = 5;

/// Recently searched terms, most recent first, without duplicates.
#[derive(Debug, Clone, Default)]
pub struct SearchHistory {
    entries: VecDeque<String>,
    cap: usize,
}

impl SearchHistory {
    pub fn new(cap: usize) -> Self {
        Self { entries: VecDeque::new(), cap }
    }

    /// Record a term; a repeated term moves back to the front.
    pub fn record(&mut self, term: &str) {
        let term = term.trim();
        if term.is_empty() || self.cap == 0 {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|t| t == term) {
            self.entries.remove(pos);
        }
        self.entries.push_front(term.to_string());
        self.entries.truncate(self.cap);
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn clear(&mut self) { self.entries.clear(); }

    /// Entries containing `input` (case-insensitive), at most [`SUGGESTION_LIMIT`].
    pub fn suggestions(&self, input: &str) -> Vec<&str> {
        let needle = input.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|t| t.to_lowercase().contains(&needle))
            .take(SUGGESTION_LIMIT)
            .map(|s| s.as_str())
            .collect()
    }
}

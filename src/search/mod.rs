//! Fuzzy name matching for `fuzzy_search`.
//!
//! A candidate matches when the query is a substring of its name, or when
//! every camel-case token of the query is a prefix of a name token, in
//! order (`AddMovIn` matches `AddMovementInput`). Matches are ranked by tier
//! (exact, prefix, substring, token) and then by Jaro-Winkler similarity.

use std::cmp::Ordering;

/// Split an identifier into sub-tokens on `_`, lower→upper transitions,
/// letter/digit transitions and the end of an uppercase run
/// (`UObject` → `U`, `Object`).
pub fn split_identifier(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;

    for i in 1..bytes.len() {
        let prev = bytes[i - 1];
        let curr = bytes[i];
        let next = bytes.get(i + 1).copied();

        let boundary = curr == b'_'
            || prev == b'_'
            || (prev.is_ascii_lowercase() && curr.is_ascii_uppercase())
            || (prev.is_ascii_uppercase()
                && curr.is_ascii_uppercase()
                && next.is_some_and(|n| n.is_ascii_lowercase()))
            || (prev.is_ascii_digit() != curr.is_ascii_digit());

        if boundary {
            if start < i && bytes[start] != b'_' {
                tokens.push(&s[start..i]);
            }
            start = i;
        }
    }

    if start < s.len() && bytes[start] != b'_' {
        tokens.push(&s[start..]);
    }
    tokens.retain(|t| *t != "_");
    tokens
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Token = 1,
    Substring = 2,
    Prefix = 3,
    Exact = 4,
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    query: String,
    tokens: Vec<String>,
}

impl FuzzyMatcher {
    pub fn new(query: &str) -> Self {
        let query = query.trim();
        Self {
            query: query.to_lowercase(),
            tokens: split_identifier(query)
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    /// Longest literal fragment every match must contain. Used to narrow
    /// candidates before scoring.
    pub fn needle(&self) -> &str {
        self.tokens
            .iter()
            .rev()
            .max_by_key(|t| t.len())
            .map(String::as_str)
            .unwrap_or(&self.query)
    }

    pub fn tier(&self, name: &str) -> Option<MatchTier> {
        if self.query.is_empty() {
            return None;
        }
        let lower = name.to_lowercase();
        if lower == self.query {
            Some(MatchTier::Exact)
        } else if lower.starts_with(&self.query) {
            Some(MatchTier::Prefix)
        } else if lower.contains(&self.query) {
            Some(MatchTier::Substring)
        } else if self.tokens_match(name) {
            Some(MatchTier::Token)
        } else {
            None
        }
    }

    /// Tier plus a similarity in `[0, 1)` for ordering inside the tier.
    pub fn score(&self, name: &str) -> Option<f64> {
        let tier = self.tier(name)?;
        let similarity = strsim::jaro_winkler(&self.query, &name.to_lowercase());
        Some(tier as u8 as f64 + similarity.min(0.999_999))
    }

    fn tokens_match(&self, name: &str) -> bool {
        if self.tokens.is_empty() {
            return false;
        }
        let name_tokens: Vec<String> = split_identifier(name)
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        let mut cursor = 0;
        for token in &self.tokens {
            match name_tokens[cursor..]
                .iter()
                .position(|candidate| candidate.starts_with(token.as_str()))
            {
                Some(offset) => cursor += offset + 1,
                None => return false,
            }
        }
        true
    }
}

/// Score and order `items` by how well their names match `query`. Items
/// that do not match are dropped. Ties keep name order.
pub fn rank<T>(query: &str, items: Vec<T>, name_of: impl Fn(&T) -> &str) -> Vec<(f64, T)> {
    let matcher = FuzzyMatcher::new(query);
    let mut scored: Vec<(f64, T)> = items
        .into_iter()
        .filter_map(|item| matcher.score(name_of(&item)).map(|score| (score, item)))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| name_of(&a.1).cmp(name_of(&b.1)))
    });
    scored
}

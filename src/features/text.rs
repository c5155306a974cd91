// src/features/text.rs
// Tokenizing helpers shared by feature extraction and rule evaluation

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+(?:['’][\p{L}]+)?").expect("valid word regex"));

static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)|\n+").expect("valid sentence regex"));

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)```|^\s{4,}\S|\bfn\s+\w+\s*\(|\bdef\s+\w+\s*\(|\bfunction\s+\w+\s*\(|\bclass\s+\w+[\s:{(]|=>|::|\w+\(\)|;\s*$|\{\s*$",
    )
    .expect("valid code regex")
});

/// Lowercased text plus its token set, computed once per message
#[derive(Debug, Clone)]
pub struct TextProfile {
    pub lower: String,
    pub words: Vec<String>,
    pub word_set: HashSet<String>,
}

impl TextProfile {
    pub fn new(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words = words(&lower);
        let word_set = words.iter().cloned().collect();
        Self {
            lower,
            words,
            word_set,
        }
    }

    /// Single words match whole tokens; multi-word phrases match as substrings
    pub fn contains_term(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return false;
        }
        if term.chars().any(|c| !(c.is_alphanumeric() || c == '_')) {
            self.lower.contains(&term)
        } else {
            self.word_set.contains(&term)
        }
    }

    /// Terms from `terms` present in the text, in the order given
    pub fn matching_terms<'a>(&self, terms: &'a [String]) -> Vec<&'a str> {
        terms
            .iter()
            .filter(|t| self.contains_term(t))
            .map(|t| t.as_str())
            .collect()
    }

    /// Unique/total word ratio; 0 for text without words
    pub fn lexical_diversity(&self) -> f64 {
        if self.words.is_empty() {
            0.0
        } else {
            self.word_set.len() as f64 / self.words.len() as f64
        }
    }
}

/// Word tokens of `text`, lowercased
pub fn words(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Sentences of `text`, trimmed, without their terminating punctuation run
pub fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_END_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// True for fenced blocks, indented blocks or code-looking tokens
pub fn contains_code(text: &str) -> bool {
    CODE_RE.is_match(text)
}

/// Sentences that contain at least one of `terms`, joined back together
pub fn sentences_containing(text: &str, terms: &[&str]) -> Option<String> {
    let hits: Vec<&str> = sentences(text)
        .into_iter()
        .filter(|s| {
            let profile = TextProfile::new(s);
            terms.iter().any(|t| profile.contains_term(t))
        })
        .collect();

    if hits.is_empty() {
        None
    } else {
        Some(hits.join(". "))
    }
}

/// Extractive summary: the first (up to) three sentences longer than 20 chars
pub fn extractive_summary(text: &str) -> String {
    let picked: Vec<&str> = sentences(text)
        .into_iter()
        .filter(|s| s.chars().count() > 20)
        .take(3)
        .collect();

    if picked.is_empty() {
        text.trim().to_string()
    } else {
        picked.join(". ")
    }
}

/// Cosine similarity; 0 for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Population variance of the components
pub fn variance(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    values
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n
}

/// Jaccard overlap of two token sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

// src/features/lexicon.rs
// Term lists used for lexical feature scores and rule context indicators

use serde::{Deserialize, Serialize};

use super::text::{TextProfile, contains_code};

/// Content indicators a pattern or importance rule can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextIndicator {
    Error,
    Solution,
    Code,
    Decision,
}

impl ContextIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextIndicator::Error => "error",
            ContextIndicator::Solution => "solution",
            ContextIndicator::Code => "code",
            ContextIndicator::Decision => "decision",
        }
    }
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Extra terms appended to the built-in lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconExtensions {
    pub technical: Vec<String>,
    pub question: Vec<String>,
    pub solution: Vec<String>,
    pub importance: Vec<String>,
    pub error: Vec<String>,
    pub decision: Vec<String>,
}

/// Bilingual (English/Italian) term lists
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub technical: Vec<String>,
    pub question: Vec<String>,
    pub solution: Vec<String>,
    pub importance: Vec<String>,
    pub error: Vec<String>,
    pub decision: Vec<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            technical: terms(&[
                "api", "database", "server", "config", "configuration", "configurazione",
                "function", "funzione", "class", "module", "deploy", "docker", "kubernetes",
                "query", "schema", "endpoint", "cache", "thread", "async", "compiler",
                "library", "libreria", "framework", "algorithm", "algoritmo", "regex",
                "migration", "index", "token", "variable", "variabile", "script", "build",
                "git", "branch", "commit", "test", "performance", "memory", "latency",
            ]),
            question: terms(&[
                "how", "what", "why", "when", "where", "which", "who", "come", "cosa",
                "perché", "quando", "dove", "quale", "chi", "can you", "could you",
                "do you remember", "ti ricordi", "did we", "abbiamo", "?",
            ]),
            solution: terms(&[
                "solution", "soluzione", "fixed", "fix", "risolto", "resolved", "solved",
                "workaround", "the answer is", "works now", "funziona", "corretto",
                "patched", "the trick", "il trucco", "use this", "usa questo",
            ]),
            importance: terms(&[
                "important", "importante", "remember", "ricorda", "ricordati", "note",
                "nota", "critical", "critico", "crucial", "essential", "essenziale",
                "always", "sempre", "never", "mai", "must", "deve", "key", "chiave",
                "don't forget", "non dimenticare", "keep in mind", "tieni a mente",
            ]),
            error: terms(&[
                "error", "errore", "exception", "eccezione", "failed", "fallito", "failure",
                "crash", "bug", "panic", "traceback", "stack trace", "broken", "rotto",
                "doesn't work", "non funziona", "undefined", "null pointer", "timeout",
            ]),
            decision: terms(&[
                "decided", "deciso", "decision", "decisione", "we will", "we'll",
                "going with", "let's use", "usiamo", "scelto", "chose", "choose",
                "agreed", "concordato", "from now on", "d'ora in poi", "abbiamo deciso",
            ]),
        }
    }
}

impl Lexicon {
    pub fn with_extensions(ext: &LexiconExtensions) -> Self {
        let mut lexicon = Self::default();
        lexicon.technical.extend(ext.technical.iter().cloned());
        lexicon.question.extend(ext.question.iter().cloned());
        lexicon.solution.extend(ext.solution.iter().cloned());
        lexicon.importance.extend(ext.importance.iter().cloned());
        lexicon.error.extend(ext.error.iter().cloned());
        lexicon.decision.extend(ext.decision.iter().cloned());
        lexicon
    }

    fn hits(profile: &TextProfile, list: &[String]) -> usize {
        list.iter().filter(|t| profile.contains_term(t)).count()
    }

    /// Hit count scaled into [0,1]; three hits saturate the score
    fn score(profile: &TextProfile, list: &[String]) -> f64 {
        (Self::hits(profile, list) as f64 / 3.0).min(1.0)
    }

    pub fn technical_score(&self, profile: &TextProfile) -> f64 {
        Self::score(profile, &self.technical)
    }

    pub fn question_score(&self, profile: &TextProfile) -> f64 {
        Self::score(profile, &self.question)
    }

    pub fn solution_score(&self, profile: &TextProfile) -> f64 {
        Self::score(profile, &self.solution)
    }

    pub fn importance_hits(&self, profile: &TextProfile) -> usize {
        Self::hits(profile, &self.importance)
    }

    /// Whether a content indicator holds for the text
    pub fn indicator(&self, profile: &TextProfile, indicator: ContextIndicator) -> bool {
        match indicator {
            ContextIndicator::Error => Self::hits(profile, &self.error) > 0,
            ContextIndicator::Solution => Self::hits(profile, &self.solution) > 0,
            ContextIndicator::Code => contains_code(&profile.lower),
            ContextIndicator::Decision => Self::hits(profile, &self.decision) > 0,
        }
    }

    /// Indicators from `wanted` that hold
    pub fn indicators_present(
        &self,
        profile: &TextProfile,
        wanted: &[ContextIndicator],
    ) -> Vec<ContextIndicator> {
        wanted
            .iter()
            .copied()
            .filter(|i| self.indicator(profile, *i))
            .collect()
    }
}

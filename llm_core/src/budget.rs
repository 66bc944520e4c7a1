//! Query complexity heuristics: how many tokens to ask for and how long to wait.

use std::time::Duration;

use serde::Serialize;

const SIMPLE_KEYWORDS: &[&str] = &[
    "what is", "who is", "calculate", "plus", "minus", "times", "divided", "what's",
];
const DETAILED_KEYWORDS: &[&str] = &["explain", "describe", "how does", "tell me about", "in detail"];
/// Simple queries must also be shorter than this many characters.
const SIMPLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Simple,
    Normal,
    Detailed,
}

/// Steering passed to the text generator. `max_tokens` is advisory;
/// `timeout` bounds the whole generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationBudget {
    pub complexity: QueryComplexity,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetConfig {
    pub simple_max_tokens: u32,
    pub normal_max_tokens: u32,
    pub detailed_max_tokens: u32,
    pub fast_timeout: Duration,
    pub normal_timeout: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            simple_max_tokens: 150,
            normal_max_tokens: 500,
            detailed_max_tokens: 1200,
            fast_timeout: Duration::from_secs(5),
            normal_timeout: Duration::from_secs(15),
        }
    }
}

impl BudgetConfig {
    pub fn classify(&self, text: &str) -> QueryComplexity {
        let lower = text.to_lowercase();
        if SIMPLE_KEYWORDS.iter().any(|k| lower.contains(k)) && text.chars().count() < SIMPLE_MAX_CHARS {
            QueryComplexity::Simple
        } else if DETAILED_KEYWORDS.iter().any(|k| lower.contains(k)) {
            QueryComplexity::Detailed
        } else {
            QueryComplexity::Normal
        }
    }

    pub fn estimate(&self, text: &str) -> GenerationBudget {
        let complexity = self.classify(text);
        let (max_tokens, timeout) = match complexity {
            QueryComplexity::Simple => (self.simple_max_tokens, self.fast_timeout),
            QueryComplexity::Normal => (self.normal_max_tokens, self.normal_timeout),
            QueryComplexity::Detailed => (self.detailed_max_tokens, self.normal_timeout),
        };
        GenerationBudget {
            complexity,
            max_tokens,
            timeout,
        }
    }
}

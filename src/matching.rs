//! Name matching for entity resolution (Jira projects, Salesforce records).
//!
//! Candidates are pre-scored locally; a [`Ranker`] may then reorder a
//! shortlist. Callers fall back to the local order when ranking fails.

use async_trait::async_trait;
use serde_json::Value;

use crate::agent_core::result_extractor::extract_array;
use crate::inference::{InferenceClient, InferenceError};
use crate::tools::registry::similarity;

/// Added when one normalized string contains the other.
const CONTAINMENT_BONUS: f64 = 5.0;

/// Lowercase and collapse runs of whitespace.
pub fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Similarity of `name` to `query` on a 0..=100 scale, rounded to one decimal.
///
/// The base score is the better of whole-string similarity and the best
/// similarity against any run of `name` words as long as the query.
pub fn pre_score(query: &str, name: &str) -> f64 {
    let q = normalize(query);
    let n = normalize(name);
    if q.is_empty() || n.is_empty() {
        return 0.0;
    }
    let mut score = similarity(&q, &n).max(partial_similarity(&q, &n)) * 100.0;
    if n.contains(&q) || q.contains(&n) {
        score += CONTAINMENT_BONUS;
    }
    (score.min(100.0) * 10.0).round() / 10.0
}

fn partial_similarity(query: &str, name: &str) -> f64 {
    let q_words = query.split(' ').count();
    let n_words: Vec<&str> = name.split(' ').collect();
    if q_words >= n_words.len() {
        return 0.0;
    }
    n_words
        .windows(q_words)
        .map(|w| similarity(query, &w.join(" ")))
        .fold(0.0, f64::max)
}

// ─── Ranker ──────────────────────────────────────────────────────────────────

/// Reorders candidates with outside judgement (an LLM sub-call).
#[async_trait]
pub trait Ranker: Send + Sync {
    /// Answer `payload` under `instructions` with a JSON array.
    async fn rank(&self, instructions: &str, payload: &Value) -> Result<Vec<Value>, InferenceError>;
}

/// A [`Ranker`] backed by a single chat completion without tools.
pub struct LlmRanker {
    client: InferenceClient,
}

impl LlmRanker {
    pub fn new(client: InferenceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Ranker for LlmRanker {
    async fn rank(&self, instructions: &str, payload: &Value) -> Result<Vec<Value>, InferenceError> {
        let reply = self.client.complete_text(instructions, &payload.to_string()).await?;
        extract_array(&reply).ok_or_else(|| InferenceError::ResponseParse {
            reason: format!("ranker reply contained no JSON array: {reply}"),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_scores_full() {
        assert_eq!(pre_score("Mobile Banking", "  mobile   banking "), 100.0);
    }

    #[test]
    fn test_empty_scores_zero() {
        assert_eq!(pre_score("", "Acme"), 0.0);
        assert_eq!(pre_score("Acme", "   "), 0.0);
    }

    #[test]
    fn test_word_run_beats_similar_prefix() {
        let contained = pre_score("mobile", "Mobile Banking App");
        let lookalike = pre_score("mobile", "Mobility Ops");
        assert_eq!(contained, 100.0);
        assert!(lookalike < contained);
        assert!(lookalike > pre_score("mobile", "Payments Core"));
    }

    #[test]
    fn test_containment_bonus_is_capped() {
        let s = pre_score("Acme", "Acme Corp");
        assert!(s <= 100.0);
        assert!(s > pre_score("Acme", "Apex Corp"));
    }

    #[test]
    fn test_one_decimal() {
        let s = pre_score("allica", "Allica Bank Renewal 2025");
        assert_eq!(s, (s * 10.0).round() / 10.0);
    }
}

//! Tactical pattern detection.
//!
//! A pattern's confidence is the fraction of its marker phrases found anywhere in the
//! lower-cased text. Matching is plain substring containment, so a marker inside a longer
//! word ("melhor" in "melhorar") still counts.

use super::lexicon::{Lexicon, UNKNOWN_PATTERN_DESCRIPTION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Patterns must score strictly above this to be reported as detected.
pub const DETECTION_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern_id: String,
    pub description: String,
    pub confidence: f64,
}

/// Result of [`PatternDetector::detect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Patterns above [`DETECTION_THRESHOLD`], highest confidence first.
    pub detected_patterns: Vec<DetectedPattern>,
    pub all_scores: BTreeMap<String, f64>,
}

/// Counter-tactics for one pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSuggestions {
    pub responses: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PatternDetector {
    lexicon: Arc<Lexicon>,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(Lexicon::embedded())
    }
}

impl PatternDetector {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self { lexicon }
    }

    pub fn detect(&self, text: &str) -> DetectionResult {
        let normalized = text.to_lowercase();

        let scored: Vec<(&str, &str, f64)> = self
            .lexicon
            .patterns()
            .iter()
            .map(|pattern| {
                let matched = pattern
                    .keywords
                    .iter()
                    .filter(|keyword| normalized.contains(keyword.as_str()))
                    .count();
                let score = if pattern.keywords.is_empty() {
                    0.0
                } else {
                    matched as f64 / pattern.keywords.len() as f64
                };
                (
                    pattern.pattern_id.as_str(),
                    pattern.description.as_str(),
                    score,
                )
            })
            .collect();

        let mut detected_patterns: Vec<DetectedPattern> = scored
            .iter()
            .filter(|(_, _, score)| *score > DETECTION_THRESHOLD)
            .map(|(id, description, score)| DetectedPattern {
                pattern_id: id.to_string(),
                description: description.to_string(),
                confidence: *score,
            })
            .collect();

        // Stable: equal confidences keep catalogue order.
        detected_patterns.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let all_scores = scored
            .into_iter()
            .map(|(id, _, score)| (id.to_string(), score))
            .collect();

        DetectionResult {
            detected_patterns,
            all_scores,
        }
    }

    pub fn describe(&self, pattern_id: &str) -> &str {
        self.lexicon
            .pattern(pattern_id)
            .map(|p| p.description.as_str())
            .unwrap_or(UNKNOWN_PATTERN_DESCRIPTION)
    }

    /// Empty list for unknown pattern ids.
    pub fn suggest_responses(&self, pattern_id: &str) -> ResponseSuggestions {
        ResponseSuggestions {
            responses: self
                .lexicon
                .pattern(pattern_id)
                .map(|p| p.responses.clone())
                .unwrap_or_default(),
        }
    }
}

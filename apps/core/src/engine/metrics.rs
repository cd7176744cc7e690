//! Text metrics: lexical category counts, ratios and the tone/style composites.

use super::lexicon::{Category, Lexicon};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

// Unicode-aware word runs; punctuation and whitespace only separate tokens.
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("Invalid regex: word token pattern"));

/// Result of [`TextAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub word_count: usize,
    pub metrics: TextMetrics,
}

/// Per-category counts and ratios plus the two composite scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub positive_words: usize,
    pub negative_words: usize,
    pub power_words: usize,
    pub collaborative_words: usize,
    pub positive_ratio: f64,
    pub negative_ratio: f64,
    pub power_ratio: f64,
    pub collaborative_ratio: f64,
    /// -1 (entirely negative) to 1 (entirely positive).
    pub tone_score: f64,
    /// -1 (entirely power-assertive) to 1 (entirely collaborative).
    pub style_score: f64,
}

impl TextMetrics {
    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::Positive => self.positive_words,
            Category::Negative => self.negative_words,
            Category::Power => self.power_words,
            Category::Collaborative => self.collaborative_words,
        }
    }

    pub fn ratio(&self, category: Category) -> f64 {
        match category {
            Category::Positive => self.positive_ratio,
            Category::Negative => self.negative_ratio,
            Category::Power => self.power_ratio,
            Category::Collaborative => self.collaborative_ratio,
        }
    }
}

/// Lexicon-driven analyzer. Cheap to clone; the lexicon is shared.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    lexicon: Arc<Lexicon>,
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new(Lexicon::embedded())
    }
}

impl TextAnalyzer {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self { lexicon }
    }

    /// Lower-cased word tokens of `text`.
    pub fn tokenize(text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        WORD.find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    pub fn analyze(&self, text: &str) -> AnalysisResult {
        let tokens = Self::tokenize(text);
        let word_count = tokens.len();

        let count = |category: Category| {
            tokens
                .iter()
                .filter(|t| self.lexicon.is_marker(category, t))
                .count()
        };
        let positive = count(Category::Positive);
        let negative = count(Category::Negative);
        let power = count(Category::Power);
        let collaborative = count(Category::Collaborative);

        let ratio = |n: usize| {
            if word_count == 0 {
                0.0
            } else {
                n as f64 / word_count as f64
            }
        };

        AnalysisResult {
            word_count,
            metrics: TextMetrics {
                positive_words: positive,
                negative_words: negative,
                power_words: power,
                collaborative_words: collaborative,
                positive_ratio: ratio(positive),
                negative_ratio: ratio(negative),
                power_ratio: ratio(power),
                collaborative_ratio: ratio(collaborative),
                tone_score: balance(positive, negative),
                style_score: balance(collaborative, power),
            },
        }
    }
}

/// `(a - b) / (a + b)`, or 0 when both are zero.
fn balance(a: usize, b: usize) -> f64 {
    let total = a + b;
    if total == 0 {
        return 0.0;
    }
    (a as f64 - b as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_unicode_words() {
        let tokens = TextAnalyzer::tokenize("Benefícios MÚTUOS, já! 42x");
        assert_eq!(tokens, vec!["benefícios", "mútuos", "já", "42x"]);
    }

    #[test]
    fn test_empty_text() {
        let analyzer = TextAnalyzer::default();
        for text in ["", "   ", "... !!! ?"] {
            let result = analyzer.analyze(text);
            assert_eq!(result.word_count, 0);
            assert_eq!(result.metrics, TextMetrics::default());
        }
    }

    #[test]
    fn test_partnership_scenario() {
        let analyzer = TextAnalyzer::default();
        let result =
            analyzer.analyze("Estamos buscando uma parceria que traga benefícios mútuos.");

        assert_eq!(result.word_count, 8);
        assert!(result.metrics.positive_words >= 2);
        assert_eq!(result.metrics.negative_words, 0);
        assert!(result.metrics.tone_score > 0.0);
        assert_eq!(result.metrics.tone_score, 1.0);
        assert_eq!(result.metrics.positive_ratio, 2.0 / 8.0);
    }

    #[test]
    fn test_exact_match_only() {
        let analyzer = TextAnalyzer::default();
        // "acordos" is a marker, "acordado" is not and must not partially match "acordo".
        let result = analyzer.analyze("acordado desacordo");
        assert_eq!(result.metrics.positive_words, 0);
    }

    #[test]
    fn test_style_score_balance() {
        let analyzer = TextAnalyzer::default();
        let result = analyzer.analyze("Certamente é vital trabalharmos juntos");
        assert_eq!(result.metrics.power_words, 2);
        assert_eq!(result.metrics.collaborative_words, 1);
        assert!((result.metrics.style_score - (-1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_negative_tone() {
        let analyzer = TextAnalyzer::default();
        let result = analyzer.analyze("O risco de conflito gera perda e tensão, mas há valor.");
        assert_eq!(result.metrics.negative_words, 4);
        assert_eq!(result.metrics.positive_words, 1);
        assert!((result.metrics.tone_score - (-3.0 / 5.0)).abs() < 1e-12);
    }

    #[test]
    fn test_count_and_ratio_accessors() {
        let analyzer = TextAnalyzer::default();
        let result = analyzer.analyze("parceria");
        assert_eq!(result.metrics.count(Category::Positive), 1);
        assert_eq!(result.metrics.count(Category::Collaborative), 1);
        assert_eq!(result.metrics.ratio(Category::Collaborative), 1.0);
        assert_eq!(result.metrics.style_score, 1.0);
    }
}

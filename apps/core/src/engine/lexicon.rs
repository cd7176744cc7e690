//! Lexicon tables.
//!
//! Marker words per lexical category and the tactical pattern catalogue. The default
//! tables ship as `data/lexicon.json` and are compiled into the binary; a replacement
//! file with the same schema can be supplied through configuration.

use crate::config::EngineConfig;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::info;
use validator::Validate;

/// Lexicon schema version understood by this build.
pub const LEXICON_VERSION: u32 = 1;

/// Description returned for pattern ids that are not in the catalogue.
pub const UNKNOWN_PATTERN_DESCRIPTION: &str = "Padrão desconhecido";

const DEFAULT_LEXICON: &str = include_str!("../../data/lexicon.json");

// NOTE: expect() is acceptable here: the embedded file is fixed at compile time and
// covered by `test_embedded_lexicon_is_valid`.
static EMBEDDED: LazyLock<Arc<Lexicon>> = LazyLock::new(|| {
    Arc::new(Lexicon::from_json(DEFAULT_LEXICON).expect("Invalid embedded lexicon"))
});

/// Lexical category used by the text metrics analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Positive,
    Negative,
    Power,
    Collaborative,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Positive,
        Category::Negative,
        Category::Power,
        Category::Collaborative,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Positive => "positive",
            Category::Negative => "negative",
            Category::Power => "power",
            Category::Collaborative => "collaborative",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A named negotiation tactic and the phrases that signal it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PatternDefinition {
    #[validate(length(min = 1))]
    pub pattern_id: String,
    /// Marker phrases, lower-cased, without duplicates, in file order.
    #[validate(length(min = 1))]
    pub keywords: Vec<String>,
    #[validate(length(min = 1))]
    pub description: String,
    /// Counter-tactics suggested when the pattern shows up.
    #[serde(default)]
    pub responses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct LexiconFile {
    #[validate(range(min = 1))]
    version: u32,
    categories: BTreeMap<Category, Vec<String>>,
    #[validate(length(min = 1))]
    patterns: Vec<PatternDefinition>,
}

/// Shape of a lexicon, compared to confirm that two engines loaded the same tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconFingerprint {
    pub version: u32,
    pub markers: BTreeMap<Category, usize>,
    /// Pattern ids in catalogue order.
    pub patterns: Vec<String>,
    pub keywords: usize,
}

/// Immutable marker tables shared by the analyzer and the detector.
#[derive(Debug, Clone)]
pub struct Lexicon {
    version: u32,
    categories: HashMap<Category, HashSet<String>>,
    patterns: Vec<PatternDefinition>,
}

impl Lexicon {
    /// The lexicon compiled into the crate.
    pub fn embedded() -> Arc<Lexicon> {
        Arc::clone(&EMBEDDED)
    }

    /// Lexicon selected by the configuration: the override file if any, else the embedded one.
    pub fn load(config: &EngineConfig) -> Result<Arc<Lexicon>, AppError> {
        match &config.lexicon_path {
            Some(path) => Ok(Arc::new(Self::from_file(path)?)),
            None => Ok(Self::embedded()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path)?;
        let lexicon = Self::from_json(&raw)?;
        info!(
            "Loaded lexicon v{} from {:?} ({} patterns)",
            lexicon.version,
            path,
            lexicon.patterns.len()
        );
        Ok(lexicon)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let file: LexiconFile = serde_json::from_str(raw)?;
        file.validate()?;

        if file.version != LEXICON_VERSION {
            return Err(AppError::Lexicon(format!(
                "Unsupported lexicon version {} (expected {})",
                file.version, LEXICON_VERSION
            )));
        }

        let mut categories = HashMap::new();
        for category in Category::ALL {
            let markers: HashSet<String> = file
                .categories
                .get(&category)
                .map(|words| {
                    words
                        .iter()
                        .map(|w| w.trim().to_lowercase())
                        .filter(|w| !w.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            if markers.is_empty() {
                return Err(AppError::Lexicon(format!(
                    "Category '{}' has no markers",
                    category
                )));
            }
            categories.insert(category, markers);
        }

        let mut lexicon = Self {
            version: file.version,
            categories,
            patterns: Vec::with_capacity(file.patterns.len()),
        };
        for pattern in file.patterns {
            if lexicon.pattern(&pattern.pattern_id).is_some() {
                return Err(AppError::Lexicon(format!(
                    "Duplicate pattern id '{}'",
                    pattern.pattern_id
                )));
            }
            lexicon.patterns.push(normalize_pattern(pattern)?);
        }

        Ok(lexicon)
    }

    /// Returns a copy with `pattern` added, or replacing the definition with the same id
    /// at its original position.
    pub fn with_pattern(&self, pattern: PatternDefinition) -> Result<Self, AppError> {
        let pattern = normalize_pattern(pattern)?;
        let mut next = self.clone();
        match next
            .patterns
            .iter_mut()
            .find(|p| p.pattern_id == pattern.pattern_id)
        {
            Some(existing) => *existing = pattern,
            None => next.patterns.push(pattern),
        }
        Ok(next)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn markers(&self, category: Category) -> &HashSet<String> {
        &self.categories[&category]
    }

    /// Exact match against an already lower-cased token.
    pub fn is_marker(&self, category: Category, token: &str) -> bool {
        self.markers(category).contains(token)
    }

    pub fn patterns(&self) -> &[PatternDefinition] {
        &self.patterns
    }

    pub fn pattern(&self, pattern_id: &str) -> Option<&PatternDefinition> {
        self.patterns.iter().find(|p| p.pattern_id == pattern_id)
    }

    /// Serializes the tables in the file schema; markers are sorted so the output is stable.
    pub fn to_json(&self) -> Result<String, AppError> {
        let file = LexiconFile {
            version: self.version,
            categories: self
                .categories
                .iter()
                .map(|(category, markers)| {
                    let mut markers: Vec<String> = markers.iter().cloned().collect();
                    markers.sort();
                    (*category, markers)
                })
                .collect(),
            patterns: self.patterns.clone(),
        };
        Ok(serde_json::to_string(&file)?)
    }

    pub fn fingerprint(&self) -> LexiconFingerprint {
        LexiconFingerprint {
            version: self.version,
            markers: self
                .categories
                .iter()
                .map(|(category, markers)| (*category, markers.len()))
                .collect(),
            patterns: self.patterns.iter().map(|p| p.pattern_id.clone()).collect(),
            keywords: self.patterns.iter().map(|p| p.keywords.len()).sum(),
        }
    }
}

fn normalize_pattern(mut pattern: PatternDefinition) -> Result<PatternDefinition, AppError> {
    pattern.validate()?;

    let mut seen = HashSet::new();
    pattern.keywords = pattern
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect();

    if pattern.keywords.is_empty() {
        return Err(AppError::Lexicon(format!(
            "Pattern '{}' has no usable keywords",
            pattern.pattern_id
        )));
    }
    Ok(pattern)
}

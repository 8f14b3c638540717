//! Pattern registry for attribute query detection and key-term extraction
//!
//! This module provides:
//! - Pre-compiled classifier regexes loaded from `attributes.toml`
//! - Colour and attribute vocabularies used to pull keyword terms from a query
//! - Composite rules that turn "red eyes" into the record phrasing "eye color: red"

use crate::error::{HolocronError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in attribute vocabulary, used when no override file is configured
pub const DEFAULT_ATTRIBUTES: &str = include_str!("../../config-templates/attributes.toml");

/// Classifier pattern configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

/// Composite term rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    pub triggers: Vec<String>,
    pub template: String,
}

/// Attributes configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributesConfig {
    pub colors: Vec<String>,
    pub attribute_terms: Vec<String>,
    pub classifier: Vec<ClassifierConfig>,
    #[serde(default)]
    pub composite: Vec<CompositeConfig>,
}

/// Compiled classifier pattern
#[derive(Debug, Clone)]
pub struct CompiledClassifier {
    pub name: String,
    pub regex: Regex,
}

/// Vocabulary word with its whole-word matcher
#[derive(Debug, Clone)]
struct VocabularyTerm {
    word: String,
    regex: Regex,
}

#[derive(Debug, Clone)]
struct CompiledComposite {
    triggers: Vec<String>,
    template: String,
}

/// Where an extracted key term came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTermKind {
    /// A colour or attribute word found in the query
    Attribute,
    /// A colour combined with a feature, spelled like a record field
    Composite,
    /// No vocabulary matched; the whole query is the term
    FullQuery,
}

/// Keyword term extracted from a query
#[derive(Debug, Clone)]
pub struct KeyTerm {
    pub text: String,
    pub kind: KeyTermKind,
    matcher: Regex,
}

impl KeyTerm {
    fn new(text: String, kind: KeyTermKind) -> Result<Self> {
        let matcher = word_matcher(&text)?;
        Ok(Self {
            text,
            kind,
            matcher,
        })
    }

    /// Whether `text` contains this term as whole words (case-insensitive)
    pub fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// Case-insensitive matcher for `term`, anchored on word boundaries where
/// the term itself starts or ends with a word character
fn word_matcher(term: &str) -> Result<Regex> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if term.chars().next().is_some_and(is_word) {
        r"\b"
    } else {
        ""
    };
    let trail = if term.chars().last().is_some_and(is_word) {
        r"\b"
    } else {
        ""
    };
    let pattern = format!("(?i){}{}{}", lead, regex::escape(term), trail);
    Regex::new(&pattern)
        .map_err(|e| HolocronError::Config(format!("Invalid key term '{}': {}", term, e)))
}

/// Pattern registry with all pre-compiled patterns
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    /// Attribute query classifiers
    pub classifiers: Vec<CompiledClassifier>,
    colors: Vec<VocabularyTerm>,
    attributes: Vec<VocabularyTerm>,
    composites: Vec<CompiledComposite>,
}

impl PatternRegistry {
    /// Registry built from the bundled vocabulary
    pub fn builtin() -> Result<Self> {
        let config: AttributesConfig = toml::from_str(DEFAULT_ATTRIBUTES)?;
        Self::from_config(config)
    }

    /// Load pattern registry from a configuration file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HolocronError::Io {
            source: e,
            context: format!("Failed to read attributes config: {:?}", path),
        })?;
        let config: AttributesConfig = toml::from_str(&content)?;
        Self::from_config(config)
    }

    /// Load from `path` when given, the bundled vocabulary otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_config_file(path),
            None => Self::builtin(),
        }
    }

    /// Build pattern registry from a parsed configuration
    pub fn from_config(config: AttributesConfig) -> Result<Self> {
        if config.classifier.is_empty() {
            return Err(HolocronError::Config(
                "Attributes config defines no classifier patterns".to_string(),
            ));
        }

        let color_alternation = config
            .colors
            .iter()
            .map(|c| regex::escape(&c.to_lowercase()))
            .collect::<Vec<_>>()
            .join("|");

        let classifiers = config
            .classifier
            .iter()
            .map(|c| {
                let pattern = c.pattern.replace("{colors}", &color_alternation);
                Regex::new(&pattern)
                    .map(|regex| CompiledClassifier {
                        name: c.name.clone(),
                        regex,
                    })
                    .map_err(|e| {
                        HolocronError::Config(format!(
                            "Invalid classifier pattern '{}': {}",
                            c.name, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let vocabulary = |words: &[String]| -> Result<Vec<VocabularyTerm>> {
            words
                .iter()
                .map(|w| {
                    let word = w.to_lowercase();
                    word_matcher(&word).map(|regex| VocabularyTerm { word, regex })
                })
                .collect()
        };

        let colors = vocabulary(&config.colors)?;
        let attributes = vocabulary(&config.attribute_terms)?;

        let composites = config
            .composite
            .iter()
            .map(|c| {
                if !c.template.contains("{color}") {
                    return Err(HolocronError::Config(format!(
                        "Composite template '{}' has no {{color}} placeholder",
                        c.template
                    )));
                }
                Ok(CompiledComposite {
                    triggers: c.triggers.iter().map(|t| t.to_lowercase()).collect(),
                    template: c.template.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            classifiers,
            colors,
            attributes,
            composites,
        })
    }

    /// Whether the query asks about a physical or biographical attribute
    pub fn is_attribute_query(&self, query: &str) -> bool {
        self.classifiers.iter().any(|c| c.regex.is_match(query))
    }

    /// Name of the first classifier that matches, for diagnostics
    pub fn matching_classifier(&self, query: &str) -> Option<&str> {
        self.classifiers
            .iter()
            .find(|c| c.regex.is_match(query))
            .map(|c| c.name.as_str())
    }

    /// Keyword terms for the keyword search path.
    ///
    /// Colour words come first, then attribute words, then composites. A query
    /// with none of them yields a single [`KeyTermKind::FullQuery`] term.
    pub fn extract_key_terms(&self, query: &str) -> Result<Vec<KeyTerm>> {
        let found = |vocab: &[VocabularyTerm]| -> Vec<String> {
            vocab
                .iter()
                .filter(|t| t.regex.is_match(query))
                .map(|t| t.word.clone())
                .collect()
        };

        let colors = found(&self.colors);
        let attributes = found(&self.attributes);

        let mut texts: Vec<(String, KeyTermKind)> = Vec::new();
        let mut push = |text: String, kind: KeyTermKind| {
            if !texts.iter().any(|(t, _)| *t == text) {
                texts.push((text, kind));
            }
        };

        for color in &colors {
            push(color.clone(), KeyTermKind::Attribute);
        }
        for attribute in &attributes {
            push(attribute.clone(), KeyTermKind::Attribute);
        }
        for composite in &self.composites {
            if composite.triggers.iter().any(|t| attributes.contains(t)) {
                for color in &colors {
                    push(
                        composite.template.replace("{color}", color),
                        KeyTermKind::Composite,
                    );
                }
            }
        }

        if texts.is_empty() {
            let whole = query.trim();
            if whole.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![KeyTerm::new(
                whole.to_string(),
                KeyTermKind::FullQuery,
            )?]);
        }

        texts
            .into_iter()
            .map(|(text, kind)| KeyTerm::new(text, kind))
            .collect()
    }
}

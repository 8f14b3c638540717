//! Entity corpus loaded from the static Star Wars dataset
//!
//! The corpus is a single JSON document whose top-level keys are entity
//! collections (`characters`, `films`, ...) and relationship-edge collections
//! (`films_characters`, ...). It is read wholly into memory at startup and
//! never mutated afterwards.

mod graph;

pub use graph::{relations, Relation, RelationSource};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Number of characters of a malformed document kept for diagnostics
const PREVIEW_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Failed to read corpus {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Corpus is not valid JSON at line {line}, column {column} ({byte_len} bytes): {message}")]
    Parse {
        line: usize,
        column: usize,
        byte_len: usize,
        preview: String,
        message: String,
    },

    #[error("Corpus root must be a JSON object")]
    NotAnObject,

    #[error("Collection '{collection}' is malformed: {reason}")]
    MalformedCollection { collection: String, reason: String },

    #[error("Record {index} in '{collection}' has no integer id")]
    MissingId { collection: String, index: usize },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: i64 },
}

/// Entity collections known to the projector and the data API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Characters,
    Films,
    Planets,
    Species,
    Starships,
    Vehicles,
}

impl EntityKind {
    /// Every kind, in ingestion order
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Characters,
        EntityKind::Films,
        EntityKind::Planets,
        EntityKind::Species,
        EntityKind::Starships,
        EntityKind::Vehicles,
    ];

    /// Top-level key of the collection in the corpus document
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Characters => "characters",
            EntityKind::Films => "films",
            EntityKind::Planets => "planets",
            EntityKind::Species => "species",
            EntityKind::Starships => "starships",
            EntityKind::Vehicles => "vehicles",
        }
    }

    /// Singular noun used in prose
    pub fn singular(&self) -> &'static str {
        match self {
            EntityKind::Characters => "character",
            EntityKind::Films => "film",
            EntityKind::Planets => "planet",
            EntityKind::Species => "species",
            EntityKind::Starships => "starship",
            EntityKind::Vehicles => "vehicle",
        }
    }

    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for EntityKind {
    type Err = CorpusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_collection(s).ok_or_else(|| CorpusError::UnknownCollection(s.to_string()))
    }
}

/// A scalar field value on an entity record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Null,
    /// Booleans, arrays and nested objects; carried through but never projected
    Other(Value),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view, accepting numeric strings as the dataset mixes both
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) => n.as_i64(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => FieldValue::Text(s),
            Value::Number(n) => FieldValue::Number(n),
            Value::Null => FieldValue::Null,
            other => FieldValue::Other(other),
        }
    }
}

/// One domain object, fields kept in source order
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: i64,
    pub fields: Vec<(String, FieldValue)>,
}

impl EntityRecord {
    /// Parse a JSON object; `index` is only used for error reporting
    pub fn from_value(collection: &str, index: usize, value: &Value) -> Result<Self, CorpusError> {
        let object = value
            .as_object()
            .ok_or_else(|| CorpusError::MalformedCollection {
                collection: collection.to_string(),
                reason: format!("record {} is not an object", index),
            })?;

        let id = object
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CorpusError::MissingId {
                collection: collection.to_string(),
                index,
            })?;

        let fields = object
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::from(v.clone())))
            .collect();

        Ok(Self { id, fields })
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// `name` for most kinds, `title` for films
    pub fn display_name(&self) -> Option<&str> {
        self.get("name")
            .and_then(FieldValue::as_str)
            .or_else(|| self.get("title").and_then(FieldValue::as_str))
            .filter(|s| !s.trim().is_empty())
    }

    /// JSON object view used by the data API
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            let json = serde_json::to_value(value).unwrap_or(Value::Null);
            map.insert(name.clone(), json);
        }
        Value::Object(map)
    }
}

/// `{id, name}` pair returned by relationship lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: i64,
    pub name: String,
}

/// The full in-memory dataset
#[derive(Debug, Clone)]
pub struct Corpus {
    raw: Map<String, Value>,
    entities: BTreeMap<EntityKind, Vec<EntityRecord>>,
    fingerprint: String,
}

impl Corpus {
    /// Parse a corpus document
    pub fn from_json_str(content: &str) -> Result<Self, CorpusError> {
        let value: Value = serde_json::from_str(content).map_err(|e| {
            let preview: String = content.chars().take(PREVIEW_CHARS).collect();
            tracing::error!(
                line = e.line(),
                column = e.column(),
                byte_len = content.len(),
                preview = %preview,
                "Corpus JSON parse failed: {}",
                e
            );
            CorpusError::Parse {
                line: e.line(),
                column: e.column(),
                byte_len: content.len(),
                preview,
                message: e.to_string(),
            }
        })?;

        let mut corpus = Self::from_value(value)?;
        corpus.fingerprint = blake3::hash(content.as_bytes()).to_hex().to_string();
        Ok(corpus)
    }

    /// Build a corpus from an already-parsed document
    pub fn from_value(value: Value) -> Result<Self, CorpusError> {
        let raw = match value {
            Value::Object(map) => map,
            _ => return Err(CorpusError::NotAnObject),
        };

        let mut entities = BTreeMap::new();
        for kind in EntityKind::ALL {
            let Some(collection) = raw.get(kind.collection()) else {
                continue;
            };
            let rows = collection
                .as_array()
                .ok_or_else(|| CorpusError::MalformedCollection {
                    collection: kind.collection().to_string(),
                    reason: "expected an array".to_string(),
                })?;
            let records = rows
                .iter()
                .enumerate()
                .map(|(i, row)| EntityRecord::from_value(kind.collection(), i, row))
                .collect::<Result<Vec<_>, _>>()?;
            entities.insert(kind, records);
        }

        for key in raw.keys() {
            if EntityKind::from_collection(key).is_none() && !graph::is_edge_collection(key) {
                tracing::debug!("Ignoring unrecognised corpus collection '{}'", key);
            }
        }

        let fingerprint = blake3::hash(Value::Object(raw.clone()).to_string().as_bytes())
            .to_hex()
            .to_string();

        Ok(Self {
            raw,
            entities,
            fingerprint,
        })
    }

    /// Read and parse a corpus file
    pub async fn load(path: &Path) -> Result<Self, CorpusError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CorpusError::Read {
                path: path.display().to_string(),
                source: e,
            })?;
        Self::from_json_str(&content)
    }

    /// Load with a bounded number of retries and exponential backoff
    pub async fn load_with_retry(
        path: &Path,
        retries: u32,
        backoff: Duration,
    ) -> Result<Self, CorpusError> {
        let mut attempt = 0;
        loop {
            match Self::load(path).await {
                Ok(corpus) => return Ok(corpus),
                Err(e) if attempt < retries => {
                    let delay = backoff * 2u32.saturating_pow(attempt);
                    tracing::warn!(
                        "Corpus load attempt {}/{} failed: {}; retrying in {:?}",
                        attempt + 1,
                        retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// BLAKE3 hex digest of the source document
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entities(&self, kind: EntityKind) -> &[EntityRecord] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entity(&self, kind: EntityKind, id: i64) -> Option<&EntityRecord> {
        self.entities(kind).iter().find(|e| e.id == id)
    }

    /// Total number of entities across every known collection
    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Raw top-level collection, if present
    pub fn collection(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Entities of `kind` whose display name contains `term` (case-insensitive)
    pub fn search_by_name(&self, kind: EntityKind, term: &str) -> Vec<&EntityRecord> {
        let needle = term.to_lowercase();
        self.entities(kind)
            .iter()
            .filter(|e| {
                e.display_name()
                    .map(|n| n.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Entities of `target` related to entity `id` of `kind`
    pub fn related(
        &self,
        kind: EntityKind,
        id: i64,
        target: EntityKind,
    ) -> Result<Vec<EntitySummary>, CorpusError> {
        let entity = self
            .entity(kind, id)
            .ok_or(CorpusError::EntityNotFound { kind, id })?;
        let relation = relations(kind)
            .iter()
            .find(|r| r.target == target)
            .ok_or_else(|| CorpusError::UnknownCollection(format!("{}/{}", kind, target)))?;

        let ids = graph::related_ids(self, entity, relation)?;
        Ok(ids
            .into_iter()
            .filter_map(|rid| self.entity(target, rid))
            .map(|e| EntitySummary {
                id: e.id,
                name: e.display_name().unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// One prose sentence per non-empty relationship group of `entity`
    pub fn relationship_sentences(
        &self,
        kind: EntityKind,
        entity: &EntityRecord,
    ) -> Result<Vec<String>, CorpusError> {
        let mut sentences = Vec::new();
        for relation in relations(kind) {
            let names: Vec<&str> = graph::related_ids(self, entity, relation)?
                .into_iter()
                .filter_map(|rid| self.entity(relation.target, rid))
                .filter_map(EntityRecord::display_name)
                .collect();
            if !names.is_empty() {
                sentences.push(format!("{}: {}", relation.label, names.join(", ")));
            }
        }
        Ok(sentences)
    }
}

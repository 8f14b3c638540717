//! Indexed record and its metadata

use crate::corpus::EntityKind;
use serde::{Deserialize, Serialize};

/// Recognised entity attributes stored next to each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub entity_type: EntityKind,
    pub entity_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homeworld: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<i64>,
}

/// One embedded entity as stored in a table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedRecord {
    /// `<collection>_<entity id>`, unique within a table
    pub id: String,
    pub text: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl IndexedRecord {
    pub fn new(text: String, vector: Vec<f32>, metadata: RecordMetadata) -> Self {
        Self {
            id: Self::record_id(metadata.entity_type, metadata.entity_id),
            text,
            vector,
            metadata,
        }
    }

    pub fn record_id(kind: EntityKind, entity_id: i64) -> String {
        format!("{}_{}", kind.collection(), entity_id)
    }
}

/// Little-endian f32 blob
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id() {
        assert_eq!(
            IndexedRecord::record_id(EntityKind::Characters, 4),
            "characters_4"
        );
    }

    #[test]
    fn test_vector_blob() {
        let vector = vec![0.25, -1.5, 3.0];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_vector(&bytes), Some(vector));
        assert_eq!(decode_vector(&bytes[..5]), None);
    }
}

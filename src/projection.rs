//! Entity to text projection
//!
//! Turns one entity, plus whatever the corpus knows about its relationships,
//! into the prose blob that gets embedded and keyword-matched.

use crate::corpus::{Corpus, EntityKind, EntityRecord, FieldValue};
use crate::store::RecordMetadata;

/// Runs of `\r` / `\n` become one space
fn collapse_line_breaks(s: &str) -> String {
    s.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Label a field is emitted under
fn label(field: &str) -> String {
    match field {
        "name" | "title" => "Name".to_string(),
        "opening_crawl" => "Story".to_string(),
        other => other.replace('_', " "),
    }
}

/// Printable form of a field value; `None` for values that are skipped
fn render(field: &str, value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) if s.trim().is_empty() => None,
        FieldValue::Text(s) if field == "opening_crawl" => {
            Some(collapse_line_breaks(s))
        }
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Number(n) => Some(n.to_string()),
        FieldValue::Null | FieldValue::Other(_) => None,
    }
}

/// Project an entity to its text form.
///
/// Fragments are joined with `". "`: an opening sentence naming the type,
/// one `label: value` per populated field except `id`, then one sentence
/// per relationship group when `corpus` is given. A malformed relationship
/// collection is logged and contributes nothing.
pub fn project(kind: EntityKind, entity: &EntityRecord, corpus: Option<&Corpus>) -> String {
    let mut fragments = vec![format!("This is a {} from Star Wars", kind.singular())];

    for (field, value) in &entity.fields {
        if field == "id" {
            continue;
        }
        if let Some(rendered) = render(field, value) {
            fragments.push(format!("{}: {}", label(field), rendered));
        }
    }

    if let Some(corpus) = corpus {
        match corpus.relationship_sentences(kind, entity) {
            Ok(sentences) => fragments.extend(sentences),
            Err(e) => {
                tracing::warn!(
                    entity_type = %kind,
                    entity_id = entity.id,
                    "Skipping relationships: {}",
                    e
                );
            }
        }
    }

    fragments.join(". ")
}

/// Metadata stored alongside an indexed record
pub fn extract_metadata(kind: EntityKind, entity: &EntityRecord) -> RecordMetadata {
    let text = |field: &str| {
        entity
            .get(field)
            .and_then(FieldValue::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    let number = |field: &str| entity.get(field).and_then(FieldValue::as_i64);

    RecordMetadata {
        entity_type: kind,
        entity_id: entity.id,
        name: text("name"),
        title: text("title"),
        episode_id: number("episode_id"),
        director: text("director"),
        producer: text("producer"),
        homeworld: number("homeworld"),
        species: number("species"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: EntityKind, value: serde_json::Value) -> EntityRecord {
        EntityRecord::from_value(kind.collection(), 0, &value).unwrap()
    }

    #[test]
    fn test_character_projection() {
        let luke = record(
            EntityKind::Characters,
            json!({"id": 1, "name": "Luke Skywalker", "height": "172", "hair_color": "blond"}),
        );
        let text = project(EntityKind::Characters, &luke, None);
        assert_eq!(
            text,
            "This is a character from Star Wars. Name: Luke Skywalker. height: 172. hair color: blond"
        );
    }

    #[test]
    fn test_film_story_collapses_line_breaks() {
        let film = record(
            EntityKind::Films,
            json!({
                "id": 1,
                "title": "A New Hope",
                "director": "George Lucas",
                "opening_crawl": "It is a period of civil war.\r\nRebel spaceships...\n\nstriking"
            }),
        );
        let text = project(EntityKind::Films, &film, None);
        assert!(text.starts_with("This is a film from Star Wars"));
        assert!(text.contains("Name: A New Hope"));
        assert!(text.contains("director: George Lucas"));
        assert!(text.contains("Story: It is a period of civil war. Rebel spaceships... striking"));
    }

    #[test]
    fn test_skips_id_and_empty_values() {
        let entity = record(
            EntityKind::Characters,
            json!({"id": 1, "name": "Test", "empty_field": "", "null_field": null, "tags": ["a"]}),
        );
        let text = project(EntityKind::Characters, &entity, None);
        assert!(!text.contains("id:"));
        assert!(!text.contains("empty field"));
        assert!(!text.contains("null field"));
        assert!(!text.contains("tags"));
        assert!(!text.contains(": ."));
    }

    #[test]
    fn test_numeric_values() {
        let ship = record(
            EntityKind::Starships,
            json!({"id": 2, "name": "Test Ship", "length": 1200, "crew": 5}),
        );
        let text = project(EntityKind::Starships, &ship, None);
        assert!(text.contains("This is a starship from Star Wars"));
        assert!(text.contains("length: 1200"));
        assert!(text.contains("crew: 5"));
    }

    #[test]
    fn test_species_singular() {
        let species = record(EntityKind::Species, json!({"id": 1, "name": "Wookiee"}));
        let text = project(EntityKind::Species, &species, None);
        assert!(text.starts_with("This is a species from Star Wars"));
    }

    #[test]
    fn test_relationship_sentences() {
        let corpus = Corpus::from_value(json!({
            "characters": [{"id": 1, "name": "Luke Skywalker", "homeworld": 1}],
            "films": [{"id": 1, "title": "A New Hope"}],
            "planets": [{"id": 1, "name": "Tatooine"}],
            "films_characters": [{"film_id": 1, "character_id": 1}]
        }))
        .unwrap();
        let luke = corpus.entity(EntityKind::Characters, 1).unwrap();
        let text = project(EntityKind::Characters, luke, Some(&corpus));
        assert!(text.contains("Appears in movies: A New Hope"));
        assert!(text.contains("Homeworld: Tatooine"));

        let tatooine = corpus.entity(EntityKind::Planets, 1).unwrap();
        let text = project(EntityKind::Planets, tatooine, Some(&corpus));
        assert!(text.contains("Home planet of: Luke Skywalker"));
    }

    #[test]
    fn test_malformed_relationships_keep_fields() {
        let corpus = Corpus::from_value(json!({
            "characters": [{"id": 1, "name": "Test"}],
            "films_characters": {"broken": true}
        }))
        .unwrap();
        let entity = corpus.entity(EntityKind::Characters, 1).unwrap();
        let text = project(EntityKind::Characters, entity, Some(&corpus));
        assert_eq!(text, "This is a character from Star Wars. Name: Test");
    }

    #[test]
    fn test_extract_metadata() {
        let entity = record(
            EntityKind::Characters,
            json!({
                "id": 1,
                "name": "Luke Skywalker",
                "title": "Jedi",
                "episode_id": 4,
                "director": "George Lucas",
                "homeworld": 1,
                "species": 1,
                "irrelevant_field": "ignored"
            }),
        );
        let metadata = extract_metadata(EntityKind::Characters, &entity);
        assert_eq!(metadata.name.as_deref(), Some("Luke Skywalker"));
        assert_eq!(metadata.title.as_deref(), Some("Jedi"));
        assert_eq!(metadata.episode_id, Some(4));
        assert_eq!(metadata.director.as_deref(), Some("George Lucas"));
        assert_eq!(metadata.homeworld, Some(1));
        assert_eq!(metadata.species, Some(1));
        assert_eq!(metadata.producer, None);

        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("irrelevant_field").is_none());
        assert!(json.get("producer").is_none());
    }
}

//! Relationship map between entity collections
//!
//! Relationships come from three places in the dataset: join-table edge
//! collections, a foreign key on the other side (`characters.homeworld`
//! pointing at a planet) and a foreign key on the entity itself.

use super::{Corpus, CorpusError, EntityKind, EntityRecord, FieldValue};
use serde_json::Value;

/// Where the ids of related entities are read from
#[derive(Debug, Clone, Copy)]
pub enum RelationSource {
    /// Join rows in `collection`, matched on `self_key`, yielding `other_key`
    Edge {
        collection: &'static str,
        self_key: &'static str,
        other_key: &'static str,
    },
    /// Target entities whose `field` holds this entity's id
    BackReference { field: &'static str },
    /// This entity's own `field` holds the target id
    OwnField { field: &'static str },
}

/// One relationship group of an entity kind
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    /// Sentence label used by the text projector
    pub label: &'static str,
    pub target: EntityKind,
    pub sources: &'static [RelationSource],
}

const fn edge(
    collection: &'static str,
    self_key: &'static str,
    other_key: &'static str,
) -> RelationSource {
    RelationSource::Edge {
        collection,
        self_key,
        other_key,
    }
}

const CHARACTER_RELATIONS: &[Relation] = &[
    Relation {
        label: "Appears in movies",
        target: EntityKind::Films,
        sources: &[edge("films_characters", "character_id", "film_id")],
    },
    Relation {
        label: "Pilots starships",
        target: EntityKind::Starships,
        sources: &[edge("starships_characters", "character_id", "starship_id")],
    },
    Relation {
        label: "Drives vehicles",
        target: EntityKind::Vehicles,
        sources: &[edge("vehicles_characters", "character_id", "vehicle_id")],
    },
    Relation {
        label: "Homeworld",
        target: EntityKind::Planets,
        sources: &[RelationSource::OwnField { field: "homeworld" }],
    },
    Relation {
        label: "Species",
        target: EntityKind::Species,
        sources: &[
            RelationSource::OwnField { field: "species_id" },
            edge("species_characters", "character_id", "species_id"),
        ],
    },
];

const FILM_RELATIONS: &[Relation] = &[
    Relation {
        label: "Characters",
        target: EntityKind::Characters,
        sources: &[edge("films_characters", "film_id", "character_id")],
    },
    Relation {
        label: "Planets",
        target: EntityKind::Planets,
        sources: &[edge("films_planets", "film_id", "planet_id")],
    },
    Relation {
        label: "Starships",
        target: EntityKind::Starships,
        sources: &[edge("films_starships", "film_id", "starship_id")],
    },
    Relation {
        label: "Vehicles",
        target: EntityKind::Vehicles,
        sources: &[edge("films_vehicles", "film_id", "vehicle_id")],
    },
    Relation {
        label: "Species",
        target: EntityKind::Species,
        sources: &[edge("films_species", "film_id", "species_id")],
    },
];

const PLANET_RELATIONS: &[Relation] = &[
    Relation {
        label: "Appears in movies",
        target: EntityKind::Films,
        sources: &[edge("films_planets", "planet_id", "film_id")],
    },
    Relation {
        label: "Home planet of",
        target: EntityKind::Characters,
        sources: &[RelationSource::BackReference { field: "homeworld" }],
    },
];

const SPECIES_RELATIONS: &[Relation] = &[
    Relation {
        label: "Appears in movies",
        target: EntityKind::Films,
        sources: &[edge("films_species", "species_id", "film_id")],
    },
    Relation {
        label: "Members",
        target: EntityKind::Characters,
        sources: &[
            RelationSource::BackReference { field: "species_id" },
            edge("species_characters", "species_id", "character_id"),
        ],
    },
];

const STARSHIP_RELATIONS: &[Relation] = &[
    Relation {
        label: "Piloted by",
        target: EntityKind::Characters,
        sources: &[edge("starships_characters", "starship_id", "character_id")],
    },
    Relation {
        label: "Appears in movies",
        target: EntityKind::Films,
        sources: &[edge("films_starships", "starship_id", "film_id")],
    },
];

const VEHICLE_RELATIONS: &[Relation] = &[
    Relation {
        label: "Driven by",
        target: EntityKind::Characters,
        sources: &[edge("vehicles_characters", "vehicle_id", "character_id")],
    },
    Relation {
        label: "Appears in movies",
        target: EntityKind::Films,
        sources: &[edge("films_vehicles", "vehicle_id", "film_id")],
    },
];

/// Relationship groups for an entity kind, in sentence order
pub fn relations(kind: EntityKind) -> &'static [Relation] {
    match kind {
        EntityKind::Characters => CHARACTER_RELATIONS,
        EntityKind::Films => FILM_RELATIONS,
        EntityKind::Planets => PLANET_RELATIONS,
        EntityKind::Species => SPECIES_RELATIONS,
        EntityKind::Starships => STARSHIP_RELATIONS,
        EntityKind::Vehicles => VEHICLE_RELATIONS,
    }
}

/// Whether `name` is one of the join-table collections referenced above
pub(crate) fn is_edge_collection(name: &str) -> bool {
    EntityKind::ALL.into_iter().any(|kind| {
        relations(kind).iter().any(|r| {
            r.sources.iter().any(|s| match s {
                RelationSource::Edge { collection, .. } => *collection == name,
                _ => false,
            })
        })
    })
}

/// Ids of entities related to `entity` through `relation`, deduplicated,
/// in discovery order
pub(crate) fn related_ids(
    corpus: &Corpus,
    entity: &EntityRecord,
    relation: &Relation,
) -> Result<Vec<i64>, CorpusError> {
    let mut ids: Vec<i64> = Vec::new();
    let mut push = |id: i64| {
        if !ids.contains(&id) {
            ids.push(id);
        }
    };

    for source in relation.sources {
        match *source {
            RelationSource::Edge {
                collection,
                self_key,
                other_key,
            } => {
                for row in edge_rows(corpus, collection)? {
                    let row = row
                        .as_object()
                        .ok_or_else(|| CorpusError::MalformedCollection {
                            collection: collection.to_string(),
                            reason: "edge row is not an object".to_string(),
                        })?;
                    let this = row.get(self_key).and_then(Value::as_i64);
                    let other = row.get(other_key).and_then(Value::as_i64);
                    if let (Some(this), Some(other)) = (this, other) {
                        if this == entity.id {
                            push(other);
                        }
                    }
                }
            }
            RelationSource::BackReference { field } => {
                corpus
                    .entities(relation.target)
                    .iter()
                    .filter(|e| e.get(field).and_then(FieldValue::as_i64) == Some(entity.id))
                    .for_each(|e| push(e.id));
            }
            RelationSource::OwnField { field } => {
                if let Some(id) = entity.get(field).and_then(FieldValue::as_i64) {
                    push(id);
                }
            }
        }
    }

    Ok(ids)
}

/// Rows of an edge collection; an absent collection has no rows
fn edge_rows<'a>(corpus: &'a Corpus, collection: &str) -> Result<&'a [Value], CorpusError> {
    match corpus.collection(collection) {
        None => Ok(&[]),
        Some(Value::Array(rows)) => Ok(rows),
        Some(_) => Err(CorpusError::MalformedCollection {
            collection: collection.to_string(),
            reason: "expected an array of edge rows".to_string(),
        }),
    }
}

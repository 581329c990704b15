use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::graph::error::GraphError;

/// Multi-valued attributes, shared by entities and edges
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Type given to entities created without one
pub const DEFAULT_ENTITY_TYPE: &str = "Entity";

/// Canonical form of an entity key: trimmed, inner whitespace collapsed
pub fn canonical_key(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How attribute values are combined when an entity is upserted again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Append incoming values that are not already stored
    #[default]
    Union,
    /// Incoming attribute lists replace stored lists key by key
    Replace,
}

impl FromStr for MergePolicy {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(MergePolicy::Union),
            "replace" => Ok(MergePolicy::Replace),
            other => Err(GraphError::InvalidConfig(format!(
                "unknown merge policy '{}', expected union or replace",
                other
            ))),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Union => write!(f, "union"),
            MergePolicy::Replace => write!(f, "replace"),
        }
    }
}

/// A single outgoing edge as proposed or read back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub target_id: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Relationship {
    pub fn new(target_id: &str, relation_type: &str) -> Self {
        Self {
            target_id: canonical_key(target_id),
            relation_type: relation_type.trim().to_string(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Borrowed view of the edge at one position of the parallel sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRef<'a> {
    pub target_id: &'a str,
    pub relation_type: &'a str,
    pub attributes: &'a Attributes,
}

#[derive(Deserialize)]
struct RawRelationships {
    #[serde(default)]
    target_ids: Vec<String>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    attributes: Vec<Attributes>,
}

/// Outgoing edges stored as three parallel sequences.
///
/// The edge at position `i` is `(target_ids[i], types[i], attributes[i])`.
/// The sequences are only ever appended together, and deserialization
/// rejects input where their lengths differ.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRelationships")]
pub struct Relationships {
    target_ids: Vec<String>,
    types: Vec<String>,
    attributes: Vec<Attributes>,
}

impl TryFrom<RawRelationships> for Relationships {
    type Error = GraphError;

    fn try_from(raw: RawRelationships) -> Result<Self, Self::Error> {
        if raw.target_ids.len() != raw.types.len() || raw.types.len() != raw.attributes.len() {
            return Err(GraphError::invalid_record(
                "relationships",
                format!(
                    "sequence lengths differ: {} target_ids, {} types, {} attributes",
                    raw.target_ids.len(),
                    raw.types.len(),
                    raw.attributes.len()
                ),
            ));
        }
        Ok(Self {
            target_ids: raw.target_ids,
            types: raw.types,
            attributes: raw.attributes,
        })
    }
}

impl Relationships {
    pub fn len(&self) -> usize {
        self.target_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_ids.is_empty()
    }

    pub fn target_ids(&self) -> &[String] {
        &self.target_ids
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn contains(&self, target_id: &str, relation_type: &str) -> bool {
        self.iter()
            .any(|edge| edge.target_id == target_id && edge.relation_type == relation_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeRef<'_>> {
        self.target_ids
            .iter()
            .zip(&self.types)
            .zip(&self.attributes)
            .map(|((target_id, relation_type), attributes)| EdgeRef {
                target_id,
                relation_type,
                attributes,
            })
    }

    /// Append one edge. With `dedupe`, an existing (target, type) pair is
    /// left alone and `false` is returned.
    pub fn push(&mut self, relationship: Relationship, dedupe: bool) -> bool {
        if dedupe && self.contains(&relationship.target_id, &relationship.relation_type) {
            return false;
        }
        self.target_ids.push(relationship.target_id);
        self.types.push(relationship.relation_type);
        self.attributes.push(relationship.attributes);
        true
    }

    fn is_consistent(&self) -> bool {
        self.target_ids.len() == self.types.len() && self.types.len() == self.attributes.len()
    }
}

/// A graph node keyed by its canonical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: Relationships,
}

impl Entity {
    pub fn new(id: &str, entity_type: &str) -> Self {
        Self {
            id: canonical_key(id),
            entity_type: entity_type.trim().to_string(),
            attributes: Attributes::new(),
            relationships: Relationships::default(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        let values = self.attributes.entry(key.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship, false);
        self
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeRef<'_>> {
        self.relationships.iter()
    }

    /// Check the record before it crosses the storage boundary
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.id.is_empty() {
            return Err(GraphError::invalid_record("<empty>", "entity key is empty"));
        }
        if self.id != canonical_key(&self.id) {
            return Err(GraphError::invalid_record(
                &self.id,
                "entity key is not in canonical form",
            ));
        }
        if !self.relationships.is_consistent() {
            return Err(GraphError::invalid_record(
                &self.id,
                "relationship sequences differ in length",
            ));
        }
        if let Some(edge) = self.edges().find(|e| e.target_id.is_empty() || e.relation_type.is_empty()) {
            return Err(GraphError::invalid_record(
                &self.id,
                format!(
                    "edge with empty target or type ('{}', '{}')",
                    edge.target_id, edge.relation_type
                ),
            ));
        }
        Ok(())
    }

    /// Fold `incoming` into this record. Returns how many edges were appended.
    pub fn merge(&mut self, incoming: Entity, policy: MergePolicy, dedupe: bool) -> usize {
        // The default type is a placeholder: it never overwrites and is
        // always overwritten
        let incoming_type = incoming.entity_type.trim();
        let has_type = |t: &str| !t.is_empty() && t != DEFAULT_ENTITY_TYPE;
        if has_type(incoming_type)
            && (!has_type(self.entity_type.as_str()) || policy == MergePolicy::Replace)
        {
            self.entity_type = incoming_type.to_string();
        }

        merge_attributes(&mut self.attributes, incoming.attributes, policy);

        let Relationships {
            target_ids,
            types,
            attributes,
        } = incoming.relationships;

        let mut appended = 0;
        for ((target_id, relation_type), attributes) in target_ids.into_iter().zip(types).zip(attributes) {
            let relationship = Relationship {
                target_id,
                relation_type,
                attributes,
            };
            if self.relationships.push(relationship, dedupe) {
                appended += 1;
            }
        }
        appended
    }
}

/// Combine attribute maps under the given policy
pub fn merge_attributes(existing: &mut Attributes, incoming: Attributes, policy: MergePolicy) {
    for (key, values) in incoming {
        match policy {
            MergePolicy::Replace => {
                existing.insert(key, values);
            }
            MergePolicy::Union => {
                let stored = existing.entry(key).or_default();
                for value in values {
                    if !stored.contains(&value) {
                        stored.push(value);
                    }
                }
            }
        }
    }
}

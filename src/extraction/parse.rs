use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::extraction::TypeFilter;
use crate::graph::entity::{canonical_key, Attributes, Entity, Relationship, DEFAULT_ENTITY_TYPE};
use crate::graph::error::GraphError;

/// A JSON string literal, or a comma directly before a closing bracket.
/// String literals are matched first so commas inside them are left alone.
fn trailing_commas() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"("(?:[^"\\]|\\.)*")|,(\s*[\]}])"#).expect("trailing comma pattern")
    })
}

/// Pull the JSON payload out of a model reply.
///
/// Strips markdown fences, cuts the text down to the outermost object or
/// array and drops trailing commas. Returns `None` when no JSON is present.
pub fn sanitize_json(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            text = after[..end].trim();
        }
    }

    let start = text.find(|c: char| c == '{' || c == '[')?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }

    let cleaned = trailing_commas().replace_all(&text[start..=end], |caps: &Captures| {
        match caps.get(1) {
            Some(literal) => literal.as_str().to_string(),
            None => caps[2].to_string(),
        }
    });
    Some(cleaned.into_owned())
}

fn parse_value(raw: &str) -> Result<Value, GraphError> {
    let json = sanitize_json(raw)
        .ok_or_else(|| GraphError::ExtractionParse("no JSON object in model output".to_string()))?;
    serde_json::from_str(&json).map_err(|e| {
        GraphError::ExtractionParse(format!(
            "{} (output starts with: {})",
            e,
            raw.chars().take(120).collect::<String>()
        ))
    })
}

/// Parse an extraction reply into entity proposals.
///
/// Individual entities or edges that are unusable are dropped; only a reply
/// with no recognisable structure at all is an error.
pub fn parse_entities(raw: &str, filter: &TypeFilter) -> Result<Vec<Entity>, GraphError> {
    let value = parse_value(raw)?;

    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("entities") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(GraphError::ExtractionParse(
                    "'entities' is not a list".to_string(),
                ))
            }
            None if entity_key(obj).is_some() => std::slice::from_ref(&value),
            None => {
                return Err(GraphError::ExtractionParse(
                    "reply has no 'entities' list".to_string(),
                ))
            }
        },
        _ => {
            return Err(GraphError::ExtractionParse(
                "reply is neither an object nor a list".to_string(),
            ))
        }
    };

    let entities: Vec<Entity> = items
        .iter()
        .filter_map(|item| parse_entity(item, filter))
        .collect();

    debug!(
        proposed = items.len(),
        kept = entities.len(),
        "parsed extraction reply"
    );
    Ok(entities)
}

/// Parse the reply to a question-entity prompt into canonical names
pub fn parse_query_entities(raw: &str) -> Result<Vec<String>, GraphError> {
    let value = parse_value(raw)?;

    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("entities") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => {
                return Err(GraphError::ExtractionParse(
                    "reply has no 'entities' list".to_string(),
                ))
            }
        },
        _ => {
            return Err(GraphError::ExtractionParse(
                "reply is neither an object nor a list".to_string(),
            ))
        }
    };

    let mut seen = BTreeSet::new();
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(canonical_key(name)),
            Value::Object(obj) => entity_key(obj),
            _ => None,
        })
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect())
}

fn entity_key(obj: &Map<String, Value>) -> Option<String> {
    ["_id", "id", "name"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(canonical_key)
        .filter(|key| !key.is_empty())
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_entity(value: &Value, filter: &TypeFilter) -> Option<Entity> {
    let Some(obj) = value.as_object() else {
        debug!("skipping non-object entity proposal");
        return None;
    };
    let Some(id) = entity_key(obj) else {
        debug!("skipping entity proposal without a key");
        return None;
    };

    let entity_type = non_empty_str(obj.get("type")).unwrap_or(DEFAULT_ENTITY_TYPE);
    if !filter.allows_entity(entity_type) {
        debug!(entity = %id, entity_type, "entity type not allowed");
        return None;
    }

    let mut entity = Entity::new(&id, entity_type);
    entity.attributes = obj.get("attributes").map(coerce_attributes).unwrap_or_default();

    if let Some(relationships) = obj.get("relationships") {
        for relationship in parse_relationships(&id, relationships, filter) {
            entity.relationships.push(relationship, false);
        }
    }

    Some(entity)
}

fn parse_relationships(source: &str, value: &Value, filter: &TypeFilter) -> Vec<Relationship> {
    let proposals: Vec<(Option<&str>, Option<&str>, Option<&Value>)> = match value {
        // Parallel sequences, the stored shape
        Value::Object(obj) => {
            let column = |key: &str| -> Vec<Value> {
                obj.get(key)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            };
            let targets = column("target_ids");
            let types = column("types");
            let attributes = column("attributes");

            if targets.len() != types.len() || (!attributes.is_empty() && attributes.len() != targets.len()) {
                warn!(
                    entity = %source,
                    target_ids = targets.len(),
                    types = types.len(),
                    attributes = attributes.len(),
                    "relationship arity mismatch, keeping the common prefix"
                );
            }

            let n = targets.len().min(types.len());
            return (0..n)
                .filter_map(|i| {
                    build_relationship(
                        source,
                        targets[i].as_str(),
                        types[i].as_str(),
                        attributes.get(i),
                        filter,
                    )
                })
                .collect();
        }
        // A list of edge objects is accepted as well
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_object)
            .map(|edge| {
                let target = ["target_id", "target", "to"]
                    .iter()
                    .find_map(|k| edge.get(*k).and_then(Value::as_str));
                let relation_type = ["type", "relation", "relationship"]
                    .iter()
                    .find_map(|k| edge.get(*k).and_then(Value::as_str));
                (target, relation_type, edge.get("attributes"))
            })
            .collect(),
        _ => Vec::new(),
    };

    proposals
        .into_iter()
        .filter_map(|(target, relation_type, attributes)| {
            build_relationship(source, target, relation_type, attributes, filter)
        })
        .collect()
}

fn build_relationship(
    source: &str,
    target: Option<&str>,
    relation_type: Option<&str>,
    attributes: Option<&Value>,
    filter: &TypeFilter,
) -> Option<Relationship> {
    let target = canonical_key(target?);
    let relation_type = relation_type?.trim();
    if target.is_empty() || relation_type.is_empty() {
        debug!(entity = %source, "skipping edge with empty target or type");
        return None;
    }
    if !filter.allows_relationship(relation_type) {
        debug!(entity = %source, relation_type, "relationship type not allowed");
        return None;
    }

    let attributes = attributes.map(coerce_attributes).unwrap_or_default();
    Some(Relationship::new(&target, relation_type).with_attributes(attributes))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a loosely typed attribute object into string lists
pub fn coerce_attributes(value: &Value) -> Attributes {
    let Some(obj) = value.as_object() else {
        return Attributes::new();
    };

    obj.iter()
        .filter_map(|(key, value)| {
            let values: Vec<String> = match value {
                Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
                other => scalar_to_string(other).into_iter().collect(),
            };
            (!key.trim().is_empty() && !values.is_empty()).then(|| (key.trim().to_string(), values))
        })
        .collect()
}

//! Prompt templates for entity extraction

use crate::extraction::TypeFilter;

pub const ENTITY_EXTRACTION_SYSTEM: &str = "You are a knowledge graph builder. \
You read text and extract the entities it mentions and the relationships between them. \
Always answer with a single JSON object and nothing else.";

pub const ENTITY_EXTRACTION_PROMPT: &str = r#"-Goal-
Identify every entity in the text below and every relationship between those entities.

-Output format-
Return a JSON object of the form:
{
  "entities": [
    {
      "_id": "canonical entity name, e.g. full name of a person",
      "type": "entity category, e.g. Person, Organization, Location",
      "attributes": { "attribute name": ["value", "..."] },
      "relationships": {
        "target_ids": ["canonical name of the related entity"],
        "types": ["relationship label, e.g. inspired, born_in"],
        "attributes": [{ "attribute name": ["value"] }]
      }
    }
  ]
}

-Rules-
1. Use the same canonical name every time an entity is mentioned.
2. Relationships are directed from the entity that holds them to each target.
3. target_ids, types and attributes must have the same length; position i
   of each describes one relationship.
4. Attribute values are always lists of strings.
{type_rules}
-Text-
{input_text}

Output:
"#;

pub const QUERY_ENTITY_SYSTEM: &str = "You identify which named entities a question is about. \
Always answer with a single JSON object and nothing else.";

pub const QUERY_ENTITY_PROMPT: &str = r#"List the entities mentioned in the question below, using their full canonical names.
Return a JSON object of the form {"entities": ["name", "..."]}. Return an empty list if no entity is mentioned.

Question: {question}

Output:
"#;

/// Fill the extraction template for one chunk of text
pub fn build_extraction_prompt(text: &str, filter: &TypeFilter) -> String {
    let mut rules = Vec::new();
    if !filter.entity_types.is_empty() {
        rules.push(format!(
            "Only extract entities of these types: {}.",
            filter.entity_types.join(", ")
        ));
    }
    if !filter.relationship_types.is_empty() {
        rules.push(format!(
            "Only extract relationships of these types: {}.",
            filter.relationship_types.join(", ")
        ));
    }
    // Numbering continues after the four fixed rules
    let type_rules: String = rules
        .iter()
        .enumerate()
        .map(|(i, rule)| format!("{}. {}\n", i + 5, rule))
        .collect();

    ENTITY_EXTRACTION_PROMPT
        .replace("{type_rules}", &type_rules)
        .replace("{input_text}", text)
}

pub fn build_query_prompt(question: &str) -> String {
    QUERY_ENTITY_PROMPT.replace("{question}", question)
}

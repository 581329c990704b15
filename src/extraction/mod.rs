//! LLM-driven entity and relationship extraction

mod parse;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::external::{CompletionRequest, ExternalError, LanguageModel};
use crate::graph::entity::Entity;
use crate::graph::error::GraphError;

pub use parse::{coerce_attributes, parse_entities, parse_query_entities, sanitize_json};

/// Optional allow-lists for entity and relationship types.
/// An empty list allows everything; comparison ignores case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeFilter {
    pub entity_types: Vec<String>,
    pub relationship_types: Vec<String>,
}

impl TypeFilter {
    pub fn new(entity_types: Vec<String>, relationship_types: Vec<String>) -> Self {
        Self {
            entity_types,
            relationship_types,
        }
    }

    pub fn allows_entity(&self, entity_type: &str) -> bool {
        Self::allows(&self.entity_types, entity_type)
    }

    pub fn allows_relationship(&self, relation_type: &str) -> bool {
        Self::allows(&self.relationship_types, relation_type)
    }

    fn allows(list: &[String], value: &str) -> bool {
        list.is_empty() || list.iter().any(|allowed| allowed.eq_ignore_ascii_case(value))
    }
}

/// Turns text into entity proposals by prompting a language model
pub struct EntityExtractor {
    model: Arc<dyn LanguageModel>,
    filter: TypeFilter,
    max_attempts: usize,
    retry_delay: Duration,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, filter: TypeFilter) -> Self {
        Self {
            model,
            filter,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Attempts per chunk (at least one) and the pause between them
    pub fn with_retries(mut self, max_attempts: usize, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn filter(&self) -> &TypeFilter {
        &self.filter
    }

    /// Extract entities and their outgoing edges from one chunk.
    ///
    /// Transient model failures and unparseable replies are retried; the
    /// last error is returned once attempts run out.
    pub async fn extract(&self, text: &str) -> Result<Vec<Entity>, GraphError> {
        let request = CompletionRequest::json(
            prompts::ENTITY_EXTRACTION_SYSTEM,
            prompts::build_extraction_prompt(text, &self.filter),
        );

        let mut attempt = 1;
        loop {
            let error = match self.model.complete(&request).await {
                Ok(reply) => match parse_entities(&reply, &self.filter) {
                    Ok(entities) => return Ok(entities),
                    Err(e) => e,
                },
                Err(e) if e.is_transient() => GraphError::LlmUnavailable(e.to_string()),
                Err(e) => return Err(e.into()),
            };

            if attempt >= self.max_attempts {
                return Err(error);
            }
            warn!(
                "Extraction attempt {}/{} failed: {}",
                attempt, self.max_attempts, error
            );
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Names of the entities a question is about.
    ///
    /// A model failure is returned as `LlmUnavailable`; an unparseable reply
    /// yields no names so that resolution can fall back to the question text.
    pub async fn extract_query_entities(&self, question: &str) -> Result<Vec<String>, GraphError> {
        let request = CompletionRequest::json(
            prompts::QUERY_ENTITY_SYSTEM,
            prompts::build_query_prompt(question),
        );

        let reply = self
            .model
            .complete(&request)
            .await
            .map_err(|e: ExternalError| GraphError::LlmUnavailable(e.to_string()))?;

        match parse_query_entities(&reply) {
            Ok(names) => {
                debug!(?names, "question entities");
                Ok(names)
            }
            Err(e) => {
                warn!("Could not parse question entities: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{MockLanguageModel, ResponseFormat};

    fn extractor(mock: MockLanguageModel) -> EntityExtractor {
        EntityExtractor::new(Arc::new(mock), TypeFilter::default())
            .with_retries(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_extract_success() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .withf(|req| req.format == ResponseFormat::Json && req.prompt.contains("Newton inspired Einstein"))
            .times(1)
            .returning(|_| {
                Ok(r#"{"entities": [{"_id": "Newton", "type": "Person",
                    "relationships": {"target_ids": ["Einstein"], "types": ["inspired"], "attributes": [{}]}}]}"#
                    .to_string())
            });

        let entities = extractor(mock).extract("Newton inspired Einstein").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert!(entities[0].relationships.contains("Einstein", "inspired"));
    }

    #[tokio::test]
    async fn test_extract_retries_malformed_reply() {
        let mut mock = MockLanguageModel::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Sure! Here are the entities: none".to_string()));
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(r#"{"entities": [{"_id": "A"}]}"#.to_string()));

        let entities = extractor(mock).extract("text").await.unwrap();
        assert_eq!(entities[0].id, "A");
    }

    #[tokio::test]
    async fn test_extract_gives_up_after_attempts() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .times(3)
            .returning(|_| Err(ExternalError::Timeout(30)));

        let result = extractor(mock).extract("text").await;
        assert!(matches!(result, Err(GraphError::LlmUnavailable(_))));
    }

    #[tokio::test]
    async fn test_extract_does_not_retry_config_errors() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(ExternalError::ConfigError("bad model".to_string())));

        assert!(extractor(mock).extract("text").await.is_err());
    }

    #[tokio::test]
    async fn test_query_entities_fall_back_to_empty() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Ok("I think it is about Kant.".to_string()));

        let names = extractor(mock).extract_query_entities("Who taught Kant?").await.unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_type_filter() {
        let filter = TypeFilter::new(vec!["Person".to_string()], vec![]);
        assert!(filter.allows_entity("PERSON"));
        assert!(!filter.allows_entity("Place"));
        assert!(filter.allows_relationship("anything"));
    }
}

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::extraction::{EntityExtractor, TypeFilter};
use crate::external::LanguageModel;
use crate::graph::entity::{canonical_key, Attributes, Entity, MergePolicy, Relationship};
use crate::graph::error::GraphError;
use crate::graph::store::RecordStore;
use crate::graph::traversal::{self, Direction, Subgraph};
use crate::query::{ChatResponse, QueryEngine};
use crate::splitter::Chunk;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Hop bound for traversals started by queries
    pub max_depth: usize,
    pub merge_policy: MergePolicy,
    /// Skip appending an edge whose (target, type) pair already exists
    pub dedupe_relationships: bool,
    pub direction: Direction,
    pub allowed_entity_types: Vec<String>,
    pub allowed_relationship_types: Vec<String>,
    /// Extra attempts for a write that failed transiently
    pub store_write_retries: usize,
    /// Chunks extracted concurrently
    pub max_concurrent_requests: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            merge_policy: MergePolicy::Union,
            dedupe_relationships: false,
            direction: Direction::Both,
            allowed_entity_types: Vec::new(),
            allowed_relationship_types: Vec::new(),
            store_write_retries: 2,
            max_concurrent_requests: 4,
        }
    }
}

impl GraphConfig {
    pub fn type_filter(&self) -> TypeFilter {
        TypeFilter::new(
            self.allowed_entity_types.clone(),
            self.allowed_relationship_types.clone(),
        )
    }
}

/// Outcome of one `add_documents` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub chunks_failed: usize,
    pub entities_upserted: usize,
    pub relationships_appended: usize,
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} documents, {} chunks ({} failed), {} entity upserts, {} relationships appended",
            self.documents,
            self.chunks,
            self.chunks_failed,
            self.entities_upserted,
            self.relationships_appended
        )
    }
}

/// Entity graph backed by a record store, built and queried through a
/// language model. Owns no global state; every handle is passed in.
pub struct KnowledgeGraph {
    store: Arc<dyn RecordStore>,
    model: Arc<dyn LanguageModel>,
    extractor: EntityExtractor,
    config: GraphConfig,
    retry_delay: Duration,
}

impl KnowledgeGraph {
    pub fn new(store: Arc<dyn RecordStore>, model: Arc<dyn LanguageModel>, config: GraphConfig) -> Self {
        let extractor = EntityExtractor::new(model.clone(), config.type_filter());
        Self {
            store,
            model,
            extractor,
            config,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// Replace the default extractor, e.g. to change retry behaviour
    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Pause between store write retries
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Create an entity or merge attributes into the existing one
    pub async fn upsert_node(
        &self,
        key: &str,
        entity_type: &str,
        attributes: Attributes,
    ) -> Result<(), GraphError> {
        let mut entity = Entity::new(key, entity_type);
        entity.attributes = attributes;
        self.commit(entity).await.map(|_| ())
    }

    /// Append one edge to the source entity, creating the source if needed
    pub async fn append_relationship(
        &self,
        source_key: &str,
        target_key: &str,
        relation_type: &str,
        attributes: Attributes,
    ) -> Result<bool, GraphError> {
        let entity = Entity::new(source_key, "").with_relationship(
            Relationship::new(target_key, relation_type).with_attributes(attributes),
        );
        Ok(self.commit(entity).await? > 0)
    }

    /// Extract entities from every chunk and commit them.
    ///
    /// A chunk whose extraction or commit fails is logged and counted;
    /// the remaining chunks are still processed.
    pub async fn add_documents(&self, chunks: &[Chunk]) -> Result<IngestReport, GraphError> {
        let mut report = IngestReport {
            chunks: chunks.len(),
            ..IngestReport::default()
        };

        let mut results: Vec<(usize, Result<Vec<Entity>, GraphError>)> =
            stream::iter(chunks.iter().enumerate())
                .map(|(i, chunk)| async move { (i, self.extractor.extract(&chunk.text).await) })
                .buffer_unordered(self.config.max_concurrent_requests.max(1))
                .collect()
                .await;
        // Commit in chunk order so merges are deterministic
        results.sort_by_key(|(i, _)| *i);

        for (i, result) in results {
            let chunk = &chunks[i];
            let entities = match result {
                Ok(entities) => entities,
                Err(e) => {
                    warn!(
                        "Skipping chunk {} of '{}': {}",
                        chunk.index, chunk.title, e
                    );
                    report.chunks_failed += 1;
                    continue;
                }
            };

            let mut chunk_failed = false;
            for entity in entities {
                let id = entity.id.clone();
                match self.commit(entity).await {
                    Ok(appended) => {
                        report.entities_upserted += 1;
                        report.relationships_appended += appended;
                    }
                    Err(e) => {
                        error!("Failed to store entity '{}': {}", id, e);
                        chunk_failed = true;
                    }
                }
            }
            if chunk_failed {
                report.chunks_failed += 1;
            }

            info!(
                "Processed chunk {}/{} ({} entity upserts so far)",
                i + 1,
                chunks.len(),
                report.entities_upserted
            );
        }

        Ok(report)
    }

    /// Reachable subgraph within `max_depth` hops of the start keys
    pub async fn traverse(&self, start_keys: &[String], max_depth: usize) -> Result<Subgraph, GraphError> {
        let start: Vec<String> = start_keys.iter().map(|k| canonical_key(k)).collect();
        traversal::traverse(self.store.as_ref(), &start, max_depth, self.config.direction).await
    }

    /// Keys of stored entities named by `text`: exact key, key ignoring
    /// case, or key appearing as a whole phrase inside the text.
    pub async fn similarity_search(&self, text: &str) -> Result<Vec<String>, GraphError> {
        let needle = canonical_key(text);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        if self.store.get(&needle).await?.is_some() {
            return Ok(vec![needle]);
        }

        let needle_lower = needle.to_lowercase();
        let ids = self.store.ids().await?;

        let exact: Vec<String> = ids
            .iter()
            .filter(|id| id.to_lowercase() == needle_lower)
            .cloned()
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }

        Ok(ids
            .into_iter()
            .filter(|id| id.chars().count() > 1 && contains_phrase(&needle_lower, &id.to_lowercase()))
            .collect())
    }

    pub async fn find_entity_by_id(&self, id: &str) -> Result<Option<Entity>, GraphError> {
        self.store.get(&canonical_key(id)).await
    }

    pub async fn entity_count(&self) -> Result<usize, GraphError> {
        self.store.count().await
    }

    pub async fn all_entities(&self) -> Result<Vec<Entity>, GraphError> {
        self.store.all().await
    }

    /// Answer a question from the graph. Failures come back as an
    /// `Unavailable` answer rather than an error.
    pub async fn chat_response(&self, question: &str) -> ChatResponse {
        QueryEngine::new(self).run(question).await
    }

    /// Upsert with retries for transient store failures; returns edges appended
    async fn commit(&self, entity: Entity) -> Result<usize, GraphError> {
        let mut attempt = 0;
        loop {
            match self
                .store
                .upsert_merge(
                    entity.clone(),
                    self.config.merge_policy,
                    self.config.dedupe_relationships,
                )
                .await
            {
                Err(e) if e.is_retryable() && attempt < self.config.store_write_retries => {
                    attempt += 1;
                    warn!(
                        "Write of '{}' failed (retry {}/{}): {}",
                        entity.id, attempt, self.config.store_write_retries, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => return other,
            }
        }
    }
}

/// `phrase` occurs in `text` with non-alphanumeric characters (or the ends
/// of the text) on both sides
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}

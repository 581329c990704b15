use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::graph::entity::{Entity, MergePolicy, DEFAULT_ENTITY_TYPE};
use crate::graph::error::GraphError;

#[cfg(test)]
use mockall::automock;

/// Storage boundary for entity records keyed by canonical name
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Entity>, GraphError>;

    /// Records for the given keys; unknown keys are skipped
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Entity>, GraphError>;

    /// Records holding at least one edge that targets `id`
    async fn referencing(&self, id: &str) -> Result<Vec<Entity>, GraphError>;

    /// Atomically create `entity` or merge it into the stored record.
    /// Returns the number of edges appended.
    async fn upsert_merge(
        &self,
        entity: Entity,
        policy: MergePolicy,
        dedupe: bool,
    ) -> Result<usize, GraphError>;

    async fn all(&self) -> Result<Vec<Entity>, GraphError>;

    async fn ids(&self) -> Result<Vec<String>, GraphError>;

    async fn count(&self) -> Result<usize, GraphError>;

    /// Persist pending state, if the store has a backing file
    async fn flush(&self) -> Result<(), GraphError>;
}

#[derive(Default)]
struct Records {
    entities: HashMap<String, Entity>,
    /// target key -> keys of records with an edge into it
    incoming: HashMap<String, BTreeSet<String>>,
}

impl Records {
    fn insert(&mut self, entity: Entity, policy: MergePolicy, dedupe: bool) -> usize {
        for target in entity.relationships.target_ids() {
            self.incoming
                .entry(target.clone())
                .or_default()
                .insert(entity.id.clone());
        }

        match self.entities.get_mut(&entity.id) {
            Some(existing) => existing.merge(entity, policy, dedupe),
            None => {
                let mut entity = entity;
                if entity.entity_type.is_empty() {
                    entity.entity_type = DEFAULT_ENTITY_TYPE.to_string();
                }
                let appended = entity.relationships.len();
                self.entities.insert(entity.id.clone(), entity);
                appended
            }
        }
    }
}

/// In-memory record store with an optional JSONL snapshot on disk.
///
/// Every write holds the lock for the whole read-merge-write, so concurrent
/// upserts of the same key serialize.
pub struct MemoryStore {
    records: RwLock<Records>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            path: None,
        }
    }

    /// Open a store backed by `path`, loading the snapshot if one exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let path = path.as_ref().to_owned();
        let mut records = Records::default();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let entity: Entity = serde_json::from_str(line).map_err(|e| {
                    GraphError::invalid_record(format!("line {}", line_no + 1), e.to_string())
                })?;
                entity.validate()?;
                records.insert(entity, MergePolicy::Union, false);
            }
            info!(
                "Loaded {} entities from {:?}",
                records.entities.len(),
                path
            );
        }

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn write_snapshot(path: &Path, entities: &[&Entity]) -> Result<(), GraphError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        for entity in entities {
            writeln!(file, "{}", serde_json::to_string(entity)?)?;
        }
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Entity>, GraphError> {
        Ok(self.records.read().await.entities.get(id).cloned())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Entity>, GraphError> {
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| records.entities.get(id).cloned())
            .collect())
    }

    async fn referencing(&self, id: &str) -> Result<Vec<Entity>, GraphError> {
        let records = self.records.read().await;
        Ok(records
            .incoming
            .get(id)
            .map(|sources| {
                sources
                    .iter()
                    .filter_map(|source| records.entities.get(source).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_merge(
        &self,
        entity: Entity,
        policy: MergePolicy,
        dedupe: bool,
    ) -> Result<usize, GraphError> {
        entity.validate()?;
        let id = entity.id.clone();
        let appended = self.records.write().await.insert(entity, policy, dedupe);
        debug!(entity = %id, appended, "upserted entity");
        Ok(appended)
    }

    async fn all(&self) -> Result<Vec<Entity>, GraphError> {
        let records = self.records.read().await;
        let mut entities: Vec<Entity> = records.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn ids(&self) -> Result<Vec<String>, GraphError> {
        let records = self.records.read().await;
        let mut ids: Vec<String> = records.entities.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self) -> Result<usize, GraphError> {
        Ok(self.records.read().await.entities.len())
    }

    async fn flush(&self) -> Result<(), GraphError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let records = self.records.read().await;
        let mut entities: Vec<&Entity> = records.entities.values().collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Self::write_snapshot(path, &entities)
            .map_err(|e| GraphError::StoreWrite(format!("{:?}: {}", path, e)))?;

        info!("Saved {} entities to {:?}", entities.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::entity::Relationship;

    #[tokio::test]
    async fn test_upsert_creates_and_merges() {
        let store = MemoryStore::new();

        store
            .upsert_merge(
                Entity::new("Alan Turing", "Person").with_attribute("field", "logic"),
                MergePolicy::Union,
                false,
            )
            .await
            .unwrap();
        store
            .upsert_merge(
                Entity::new("Alan Turing", "Scientist").with_attribute("field", "computing"),
                MergePolicy::Union,
                false,
            )
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let turing = store.get("Alan Turing").await.unwrap().unwrap();
        assert_eq!(turing.entity_type, "Person");
        assert_eq!(turing.attributes["field"], vec!["logic", "computing"]);
    }

    #[tokio::test]
    async fn test_untyped_entity_gets_default_type() {
        let store = MemoryStore::new();
        store
            .upsert_merge(Entity::new("Bletchley Park", ""), MergePolicy::Union, false)
            .await
            .unwrap();

        let record = store.get("Bletchley Park").await.unwrap().unwrap();
        assert_eq!(record.entity_type, DEFAULT_ENTITY_TYPE);
    }

    #[tokio::test]
    async fn test_referencing() {
        let store = MemoryStore::new();
        store
            .upsert_merge(
                Entity::new("Alan Turing", "Person")
                    .with_relationship(Relationship::new("Bletchley Park", "worked_at")),
                MergePolicy::Union,
                false,
            )
            .await
            .unwrap();

        let sources = store.referencing("Bletchley Park").await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "Alan Turing");
        assert!(store.referencing("Alan Turing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_record() {
        let store = MemoryStore::new();
        let entity = Entity {
            id: String::new(),
            ..Entity::new("x", "Person")
        };
        let result = store.upsert_merge(entity, MergePolicy::Union, false).await;
        assert!(matches!(result, Err(GraphError::InvalidRecord { .. })));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("graph.jsonl");

        let store = MemoryStore::open(&path).unwrap();
        store
            .upsert_merge(
                Entity::new("Alan Turing", "Person")
                    .with_relationship(Relationship::new("Alonzo Church", "studied_under")),
                MergePolicy::Union,
                false,
            )
            .await
            .unwrap();
        store.flush().await.unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let sources = reopened.referencing("Alonzo Church").await.unwrap();
        assert_eq!(sources[0].id, "Alan Turing");
    }

    #[test]
    fn test_open_rejects_broken_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("graph.jsonl");
        fs::write(
            &path,
            r#"{"_id":"A","type":"T","relationships":{"target_ids":["B"],"types":["x","y"],"attributes":[{}]}}"#,
        )
        .unwrap();

        match MemoryStore::open(&path) {
            Err(GraphError::InvalidRecord { id, .. }) => assert_eq!(id, "line 1"),
            other => panic!("expected invalid record, got {:?}", other.map(|_| ())),
        }
    }
}

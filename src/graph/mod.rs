pub mod entity;
pub mod error;
pub mod export;
pub mod knowledge;
pub mod store;
pub mod traversal;

pub use entity::{canonical_key, Attributes, Entity, MergePolicy, Relationship, Relationships};
pub use error::GraphError;
pub use export::{to_jsonl, EntityGraph};
pub use knowledge::{GraphConfig, IngestReport, KnowledgeGraph};
pub use store::{MemoryStore, RecordStore};
pub use traversal::{Direction, EdgeRecord, Subgraph};

pub mod config;
pub mod datasource;
pub mod extraction;
pub mod external;
pub mod graph;
pub mod parser;
pub mod processor;
pub mod query;
pub mod splitter;

pub use config::Config;
pub use datasource::{Document, DocumentSource, LocalSource, WikipediaSource};
pub use extraction::{EntityExtractor, TypeFilter};
pub use external::{CompletionRequest, ExternalError, LLMConfig, LanguageModel, OllamaModel};
pub use graph::{
    error::GraphError, Entity, EntityGraph, GraphConfig, IngestReport, KnowledgeGraph, MemoryStore,
    RecordStore, Subgraph,
};
pub use parser::{markdown_to_text, parse_markdown_file};
pub use processor::IngestProcessor;
pub use query::{Answer, ChatResponse, QueryEngine, QueryStage};
pub use splitter::{Chunk, TokenTextSplitter};

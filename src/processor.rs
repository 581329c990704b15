use tracing::{info, warn};

use crate::datasource::DocumentSource;
use crate::graph::error::GraphError;
use crate::graph::knowledge::{IngestReport, KnowledgeGraph};
use crate::splitter::TokenTextSplitter;

/// Drives ingestion: load documents, split them, extract into the graph,
/// then persist the store.
pub struct IngestProcessor {
    splitter: TokenTextSplitter,
}

impl IngestProcessor {
    pub fn new(splitter: TokenTextSplitter) -> Self {
        Self { splitter }
    }

    /// Ingest every source into `graph`.
    ///
    /// A source that fails to load is skipped; chunk failures are counted in
    /// the report. Only a failure to persist the store aborts the run.
    pub async fn ingest(
        &self,
        graph: &KnowledgeGraph,
        sources: &[Box<dyn DocumentSource>],
    ) -> Result<IngestReport, GraphError> {
        let mut documents = Vec::new();
        for source in sources {
            match source.load().await {
                Ok(loaded) => {
                    info!("Loaded {} documents from {}", loaded.len(), source.describe());
                    documents.extend(loaded);
                }
                Err(e) => warn!("Failed to load {}: {}", source.describe(), e),
            }
        }

        let chunks = self.splitter.split_documents(&documents);
        info!(
            "Split {} documents into {} chunks of at most {} tokens",
            documents.len(),
            chunks.len(),
            self.splitter.chunk_size()
        );

        let mut report = graph.add_documents(&chunks).await?;
        report.documents = documents.len();

        graph.store().flush().await?;
        info!("Ingestion finished: {}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::Document;
    use crate::external::{LanguageModel, MockLanguageModel};
    use crate::graph::{GraphConfig, MemoryStore};
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::Arc;

    mock! {
        pub Source {}

        #[async_trait]
        impl DocumentSource for Source {
            async fn load(&self) -> Result<Vec<Document>, GraphError>;
            fn describe(&self) -> String;
        }
    }

    fn graph(model: MockLanguageModel) -> KnowledgeGraph {
        let model: Arc<dyn LanguageModel> = Arc::new(model);
        KnowledgeGraph::new(Arc::new(MemoryStore::new()), model, GraphConfig::default())
    }

    #[tokio::test]
    async fn test_ingest_success() {
        let mut source = MockSource::new();
        source.expect_load().times(1).returning(|| {
            Ok(vec![Document::new(
                "Optics",
                "test",
                "Newton studied light. Huygens disagreed.",
            )])
        });
        source.expect_describe().return_const("mock".to_string());

        let mut model = MockLanguageModel::new();
        model
            .expect_complete()
            .times(2)
            .returning(|_| Ok(r#"{"entities": [{"_id": "Newton", "type": "Person"}]}"#.to_string()));

        let graph = graph(model);
        let processor = IngestProcessor::new(TokenTextSplitter::new(4, 0).unwrap());
        let report = processor
            .ingest(&graph, &[Box::new(source) as Box<dyn DocumentSource>])
            .await
            .unwrap();

        assert_eq!(report.documents, 1);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.chunks_failed, 0);
        assert_eq!(report.entities_upserted, 2);
        assert_eq!(graph.entity_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_skips_failing_source() {
        let mut broken = MockSource::new();
        broken
            .expect_load()
            .times(1)
            .returning(|| Err(GraphError::Source("offline".to_string())));
        broken.expect_describe().return_const("broken".to_string());

        let mut model = MockLanguageModel::new();
        model.expect_complete().never();

        let graph = graph(model);
        let processor = IngestProcessor::new(TokenTextSplitter::new(16, 0).unwrap());
        let report = processor
            .ingest(&graph, &[Box::new(broken) as Box<dyn DocumentSource>])
            .await
            .unwrap();

        assert_eq!(report, IngestReport::default());
    }
}

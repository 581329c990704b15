//! Question answering over the entity graph.
//!
//! A question moves through a fixed sequence of stages:
//! `Idle -> EntityResolution -> GraphTraversal -> ContextAssembly ->
//! AnswerSynthesis -> Done`. A failure becomes an `Unavailable` answer
//! instead of an error, and the engine stays at the stage that failed so
//! callers can report where the question stopped.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::external::CompletionRequest;
use crate::graph::error::GraphError;
use crate::graph::knowledge::KnowledgeGraph;
use crate::graph::traversal::Subgraph;

pub const NO_CONTEXT_ANSWER: &str =
    "No relevant context found in the knowledge graph to answer this question.";

/// Prefix of the answer given when a question could not be processed
pub const UNAVAILABLE_ANSWER: &str = "The question could not be answered right now";

pub const ANSWER_SYSTEM: &str = "You answer questions using only the knowledge graph \
context you are given. If the context does not contain the answer, say so plainly. \
Do not invent facts.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryStage {
    Idle,
    EntityResolution,
    GraphTraversal,
    ContextAssembly,
    AnswerSynthesis,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Idle => "idle",
            QueryStage::EntityResolution => "entity resolution",
            QueryStage::GraphTraversal => "graph traversal",
            QueryStage::ContextAssembly => "context assembly",
            QueryStage::AnswerSynthesis => "answer synthesis",
            QueryStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Answer {
    /// Synthesized from retrieved graph context
    Grounded(String),
    /// Nothing in the graph matched the question
    NoContext(String),
    /// A stage failed, e.g. the model could not be reached
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: Answer,
    /// Keys the question resolved to
    pub entities: Vec<String>,
    pub subgraph: Subgraph,
}

impl ChatResponse {
    fn no_context(entities: Vec<String>) -> Self {
        Self {
            answer: Answer::NoContext(NO_CONTEXT_ANSWER.to_string()),
            entities,
            subgraph: Subgraph::default(),
        }
    }

    fn unavailable(error: &GraphError) -> Self {
        Self {
            answer: Answer::Unavailable(format!("{}: {}", UNAVAILABLE_ANSWER, error)),
            entities: Vec::new(),
            subgraph: Subgraph::default(),
        }
    }

    pub fn text(&self) -> &str {
        match &self.answer {
            Answer::Grounded(text) | Answer::NoContext(text) | Answer::Unavailable(text) => text,
        }
    }

    pub fn is_grounded(&self) -> bool {
        matches!(self.answer, Answer::Grounded(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.answer, Answer::Unavailable(_))
    }
}

pub struct QueryEngine<'a> {
    graph: &'a KnowledgeGraph,
    stage: QueryStage,
}

impl<'a> QueryEngine<'a> {
    pub fn new(graph: &'a KnowledgeGraph) -> Self {
        Self {
            graph,
            stage: QueryStage::Idle,
        }
    }

    pub fn stage(&self) -> QueryStage {
        self.stage
    }

    /// Answer `question`; failures are returned as an `Unavailable` answer
    pub async fn run(&mut self, question: &str) -> ChatResponse {
        match self.answer(question).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Question failed during {}: {}", self.stage, e);
                ChatResponse::unavailable(&e)
            }
        }
    }

    async fn answer(&mut self, question: &str) -> Result<ChatResponse, GraphError> {
        self.stage = QueryStage::EntityResolution;
        let entities = self.resolve_entities(question).await?;
        if entities.is_empty() {
            info!("No graph entities matched the question");
            self.stage = QueryStage::Done;
            return Ok(ChatResponse::no_context(entities));
        }

        self.stage = QueryStage::GraphTraversal;
        let subgraph = self
            .graph
            .traverse(&entities, self.graph.config().max_depth)
            .await?;
        if subgraph.is_empty() {
            self.stage = QueryStage::Done;
            return Ok(ChatResponse::no_context(entities));
        }
        info!(
            "Retrieved {} entities and {} edges (depth limited: {})",
            subgraph.entities.len(),
            subgraph.edges.len(),
            subgraph.depth_limited
        );

        self.stage = QueryStage::ContextAssembly;
        let context = assemble_context(&subgraph);
        debug!(%context, "assembled context");

        self.stage = QueryStage::AnswerSynthesis;
        let request = CompletionRequest::text(ANSWER_SYSTEM, build_answer_prompt(question, &context));
        let reply = self
            .graph
            .model()
            .complete(&request)
            .await
            .map_err(|e| GraphError::LlmUnavailable(e.to_string()))?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(GraphError::LlmUnavailable(
                "model returned an empty answer".to_string(),
            ));
        }

        self.stage = QueryStage::Done;
        Ok(ChatResponse {
            answer: Answer::Grounded(reply.to_string()),
            entities,
            subgraph,
        })
    }

    /// Names proposed by the model plus keys mentioned verbatim in the question
    async fn resolve_entities(&self, question: &str) -> Result<Vec<String>, GraphError> {
        let names = self.graph.extractor().extract_query_entities(question).await?;

        let mut resolved = BTreeSet::new();
        for name in &names {
            resolved.extend(self.graph.similarity_search(name).await?);
        }
        resolved.extend(self.graph.similarity_search(question).await?);

        debug!(?names, ?resolved, "resolved question entities");
        Ok(resolved.into_iter().collect())
    }
}

/// Render a subgraph as prompt context, one line per entity
pub fn assemble_context(subgraph: &Subgraph) -> String {
    let mut lines = Vec::with_capacity(subgraph.entities.len() + 1);

    for entity in &subgraph.entities {
        let mut line = format!("- {} ({})", entity.id, entity.entity_type);

        if !entity.attributes.is_empty() {
            let attributes: Vec<String> = entity
                .attributes
                .iter()
                .map(|(key, values)| format!("{}: {}", key, values.join(", ")))
                .collect();
            line.push_str(&format!("; {}", attributes.join("; ")));
        }

        let edges: Vec<String> = subgraph
            .edges
            .iter()
            .filter(|edge| edge.source_id == entity.id)
            .map(|edge| format!("{} -> {}", edge.relation_type, edge.target_id))
            .collect();
        if !edges.is_empty() {
            line.push_str(&format!("; relationships: {}", edges.join(", ")));
        }

        lines.push(line);
    }

    if subgraph.depth_limited {
        lines.push("(further related entities were not expanded)".to_string());
    }
    lines.join("\n")
}

pub fn build_answer_prompt(question: &str, context: &str) -> String {
    format!(
        "Knowledge graph context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}

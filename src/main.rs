use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

use graphrag_builder::datasource::{DocumentSource, LocalSource, WikipediaSource};
use graphrag_builder::external::{LanguageModel, OllamaModel};
use graphrag_builder::extraction::EntityExtractor;
use graphrag_builder::graph::{self, EntityGraph, GraphError, KnowledgeGraph, MemoryStore, RecordStore};
use graphrag_builder::{Config, IngestProcessor, TokenTextSplitter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Graph snapshot file (JSONL)
    #[arg(short = 's', long, global = true)]
    store: Option<PathBuf>,

    /// Ollama API endpoint, e.g. http://localhost:11434
    #[arg(short = 'e', long, global = true)]
    endpoint: Option<String>,

    /// Ollama model name
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract entities from documents into the graph
    Ingest {
        /// Search Wikipedia for this topic
        #[arg(short = 'w', long, conflicts_with = "path")]
        wikipedia: Option<String>,

        /// Read .md/.txt files from a file or directory
        #[arg(short = 'p', long)]
        path: Option<PathBuf>,

        /// Maximum number of Wikipedia articles
        #[arg(long)]
        max_docs: Option<usize>,
    },
    /// Answer a question from the graph
    Ask {
        question: String,

        /// Also print the entities and edges used as context
        #[arg(long)]
        show_context: bool,
    },
    /// Write the graph (or the neighbourhood of one entity) to a file or stdout
    Export {
        #[arg(short = 'f', long, value_enum, default_value_t = ExportFormat::Dot)]
        format: ExportFormat,

        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Only export entities reachable from this key
        #[arg(long)]
        focus: Option<String>,

        /// Hop bound for --focus
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Print entity and relationship counts
    Stats,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Dot,
    Jsonl,
}

fn build_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let model = OllamaModel::new(config.llm.clone()).context("Failed to configure Ollama")?;
    Ok(Arc::new(model))
}

fn build_graph(config: &Config, store: Arc<dyn RecordStore>) -> Result<KnowledgeGraph> {
    let model = build_model(config)?;
    let extractor = EntityExtractor::new(model.clone(), config.graph.type_filter())
        .with_retries(config.llm.max_attempts, std::time::Duration::from_secs(1));
    Ok(KnowledgeGraph::new(store, model, config.graph.clone()).with_extractor(extractor))
}

async fn ingest(
    config: &Config,
    store: Arc<dyn RecordStore>,
    wikipedia: Option<String>,
    path: Option<PathBuf>,
    max_docs: Option<usize>,
) -> Result<()> {
    let source: Box<dyn DocumentSource> = match (wikipedia, path) {
        (Some(query), _) => Box::new(WikipediaSource::new(
            &query,
            max_docs.unwrap_or(config.ingest.load_max_docs),
            &config.ingest.wikipedia_lang,
        )),
        (None, Some(path)) => Box::new(LocalSource::new(path)),
        (None, None) => bail!("ingest needs --wikipedia <QUERY> or --path <PATH>"),
    };

    let graph = build_graph(config, store)?;
    let splitter = TokenTextSplitter::new(config.ingest.chunk_size, config.ingest.chunk_overlap)?;
    let report = IngestProcessor::new(splitter).ingest(&graph, &[source]).await?;

    println!("{}", report);
    Ok(())
}

async fn ask(config: &Config, store: Arc<dyn RecordStore>, question: &str, show_context: bool) -> Result<()> {
    let graph = build_graph(config, store)?;
    let response = graph.chat_response(question).await;

    println!("{}", response.text());
    if show_context && response.is_grounded() {
        println!("\nEntities: {}", response.entities.join(", "));
        for edge in &response.subgraph.edges {
            println!("  {} -[{}]-> {}", edge.source_id, edge.relation_type, edge.target_id);
        }
    }
    Ok(())
}

async fn export(
    config: &Config,
    store: Arc<dyn RecordStore>,
    format: ExportFormat,
    output: Option<PathBuf>,
    focus: Option<String>,
    depth: Option<usize>,
) -> Result<()> {
    let (entities, subgraph) = match focus {
        Some(key) => {
            let start = vec![graph::canonical_key(&key)];
            let subgraph = graph::traversal::traverse(
                store.as_ref(),
                &start,
                depth.unwrap_or(config.graph.max_depth),
                config.graph.direction,
            )
            .await?;
            if subgraph.is_empty() {
                return Err(GraphError::NoMatchingEntity(key).into());
            }
            (subgraph.entities.clone(), Some(subgraph))
        }
        None => (store.all().await?, None),
    };

    let rendered = match (format, &subgraph) {
        (ExportFormat::Dot, Some(subgraph)) => EntityGraph::from_subgraph(subgraph).to_dot(),
        (ExportFormat::Dot, None) => EntityGraph::from_entities(&entities).to_dot(),
        (ExportFormat::Jsonl, _) => graph::to_jsonl(&entities)?,
    };

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {:?}", path))?;
            info!("Exported {} entities to {:?}", entities.len(), path);
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

async fn stats(store: Arc<dyn RecordStore>) -> Result<()> {
    let entities = store.all().await?;
    let relationships: usize = entities.iter().map(|e| e.relationships.len()).sum();

    println!("entities: {}", entities.len());
    println!("relationships: {}", relationships);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(endpoint) = &args.endpoint {
        config.llm.set_endpoint(endpoint)?;
    }
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    if let Some(store) = &args.store {
        config.output.store_path = store.display().to_string();
    }

    let level: Level = config.output.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let store: Arc<dyn RecordStore> = Arc::new(
        MemoryStore::open(&config.output.store_path)
            .with_context(|| format!("Failed to open store {}", config.output.store_path))?,
    );

    match args.command {
        Command::Ingest {
            wikipedia,
            path,
            max_docs,
        } => ingest(&config, store, wikipedia, path, max_docs).await,
        Command::Ask {
            question,
            show_context,
        } => ask(&config, store, &question, show_context).await,
        Command::Export {
            format,
            output,
            focus,
            depth,
        } => export(&config, store, format, output, focus, depth).await,
        Command::Stats => stats(store).await,
    }
}

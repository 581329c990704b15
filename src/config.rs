use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::external::LLMConfig;
use crate::graph::{Direction, GraphConfig, MergePolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub load_max_docs: usize,
    pub wikipedia_lang: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub store_path: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LLMConfig,
    pub ingest: IngestConfig,
    pub graph: GraphConfig,
    pub output: OutputConfig,
}

/// Parse an environment variable, falling back to `default` when it is
/// unset or unparseable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma separated list; blank entries are dropped
fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let llm_defaults = LLMConfig::default();
        let llm = LLMConfig {
            model: env::var("OLLAMA_LLM_MODEL").unwrap_or(llm_defaults.model),
            host: env::var("OLLAMA_HOST").unwrap_or(llm_defaults.host),
            port: env_or("OLLAMA_PORT", llm_defaults.port),
            temperature: env_or("OLLAMA_TEMPERATURE", llm_defaults.temperature),
            top_p: env_or("OLLAMA_TOP_P", llm_defaults.top_p),
            timeout_secs: env_or("LLM_TIMEOUT_SECS", llm_defaults.timeout_secs),
            max_attempts: env_or("LLM_MAX_ATTEMPTS", llm_defaults.max_attempts).max(1),
        };

        let ingest = IngestConfig {
            chunk_size: env_or("CHUNK_SIZE", 1024),
            chunk_overlap: env_or("CHUNK_OVERLAP", 0),
            load_max_docs: env_or("LOAD_MAX_DOCS", 3),
            wikipedia_lang: env::var("WIKIPEDIA_LANG").unwrap_or_else(|_| "en".to_string()),
        };

        // Policy switches change graph semantics, so a typo is an error
        let defaults = GraphConfig::default();
        let merge_policy = match env::var("MERGE_POLICY") {
            Ok(v) => v.parse::<MergePolicy>()?,
            Err(_) => defaults.merge_policy,
        };
        let direction = match env::var("TRAVERSAL_DIRECTION") {
            Ok(v) => v.parse::<Direction>()?,
            Err(_) => defaults.direction,
        };
        let graph = GraphConfig {
            max_depth: env_or("MAX_DEPTH", defaults.max_depth),
            merge_policy,
            dedupe_relationships: env_or("DEDUPE_RELATIONSHIPS", defaults.dedupe_relationships),
            direction,
            allowed_entity_types: env_list("ALLOWED_ENTITY_TYPES"),
            allowed_relationship_types: env_list("ALLOWED_RELATIONSHIP_TYPES"),
            store_write_retries: env_or("STORE_WRITE_RETRIES", defaults.store_write_retries),
            max_concurrent_requests: env_or("MAX_CONCURRENT_REQUESTS", defaults.max_concurrent_requests)
                .max(1),
        };

        let output = OutputConfig {
            store_path: env::var("STORE_PATH")
                .unwrap_or_else(|_| "./output/graph.jsonl".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        Ok(Self {
            llm,
            ingest,
            graph,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopeguard::guard;
    use std::env;

    const VARS: &[&str] = &[
        "OLLAMA_LLM_MODEL",
        "OLLAMA_HOST",
        "OLLAMA_PORT",
        "OLLAMA_TEMPERATURE",
        "OLLAMA_TOP_P",
        "LLM_TIMEOUT_SECS",
        "LLM_MAX_ATTEMPTS",
        "CHUNK_SIZE",
        "CHUNK_OVERLAP",
        "LOAD_MAX_DOCS",
        "WIKIPEDIA_LANG",
        "MAX_DEPTH",
        "MERGE_POLICY",
        "DEDUPE_RELATIONSHIPS",
        "TRAVERSAL_DIRECTION",
        "ALLOWED_ENTITY_TYPES",
        "ALLOWED_RELATIONSHIP_TYPES",
        "STORE_WRITE_RETRIES",
        "MAX_CONCURRENT_REQUESTS",
        "STORE_PATH",
        "LOG_LEVEL",
    ];

    fn clean_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_default_config() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        let config = Config::from_env().unwrap();

        assert_eq!(config.llm.model, "mistral", "wrong default llm model");
        assert_eq!(config.llm.temperature, 0.0, "wrong default temperature");
        assert_eq!(config.ingest.chunk_size, 1024, "wrong default chunk size");
        assert_eq!(config.ingest.chunk_overlap, 0, "wrong default overlap");
        assert_eq!(config.ingest.load_max_docs, 3, "wrong default max docs");
        assert_eq!(config.graph.max_depth, 3, "wrong default depth");
        assert_eq!(config.graph.merge_policy, MergePolicy::Union);
        assert_eq!(config.graph.direction, Direction::Both);
        assert!(!config.graph.dedupe_relationships);
        assert!(config.graph.allowed_entity_types.is_empty());
        assert_eq!(
            config.output.store_path, "./output/graph.jsonl",
            "wrong default store path"
        );
    }

    #[test]
    #[serial_test::serial]
    fn test_custom_config() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        env::set_var("OLLAMA_LLM_MODEL", "llama3");
        env::set_var("CHUNK_SIZE", "256");
        env::set_var("MAX_DEPTH", "1");
        env::set_var("MERGE_POLICY", "Replace");
        env::set_var("DEDUPE_RELATIONSHIPS", "true");
        env::set_var("TRAVERSAL_DIRECTION", "outgoing");
        env::set_var("ALLOWED_ENTITY_TYPES", "Person, Place,,");
        env::set_var("STORE_PATH", "/tmp/custom.jsonl");

        let config = Config::from_env().unwrap();

        assert_eq!(config.llm.model, "llama3", "llm model mismatch");
        assert_eq!(config.ingest.chunk_size, 256, "chunk size mismatch");
        assert_eq!(config.graph.max_depth, 1, "depth mismatch");
        assert_eq!(config.graph.merge_policy, MergePolicy::Replace);
        assert!(config.graph.dedupe_relationships);
        assert_eq!(config.graph.direction, Direction::Outgoing);
        assert_eq!(config.graph.allowed_entity_types, vec!["Person", "Place"]);
        assert_eq!(config.output.store_path, "/tmp/custom.jsonl");
    }

    #[test]
    #[serial_test::serial]
    fn test_unparseable_number_uses_default() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        env::set_var("CHUNK_SIZE", "lots");
        let config = Config::from_env().unwrap();
        assert_eq!(config.ingest.chunk_size, 1024);
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_policy_is_rejected() {
        clean_env();
        let _guard = guard((), |_| clean_env());

        env::set_var("MERGE_POLICY", "overwrite-everything");
        assert!(Config::from_env().is_err());
    }
}

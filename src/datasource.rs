use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::graph::error::GraphError;
use crate::parser::markdown_to_text;

const USER_AGENT: &str = "graphrag-builder/0.1";

/// Raw source text before splitting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub source: String,
    pub content: String,
}

impl Document {
    pub fn new(title: &str, source: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            source: source.to_string(),
            content: content.to_string(),
        }
    }
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Document>, GraphError>;

    fn describe(&self) -> String;
}

/// Encyclopedia articles matching a search query
pub struct WikipediaSource {
    client: Client,
    query: String,
    max_docs: usize,
    language: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    missing: bool,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    query: ExtractQuery,
}

impl WikipediaSource {
    pub fn new(query: &str, max_docs: usize, language: &str) -> Self {
        Self {
            client: Client::new(),
            query: query.to_string(),
            max_docs,
            language: language.to_string(),
        }
    }

    fn api_url(&self, params: &[(&str, &str)]) -> Result<Url, GraphError> {
        let base = format!("https://{}.wikipedia.org/w/api.php", self.language);
        Url::parse_with_params(&base, params)
            .map_err(|e| GraphError::Source(format!("invalid Wikipedia URL {}: {}", base, e)))
    }

    fn page_url(&self, title: &str) -> String {
        format!(
            "https://{}.wikipedia.org/wiki/{}",
            self.language,
            title.replace(' ', "_")
        )
    }

    async fn get_text(&self, url: Url) -> Result<String, GraphError> {
        let response = self
            .client
            .get(url.as_str())
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| GraphError::Source(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GraphError::Source(format!(
                "Wikipedia request failed: {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| GraphError::Source(e.to_string()))
    }

    async fn search_titles(&self) -> Result<Vec<String>, GraphError> {
        let limit = self.max_docs.to_string();
        let url = self.api_url(&[
            ("action", "query"),
            ("list", "search"),
            ("srsearch", &self.query),
            ("srlimit", &limit),
            ("format", "json"),
            ("formatversion", "2"),
        ])?;
        titles_from_search(&self.get_text(url).await?)
    }

    async fn fetch_article(&self, title: &str) -> Result<Option<Document>, GraphError> {
        let url = self.api_url(&[
            ("action", "query"),
            ("prop", "extracts"),
            ("explaintext", "1"),
            ("redirects", "1"),
            ("titles", title),
            ("format", "json"),
            ("formatversion", "2"),
        ])?;
        let body = self.get_text(url).await?;
        document_from_extract(&body, &self.page_url(title))
    }
}

/// Titles from a `list=search` reply
fn titles_from_search(body: &str) -> Result<Vec<String>, GraphError> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| GraphError::Source(format!("unexpected search reply: {}", e)))?;
    Ok(response.query.search.into_iter().map(|hit| hit.title).collect())
}

/// First non-empty page of a `prop=extracts` reply
fn document_from_extract(body: &str, source: &str) -> Result<Option<Document>, GraphError> {
    let response: ExtractResponse = serde_json::from_str(body)
        .map_err(|e| GraphError::Source(format!("unexpected extract reply: {}", e)))?;

    Ok(response
        .query
        .pages
        .into_iter()
        .filter(|page| !page.missing)
        .find_map(|page| {
            let extract = page.extract?;
            let extract = extract.trim();
            (!extract.is_empty()).then(|| Document::new(&page.title, source, extract))
        }))
}

#[async_trait]
impl DocumentSource for WikipediaSource {
    async fn load(&self) -> Result<Vec<Document>, GraphError> {
        if self.max_docs == 0 {
            return Ok(Vec::new());
        }

        info!("Searching Wikipedia for '{}'", self.query);
        let titles = self.search_titles().await?;

        let mut documents = Vec::new();
        for title in titles.iter().take(self.max_docs) {
            match self.fetch_article(title).await {
                Ok(Some(document)) => {
                    info!(
                        "Loaded article '{}' ({} chars)",
                        document.title,
                        document.content.len()
                    );
                    documents.push(document);
                }
                Ok(None) => warn!("Article '{}' has no text, skipping", title),
                Err(e) => warn!("Failed to load article '{}': {}", title, e),
            }
        }

        Ok(documents)
    }

    fn describe(&self) -> String {
        format!("wikipedia:{} (max {})", self.query, self.max_docs)
    }
}

/// Text and markdown files from a file or directory
pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    /// Lowercased file extension
    fn extension(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    fn is_supported_file(path: &Path) -> bool {
        matches!(
            Self::extension(path).as_deref(),
            Some("md") | Some("markdown") | Some("txt")
        )
    }

    fn read_document(path: &Path) -> Result<Document, GraphError> {
        let raw = std::fs::read_to_string(path)?;
        let content = match Self::extension(path).as_deref() {
            Some("txt") => raw,
            _ => markdown_to_text(&raw),
        };
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled");
        Ok(Document::new(title, &path.display().to_string(), &content))
    }
}

#[async_trait]
impl DocumentSource for LocalSource {
    async fn load(&self) -> Result<Vec<Document>, GraphError> {
        if !self.path.exists() {
            return Err(GraphError::Source(format!(
                "path does not exist: {:?}",
                self.path
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && Self::is_supported_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut documents = Vec::new();
        for file in files {
            let document = match Self::read_document(&file) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Failed to read {:?}, skipping: {}", file, e);
                    continue;
                }
            };
            if document.content.trim().is_empty() {
                warn!("Skipping empty file {:?}", file);
                continue;
            }
            info!("Loaded {:?}", file);
            documents.push(document);
        }
        Ok(documents)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titles_from_search() {
        let body = r#"{"batchcomplete": true, "query": {"searchinfo": {"totalhits": 2},
            "search": [{"ns": 0, "title": "Isaac Newton", "pageid": 1}, {"ns": 0, "title": "Newton's laws", "pageid": 2}]}}"#;
        assert_eq!(
            titles_from_search(body).unwrap(),
            vec!["Isaac Newton", "Newton's laws"]
        );
        assert!(titles_from_search("<html>").is_err());
    }

    #[test]
    fn test_document_from_extract() {
        let body = r#"{"query": {"pages": [
            {"title": "Ghost", "missing": true},
            {"pageid": 1, "title": "Isaac Newton", "extract": "Sir Isaac Newton was a mathematician.\n"}
        ]}}"#;
        let document = document_from_extract(body, "https://en.wikipedia.org/wiki/Isaac_Newton")
            .unwrap()
            .unwrap();
        assert_eq!(document.title, "Isaac Newton");
        assert_eq!(document.content, "Sir Isaac Newton was a mathematician.");

        let empty = r#"{"query": {"pages": [{"title": "Stub", "extract": "  "}]}}"#;
        assert!(document_from_extract(empty, "x").unwrap().is_none());
    }

    #[test]
    fn test_search_url_is_encoded() {
        let source = WikipediaSource::new("Nobel laureates & physics", 3, "de");
        let url = source.api_url(&[("srsearch", "Nobel laureates & physics")]).unwrap();
        assert_eq!(url.host_str(), Some("de.wikipedia.org"));
        assert!(url.as_str().contains("srsearch=Nobel+laureates+%26+physics"));
        assert_eq!(source.page_url("Isaac Newton"), "https://de.wikipedia.org/wiki/Isaac_Newton");
    }

    #[tokio::test]
    async fn test_local_source_reads_supported_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("a.md"), "# Heading\nSome *markdown*.").unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
        std::fs::write(temp_dir.path().join("sub").join("b.txt"), "Plain text.").unwrap();
        std::fs::write(temp_dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(temp_dir.path().join("empty.txt"), "  ").unwrap();

        let documents = LocalSource::new(temp_dir.path()).load().await.unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].title, "a");
        assert_eq!(documents[0].content, "Heading\n\nSome markdown.");
        assert_eq!(documents[1].content, "Plain text.");
    }

    #[tokio::test]
    async fn test_local_source_skips_unreadable_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "Readable text.").unwrap();
        std::fs::write(temp_dir.path().join("b.txt"), [0xffu8, 0xfe, 0x41]).unwrap();

        let documents = LocalSource::new(temp_dir.path()).load().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "Readable text.");
    }

    #[tokio::test]
    async fn test_uppercase_txt_is_not_flattened() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("NOTES.TXT"), "# not a heading\n*kept*").unwrap();

        let documents = LocalSource::new(temp_dir.path()).load().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "# not a heading\n*kept*");
    }

    #[tokio::test]
    async fn test_local_source_missing_path() {
        let result = LocalSource::new("/definitely/not/here").load().await;
        assert!(matches!(result, Err(GraphError::Source(_))));
    }
}

pub mod error;
mod llm;

pub use error::ExternalError;
pub use llm::{CompletionRequest, LLMConfig, LanguageModel, OllamaModel, ResponseFormat};

#[cfg(test)]
pub use llm::MockLanguageModel;

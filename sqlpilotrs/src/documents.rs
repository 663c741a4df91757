//! Answers from the procurement reference documents.
//!
//! Chunking and embeddings live behind [`DocumentRetriever`]; this module only
//! grounds the model in the retrieved chunks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::LanguageModel;
use crate::prompts::{document_prompt, NO_DOCUMENT_ANSWER};

pub const NOT_CONFIGURED_TEXT: &str = "Sorry, the document knowledge base is not set up correctly.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    /// File or document the chunk came from.
    #[serde(default)]
    pub source: Option<String>,
}

impl DocumentChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }
}

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// The `k` chunks most similar to `question`, best first.
    async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<DocumentChunk>>;
}

/// Whether a document answer carries information.
pub fn has_document_answer(text: &str) -> bool {
    !text.contains("Sorry, I don't have enough information")
}

pub struct DocumentAnswerer {
    retriever: Option<Arc<dyn DocumentRetriever>>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl DocumentAnswerer {
    pub fn new(
        retriever: Option<Arc<dyn DocumentRetriever>>,
        model: Arc<dyn LanguageModel>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            model,
            top_k: top_k.max(1),
        }
    }

    /// Always yields user-facing text; failures are reported inline.
    pub async fn answer(&self, question: &str) -> String {
        let Some(retriever) = &self.retriever else {
            return NOT_CONFIGURED_TEXT.to_string();
        };
        match self.grounded_answer(retriever.as_ref(), question).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "document answer failed");
                format!("Error from document chatbot: {e}")
            }
        }
    }

    async fn grounded_answer(&self, retriever: &dyn DocumentRetriever, question: &str) -> Result<String> {
        let chunks = retriever.retrieve(question, self.top_k).await?;
        tracing::debug!(chunks = chunks.len(), k = self.top_k, "retrieved document chunks");
        if chunks.is_empty() {
            return Ok(NO_DOCUMENT_ANSWER.to_string());
        }
        let context = chunks
            .iter()
            .map(|c| c.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n");
        let answer = self.model.complete(&document_prompt(question, &context)).await?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::SqlPilotError;

    struct EchoModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(" Spend Cube shows spend by supplier. ".to_string())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FixedRetriever(Vec<DocumentChunk>);

    #[async_trait]
    impl DocumentRetriever for FixedRetriever {
        async fn retrieve(&self, _question: &str, k: usize) -> Result<Vec<DocumentChunk>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct BrokenRetriever;

    #[async_trait]
    impl DocumentRetriever for BrokenRetriever {
        async fn retrieve(&self, _question: &str, _k: usize) -> Result<Vec<DocumentChunk>> {
            Err(SqlPilotError::Config("index missing".to_string()))
        }
    }

    fn model() -> Arc<EchoModel> {
        Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn answers_from_top_k_chunks() {
        let model = model();
        let chunks = (0..7).map(|i| DocumentChunk::new(format!("chunk {i}"))).collect();
        let answerer = DocumentAnswerer::new(Some(Arc::new(FixedRetriever(chunks))), model.clone(), 5);
        let text = answerer.answer("Which report shows spend?").await;
        assert_eq!(text, "Spend Cube shows spend by supplier.");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("chunk 4"));
        assert!(!prompts[0].contains("chunk 5"));
    }

    #[tokio::test]
    async fn missing_retriever_and_errors_are_reported_inline() {
        let answerer = DocumentAnswerer::new(None, model(), 5);
        assert_eq!(answerer.answer("q").await, NOT_CONFIGURED_TEXT);

        let answerer = DocumentAnswerer::new(Some(Arc::new(BrokenRetriever)), model(), 5);
        assert_eq!(
            answerer.answer("q").await,
            "Error from document chatbot: config error: index missing"
        );
    }

    #[tokio::test]
    async fn no_chunks_means_no_answer() {
        let answerer = DocumentAnswerer::new(Some(Arc::new(FixedRetriever(vec![]))), model(), 5);
        let text = answerer.answer("q").await;
        assert!(!has_document_answer(&text));
    }
}

// Embedding generation
// The index store only sees the Embedder trait; Ollama is the production backend

pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use ollama::OllamaClient;

/// Turns texts into fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;

    /// Embed each text; the output has one vector per input, in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text
    #[inline]
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::RagError::Embedding("No embedding returned".to_string()))
    }
}

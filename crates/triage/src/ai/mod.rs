//! External AI capabilities: embeddings and text generation
//!
//! The engine sees both only through [`EmbeddingProvider`] and
//! [`TextGenerator`]. Ollama implementations talk HTTP; [`HashingEmbedder`]
//! runs offline.

mod hashing;
mod ollama;

pub use hashing::HashingEmbedder;
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaGenerator};

use thiserror::Error;

/// Failure of an AI capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("AI service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Invalid AI service response: {message}")]
    InvalidResponse { message: String },
}

/// Turns text into a fixed-length vector
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`; the result is L2-normalized
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;

    fn model(&self) -> &str;
}

/// Generates text from a prompt
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, AiError>;

    fn model(&self) -> &str;
}

/// L2-normalize a vector so cosine similarity == dot product
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Dot product; equals cosine similarity for normalized vectors
///
/// Vectors of different length (a model change) score zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_mismatched_dimensions() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}

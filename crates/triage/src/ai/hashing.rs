//! Offline embedder based on feature hashing
//!
//! Each lowercase word and adjacent word pair is hashed (FNV-1a) into a
//! fixed number of buckets. Texts sharing vocabulary get similar vectors,
//! which is enough for tests and for running without a model server.

use super::{AiError, EmbeddingProvider, normalize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embedder
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let hash = token.bytes().fold(FNV_OFFSET, |h, b| (h ^ b as u64).wrapping_mul(FNV_PRIME));
        // High bit picks the sign so collisions partly cancel
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        ((hash % self.dimensions as u64) as usize, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut vector = vec![0.0f32; self.dimensions];
        for word in &words {
            let (index, sign) = self.bucket(word);
            vector[index] += sign;
        }
        for pair in words.windows(2) {
            let (index, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[index] += 0.5 * sign;
        }

        Ok(normalize(vector))
    }

    fn model(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::cosine;

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Budget 2024 review").unwrap();
        let b = embedder.embed("budget 2024 REVIEW").unwrap();
        assert_eq!(a, b);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("quarterly budget").unwrap();
        let related = embedder.embed("the quarterly budget is attached").unwrap();
        let unrelated = embedder.embed("lunch on friday at noon").unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(8).embed("  ").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}

//! Embedding contract shared by all providers

pub mod providers;
pub mod router;

use crate::error::Result;
use async_trait::async_trait;

pub use router::EmbeddingRouter;

/// A batch of embeddings with provider attribution
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// One L2-normalized vector per input text, in input order
    pub vectors: Vec<Vec<f32>>,
    /// Provider that produced the batch
    pub provider: String,
    /// Model used by that provider
    pub model: String,
    /// Vector dimension
    pub dimension: usize,
}

/// Trait for embedding backends
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Provider name for logs and artifact metadata
    fn name(&self) -> &str;

    /// Model identifier
    fn model(&self) -> &str;

    /// Embed an ordered sequence of texts; the result preserves order
    /// and every vector has the same dimension
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Normalize a vector to unit L2 length in place
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two vectors of equal dimension
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Mean of a set of vectors, L2-normalized; used for section and
/// indicator seed centroids
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut out = vec![0.0f32; first.len()];
    for v in vectors {
        for (o, x) in out.iter_mut().zip(v.iter()) {
            *o += x;
        }
    }
    let n = vectors.len() as f32;
    for o in out.iter_mut() {
        *o /= n;
    }
    l2_normalize(&mut out);
    Some(out)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(cosine_similarity(&a, &b), 1.0);
        assert_eq!(cosine_similarity(&a, &c), 0.0);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_centroid_is_normalized() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let c = centroid(&vectors).unwrap();
        let norm: f32 = c.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!(centroid(&[]).is_none());
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity() {
        let embedder = testing::HashEmbedder::new(128);
        let a = embedder.embed_one("garantía bancaria por el anticipo");
        let b = embedder.embed_one("la garantía bancaria cubre el anticipo");
        let c = embedder.embed_one("cronograma de hitos mensuales");

        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }
}

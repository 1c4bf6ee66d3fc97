//! Narrow interface to the image-embedding collaborator. Only the model
//! identity, vector dimensionality, and a bytes-in/vector-out call are
//! visible here; everything else about the model stays external.

use crate::error::{Error, Result};
use half::f16;

/// A fixed-dimensional half-precision vector with its precomputed
/// inverse norm, so cosine similarity is a dot product and two
/// multiplies.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    vec: Vec<f16>,
    inv_norm: f32,
}

impl Embedding {
    pub fn from_f32(values: &[f32]) -> Embedding {
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        let inv_norm = if norm > 0.0 { 1.0 / norm } else { 0.0 };
        Embedding {
            vec: values.iter().map(|v| f16::from_f32(*v)).collect(),
            inv_norm,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.vec.len()
    }

    pub fn inv_norm(&self) -> f32 {
        self.inv_norm
    }

    /// Serialize the vector as little-endian u16 words for blob storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.vec.len() * 2);
        for v in &self.vec {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8], inv_norm: f32) -> Result<Embedding> {
        if bytes.len() % 2 != 0 {
            return Err(Error::transient(anyhow::anyhow!(
                "embedding blob has odd length {}",
                bytes.len()
            )));
        }
        let vec = bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Embedding { vec, inv_norm })
    }

    /// Cosine similarity in [-1, 1]. Dimension mismatch compares the
    /// shared prefix, which only happens across model versions.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        let dot: f32 = self
            .vec
            .iter()
            .zip(&other.vec)
            .map(|(a, b)| a.to_f32() * b.to_f32())
            .sum();
        dot * self.inv_norm * other.inv_norm
    }
}

/// The image-embedding collaborator. Implementations wrap whatever model
/// runtime is deployed; the crate only relies on this contract.
pub trait Clip: Send + Sync {
    /// Model version string stored alongside every embedding row.
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed an encoded image. Transient failures are retried by the
    /// indexing queues on the next pass.
    fn embed_image(&self, encoded: &[u8]) -> Result<Embedding>;
}

/// Placeholder used when AI support is disabled by configuration.
pub struct DisabledClip;

impl Clip for DisabledClip {
    fn model(&self) -> &str {
        "disabled"
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn embed_image(&self, _encoded: &[u8]) -> Result<Embedding> {
        Err(Error::Unavailable("image embedding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip_preserves_vector() {
        let e = Embedding::from_f32(&[0.5, -0.25, 1.0, 0.0]);
        let bytes = e.to_bytes();
        let back = Embedding::from_bytes(&bytes, e.inv_norm()).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn test_odd_blob_rejected() {
        assert!(Embedding::from_bytes(&[1, 2, 3], 1.0).is_err());
    }

    #[test]
    fn test_cosine_of_identical_vectors_is_one() {
        let e = Embedding::from_f32(&[3.0, 4.0]);
        let sim = e.cosine(&e);
        assert!((sim - 1.0).abs() < 1e-3, "got {}", sim);
    }

    #[test]
    fn test_cosine_of_orthogonal_vectors_is_zero() {
        let a = Embedding::from_f32(&[1.0, 0.0]);
        let b = Embedding::from_f32(&[0.0, 1.0]);
        assert!(a.cosine(&b).abs() < 1e-3);
    }

    #[test]
    fn test_disabled_clip_is_unavailable() {
        let err = DisabledClip.embed_image(&[]).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}

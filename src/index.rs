//! In-memory dense-vector index.
//!
//! Append-only flat index over fixed-dimension f32 vectors. Every stored
//! vector is L2-normalized on insertion, so the inner product of a stored
//! vector with a normalized query equals cosine similarity.
//!
//! Offsets into the index are aligned 1:1 with `DocumentRecord.slot_index`
//! in the metadata store; [`crate::store::DocumentStore`] owns that pairing.
//!
//! Persistence is a little-endian f32 file with a small header
//! (`magic`, `dims`, `count`), the same byte layout used for per-vector
//! BLOB storage, generalized to a whole-index file.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"VIX1";

pub struct VectorIndex {
    dims: usize,
    /// Flat row-major storage: vector `i` occupies `[i*dims, (i+1)*dims)`.
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::Config("vector dimension must be > 0".into()));
        }
        Ok(Self {
            dims,
            data: Vec::new(),
        })
    }

    /// Load an index file, or start empty if the file does not exist.
    /// A header/dimension mismatch is a fatal configuration error, not a
    /// recoverable one.
    pub fn load(path: &Path, dims: usize) -> Result<Self> {
        if !path.exists() {
            return Self::new(dims);
        }

        let bytes = fs::read(path)?;
        if bytes.len() < 12 || &bytes[0..4] != MAGIC {
            return Err(Error::Config(format!(
                "not a vector index file: {}",
                path.display()
            )));
        }

        let file_dims = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;

        if file_dims != dims {
            return Err(Error::Config(format!(
                "index file has dimension {} but {} was configured",
                file_dims, dims
            )));
        }

        let expected = 12 + count * dims * 4;
        if bytes.len() != expected {
            return Err(Error::Config(format!(
                "truncated vector index file: {} ({} bytes, expected {})",
                path.display(),
                bytes.len(),
                expected
            )));
        }

        let data = bytes[12..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self { dims, data })
    }

    /// Persist the full index. Writes to a sibling temp file and renames so
    /// a crash mid-write never leaves a half-written index behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let count = self.count() as u32;
        let mut bytes = Vec::with_capacity(12 + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        for &v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn count(&self) -> usize {
        self.data.len() / self.dims
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a batch of vectors, normalizing each to unit L2 norm.
    /// Returns the offset the first vector landed at.
    pub fn append(&mut self, vectors: &[Vec<f32>]) -> Result<u32> {
        for v in vectors {
            if v.len() != self.dims {
                return Err(Error::Config(format!(
                    "vector has dimension {} but the index expects {}",
                    v.len(),
                    self.dims
                )));
            }
        }

        let base = self.count() as u32;
        for v in vectors {
            let mut row = v.clone();
            normalize(&mut row);
            self.data.extend_from_slice(&row);
        }
        Ok(base)
    }

    /// Drop every vector at offset `len` and beyond. Rollback support for
    /// the two-store write in [`crate::store::DocumentStore::add`].
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dims);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Inner-product score of the normalized query against every stored
    /// vector, by offset. Used for the dynamic-threshold score distribution.
    pub fn scan_scores(&self, query: &[f32]) -> Result<Vec<f32>> {
        let q = self.normalized_query(query)?;
        Ok((0..self.count()).map(|i| self.dot(i, &q)).collect())
    }

    /// Up to `k` best matches as `(offset, raw_score)`, ordered descending
    /// by score. An empty index yields an empty result, not an error.
    pub fn search_raw(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let q = self.normalized_query(query)?;
        let mut scored: Vec<(u32, f32)> = (0..self.count())
            .map(|i| (i as u32, self.dot(i, &q)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.min(self.count()));
        Ok(scored)
    }

    fn normalized_query(&self, query: &[f32]) -> Result<Vec<f32>> {
        if query.len() != self.dims {
            return Err(Error::Config(format!(
                "query has dimension {} but the index expects {}",
                query.len(),
                self.dims
            )));
        }
        let mut q = query.to_vec();
        normalize(&mut q);
        Ok(q)
    }

    fn dot(&self, offset: usize, query: &[f32]) -> f32 {
        let row = &self.data[offset * self.dims..(offset + 1) * self.dims];
        row.iter().zip(query.iter()).map(|(a, b)| a * b).sum()
    }
}

/// Normalize a vector to unit L2 norm in place. Zero-magnitude vectors are
/// left untouched; they score 0 against everything.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_len(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_append_normalizes() {
        let mut idx = VectorIndex::new(3).unwrap();
        idx.append(&[vec![3.0, 0.0, 4.0]]).unwrap();
        assert_eq!(idx.count(), 1);
        let stored = &idx.data[0..3];
        assert!((unit_len(stored) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_vector_survives_normalization() {
        let mut idx = VectorIndex::new(2).unwrap();
        idx.append(&[vec![0.0, 0.0]]).unwrap();
        let scores = idx.scan_scores(&[1.0, 0.0]).unwrap();
        assert_eq!(scores, vec![0.0]);
    }

    #[test]
    fn test_search_empty_index() {
        let idx = VectorIndex::new(4).unwrap();
        let hits = idx.search_raw(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut idx = VectorIndex::new(2).unwrap();
        idx.append(&[
            vec![1.0, 0.0],  // identical to query
            vec![0.0, 1.0],  // orthogonal
            vec![1.0, 1.0],  // 45 degrees
        ])
        .unwrap();

        let hits = idx.search_raw(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].0, 0);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].0, 2);
        assert!(hits[1].1 > hits[2].1);
    }

    #[test]
    fn test_search_respects_k() {
        let mut idx = VectorIndex::new(2).unwrap();
        idx.append(&[vec![1.0, 0.0], vec![0.5, 0.5], vec![0.0, 1.0]])
            .unwrap();
        let hits = idx.search_raw(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut idx = VectorIndex::new(3).unwrap();
        assert!(idx.append(&[vec![1.0, 2.0]]).is_err());
        assert!(idx.search_raw(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn test_truncate_rolls_back() {
        let mut idx = VectorIndex::new(2).unwrap();
        idx.append(&[vec![1.0, 0.0]]).unwrap();
        idx.append(&[vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        idx.truncate(1);
        assert_eq!(idx.count(), 1);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");

        let mut idx = VectorIndex::new(3).unwrap();
        idx.append(&[vec![1.0, 2.0, 3.0], vec![-1.0, 0.5, 0.0]])
            .unwrap();
        idx.save(&path).unwrap();

        let loaded = VectorIndex::load(&path, 3).unwrap();
        assert_eq!(loaded.count(), 2);
        assert_eq!(loaded.data, idx.data);
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let idx = VectorIndex::load(&tmp.path().join("nope.idx"), 8).unwrap();
        assert_eq!(idx.count(), 0);
    }

    #[test]
    fn test_load_rejects_wrong_dims() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vectors.idx");

        let mut idx = VectorIndex::new(4).unwrap();
        idx.append(&[vec![1.0, 0.0, 0.0, 0.0]]).unwrap();
        idx.save(&path).unwrap();

        assert!(VectorIndex::load(&path, 8).is_err());
    }
}

//! In-memory nearest-neighbor index over image embeddings.
//!
//! A pure cache over the embeddings persisted on Image rows: it can be
//! dropped and rebuilt at any time without data loss. Exact brute-force
//! cosine scoring; the scan is parallelized but makes no approximation, so
//! results are the true top-k.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
struct IndexEntry {
    vector: Vec<f32>,
    capture_time: Option<DateTime<Utc>>,
}

pub struct EmbeddingIndex {
    dimension: usize,
    entries: RwLock<HashMap<i64, IndexEntry>>,
}

impl EmbeddingIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(&self, vector: &[f32]) -> PipelineResult<()> {
        if vector.len() != self.dimension {
            return Err(PipelineError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub fn upsert(
        &self,
        image_id: i64,
        vector: Vec<f32>,
        capture_time: Option<DateTime<Utc>>,
    ) -> PipelineResult<()> {
        self.check_dimension(&vector)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::Database("index lock poisoned".into()))?;
        entries.insert(
            image_id,
            IndexEntry {
                vector,
                capture_time,
            },
        );
        Ok(())
    }

    pub fn remove(&self, image_id: i64) -> PipelineResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::Database("index lock poisoned".into()))?;
        entries.remove(&image_id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything and reload from persisted Image rows.
    pub fn rebuild<I>(&self, records: I) -> PipelineResult<()>
    where
        I: IntoIterator<Item = (i64, Vec<f32>, Option<DateTime<Utc>>)>,
    {
        let mut fresh = HashMap::new();
        for (image_id, vector, capture_time) in records {
            self.check_dimension(&vector)?;
            fresh.insert(
                image_id,
                IndexEntry {
                    vector,
                    capture_time,
                },
            );
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| PipelineError::Database("index lock poisoned".into()))?;
        *entries = fresh;
        Ok(())
    }

    /// True top-k by cosine similarity, descending. Ties break toward the
    /// most recent capture time; entries without one sort last among ties.
    pub fn query_nearest(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> PipelineResult<Vec<(i64, f32)>> {
        self.check_dimension(query)?;

        let entries = self
            .entries
            .read()
            .map_err(|_| PipelineError::Database("index lock poisoned".into()))?;

        let mut scored: Vec<(i64, f32, Option<DateTime<Utc>>)> = entries
            .par_iter()
            .map(|(&image_id, entry)| {
                (
                    image_id,
                    cosine_similarity(query, &entry.vector),
                    entry.capture_time,
                )
            })
            .filter(|(_, similarity, _)| *similarity >= min_similarity)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(image_id, similarity, _)| (image_id, similarity))
            .collect())
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).single().unwrap())
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - (-1.0)).abs() < 0.0001);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = EmbeddingIndex::new(3);
        let err = index.upsert(1, vec![1.0, 0.0], None).unwrap_err();
        assert!(matches!(err, PipelineError::Dimension { expected: 3, actual: 2 }));
        assert!(index.query_nearest(&[1.0], 5, 0.0).is_err());
    }

    #[test]
    fn test_true_top_k_ordering() {
        let index = EmbeddingIndex::new(2);
        index.upsert(1, vec![1.0, 0.0], None).unwrap();
        index.upsert(2, vec![0.9, 0.1], None).unwrap();
        index.upsert(3, vec![0.0, 1.0], None).unwrap();
        index.upsert(4, vec![-1.0, 0.0], None).unwrap();

        let results = index.query_nearest(&[1.0, 0.0], 3, -1.0).unwrap();
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(results[0].1 > results[1].1 && results[1].1 > results[2].1);
    }

    #[test]
    fn test_min_similarity_filters() {
        let index = EmbeddingIndex::new(2);
        index.upsert(1, vec![1.0, 0.0], None).unwrap();
        index.upsert(2, vec![0.0, 1.0], None).unwrap();

        let results = index.query_nearest(&[1.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn test_ties_break_toward_newest_capture_time() {
        let index = EmbeddingIndex::new(2);
        // Identical vectors: similarity ties exactly
        index.upsert(10, vec![1.0, 0.0], ts(100)).unwrap();
        index.upsert(11, vec![1.0, 0.0], ts(300)).unwrap();
        index.upsert(12, vec![1.0, 0.0], ts(200)).unwrap();
        index.upsert(13, vec![1.0, 0.0], None).unwrap();

        let results = index.query_nearest(&[1.0, 0.0], 4, 0.0).unwrap();
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![11, 12, 10, 13]);
    }

    #[test]
    fn test_upsert_replaces_and_remove_deletes() {
        let index = EmbeddingIndex::new(2);
        index.upsert(1, vec![1.0, 0.0], None).unwrap();
        index.upsert(1, vec![0.0, 1.0], None).unwrap();
        assert_eq!(index.len(), 1);

        let results = index.query_nearest(&[0.0, 1.0], 1, 0.9).unwrap();
        assert_eq!(results[0].0, 1);

        index.remove(1).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let index = EmbeddingIndex::new(2);
        index.upsert(1, vec![1.0, 0.0], None).unwrap();

        index
            .rebuild(vec![(5, vec![0.0, 1.0], ts(50)), (6, vec![1.0, 0.0], None)])
            .unwrap();

        assert_eq!(index.len(), 2);
        let results = index.query_nearest(&[0.0, 1.0], 1, 0.9).unwrap();
        assert_eq!(results[0].0, 5);
    }
}

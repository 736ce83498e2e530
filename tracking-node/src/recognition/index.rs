use ndarray::{Array1, Array2, ArrayView1};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Result, TrackerError};

/// Scales `values` to unit L2 norm in place. Zero vectors are left as is.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

pub fn normalized(values: &[f32]) -> Vec<f32> {
    let mut out = values.to_vec();
    l2_normalize(&mut out);
    out
}

/// Exhaustive inner-product index over L2-normalized rows with a parallel
/// label list. Immutable once built.
#[derive(Debug, Clone)]
pub struct FlatIpIndex {
    vectors: Array2<f32>,
    labels: Vec<String>,
}

impl FlatIpIndex {
    pub fn empty() -> Self {
        Self {
            vectors: Array2::zeros((0, 0)),
            labels: Vec::new(),
        }
    }

    /// Normalizes every embedding and stacks them into one matrix. All
    /// embeddings must share a dimension.
    pub fn build<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut labels = Vec::new();
        let mut flat = Vec::new();
        let mut dim = None;

        for (label, mut embedding) in entries {
            match dim {
                None => dim = Some(embedding.len()),
                Some(d) if d != embedding.len() => {
                    return Err(TrackerError::IndexError(format!(
                        "embedding for {} has dimension {}, expected {}",
                        label,
                        embedding.len(),
                        d
                    )));
                }
                Some(_) => {}
            }
            l2_normalize(&mut embedding);
            flat.extend_from_slice(&embedding);
            labels.push(label);
        }

        let Some(dim) = dim else {
            return Ok(Self::empty());
        };
        let vectors = Array2::from_shape_vec((labels.len(), dim), flat)
            .map_err(|e| TrackerError::IndexError(e.to_string()))?;

        Ok(Self { vectors, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Top-`k` rows by inner product with an already normalized query, best
    /// first. A query of the wrong dimension matches nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&str, f32)> {
        if self.is_empty() || k == 0 || query.len() != self.dim() {
            return Vec::new();
        }

        let scores: Array1<f32> = self.vectors.dot(&ArrayView1::from(query));
        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(row, score)| (self.labels[row].as_str(), score))
            .collect()
    }
}

/// The shared identity index. Readers take a cheap snapshot of the current
/// index; a rebuild swaps in a complete replacement under the write lock, so
/// a search sees either the old index or the new one in full.
pub struct IdentityIndex {
    current: RwLock<Arc<FlatIpIndex>>,
}

impl IdentityIndex {
    pub fn new(initial: FlatIpIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<FlatIpIndex> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, index: FlatIpIndex) {
        *self.current.write() = Arc::new(index);
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

impl Default for IdentityIndex {
    fn default() -> Self {
        Self::new(FlatIpIndex::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn entry(label: &str, values: &[f32]) -> (String, Vec<f32>) {
        (label.to_string(), values.to_vec())
    }

    #[test]
    fn test_search_ranks_by_inner_product() {
        let index = FlatIpIndex::build(vec![
            entry("E1", &[1.0, 0.0, 0.0]),
            entry("E2", &[0.0, 2.0, 0.0]),
            entry("E1", &[0.8, 0.6, 0.0]),
        ])
        .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dim(), 3);

        let hits = index.search(&normalized(&[0.0, 1.0, 0.0]), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "E2");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].0, "E1");
        assert!((hits[1].1 - 0.6).abs() < 1e-6);

        assert!(index.search(&[1.0, 0.0], 2).is_empty());
    }

    #[test]
    fn test_mismatched_dimensions_rejected() {
        let result = FlatIpIndex::build(vec![entry("E1", &[1.0, 0.0]), entry("E2", &[1.0])]);
        assert!(matches!(result, Err(TrackerError::IndexError(_))));
        assert!(FlatIpIndex::build(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_searches_never_see_a_torn_index() {
        let uniform = |label: &str, rows: usize| {
            FlatIpIndex::build((0..rows).map(|i| (label.to_string(), vec![1.0, i as f32 * 0.01, 0.0, 0.0])))
                .unwrap()
        };
        let index = Arc::new(IdentityIndex::new(uniform("old", 8)));

        let writer = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for round in 0..200 {
                    if round % 2 == 0 {
                        index.replace(uniform("new", 16));
                    } else {
                        index.replace(uniform("old", 8));
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = index.snapshot();
                        let hits = snapshot.search(&normalized(&[1.0, 0.0, 0.0, 0.0]), 32);
                        let expected_rows = if hits[0].0 == "old" { 8 } else { 16 };
                        assert_eq!(hits.len(), expected_rows);
                        assert!(hits.iter().all(|(label, _)| *label == hits[0].0));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}

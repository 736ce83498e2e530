use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use super::index::{l2_normalize, IdentityIndex};
use super::{Resolution, ResolutionCache};
use crate::utils::{metrics::Metrics, pool::ResourcePools};

/// Turns a raw embedding into an (identity, score) pair by nearest-neighbour
/// search over the shared identity index, memoized by embedding content.
pub struct IdentityResolver {
    index: Arc<IdentityIndex>,
    cache: Arc<ResolutionCache>,
    pools: Arc<ResourcePools>,
    metrics: Arc<Metrics>,
    threshold: f32,
    top_k: usize,
}

impl IdentityResolver {
    pub fn new(
        index: Arc<IdentityIndex>,
        cache: Arc<ResolutionCache>,
        pools: Arc<ResourcePools>,
        metrics: Arc<Metrics>,
        threshold: f32,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            cache,
            pools,
            metrics,
            threshold,
            top_k: top_k.max(1),
        }
    }

    pub fn resolve(&self, embedding: &[f32]) -> Resolution {
        let key = ResolutionCache::key(embedding);
        if let Some(hit) = self.cache.get(key) {
            self.metrics.record_resolution("cache_hit");
            return hit;
        }

        let index = self.index.snapshot();
        if index.is_empty() {
            self.metrics.record_resolution("unknown");
            return Resolution::unknown();
        }

        let mut query = self.pools.acquire_embedding(embedding.len());
        query.extend_from_slice(embedding);
        l2_normalize(&mut query);

        let k = self.top_k.min(index.len());
        let mut best_per_identity: HashMap<&str, f32> = HashMap::new();
        for (label, score) in index.search(&query, k) {
            if score < self.threshold {
                continue;
            }
            let best = best_per_identity.entry(label).or_insert(score);
            *best = best.max(score);
        }

        let resolution = best_per_identity
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(identity, score)| Resolution::new(identity, score))
            .unwrap_or_else(Resolution::unknown);
        self.pools.release_embedding(query);

        trace!(identity = %resolution.identity, score = resolution.score, "Embedding resolved");
        self.metrics
            .record_resolution(if resolution.is_unknown() { "unknown" } else { "known" });
        self.cache.insert(key, resolution.clone());
        resolution
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::FlatIpIndex;

    fn resolver(entries: Vec<(&str, Vec<f32>)>) -> (IdentityResolver, Arc<ResolutionCache>) {
        let index = FlatIpIndex::build(entries.into_iter().map(|(l, e)| (l.to_string(), e))).unwrap();
        let cache = Arc::new(ResolutionCache::new(500));
        let resolver = IdentityResolver::new(
            Arc::new(IdentityIndex::new(index)),
            Arc::clone(&cache),
            Arc::new(ResourcePools::new(4, 4, 3)),
            Arc::new(Metrics::new().unwrap()),
            0.6,
            3,
        );
        (resolver, cache)
    }

    #[test]
    fn test_single_match_above_threshold() {
        let (resolver, cache) = resolver(vec![
            ("E1", vec![1.0, 0.0, 0.0]),
            ("E2", vec![0.0, 1.0, 0.0]),
            ("E3", vec![0.0, 0.0, 1.0]),
        ]);

        let resolution = resolver.resolve(&[0.8, 0.6, 0.0]);
        assert_eq!(resolution.identity, "E1");
        assert!((resolution.score - 0.8).abs() < 1e-6);
        assert_eq!(cache.len(), 1);
        assert_eq!(resolver.resolve(&[0.8, 0.6, 0.0]), resolution);
    }

    #[test]
    fn test_best_identity_uses_its_peak_score() {
        let (resolver, _) = resolver(vec![
            ("E1", vec![1.0, 0.0, 0.0]),
            ("E1", vec![0.9, 0.1, 0.0]),
            ("E2", vec![0.0, 1.0, 0.0]),
        ]);
        assert_eq!(resolver.resolve(&[1.0, 0.05, 0.0]).identity, "E1");
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let (resolver, _) = resolver(vec![("E1", vec![1.0, 0.0, 0.0])]);
        assert_eq!(resolver.resolve(&[0.5, 1.0, 0.0]), Resolution::unknown());
    }

    #[test]
    fn test_empty_index_is_unknown() {
        let (resolver, cache) = resolver(Vec::new());
        for query in [[1.0, 0.0, 0.0], [0.3, 0.3, 0.3]] {
            assert_eq!(resolver.resolve(&query), Resolution::unknown());
        }
        assert!(cache.is_empty());
    }
}

use dashmap::{mapref::entry::Entry, DashMap};
use facegate_common::WorkStatus;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Minimum score history before the acceptance threshold adapts.
const ADAPTIVE_MIN_HISTORY: usize = 5;

#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub identity: String,
    pub last_seen: Instant,
    pub camera_id: u32,
    pub confidence: f32,
    pub embedding_history: VecDeque<Vec<f32>>,
    /// Recognition score observed with each entry of `embedding_history`.
    pub score_history: VecDeque<f32>,
    pub work_status: WorkStatus,
}

impl IdentityRecord {
    /// Recency-weighted mean of the score history, newest heaviest.
    pub fn recent_quality(&self) -> Option<f32> {
        if self.score_history.is_empty() {
            return None;
        }
        let (weighted, total) = self
            .score_history
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sum, weights), (i, score)| {
                let weight = (i + 1) as f32;
                (sum + score * weight, weights + weight)
            });
        Some(weighted / total)
    }
}

/// Identities seen recently, with their bounded embedding histories and
/// work status. The per-identity update cooldown is tracked separately so
/// that it outlives eviction.
pub struct IdentityRegistry {
    records: DashMap<String, IdentityRecord>,
    last_update: DashMap<String, Instant>,
    history_size: usize,
}

impl IdentityRegistry {
    pub fn new(history_size: usize) -> Self {
        Self {
            records: DashMap::new(),
            last_update: DashMap::new(),
            history_size: history_size.max(1),
        }
    }

    pub fn record_sighting(&self, identity: &str, camera_id: u32, score: f32, embedding: &[f32], now: Instant) {
        let mut record = self
            .records
            .entry(identity.to_string())
            .or_insert_with(|| IdentityRecord {
                identity: identity.to_string(),
                last_seen: now,
                camera_id,
                confidence: score,
                embedding_history: VecDeque::with_capacity(self.history_size),
                score_history: VecDeque::with_capacity(self.history_size),
                work_status: WorkStatus::Working,
            });

        record.last_seen = now;
        record.camera_id = camera_id;
        record.confidence = score;
        if record.embedding_history.len() == self.history_size {
            record.embedding_history.pop_front();
            record.score_history.pop_front();
        }
        record.embedding_history.push_back(embedding.to_vec());
        record.score_history.push_back(score);
    }

    /// The acceptance threshold for `identity`: tightened by 10% when its
    /// recent matches were strong, loosened by 10% when they were weak.
    pub fn adaptive_threshold(&self, identity: &str, base: f32) -> f32 {
        let Some(record) = self.records.get(identity) else {
            return base;
        };
        if record.score_history.len() < ADAPTIVE_MIN_HISTORY {
            return base;
        }
        match record.recent_quality() {
            Some(quality) if quality > 0.8 => base * 0.9,
            Some(quality) if quality < 0.6 => base * 1.1,
            _ => base,
        }
    }

    pub fn set_work_status(&self, identity: &str, status: WorkStatus) -> bool {
        match self.records.get_mut(identity) {
            Some(mut record) => {
                record.work_status = status;
                true
            }
            None => false,
        }
    }

    pub fn work_status(&self, identity: &str) -> Option<WorkStatus> {
        self.records.get(identity).map(|r| r.work_status)
    }

    pub fn get(&self, identity: &str) -> Option<IdentityRecord> {
        self.records.get(identity).map(|r| r.clone())
    }

    /// Claims the right to enqueue an embedding update for `identity` if
    /// `cooldown` has elapsed since the last claim.
    pub fn try_claim_update(&self, identity: &str, cooldown: Duration, now: Instant) -> bool {
        match self.last_update.entry(identity.to_string()) {
            Entry::Occupied(mut last) => {
                if now.saturating_duration_since(*last.get()) > cooldown {
                    last.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Removes identities idle for longer than `timeout` and returns them.
    pub fn evict_expired(&self, timeout: Duration, now: Instant) -> Vec<String> {
        self.expired_candidates(timeout, now)
            .into_iter()
            .filter(|identity| self.remove_if_expired(identity, timeout, now))
            .collect()
    }

    fn expired_candidates(&self, timeout: Duration, now: Instant) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| now.saturating_duration_since(r.last_seen) > timeout)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Expiry is re-checked under the shard lock, so a sighting recorded
    /// after the scan keeps the record.
    fn remove_if_expired(&self, identity: &str, timeout: Duration, now: Instant) -> bool {
        self.records
            .remove_if(identity, |_, r| now.saturating_duration_since(r.last_seen) > timeout)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let registry = IdentityRegistry::new(5);
        let now = Instant::now();
        for i in 0..8 {
            registry.record_sighting("E1", 0, 0.7, &[i as f32], now);
        }

        let record = registry.get("E1").unwrap();
        assert_eq!(record.embedding_history.len(), 5);
        assert_eq!(record.score_history.len(), 5);
        assert_eq!(record.embedding_history.front().unwrap(), &vec![3.0]);
        assert_eq!(record.work_status, WorkStatus::Working);
    }

    #[test]
    fn test_adaptive_threshold_moves_with_recent_quality() {
        let registry = IdentityRegistry::new(5);
        let now = Instant::now();
        for _ in 0..4 {
            registry.record_sighting("strong", 0, 0.95, &[1.0], now);
        }
        assert_eq!(registry.adaptive_threshold("strong", 0.6), 0.6);
        registry.record_sighting("strong", 0, 0.95, &[1.0], now);
        assert!((registry.adaptive_threshold("strong", 0.6) - 0.54).abs() < 1e-6);

        for _ in 0..5 {
            registry.record_sighting("weak", 0, 0.5, &[1.0], now);
        }
        assert!((registry.adaptive_threshold("weak", 0.6) - 0.66).abs() < 1e-6);
        assert_eq!(registry.adaptive_threshold("nobody", 0.6), 0.6);
    }

    #[test]
    fn test_cooldown_survives_eviction() {
        let registry = IdentityRegistry::new(5);
        let start = Instant::now();
        let cooldown = Duration::from_secs(60);

        registry.record_sighting("E1", 0, 0.9, &[1.0], start);
        assert!(registry.try_claim_update("E1", cooldown, start));
        assert!(!registry.try_claim_update("E1", cooldown, start + Duration::from_secs(30)));

        let later = start + Duration::from_secs(301);
        assert_eq!(registry.evict_expired(Duration::from_secs(300), later), vec!["E1".to_string()]);
        assert!(registry.is_empty());
        assert!(!registry.try_claim_update("E1", cooldown, start + Duration::from_secs(59)));
        assert!(registry.try_claim_update("E1", cooldown, later));
    }

    #[test]
    fn test_sighting_after_scan_keeps_record() {
        let registry = IdentityRegistry::new(5);
        let start = Instant::now();
        let timeout = Duration::from_secs(300);
        let later = start + Duration::from_secs(301);
        registry.record_sighting("E1", 0, 0.9, &[1.0], start);
        registry.record_sighting("E2", 1, 0.9, &[1.0], start);

        let mut candidates = registry.expired_candidates(timeout, later);
        candidates.sort();
        assert_eq!(candidates, vec!["E1".to_string(), "E2".to_string()]);

        // E1 is seen again by another camera before the removal pass.
        registry.record_sighting("E1", 1, 0.9, &[1.0], later);
        assert!(!registry.remove_if_expired("E1", timeout, later));
        assert!(registry.remove_if_expired("E2", timeout, later));

        assert_eq!(registry.get("E1").unwrap().camera_id, 1);
        assert!(registry.evict_expired(timeout, later).is_empty());
        assert_eq!(registry.len(), 1);
    }
}

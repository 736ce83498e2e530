use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::Resolution;

struct VoteWindow {
    votes: VecDeque<Resolution>,
    last_vote: Instant,
}

/// Short rolling window of recent resolutions per (camera, identity) that
/// damps single-frame score spikes.
pub struct TemporalVoter {
    windows: DashMap<(u32, String), VoteWindow>,
    capacity: usize,
    min_votes: usize,
    reset_after: Duration,
}

impl TemporalVoter {
    pub fn new(capacity: usize, min_votes: usize, reset_after: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(1),
            min_votes,
            reset_after,
        }
    }

    /// Records a vote and returns the smoothed resolution. Until the window
    /// holds `min_votes` votes the vote passes through unchanged; afterwards
    /// the identity with the best peak score wins, scored at the lesser of
    /// that peak and the window average.
    pub fn vote(&self, camera_id: u32, resolution: &Resolution, now: Instant) -> Resolution {
        let mut window = self
            .windows
            .entry((camera_id, resolution.identity.clone()))
            .or_insert_with(|| VoteWindow {
                votes: VecDeque::with_capacity(self.capacity),
                last_vote: now,
            });

        if now.saturating_duration_since(window.last_vote) > self.reset_after {
            window.votes.clear();
        }
        window.last_vote = now;
        if window.votes.len() == self.capacity {
            window.votes.pop_front();
        }
        window.votes.push_back(resolution.clone());

        if window.votes.len() < self.min_votes {
            return resolution.clone();
        }

        let mut peaks: HashMap<&str, f32> = HashMap::new();
        for vote in &window.votes {
            let peak = peaks.entry(vote.identity.as_str()).or_insert(f32::MIN);
            *peak = peak.max(vote.score);
        }
        let average = window.votes.iter().map(|v| v.score).sum::<f32>() / window.votes.len() as f32;

        match peaks.into_iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
            Some((identity, peak)) => Resolution::new(identity, peak.min(average)),
            None => resolution.clone(),
        }
    }

    pub fn window_len(&self, camera_id: u32, identity: &str) -> usize {
        self.windows
            .get(&(camera_id, identity.to_string()))
            .map(|w| w.votes.len())
            .unwrap_or(0)
    }

    pub fn forget(&self, identity: &str) {
        self.windows.retain(|(_, key), _| key != identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voter() -> TemporalVoter {
        TemporalVoter::new(5, 3, Duration::from_secs(2))
    }

    #[test]
    fn test_three_votes_within_window_smooth_to_identity() {
        let voter = voter();
        let start = Instant::now();

        let first = voter.vote(0, &Resolution::new("A", 0.9), start);
        assert_eq!(first, Resolution::new("A", 0.9));
        voter.vote(0, &Resolution::new("A", 0.7), start + Duration::from_millis(500));
        let smoothed = voter.vote(0, &Resolution::new("A", 0.8), start + Duration::from_millis(1000));

        assert_eq!(smoothed.identity, "A");
        assert!((smoothed.score - 0.8).abs() < 1e-6);
        assert_eq!(voter.window_len(0, "A"), 3);
    }

    #[test]
    fn test_gap_resets_window() {
        let voter = voter();
        let start = Instant::now();
        for i in 0..3 {
            voter.vote(0, &Resolution::new("A", 0.9), start + Duration::from_millis(i * 400));
        }

        let after_gap = start + Duration::from_millis(800 + 2_500);
        let result = voter.vote(0, &Resolution::new("A", 0.7), after_gap);

        assert_eq!(voter.window_len(0, "A"), 1);
        assert_eq!(result, Resolution::new("A", 0.7));
    }

    #[test]
    fn test_windows_are_bounded_and_per_camera() {
        let voter = voter();
        let now = Instant::now();
        for _ in 0..8 {
            voter.vote(1, &Resolution::new("B", 0.9), now);
        }
        assert_eq!(voter.window_len(1, "B"), 5);
        assert_eq!(voter.window_len(0, "B"), 0);

        voter.forget("B");
        assert_eq!(voter.window_len(1, "B"), 0);
    }
}

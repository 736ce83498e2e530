use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

use crate::error::Result;

/// Prometheus instruments for the whole engine, registered in a private
/// registry owned by the supervisor.
pub struct Metrics {
    registry: Registry,
    frames_captured: IntCounterVec,
    frames_dropped: IntCounterVec,
    detection_failures: IntCounterVec,
    quality_gate: IntCounterVec,
    resolutions: IntCounterVec,
    attendance_events: IntCounterVec,
    index_rebuilds: IntCounter,
    index_size: IntGauge,
    api_failures: IntCounter,
    detection_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("facegate".to_string()), None)?;

        let frames_captured = IntCounterVec::new(
            Opts::new("frames_captured_total", "Frames read from camera sources"),
            &["camera"],
        )?;
        let frames_dropped = IntCounterVec::new(
            Opts::new("frames_dropped_total", "Items dropped on a full bounded queue"),
            &["camera", "queue"],
        )?;
        let detection_failures = IntCounterVec::new(
            Opts::new("detection_failures_total", "Frames skipped by the detection pipeline"),
            &["camera", "reason"],
        )?;
        let quality_gate = IntCounterVec::new(
            Opts::new("quality_gate_total", "Detected faces by quality gate outcome"),
            &["outcome"],
        )?;
        let resolutions = IntCounterVec::new(
            Opts::new("identity_resolutions_total", "Identity resolutions by outcome"),
            &["outcome"],
        )?;
        let attendance_events = IntCounterVec::new(
            Opts::new("attendance_events_total", "Attendance events emitted"),
            &["camera", "event"],
        )?;
        let index_rebuilds = IntCounter::new("index_rebuilds_total", "Identity index rebuilds")?;
        let index_size = IntGauge::new("index_size", "Embeddings held by the identity index")?;
        let api_failures = IntCounter::new(
            "attendance_api_failures_total",
            "Attendance events that could not be forwarded",
        )?;
        let detection_latency = Histogram::with_opts(
            HistogramOpts::new("detection_latency_seconds", "Face detector latency")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.2, 0.35, 0.5, 1.0]),
        )?;

        registry.register(Box::new(frames_captured.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(detection_failures.clone()))?;
        registry.register(Box::new(quality_gate.clone()))?;
        registry.register(Box::new(resolutions.clone()))?;
        registry.register(Box::new(attendance_events.clone()))?;
        registry.register(Box::new(index_rebuilds.clone()))?;
        registry.register(Box::new(index_size.clone()))?;
        registry.register(Box::new(api_failures.clone()))?;
        registry.register(Box::new(detection_latency.clone()))?;

        Ok(Self {
            registry,
            frames_captured,
            frames_dropped,
            detection_failures,
            quality_gate,
            resolutions,
            attendance_events,
            index_rebuilds,
            index_size,
            api_failures,
            detection_latency,
        })
    }

    pub fn record_frame_captured(&self, camera_id: u32) {
        self.frames_captured.with_label_values(&[&camera_id.to_string()]).inc();
    }

    pub fn record_frame_dropped(&self, camera_id: u32, queue: &str) {
        self.frames_dropped
            .with_label_values(&[&camera_id.to_string(), queue])
            .inc();
    }

    pub fn record_detection_failure(&self, camera_id: u32, reason: &str) {
        self.detection_failures
            .with_label_values(&[&camera_id.to_string(), reason])
            .inc();
    }

    pub fn record_quality_gate(&self, accepted: usize, rejected: usize) {
        self.quality_gate.with_label_values(&["accepted"]).inc_by(accepted as u64);
        self.quality_gate.with_label_values(&["rejected"]).inc_by(rejected as u64);
    }

    pub fn record_resolution(&self, outcome: &str) {
        self.resolutions.with_label_values(&[outcome]).inc();
    }

    pub fn record_attendance_event(&self, camera_id: u32, event: &str) {
        self.attendance_events
            .with_label_values(&[&camera_id.to_string(), event])
            .inc();
    }

    pub fn record_index_rebuild(&self, size: usize) {
        self.index_rebuilds.inc();
        self.index_size.set(size as i64);
    }

    pub fn set_index_size(&self, size: usize) {
        self.index_size.set(size as i64);
    }

    pub fn record_api_failure(&self) {
        self.api_failures.inc();
    }

    pub fn observe_detection_latency(&self, elapsed: Duration) {
        self.detection_latency.observe(elapsed.as_secs_f64());
    }

    pub fn index_rebuilds(&self) -> u64 {
        self.index_rebuilds.get()
    }

    pub fn frames_dropped(&self, camera_id: u32, queue: &str) -> u64 {
        self.frames_dropped
            .with_label_values(&[&camera_id.to_string(), queue])
            .get()
    }

    pub fn detection_failures(&self, camera_id: u32, reason: &str) -> u64 {
        self.detection_failures
            .with_label_values(&[&camera_id.to_string(), reason])
            .get()
    }

    pub fn attendance_events(&self, camera_id: u32, event: &str) -> u64 {
        self.attendance_events
            .with_label_values(&[&camera_id.to_string(), event])
            .get()
    }

    pub fn api_failures(&self) -> u64 {
        self.api_failures.get()
    }

    /// Renders every registered instrument in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_frame_dropped(2, "frame");
        metrics.record_index_rebuild(42);

        let text = metrics.encode().unwrap();
        assert!(text.contains("facegate_frames_dropped_total"));
        assert!(text.contains("facegate_index_size 42"));
        assert_eq!(metrics.frames_dropped(2, "frame"), 1);
        assert_eq!(metrics.index_rebuilds(), 1);
    }
}

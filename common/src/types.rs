use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    /// Divides every coordinate by `factor`, mapping a box found on a
    /// downscaled image back to the source resolution.
    pub fn unscale(&self, factor: f32) -> Self {
        if factor == 1.0 || factor <= 0.0 {
            return *self;
        }
        Self::new(
            self.xmin / factor,
            self.ymin / factor,
            self.xmax / factor,
            self.ymax / factor,
        )
    }
}

/// Orientation of the two tripwire lines inside the frame.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TripwireOrientation {
    /// Lines run top to bottom; crossings are measured along x.
    Vertical,
    /// Lines run left to right; crossings are measured along y.
    Horizontal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Validate)]
pub struct Tripwire {
    #[validate(length(min = 1))]
    pub name: String,
    pub direction: TripwireOrientation,
    #[validate(range(min = 0.0, max = 1.0))]
    pub position: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub spacing: f32,
}

impl Tripwire {
    /// Pixel coordinates of the two dead-zone lines for a frame dimension
    /// (width for vertical tripwires, height for horizontal ones).
    pub fn lines(&self, frame_dim: u32) -> (f32, f32) {
        let dim = frame_dim as f32;
        (
            dim * (self.position - self.spacing / 2.0),
            dim * (self.position + self.spacing / 2.0),
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Validate)]
pub struct CameraConfig {
    pub id: u32,
    #[validate(length(min = 1))]
    pub name: String,
    /// Video source descriptor: a device index, a stream URI or a pipeline.
    #[validate(length(min = 1))]
    pub source: String,
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    #[validate(range(min = 1))]
    pub fps: u32,
    #[serde(default)]
    pub gpu_id: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    #[validate]
    pub tripwires: Vec<Tripwire>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Running,
    Stopped,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Working,
    OnBreak,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceEventType {
    CheckIn,
    CheckOut,
}

impl AttendanceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::CheckOut => "check_out",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub identity: String,
    pub camera_id: u32,
    pub tripwire: String,
    pub event_type: AttendanceEventType,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceEvent {
    pub fn new(identity: &str, camera_id: u32, tripwire: &str, event_type: AttendanceEventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            camera_id,
            tripwire: tripwire.to_string(),
            event_type,
            timestamp: Utc::now(),
        }
    }
}

/// Per-camera display overlay: parallel lists of identity, score and box,
/// replaced wholesale on every processed frame.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TrackingSnapshot {
    pub identities: Vec<String>,
    pub scores: Vec<f32>,
    pub bboxes: Vec<BBox>,
}

impl TrackingSnapshot {
    pub fn push(&mut self, identity: &str, score: f32, bbox: BBox) {
        self.identities.push(identity.to_string());
        self.scores.push(score);
        self.bboxes.push(bbox);
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, f32, &BBox)> {
        self.identities
            .iter()
            .zip(self.scores.iter())
            .zip(self.bboxes.iter())
            .map(|((identity, score), bbox)| (identity.as_str(), *score, bbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entrance() -> Tripwire {
        Tripwire {
            name: "Entrance".to_string(),
            direction: TripwireOrientation::Vertical,
            position: 0.5,
            spacing: 0.1,
        }
    }

    #[test]
    fn test_bbox_geometry() {
        let bbox = BBox::new(100.0, 50.0, 200.0, 250.0);
        assert_eq!(bbox.width(), 100.0);
        assert_eq!(bbox.height(), 200.0);
        assert_eq!(bbox.center(), (150.0, 150.0));

        let projected = BBox::new(50.0, 25.0, 100.0, 125.0).unscale(0.5);
        assert_eq!(projected, bbox);
    }

    #[test]
    fn test_tripwire_lines() {
        let (line1, line2) = entrance().lines(1000);
        assert!((line1 - 450.0).abs() < 1e-3);
        assert!((line2 - 550.0).abs() < 1e-3);
    }

    #[test]
    fn test_camera_validation() {
        let mut camera = CameraConfig {
            id: 0,
            name: "Lobby".to_string(),
            source: "0".to_string(),
            width: 1000,
            height: 600,
            fps: 10,
            gpu_id: 0,
            enabled: true,
            tripwires: vec![entrance()],
        };
        assert!(camera.validate().is_ok());

        camera.tripwires[0].position = 1.5;
        assert!(camera.validate().is_err());
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut snapshot = TrackingSnapshot::default();
        snapshot.push("E1", 0.92, BBox::new(0.0, 0.0, 10.0, 10.0));

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: TrackingSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.entries().next().map(|(id, _, _)| id), Some("E1"));
    }

    #[test]
    fn test_orientation_wire_names() {
        let wire: Tripwire = serde_json::from_str(
            r#"{"name":"Door","direction":"horizontal","position":0.4,"spacing":0.2}"#,
        )
        .unwrap();
        assert_eq!(wire.direction, TripwireOrientation::Horizontal);
        assert_eq!(AttendanceEventType::CheckOut.as_str(), "check_out");
    }
}

use dashmap::DashMap;
use facegate_common::{CameraConfig, Tripwire, TripwireOrientation};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

impl CrossingDirection {
    /// Direction of travel from the first line's side to the second's.
    fn forward(orientation: TripwireOrientation) -> Self {
        match orientation {
            TripwireOrientation::Vertical => Self::LeftToRight,
            TripwireOrientation::Horizontal => Self::TopToBottom,
        }
    }

    fn backward(orientation: TripwireOrientation) -> Self {
        match orientation {
            TripwireOrientation::Vertical => Self::RightToLeft,
            TripwireOrientation::Horizontal => Self::BottomToTop,
        }
    }
}

impl fmt::Display for CrossingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LeftToRight => "left->right",
            Self::RightToLeft => "right->left",
            Self::TopToBottom => "top->bottom",
            Self::BottomToTop => "bottom->top",
        };
        f.write_str(text)
    }
}

/// Which side of a tripwire's dead zone a track was last committed to.
/// `ZoneA` is left of (or above) the first line, `ZoneB` right of (or below)
/// the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingZone {
    None,
    ZoneA,
    ZoneB,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CrossingKey {
    identity: String,
    camera_id: u32,
    tripwire: String,
}

impl CrossingKey {
    fn new(identity: &str, camera_id: u32, tripwire: &str) -> Self {
        Self {
            identity: identity.to_string(),
            camera_id,
            tripwire: tripwire.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CrossingState {
    zone: CrossingZone,
    direction: Option<CrossingDirection>,
    last_position: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub identity: String,
    pub camera_id: u32,
    pub tripwire: String,
    pub direction: CrossingDirection,
}

/// Crossing state for every (identity, camera, tripwire). Each entry is
/// mutated under its shard lock, so different identities advance
/// concurrently.
#[derive(Default)]
pub struct TripwireMonitor {
    states: DashMap<CrossingKey, CrossingState>,
}

impl TripwireMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances every tripwire of `camera` with the smoothed position of
    /// `identity` and returns the crossings completed by this step.
    pub fn observe(
        &self,
        identity: &str,
        camera: &CameraConfig,
        frame_width: u32,
        frame_height: u32,
        position: (f32, f32),
    ) -> Vec<Crossing> {
        camera
            .tripwires
            .iter()
            .filter_map(|tripwire| {
                let (coordinate, dim) = match tripwire.direction {
                    TripwireOrientation::Vertical => (position.0, frame_width),
                    TripwireOrientation::Horizontal => (position.1, frame_height),
                };
                self.step(identity, camera.id, tripwire, coordinate, dim)
                    .map(|direction| Crossing {
                        identity: identity.to_string(),
                        camera_id: camera.id,
                        tripwire: tripwire.name.clone(),
                        direction,
                    })
            })
            .collect()
    }

    fn step(
        &self,
        identity: &str,
        camera_id: u32,
        tripwire: &Tripwire,
        position: f32,
        frame_dim: u32,
    ) -> Option<CrossingDirection> {
        let (line1, line2) = tripwire.lines(frame_dim);
        let key = CrossingKey::new(identity, camera_id, &tripwire.name);
        let mut state = self.states.entry(key).or_insert_with(|| CrossingState {
            zone: CrossingZone::None,
            direction: None,
            last_position: position,
        });

        let forward = CrossingDirection::forward(tripwire.direction);
        let backward = CrossingDirection::backward(tripwire.direction);

        let mut crossed = None;
        match (state.zone, state.direction) {
            (CrossingZone::None, _) => {
                if position < line1 {
                    state.zone = CrossingZone::ZoneA;
                    state.direction = Some(forward);
                } else if position > line2 {
                    state.zone = CrossingZone::ZoneB;
                    state.direction = Some(backward);
                }
            }
            (CrossingZone::ZoneA, Some(direction)) if direction == forward && position > line2 => {
                crossed = Some(direction);
            }
            (CrossingZone::ZoneB, Some(direction)) if direction == backward && position < line1 => {
                crossed = Some(direction);
            }
            _ => {}
        }

        if crossed.is_some() {
            state.zone = CrossingZone::None;
            state.direction = None;
        }
        state.last_position = position;
        crossed
    }

    pub fn zone(&self, identity: &str, camera_id: u32, tripwire: &str) -> Option<CrossingZone> {
        self.states
            .get(&CrossingKey::new(identity, camera_id, tripwire))
            .map(|s| s.zone)
    }

    /// Last coordinate fed to a tripwire, along its measured axis.
    pub fn last_position(&self, identity: &str, camera_id: u32, tripwire: &str) -> Option<f32> {
        self.states
            .get(&CrossingKey::new(identity, camera_id, tripwire))
            .map(|s| s.last_position)
    }

    pub fn forget(&self, identity: &str) {
        self.states.retain(|key, _| key.identity != identity);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(direction: TripwireOrientation) -> CameraConfig {
        CameraConfig {
            id: 0,
            name: "Lobby".to_string(),
            source: "0".to_string(),
            width: 1000,
            height: 600,
            fps: 10,
            gpu_id: 0,
            enabled: true,
            tripwires: vec![Tripwire {
                name: "Entrance".to_string(),
                direction,
                position: 0.5,
                spacing: 0.1,
            }],
        }
    }

    fn walk(monitor: &TripwireMonitor, camera: &CameraConfig, xs: &[f32]) -> Vec<Crossing> {
        xs.iter()
            .flat_map(|x| monitor.observe("E1", camera, 1000, 600, (*x, 300.0)))
            .collect()
    }

    #[test]
    fn test_full_traversal_emits_once_and_resets() {
        let monitor = TripwireMonitor::new();
        let camera = camera(TripwireOrientation::Vertical);

        let crossings = walk(&monitor, &camera, &[300.0, 400.0, 480.0, 520.0, 560.0]);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].direction, CrossingDirection::LeftToRight);
        assert_eq!(crossings[0].tripwire, "Entrance");
        assert_eq!(monitor.zone("E1", 0, "Entrance"), Some(CrossingZone::None));

        // Lingering past the far line only re-arms in the reverse direction.
        let lingering = walk(&monitor, &camera, &[600.0, 700.0, 700.0]);
        assert!(lingering.is_empty());
        assert_eq!(monitor.zone("E1", 0, "Entrance"), Some(CrossingZone::ZoneB));
        assert_eq!(monitor.last_position("E1", 0, "Entrance"), Some(700.0));
    }

    #[test]
    fn test_oscillation_inside_dead_zone_emits_nothing() {
        let monitor = TripwireMonitor::new();
        let camera = camera(TripwireOrientation::Vertical);

        let crossings = walk(
            &monitor,
            &camera,
            &[300.0, 460.0, 540.0, 470.0, 530.0, 400.0, 545.0, 455.0],
        );
        assert!(crossings.is_empty());
        assert_eq!(monitor.zone("E1", 0, "Entrance"), Some(CrossingZone::ZoneA));
    }

    #[test]
    fn test_horizontal_tripwire_uses_y() {
        let monitor = TripwireMonitor::new();
        let camera = camera(TripwireOrientation::Horizontal);

        let mut crossings = Vec::new();
        for y in [500.0, 400.0, 320.0, 250.0] {
            crossings.extend(monitor.observe("E1", &camera, 1000, 600, (10.0, y)));
        }
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].direction, CrossingDirection::BottomToTop);
    }

    #[test]
    fn test_identities_are_independent() {
        let monitor = TripwireMonitor::new();
        let camera = camera(TripwireOrientation::Vertical);
        monitor.observe("E1", &camera, 1000, 600, (300.0, 0.0));
        monitor.observe("E2", &camera, 1000, 600, (800.0, 0.0));
        assert_eq!(monitor.zone("E1", 0, "Entrance"), Some(CrossingZone::ZoneA));
        assert_eq!(monitor.zone("E2", 0, "Entrance"), Some(CrossingZone::ZoneB));

        monitor.forget("E1");
        assert_eq!(monitor.zone("E1", 0, "Entrance"), None);
        assert_eq!(monitor.len(), 1);
    }
}

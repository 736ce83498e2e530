use facegate_common::{CameraConfig, TripwireOrientation};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::config::SimulationSettings;

const PATH_START: f32 = 0.15;
const PATH_END: f32 = 0.85;
/// Placements older than this many frames are forgotten even if the
/// detector never asked for them.
const LEDGER_DEPTH: u64 = 64;

const BACKGROUND: Rgb<u8> = Rgb([70, 70, 70]);
const TRIPWIRE: Rgb<u8> = Rgb([230, 230, 230]);

/// A face drawn into one frame, in that camera's pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub identity: String,
    pub center: (f32, f32),
    pub size: f32,
}

#[derive(Debug, Clone)]
struct Walker {
    identity: String,
    camera_id: u32,
    axis: TripwireOrientation,
    /// Progress along the walking axis as a fraction of the frame.
    progress: f32,
    /// Fixed position across the walking axis.
    lane: f32,
    heading: f32,
    pause_left: f32,
}

impl Walker {
    fn step(&mut self, dt: f32, speed: f32, pause: f32) {
        if self.pause_left > 0.0 {
            self.pause_left -= dt;
            return;
        }
        self.progress += self.heading * speed * dt;
        if self.progress >= PATH_END {
            self.progress = PATH_END;
            self.heading = -1.0;
            self.pause_left = pause;
        } else if self.progress <= PATH_START {
            self.progress = PATH_START;
            self.heading = 1.0;
            self.pause_left = pause;
        }
    }

    fn center(&self, width: u32, height: u32) -> (f32, f32) {
        let (w, h) = (width as f32, height as f32);
        match self.axis {
            TripwireOrientation::Vertical => (self.progress * w, self.lane * h),
            TripwireOrientation::Horizontal => (self.lane * w, self.progress * h),
        }
    }
}

#[derive(Default)]
struct CameraState {
    sequence_num: u64,
    ledger: HashMap<u64, Vec<Placement>>,
}

/// Shared synthetic world. Capture streams advance and render it; the
/// synthetic detector reads back what was drawn into each frame.
pub struct Scene {
    cameras: HashMap<u32, CameraConfig>,
    walkers: Mutex<Vec<Walker>>,
    state: Mutex<HashMap<u32, CameraState>>,
    walk_speed: f32,
    pause: f32,
    face_size: f32,
}

impl Scene {
    pub fn new(settings: &SimulationSettings) -> Self {
        let cameras: HashMap<u32, CameraConfig> =
            settings.cameras.iter().map(|c| (c.id, c.clone())).collect();

        let mut walkers = Vec::new();
        for camera in &settings.cameras {
            let people: Vec<_> = settings.people.iter().filter(|p| p.camera_id == camera.id).collect();
            let axis = camera
                .tripwires
                .first()
                .map(|t| t.direction)
                .unwrap_or(TripwireOrientation::Vertical);

            for (i, person) in people.iter().enumerate() {
                let forward = i % 2 == 0;
                walkers.push(Walker {
                    identity: person.identity.clone(),
                    camera_id: camera.id,
                    axis,
                    progress: if forward { PATH_START } else { PATH_END },
                    lane: 0.3 + 0.4 * (i as f32 + 0.5) / people.len() as f32,
                    heading: if forward { 1.0 } else { -1.0 },
                    pause_left: 0.0,
                });
            }
        }

        Self {
            cameras,
            walkers: Mutex::new(walkers),
            state: Mutex::new(HashMap::new()),
            walk_speed: settings.walk_speed,
            pause: settings.pause_secs,
            face_size: settings.face_size_px,
        }
    }

    pub fn camera(&self, camera_id: u32) -> Option<&CameraConfig> {
        self.cameras.get(&camera_id)
    }

    /// Advances the camera's walkers by one frame period, records where
    /// they are and renders the frame. Returns its sequence number.
    pub fn capture(&self, camera_id: u32) -> Option<(u64, RgbImage)> {
        let camera = self.cameras.get(&camera_id)?;
        let dt = 1.0 / camera.fps.max(1) as f32;

        let placements: Vec<Placement> = {
            let mut walkers = self.walkers.lock();
            walkers
                .iter_mut()
                .filter(|w| w.camera_id == camera_id)
                .map(|walker| {
                    walker.step(dt, self.walk_speed, self.pause);
                    Placement {
                        identity: walker.identity.clone(),
                        center: walker.center(camera.width, camera.height),
                        size: self.face_size,
                    }
                })
                .collect()
        };

        let image = render(camera, &placements);
        let mut state = self.state.lock();
        let camera_state = state.entry(camera_id).or_default();
        camera_state.sequence_num += 1;
        let sequence_num = camera_state.sequence_num;
        camera_state.ledger.insert(sequence_num, placements);
        camera_state
            .ledger
            .retain(|seq, _| seq + LEDGER_DEPTH > sequence_num);

        Some((sequence_num, image))
    }

    /// Removes and returns what was drawn into frame `sequence_num`.
    pub fn take_placements(&self, camera_id: u32, sequence_num: u64) -> Option<Vec<Placement>> {
        self.state.lock().get_mut(&camera_id)?.ledger.remove(&sequence_num)
    }
}

fn render(camera: &CameraConfig, placements: &[Placement]) -> RgbImage {
    let mut image = RgbImage::from_pixel(camera.width, camera.height, BACKGROUND);

    for tripwire in &camera.tripwires {
        let dim = match tripwire.direction {
            TripwireOrientation::Vertical => camera.width,
            TripwireOrientation::Horizontal => camera.height,
        };
        let (line1, line2) = tripwire.lines(dim);
        for line in [line1, line2] {
            let at = line.round().clamp(0.0, dim.saturating_sub(1) as f32) as u32;
            match tripwire.direction {
                TripwireOrientation::Vertical => (0..camera.height).for_each(|y| image.put_pixel(at, y, TRIPWIRE)),
                TripwireOrientation::Horizontal => (0..camera.width).for_each(|x| image.put_pixel(x, at, TRIPWIRE)),
            }
        }
    }

    for placement in placements {
        let color = identity_color(&placement.identity);
        let half = placement.size / 2.0;
        let (cx, cy) = placement.center;
        let x0 = (cx - half).max(0.0) as u32;
        let y0 = (cy - half).max(0.0) as u32;
        let x1 = ((cx + half).max(0.0) as u32).min(camera.width);
        let y1 = ((cy + half).max(0.0) as u32).min(camera.height);
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, color);
            }
        }
    }
    image
}

fn identity_color(identity: &str) -> Rgb<u8> {
    let hash = identity
        .bytes()
        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
    Rgb([
        96 + (hash & 0x7f) as u8,
        96 + ((hash >> 8) & 0x7f) as u8,
        96 + ((hash >> 16) & 0x7f) as u8,
    ])
}

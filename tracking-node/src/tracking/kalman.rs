use dashmap::DashMap;
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Constant-velocity Kalman filter over an image-plane point.
/// State is `[x, y, vx, vy]`, measurement is `[x, y]`, one step per frame.
#[derive(Debug, Clone)]
pub struct ConstantVelocityFilter {
    state: Vector4<f32>,
    covariance: Matrix4<f32>,
    transition: Matrix4<f32>,
    observation: Matrix2x4<f32>,
    process_noise: Matrix4<f32>,
    measurement_noise: Matrix2<f32>,
    initialized: bool,
}

impl ConstantVelocityFilter {
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        #[rustfmt::skip]
        let transition = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let observation = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );

        Self {
            state: Vector4::zeros(),
            covariance: Matrix4::identity(),
            transition,
            observation,
            process_noise: Matrix4::identity() * process_noise,
            measurement_noise: Matrix2::identity() * measurement_noise,
            initialized: false,
        }
    }

    /// Feeds one measurement and returns the filtered position. The first
    /// measurement seeds the state at rest and is returned unchanged.
    pub fn update(&mut self, x: f32, y: f32) -> (f32, f32) {
        if !self.initialized {
            self.state = Vector4::new(x, y, 0.0, 0.0);
            self.initialized = true;
            return (x, y);
        }

        self.state = self.transition * self.state;
        self.covariance = self.transition * self.covariance * self.transition.transpose() + self.process_noise;

        let innovation = Vector2::new(x, y) - self.observation * self.state;
        let innovation_cov =
            self.observation * self.covariance * self.observation.transpose() + self.measurement_noise;
        if let Some(inverse) = innovation_cov.try_inverse() {
            let gain = self.covariance * self.observation.transpose() * inverse;
            self.state += gain * innovation;
            self.covariance = (Matrix4::identity() - gain * self.observation) * self.covariance;
        }

        (self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[2], self.state[3])
    }
}

/// One filter per identity, created on first sighting.
pub struct PositionSmoother {
    filters: DashMap<String, ConstantVelocityFilter>,
    process_noise: f32,
    measurement_noise: f32,
}

impl PositionSmoother {
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            filters: DashMap::new(),
            process_noise,
            measurement_noise,
        }
    }

    pub fn smooth(&self, identity: &str, position: (f32, f32)) -> (f32, f32) {
        self.filters
            .entry(identity.to_string())
            .or_insert_with(|| ConstantVelocityFilter::new(self.process_noise, self.measurement_noise))
            .update(position.0, position.1)
    }

    pub fn remove(&self, identity: &str) -> bool {
        self.filters.remove(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

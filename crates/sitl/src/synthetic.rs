//! Synthetic IMU source.
//!
//! Maintains a "true" device attitude and emits the sensor readings that a
//! real IMU would produce in that pose: gravity and the local magnetic field
//! rotated into the body frame, plus configurable noise, gyro bias,
//! hard/soft-iron distortion, and per-modality dropout. Deterministic for a
//! fixed seed.

use nalgebra::{UnitQuaternion, Vector3};
use polaris_nav_core::traits::{SensorError, SensorSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Synthetic sensor configuration.
#[derive(Debug, Clone)]
pub struct SyntheticImuConfig {
    /// Accelerometer noise amplitude in g
    pub accel_noise_g: f32,
    /// Gyroscope noise amplitude in deg/s
    pub gyro_noise_dps: f32,
    /// Magnetometer noise amplitude in µT
    pub mag_noise_ut: f32,
    /// Horizontal (north) component of the simulated field in µT
    pub field_horizontal_ut: f32,
    /// Vertical component of the simulated field in µT
    pub field_vertical_ut: f32,
    /// Hard-iron bias added to emitted raw field readings
    pub hard_iron_ut: Vector3<f32>,
    /// Per-axis soft-iron squish applied to emitted raw field readings
    pub soft_iron: Vector3<f32>,
    /// Constant gyroscope bias in deg/s
    pub gyro_bias_dps: Vector3<f32>,
    /// Probability per read that a modality fails, in `[0, 1)`
    pub accel_dropout: f32,
    pub gyro_dropout: f32,
    pub mag_dropout: f32,
    /// RNG seed; a fixed seed makes runs reproducible
    pub seed: u64,
}

impl Default for SyntheticImuConfig {
    fn default() -> Self {
        Self {
            accel_noise_g: 0.005,
            gyro_noise_dps: 0.1,
            mag_noise_ut: 0.3,
            field_horizontal_ut: 30.0,
            field_vertical_ut: -40.0,
            hard_iron_ut: Vector3::zeros(),
            soft_iron: Vector3::new(1.0, 1.0, 1.0),
            gyro_bias_dps: Vector3::zeros(),
            accel_dropout: 0.0,
            gyro_dropout: 0.0,
            mag_dropout: 0.0,
            seed: 42,
        }
    }
}

/// Synthetic IMU with a scriptable true attitude.
pub struct SyntheticImu {
    config: SyntheticImuConfig,
    rng: StdRng,
    attitude: UnitQuaternion<f32>,
    turn_rate_dps: Vector3<f32>,
}

impl SyntheticImu {
    pub fn new(config: SyntheticImuConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            attitude: UnitQuaternion::identity(),
            turn_rate_dps: Vector3::zeros(),
        }
    }

    /// Set the true attitude from ZYX Euler angles in degrees.
    pub fn set_attitude_deg(&mut self, roll_deg: f32, pitch_deg: f32, yaw_deg: f32) {
        self.attitude = UnitQuaternion::from_euler_angles(
            roll_deg.to_radians(),
            pitch_deg.to_radians(),
            yaw_deg.to_radians(),
        );
    }

    /// Set the body-frame rotation rate in deg/s.
    pub fn set_turn_rate_dps(&mut self, rate: Vector3<f32>) {
        self.turn_rate_dps = rate;
    }

    /// Integrate the true attitude forward by `dt_s` seconds.
    pub fn advance(&mut self, dt_s: f32) {
        let axis_angle = self.turn_rate_dps * (core::f32::consts::PI / 180.0) * dt_s;
        self.attitude *= UnitQuaternion::from_scaled_axis(axis_angle);
    }

    /// The true attitude, for assertions against the estimate.
    pub fn attitude(&self) -> UnitQuaternion<f32> {
        self.attitude
    }

    /// Undistorted field in the body frame (what a perfectly calibrated
    /// magnetometer would read).
    pub fn true_field_body(&self) -> Vector3<f32> {
        let field_world = Vector3::new(
            self.config.field_horizontal_ut,
            0.0,
            self.config.field_vertical_ut,
        );
        self.attitude.inverse_transform_vector(&field_world)
    }

    fn noise(&mut self, amplitude: f32) -> f32 {
        if amplitude <= 0.0 {
            0.0
        } else {
            (self.rng.gen::<f32>() * 2.0 - 1.0) * amplitude
        }
    }

    fn dropped(&mut self, probability: f32) -> bool {
        probability > 0.0 && self.rng.gen::<f32>() < probability
    }
}

impl SensorSource for SyntheticImu {
    fn read_accel(&mut self) -> Result<Vector3<f32>, SensorError> {
        if self.dropped(self.config.accel_dropout) {
            return Err(SensorError::Unavailable);
        }
        let gravity_body = self
            .attitude
            .inverse_transform_vector(&Vector3::new(0.0, 0.0, 1.0));
        let n = self.config.accel_noise_g;
        Ok(gravity_body + Vector3::new(self.noise(n), self.noise(n), self.noise(n)))
    }

    fn read_gyro(&mut self) -> Result<Vector3<f32>, SensorError> {
        if self.dropped(self.config.gyro_dropout) {
            return Err(SensorError::Unavailable);
        }
        let n = self.config.gyro_noise_dps;
        Ok(self.turn_rate_dps
            + self.config.gyro_bias_dps
            + Vector3::new(self.noise(n), self.noise(n), self.noise(n)))
    }

    fn read_mag(&mut self) -> Result<Vector3<f32>, SensorError> {
        if self.dropped(self.config.mag_dropout) {
            return Err(SensorError::Unavailable);
        }
        let field = self.true_field_body();
        let distorted = field.component_mul(&self.config.soft_iron) + self.config.hard_iron_ut;
        let n = self.config.mag_noise_ut;
        Ok(distorted + Vector3::new(self.noise(n), self.noise(n), self.noise(n)))
    }
}

//! Sensor capability interface and per-tick sample container.
//!
//! The fusion filter and calibration manager depend only on this interface,
//! never on a concrete driver. One implementation wraps the real IMU and
//! magnetometer; the simulation crate provides a synthetic one for tests.
//!
//! Units are fixed at this boundary: accelerometer in g, gyroscope in deg/s,
//! magnetometer in µT, all in the body frame.

use nalgebra::Vector3;

/// Sensor read failures.
///
/// A failed read is never fatal to the engine; the affected modality is
/// simply skipped for that tick (degraded output, not a halt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Bus transaction failed or device did not respond
    Unavailable,
    /// Device responded with data that failed validation
    InvalidData,
    /// Driver has not been initialized
    NotInitialized,
}

impl SensorError {
    /// Variant name as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorError::Unavailable => "Unavailable",
            SensorError::InvalidData => "InvalidData",
            SensorError::NotInitialized => "NotInitialized",
        }
    }
}

/// Capability to read the three sensor modalities.
///
/// Each read may fail independently. Implementations must not block for
/// longer than a single bus transaction; the control loop runs at
/// interactive rates.
pub trait SensorSource {
    /// Accelerometer reading in g, body frame.
    fn read_accel(&mut self) -> Result<Vector3<f32>, SensorError>;

    /// Gyroscope reading in deg/s, body frame.
    fn read_gyro(&mut self) -> Result<Vector3<f32>, SensorError>;

    /// Magnetometer reading in µT, body frame, uncorrected.
    fn read_mag(&mut self) -> Result<Vector3<f32>, SensorError>;
}

/// One tick's worth of sensor readings.
///
/// Readings within a sample are treated as simultaneous. A `None` field
/// records that the corresponding read failed this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorSample {
    /// Accelerometer in g, `None` if the read failed
    pub accel: Option<Vector3<f32>>,
    /// Gyroscope in deg/s, `None` if the read failed
    pub gyro: Option<Vector3<f32>>,
    /// Raw magnetometer in µT, `None` if the read failed
    pub mag: Option<Vector3<f32>>,
}

impl SensorSample {
    /// Gather one sample from a source, mapping per-modality failures to
    /// `None` rather than propagating them.
    pub fn read_from<S: SensorSource>(source: &mut S) -> Self {
        Self {
            accel: source.read_accel().ok(),
            gyro: source.read_gyro().ok(),
            mag: source.read_mag().ok(),
        }
    }

    /// True if every modality failed this tick.
    pub fn is_empty(&self) -> bool {
        self.accel.is_none() && self.gyro.is_none() && self.mag.is_none()
    }
}

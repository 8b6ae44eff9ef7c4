//! Magnetometer calibration data and parameter mapping.
//!
//! A calibration session produces a hard-iron offset and a diagonal
//! soft-iron scale that map the ellipsoid-shaped raw magnetometer response
//! back onto a sphere centered at the origin. The vectors live in the
//! parameter store across power cycles; this module owns the parameter
//! names and the conversions in both directions.

use crate::parameters::{ParamFlags, ParamValue, ParameterError, ParameterStore};
use nalgebra::Vector3;

/// Parameter names for the persisted calibration state
pub const PARAM_MAG_OFS_X: &str = "MAG_OFS_X";
pub const PARAM_MAG_OFS_Y: &str = "MAG_OFS_Y";
pub const PARAM_MAG_OFS_Z: &str = "MAG_OFS_Z";
pub const PARAM_MAG_SCL_X: &str = "MAG_SCL_X";
pub const PARAM_MAG_SCL_Y: &str = "MAG_SCL_Y";
pub const PARAM_MAG_SCL_Z: &str = "MAG_SCL_Z";
/// True only if the producing session passed the quality gate
pub const PARAM_MAG_CAL_OK: &str = "MAG_CAL_OK";
/// Completion time of the last session, seconds since boot
pub const PARAM_MAG_CAL_TIME: &str = "MAG_CAL_TIME";

pub const PARAM_GYRO_BIAS_X: &str = "GYR_BIAS_X";
pub const PARAM_GYRO_BIAS_Y: &str = "GYR_BIAS_Y";
pub const PARAM_GYRO_BIAS_Z: &str = "GYR_BIAS_Z";

/// Magnetometer calibration state plus the gyro bias estimate.
///
/// `calibrated` is the authoritative flag: offset and scale may hold
/// best-effort values from a session that failed its quality gate, and the
/// fusion filter must not trust the magnetometer until a passing session
/// sets the flag.
#[derive(Debug, Clone, Copy)]
pub struct MagCalibration {
    /// Hard-iron offset (µT), subtracted from raw readings
    pub offset: Vector3<f32>,
    /// Diagonal soft-iron scale, applied after offset removal
    pub scale: Vector3<f32>,
    /// True if the producing session passed the quality gate
    pub calibrated: bool,
    /// Completion time of the producing session (seconds since boot)
    pub timestamp_s: u32,
    /// Gyroscope bias (deg/s), subtracted before integration
    pub gyro_bias: Vector3<f32>,
}

impl Default for MagCalibration {
    /// Identity calibration: raw readings pass through unchanged and the
    /// magnetometer is not trusted.
    fn default() -> Self {
        Self {
            offset: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            calibrated: false,
            timestamp_s: 0,
            gyro_bias: Vector3::zeros(),
        }
    }
}

impl MagCalibration {
    /// Correct a raw magnetometer reading: `(raw - offset) ∘ scale`.
    pub fn apply(&self, raw: Vector3<f32>) -> Vector3<f32> {
        (raw - self.offset).component_mul(&self.scale)
    }

    /// Correct a raw gyroscope reading by removing the stored bias.
    pub fn apply_gyro(&self, raw: Vector3<f32>) -> Vector3<f32> {
        raw - self.gyro_bias
    }

    /// Register all calibration parameters with identity defaults.
    pub fn register_defaults(store: &mut ParameterStore) -> Result<(), ParameterError> {
        for name in [
            PARAM_MAG_OFS_X,
            PARAM_MAG_OFS_Y,
            PARAM_MAG_OFS_Z,
            PARAM_GYRO_BIAS_X,
            PARAM_GYRO_BIAS_Y,
            PARAM_GYRO_BIAS_Z,
        ] {
            store.register(name, ParamValue::Float(0.0), ParamFlags::empty())?;
        }
        for name in [PARAM_MAG_SCL_X, PARAM_MAG_SCL_Y, PARAM_MAG_SCL_Z] {
            store.register(name, ParamValue::Float(1.0), ParamFlags::empty())?;
        }
        store.register(PARAM_MAG_CAL_OK, ParamValue::Bool(false), ParamFlags::empty())?;
        store.register(PARAM_MAG_CAL_TIME, ParamValue::Uint(0), ParamFlags::empty())?;
        Ok(())
    }

    /// Build calibration state from the store, falling back to identity
    /// values for anything missing.
    pub fn from_store(store: &ParameterStore) -> Self {
        let float = |name: &str, default: f32| -> f32 {
            store.get(name).and_then(ParamValue::as_float).unwrap_or(default)
        };

        Self {
            offset: Vector3::new(
                float(PARAM_MAG_OFS_X, 0.0),
                float(PARAM_MAG_OFS_Y, 0.0),
                float(PARAM_MAG_OFS_Z, 0.0),
            ),
            scale: Vector3::new(
                float(PARAM_MAG_SCL_X, 1.0),
                float(PARAM_MAG_SCL_Y, 1.0),
                float(PARAM_MAG_SCL_Z, 1.0),
            ),
            calibrated: store
                .get(PARAM_MAG_CAL_OK)
                .and_then(ParamValue::as_bool)
                .unwrap_or(false),
            timestamp_s: store
                .get(PARAM_MAG_CAL_TIME)
                .and_then(ParamValue::as_uint)
                .unwrap_or(0),
            gyro_bias: Vector3::new(
                float(PARAM_GYRO_BIAS_X, 0.0),
                float(PARAM_GYRO_BIAS_Y, 0.0),
                float(PARAM_GYRO_BIAS_Z, 0.0),
            ),
        }
    }

    /// Write this calibration state into the store.
    pub fn store_into(&self, store: &mut ParameterStore) -> Result<(), ParameterError> {
        store.set(PARAM_MAG_OFS_X, ParamValue::Float(self.offset.x))?;
        store.set(PARAM_MAG_OFS_Y, ParamValue::Float(self.offset.y))?;
        store.set(PARAM_MAG_OFS_Z, ParamValue::Float(self.offset.z))?;
        store.set(PARAM_MAG_SCL_X, ParamValue::Float(self.scale.x))?;
        store.set(PARAM_MAG_SCL_Y, ParamValue::Float(self.scale.y))?;
        store.set(PARAM_MAG_SCL_Z, ParamValue::Float(self.scale.z))?;
        store.set(PARAM_MAG_CAL_OK, ParamValue::Bool(self.calibrated))?;
        store.set(PARAM_MAG_CAL_TIME, ParamValue::Uint(self.timestamp_s))?;
        store.set(PARAM_GYRO_BIAS_X, ParamValue::Float(self.gyro_bias.x))?;
        store.set(PARAM_GYRO_BIAS_Y, ParamValue::Float(self.gyro_bias.y))?;
        store.set(PARAM_GYRO_BIAS_Z, ParamValue::Float(self.gyro_bias.z))?;
        Ok(())
    }
}

/// Estimate gyro bias as the mean of samples taken while stationary.
///
/// Returns zero bias for an empty slice.
pub fn estimate_gyro_bias(samples: &[Vector3<f32>]) -> Vector3<f32> {
    if samples.is_empty() {
        return Vector3::zeros();
    }
    let sum = samples
        .iter()
        .fold(Vector3::zeros(), |acc, sample| acc + sample);
    sum / (samples.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn default_is_identity_and_untrusted() {
        let cal = MagCalibration::default();
        assert_eq!(cal.offset, Vector3::zeros());
        assert_eq!(cal.scale, Vector3::new(1.0, 1.0, 1.0));
        assert!(!cal.calibrated);

        let raw = Vector3::new(12.0, -7.5, 40.0);
        assert_eq!(cal.apply(raw), raw);
    }

    #[test]
    fn apply_removes_offset_then_scales() {
        let cal = MagCalibration {
            offset: Vector3::new(5.0, -3.0, 2.0),
            scale: Vector3::new(1.1, 0.9, 1.05),
            ..Default::default()
        };
        let corrected = cal.apply(Vector3::new(25.0, 17.0, 42.0));
        assert!((corrected.x - 22.0).abs() < EPSILON);
        assert!((corrected.y - 18.0).abs() < EPSILON);
        assert!((corrected.z - 42.0).abs() < EPSILON);
    }

    #[test]
    fn apply_gyro_removes_bias() {
        let cal = MagCalibration {
            gyro_bias: Vector3::new(0.4, -0.2, 0.1),
            ..Default::default()
        };
        let corrected = cal.apply_gyro(Vector3::new(1.0, 1.0, 1.0));
        assert!((corrected.x - 0.6).abs() < EPSILON);
        assert!((corrected.y - 1.2).abs() < EPSILON);
        assert!((corrected.z - 0.9).abs() < EPSILON);
    }

    #[test]
    fn store_roundtrip() {
        let mut store = ParameterStore::new();
        MagCalibration::register_defaults(&mut store).unwrap();

        let cal = MagCalibration {
            offset: Vector3::new(120.0, -80.0, 15.5),
            scale: Vector3::new(0.95, 1.08, 1.0),
            calibrated: true,
            timestamp_s: 321,
            gyro_bias: Vector3::new(0.2, 0.0, -0.1),
        };
        cal.store_into(&mut store).unwrap();

        let restored = MagCalibration::from_store(&store);
        assert!((restored.offset - cal.offset).norm() < EPSILON);
        assert!((restored.scale - cal.scale).norm() < EPSILON);
        assert!((restored.gyro_bias - cal.gyro_bias).norm() < EPSILON);
        assert!(restored.calibrated);
        assert_eq!(restored.timestamp_s, 321);
    }

    #[test]
    fn from_empty_store_is_identity() {
        let store = ParameterStore::new();
        let cal = MagCalibration::from_store(&store);
        assert!(!cal.calibrated);
        assert_eq!(cal.scale, Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn gyro_bias_is_mean_of_samples() {
        let samples = [
            Vector3::new(0.10, -0.05, 0.02),
            Vector3::new(0.12, -0.07, 0.00),
            Vector3::new(0.08, -0.03, 0.04),
        ];
        let bias = estimate_gyro_bias(&samples);
        assert!((bias.x - 0.10).abs() < EPSILON);
        assert!((bias.y + 0.05).abs() < EPSILON);
        assert!((bias.z - 0.02).abs() < EPSILON);
    }

    #[test]
    fn gyro_bias_empty_slice_is_zero() {
        assert_eq!(estimate_gyro_bias(&[]), Vector3::zeros());
    }
}

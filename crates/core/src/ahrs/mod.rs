//! Attitude estimation and sensor calibration
//!
//! # Components
//!
//! - [`calibration`]: calibration vectors, parameter mapping, gyro bias
//!   estimation
//! - [`mag_calibrator`]: cooperative magnetometer calibration session
//! - [`fusion`]: quaternion error-feedback attitude filter

pub mod calibration;
pub mod fusion;
pub mod mag_calibrator;

pub use calibration::{estimate_gyro_bias, MagCalibration};
pub use fusion::{AttitudeFilter, EulerAngles, FilterConfig};
pub use mag_calibrator::{
    CalibrationConfig, CalibrationQuality, CalibrationState, MagCalibrator, SessionReport,
    StepOutcome,
};

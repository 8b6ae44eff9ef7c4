//! Heading post-processing
//!
//! Turns the fusion filter's internal yaw and the calibrated magnetometer
//! field into a usable compass heading: tilt compensation, declination
//! correction, and angle-aware smoothing.

pub mod geo;
pub mod heading;

pub use geo::{wrap_180, wrap_360};
pub use heading::{
    apply_declination, estimate_declination, flat_heading, tilt_compensated_heading,
    HeadingSmoother, PARAM_DECLINATION,
};

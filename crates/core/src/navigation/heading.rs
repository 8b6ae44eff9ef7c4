//! Compass heading derivation from the calibrated magnetic field.
//!
//! The magnetometer measures the field in the body frame, so the device must
//! be virtually "leveled" before the horizontal field components can give a
//! heading. Declination then rotates magnetic north to true north.

use super::geo::{wrap_180, wrap_360};
use libm::{atan2f, cosf, sinf};
use nalgebra::Vector3;

/// Parameter name for the configured magnetic declination (degrees, east
/// positive).
pub const PARAM_DECLINATION: &str = "NAV_DECL_DEG";

/// Heading in degrees `[0, 360)` assuming the device is level.
pub fn flat_heading(mag: &Vector3<f32>) -> f32 {
    wrap_360(atan2f(mag.y, mag.x).to_degrees())
}

/// Tilt-compensated heading in degrees `[0, 360)`.
///
/// Rotates the field vector into the horizontal plane using the current
/// pitch and roll before taking the horizontal components, so the heading
/// stays correct while the device is inclined toward the pole.
pub fn tilt_compensated_heading(mag: &Vector3<f32>, pitch_deg: f32, roll_deg: f32) -> f32 {
    let pitch = pitch_deg.to_radians();
    let roll = roll_deg.to_radians();

    let mx_comp = mag.x * cosf(pitch) + mag.z * sinf(pitch);
    let my_comp =
        mag.x * sinf(roll) * sinf(pitch) + mag.y * cosf(roll) - mag.z * sinf(roll) * cosf(pitch);

    wrap_360(atan2f(my_comp, mx_comp).to_degrees())
}

/// Apply declination to a magnetic heading, normalizing into `[0, 360)`.
pub fn apply_declination(heading_deg: f32, declination_deg: f32) -> f32 {
    wrap_360(heading_deg + declination_deg)
}

/// Coarse declination estimate in degrees (east positive).
///
/// Computes the bearing from the given location to the geomagnetic north
/// pole under a tilted-dipole model. This is an approximation, typically
/// within a few degrees at mid-latitudes and worse near the poles or in
/// regions dominated by non-dipole field terms. It is a fallback for manual
/// declination entry, not a geomagnetic model.
pub fn estimate_declination(lat_deg: f32, lon_deg: f32) -> f32 {
    // Geomagnetic north pole, epoch 2020
    const POLE_LAT_DEG: f32 = 80.65;
    const POLE_LON_DEG: f32 = -72.68;

    let lat = lat_deg.to_radians();
    let pole_lat = POLE_LAT_DEG.to_radians();
    let d_lon = (POLE_LON_DEG - lon_deg).to_radians();

    let east = sinf(d_lon) * cosf(pole_lat);
    let north = cosf(lat) * sinf(pole_lat) - sinf(lat) * cosf(pole_lat) * cosf(d_lon);

    wrap_180(atan2f(east, north).to_degrees())
}

/// Angle-aware exponential smoother for heading output.
///
/// Display consumers want a steady needle, not raw per-tick jitter. The
/// smoother tracks toward each new heading along the signed shortest path,
/// so crossing the 0°/360° seam does not swing the output through the
/// whole dial.
///
/// `gain` is the tracking weight per update: 1.0 passes headings through
/// unchanged, 0.0 freezes the first heading seen.
pub struct HeadingSmoother {
    gain: f32,
    state: Option<f32>,
}

impl HeadingSmoother {
    /// Create a smoother with the given tracking gain, clamped to `[0, 1]`.
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, 1.0),
            state: None,
        }
    }

    /// Fold in a new heading (degrees) and return the smoothed value.
    ///
    /// The first heading after construction or [`reset`](Self::reset) is
    /// returned unchanged.
    pub fn apply(&mut self, heading_deg: f32) -> f32 {
        let smoothed = match self.state {
            None => wrap_360(heading_deg),
            Some(prev) => {
                let step = wrap_180(heading_deg - prev);
                wrap_360(prev + self.gain * step)
            }
        };
        self.state = Some(smoothed);
        smoothed
    }

    /// Forget the current state; the next heading passes through unchanged.
    pub fn reset(&mut self) {
        self.state = None;
    }
}

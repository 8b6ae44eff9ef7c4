//! Quaternion error-feedback attitude filter.
//!
//! Gyro integration tracks fast motion but drifts; gravity and the magnetic
//! field are noisy but drift-free. Each tick the filter compares the
//! measured reference directions against the directions predicted by the
//! current quaternion, folds the cross-product error back into the angular
//! rate through a proportional (and optional integral) gain, and integrates
//! the corrected rate.
//!
//! The magnetometer term is only fed when calibration is authoritative;
//! without it pitch and roll stay gravity-corrected but yaw is gyro-only
//! and drifts. The caller owns that decision and the resulting status flag.

use crate::navigation::geo::wrap_360;
use libm::{asinf, atan2f, cosf, sinf, sqrtf};
use nalgebra::{Quaternion, Vector3};

/// Euler-angle view of the current orientation, in degrees.
///
/// Recomputed from the quaternion on demand; this is derived state, not
/// independently owned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    /// Heading angle in `[0, 360)`, before declination correction
    pub yaw: f32,
    /// Elevation angle in `[-90, 90]`
    pub pitch: f32,
    /// Bank angle in `[-180, 180]`
    pub roll: f32,
}

/// Filter tuning.
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    /// Proportional gain on the reference-direction error
    pub kp: f32,
    /// Integral gain; zero disables the integral term
    pub ki: f32,
    /// Per-axis clamp on the accumulated integral error
    pub integral_limit: f32,
    /// Substitute timestep when dt is unusable (seconds)
    pub fallback_dt_s: f32,
    /// dt above this is treated as a stall and replaced (seconds)
    pub max_dt_s: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kp: 8.0,
            ki: 0.0,
            integral_limit: 0.1,
            fallback_dt_s: 0.01,
            max_dt_s: 1.0,
        }
    }
}

/// Error-feedback attitude filter over a unit quaternion.
///
/// The quaternion is the single owned orientation state of the process; it
/// is normalized after every update and lives for the filter's lifetime.
pub struct AttitudeFilter {
    config: FilterConfig,
    q: Quaternion<f32>,
    integral: Vector3<f32>,
}

impl AttitudeFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            q: Quaternion::identity(),
            integral: Vector3::zeros(),
        }
    }

    /// Current orientation quaternion (scalar-first, unit norm).
    pub fn quaternion(&self) -> Quaternion<f32> {
        self.q
    }

    /// Return to identity orientation and clear the integral state.
    pub fn reset(&mut self) {
        self.q = Quaternion::identity();
        self.integral = Vector3::zeros();
    }

    /// Seed the quaternion from an accelerometer reading and a magnetic
    /// heading, instead of converging from identity.
    ///
    /// A degenerate accel vector resets to identity.
    pub fn initialize(&mut self, accel: Vector3<f32>, heading_deg: f32) {
        self.integral = Vector3::zeros();

        let norm = accel.norm();
        if norm <= 0.0 {
            self.q = Quaternion::identity();
            return;
        }
        let a = accel / norm;

        let pitch = asinf((-a.x).clamp(-1.0, 1.0));
        let roll = atan2f(a.y, a.z);
        let yaw = heading_deg.to_radians();

        let (half_yaw_sin, half_yaw_cos) = (sinf(yaw * 0.5), cosf(yaw * 0.5));
        let (half_pitch_sin, half_pitch_cos) = (sinf(pitch * 0.5), cosf(pitch * 0.5));
        let (half_roll_sin, half_roll_cos) = (sinf(roll * 0.5), cosf(roll * 0.5));

        self.q = Quaternion::new(
            half_roll_cos * half_pitch_cos * half_yaw_cos
                + half_roll_sin * half_pitch_sin * half_yaw_sin,
            half_roll_sin * half_pitch_cos * half_yaw_cos
                - half_roll_cos * half_pitch_sin * half_yaw_sin,
            half_roll_cos * half_pitch_sin * half_yaw_cos
                + half_roll_sin * half_pitch_cos * half_yaw_sin,
            half_roll_cos * half_pitch_cos * half_yaw_sin
                - half_roll_sin * half_pitch_sin * half_yaw_cos,
        );
        self.normalize();
    }

    /// Advance the filter by one tick.
    ///
    /// `dt_s` is the monotonic time since the previous update; values
    /// outside `(0, max_dt_s]` are replaced by the fallback step.
    /// `accel` is in g, `gyro` in deg/s, `mag` in µT *after* calibration
    /// correction. Pass `None` for any modality that is unavailable or
    /// untrusted this tick, and that correction is skipped.
    pub fn update(
        &mut self,
        dt_s: f32,
        accel: Option<Vector3<f32>>,
        gyro: Option<Vector3<f32>>,
        mag: Option<Vector3<f32>>,
    ) {
        let dt = if dt_s <= 0.0 || dt_s > self.config.max_dt_s {
            self.config.fallback_dt_s
        } else {
            dt_s
        };

        let mut omega = gyro.map(|g| g * core::f32::consts::PI / 180.0).unwrap_or_else(Vector3::zeros);

        let q0 = self.q.w;
        let q1 = self.q.i;
        let q2 = self.q.j;
        let q3 = self.q.k;

        let q0q0 = q0 * q0;
        let q0q1 = q0 * q1;
        let q0q2 = q0 * q2;
        let q0q3 = q0 * q3;
        let q1q1 = q1 * q1;
        let q1q2 = q1 * q2;
        let q1q3 = q1 * q3;
        let q2q2 = q2 * q2;
        let q2q3 = q2 * q3;
        let q3q3 = q3 * q3;

        let mut error = Vector3::zeros();
        let mut have_error = false;

        if let Some(acc) = accel {
            let norm = acc.norm();
            if norm > 0.0 {
                let a = acc / norm;
                // Estimated gravity direction in the body frame
                let v = Vector3::new(
                    2.0 * (q1q3 - q0q2),
                    2.0 * (q0q1 + q2q3),
                    q0q0 - q1q1 - q2q2 + q3q3,
                );
                error += a.cross(&v);
                have_error = true;
            }
        }

        if let Some(field) = mag {
            let norm = field.norm();
            if norm > 0.0 {
                let m = field / norm;
                // Measured field rotated into the reference frame
                let hx = 2.0
                    * (m.x * (0.5 - q2q2 - q3q3) + m.y * (q1q2 - q0q3) + m.z * (q1q3 + q0q2));
                let hy = 2.0
                    * (m.x * (q1q2 + q0q3) + m.y * (0.5 - q1q1 - q3q3) + m.z * (q2q3 - q0q1));
                let hz = 2.0
                    * (m.x * (q1q3 - q0q2) + m.y * (q2q3 + q0q1) + m.z * (0.5 - q1q1 - q2q2));
                // Reference field has no east component: fold horizontal
                // magnitude into north, keep the vertical part
                let bx = sqrtf(hx * hx + hy * hy);
                let bz = hz;
                // Estimated field direction back in the body frame
                let w = Vector3::new(
                    2.0 * (bx * (0.5 - q2q2 - q3q3) + bz * (q1q3 - q0q2)),
                    2.0 * (bx * (q1q2 - q0q3) + bz * (q0q1 + q2q3)),
                    2.0 * (bx * (q0q2 + q1q3) + bz * (0.5 - q1q1 - q2q2)),
                );
                error += m.cross(&w);
                have_error = true;
            }
        }

        if have_error {
            if self.config.ki > 0.0 {
                self.integral += error * dt;
                let limit = self.config.integral_limit;
                self.integral.x = self.integral.x.clamp(-limit, limit);
                self.integral.y = self.integral.y.clamp(-limit, limit);
                self.integral.z = self.integral.z.clamp(-limit, limit);
                omega += self.integral * self.config.ki;
            }
            omega += error * self.config.kp;
        }

        // First-order quaternion integration: q̇ = 0.5 · q ⊗ (0, ω)
        let half_dt = 0.5 * dt;
        let (gx, gy, gz) = (omega.x, omega.y, omega.z);
        let new_q0 = q0 + (-q1 * gx - q2 * gy - q3 * gz) * half_dt;
        let new_q1 = q1 + (q0 * gx + q2 * gz - q3 * gy) * half_dt;
        let new_q2 = q2 + (q0 * gy - q1 * gz + q3 * gx) * half_dt;
        let new_q3 = q3 + (q0 * gz + q1 * gy - q2 * gx) * half_dt;
        self.q = Quaternion::new(new_q0, new_q1, new_q2, new_q3);

        self.normalize();
    }

    /// Derive Euler angles from the current quaternion.
    pub fn euler(&self) -> EulerAngles {
        let q0 = self.q.w;
        let q1 = self.q.i;
        let q2 = self.q.j;
        let q3 = self.q.k;

        let yaw = atan2f(
            2.0 * (q1 * q2 + q0 * q3),
            q0 * q0 + q1 * q1 - q2 * q2 - q3 * q3,
        );
        let pitch = -asinf((2.0 * (q1 * q3 - q0 * q2)).clamp(-1.0, 1.0));
        let roll = atan2f(
            2.0 * (q0 * q1 + q2 * q3),
            q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3,
        );

        EulerAngles {
            yaw: wrap_360(yaw.to_degrees()),
            pitch: pitch.to_degrees(),
            roll: roll.to_degrees(),
        }
    }

    fn normalize(&mut self) {
        let norm = sqrtf(
            self.q.w * self.q.w + self.q.i * self.q.i + self.q.j * self.q.j + self.q.k * self.q.k,
        );
        // A non-positive norm cannot come from a valid state; leave the
        // quaternion untouched rather than divide by it.
        if norm > 0.0 {
            self.q = Quaternion::new(
                self.q.w / norm,
                self.q.i / norm,
                self.q.j / norm,
                self.q.k / norm,
            );
        }
    }
}

impl Default for AttitudeFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

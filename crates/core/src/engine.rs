//! Tick-driven orientation engine.
//!
//! One `tick` per control-loop iteration: route the tick's sensor sample to
//! either the calibration session or the fusion filter, post-process the
//! heading, and publish a consumer-facing snapshot. The engine is the single
//! writer of the quaternion and the calibration vectors; consumers only see
//! copies, so no locking exists anywhere in the core.

use crate::ahrs::{
    AttitudeFilter, CalibrationConfig, CalibrationQuality, CalibrationState, FilterConfig,
    MagCalibration, MagCalibrator, SessionReport, StepOutcome,
};
use crate::navigation::heading::{
    apply_declination, flat_heading, tilt_compensated_heading, HeadingSmoother,
};
use crate::parameters::{ParameterError, ParameterStore};
use crate::traits::SensorSample;
use nalgebra::{Quaternion, Vector3};

/// Engine tuning, externally supplied with usable defaults.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Fusion filter gains and dt guards
    pub filter: FilterConfig,
    /// Calibration session window, sample target, and quality gate
    pub calibration: CalibrationConfig,
    /// Magnetic declination in degrees, east positive
    pub declination_deg: f32,
    /// Heading smoother tracking gain; 1.0 disables smoothing
    pub smoothing_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            calibration: CalibrationConfig::default(),
            declination_deg: 0.0,
            smoothing_gain: 0.3,
        }
    }
}

/// Consumer-facing orientation snapshot.
///
/// `heading_deg` is tilt-compensated, declination-corrected, and smoothed
/// when the magnetometer is authoritative; otherwise it falls back to the
/// gyro-integrated yaw and `mag_calibrated` says so. Degraded output is
/// flagged, never hidden.
#[derive(Debug, Clone, Copy)]
pub struct OrientationOutput {
    /// Compass heading in `[0, 360)` degrees
    pub heading_deg: f32,
    /// Pitch in `[-90, 90]` degrees
    pub pitch_deg: f32,
    /// Roll in `[-180, 180]` degrees
    pub roll_deg: f32,
    /// Raw orientation quaternion (scalar-first)
    pub quaternion: Quaternion<f32>,
    /// True if heading is backed by a quality-passing calibration
    pub mag_calibrated: bool,
    /// Quality classification for the display layer
    pub quality: CalibrationQuality,
}

impl Default for OrientationOutput {
    fn default() -> Self {
        Self {
            heading_deg: 0.0,
            pitch_deg: 0.0,
            roll_deg: 0.0,
            quaternion: Quaternion::identity(),
            mag_calibrated: false,
            quality: CalibrationQuality::Poor,
        }
    }
}

/// What happened during one engine tick.
#[derive(Debug, Clone, Copy)]
pub enum EngineEvent {
    /// Normal fusion tick
    Updated,
    /// Calibration session advanced; `progress` in `[0, 1]`
    CalibrationProgress {
        /// Session progress fraction
        progress: f32,
    },
    /// Calibration session produced a result this tick
    CalibrationFinished(SessionReport),
    /// Calibration session was cancelled; prior calibration untouched
    CalibrationCancelled,
}

/// The orientation estimation and calibration engine.
pub struct OrientationEngine {
    filter: AttitudeFilter,
    calibration: MagCalibration,
    calibrator: MagCalibrator,
    smoother: HeadingSmoother,
    declination_deg: f32,
    last_tick_us: Option<u64>,
    seeded: bool,
    last_output: OrientationOutput,
}

impl OrientationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            filter: AttitudeFilter::new(config.filter),
            calibration: MagCalibration::default(),
            calibrator: MagCalibrator::new(config.calibration),
            smoother: HeadingSmoother::new(config.smoothing_gain),
            declination_deg: config.declination_deg,
            last_tick_us: None,
            seeded: false,
            last_output: OrientationOutput::default(),
        }
    }

    /// Advance the engine by one tick.
    ///
    /// `now_us` must come from a monotonic clock; dt is derived from
    /// consecutive calls only. `cancel_requested` is the calibration cancel
    /// input, sampled once per tick.
    pub fn tick(
        &mut self,
        now_us: u64,
        sample: &SensorSample,
        cancel_requested: bool,
    ) -> EngineEvent {
        let dt_s = match self.last_tick_us {
            // Negative dt trips the filter's fallback on the first tick
            None => -1.0,
            Some(prev) => now_us.saturating_sub(prev) as f32 / 1_000_000.0,
        };
        self.last_tick_us = Some(now_us);

        let event = if self.calibrator.is_active() {
            // Raw field goes to the session; attitude keeps integrating
            // without a mag reference so the display stays alive.
            let outcome = self.calibrator.step(now_us / 1000, sample.mag, cancel_requested);
            self.run_filter(dt_s, sample, None);
            match outcome {
                StepOutcome::Collecting { progress } => EngineEvent::CalibrationProgress { progress },
                StepOutcome::Done(report) => {
                    self.adopt(&report, now_us);
                    EngineEvent::CalibrationFinished(report)
                }
                StepOutcome::Cancelled => EngineEvent::CalibrationCancelled,
                StepOutcome::Idle => EngineEvent::Updated,
            }
        } else {
            let corrected_mag = if self.calibration.calibrated {
                sample.mag.map(|m| self.calibration.apply(m))
            } else {
                None
            };
            self.run_filter(dt_s, sample, corrected_mag);
            EngineEvent::Updated
        };

        self.publish(sample);
        event
    }

    fn run_filter(&mut self, dt_s: f32, sample: &SensorSample, mag: Option<Vector3<f32>>) {
        if !self.seeded {
            if let Some(accel) = sample.accel {
                if accel.norm() > 0.0 {
                    let heading = mag.map(|m| flat_heading(&m)).unwrap_or(0.0);
                    self.filter.initialize(accel, heading);
                    self.seeded = true;
                    return;
                }
            }
        }

        let gyro = sample.gyro.map(|g| self.calibration.apply_gyro(g));
        self.filter.update(dt_s, sample.accel, gyro, mag);
    }

    /// Take over the session result. Best-effort values are adopted even
    /// when the gate failed; only the authoritative flag differs.
    fn adopt(&mut self, report: &SessionReport, now_us: u64) {
        self.calibration.offset = report.offset;
        self.calibration.scale = report.scale;
        self.calibration.calibrated = report.passed();
        self.calibration.timestamp_s = (now_us / 1_000_000) as u32;
    }

    fn publish(&mut self, sample: &SensorSample) {
        let euler = self.filter.euler();

        let mag_authoritative = self.calibration.calibrated && !self.calibrator.is_active();
        let raw_heading = match (mag_authoritative, sample.mag) {
            (true, Some(raw)) => {
                let field = self.calibration.apply(raw);
                tilt_compensated_heading(&field, euler.pitch, euler.roll)
            }
            // Uncalibrated or failed read: gyro-integrated yaw, drifting
            _ => euler.yaw,
        };
        let heading = self
            .smoother
            .apply(apply_declination(raw_heading, self.declination_deg));

        self.last_output = OrientationOutput {
            heading_deg: heading,
            pitch_deg: euler.pitch,
            roll_deg: euler.roll,
            quaternion: self.filter.quaternion(),
            mag_calibrated: self.calibration.calibrated,
            quality: if self.calibration.calibrated {
                CalibrationQuality::Good
            } else {
                CalibrationQuality::Poor
            },
        };
    }

    /// Latest published snapshot.
    pub fn orientation(&self) -> OrientationOutput {
        self.last_output
    }

    /// Begin a magnetometer calibration session.
    pub fn start_calibration(&mut self, now_us: u64) {
        self.calibrator.start(now_us / 1000);
    }

    /// True while a calibration session is consuming samples.
    pub fn is_calibrating(&self) -> bool {
        self.calibrator.is_active()
    }

    /// Calibration session state for the display layer.
    pub fn calibration_state(&self) -> CalibrationState {
        self.calibrator.state()
    }

    /// Session progress in `[0, 1]`.
    pub fn calibration_progress(&self, now_us: u64) -> f32 {
        self.calibrator.progress(now_us / 1000)
    }

    /// True if a quality-passing calibration is in effect.
    pub fn is_calibrated(&self) -> bool {
        self.calibration.calibrated
    }

    /// Current calibration vectors.
    pub fn calibration(&self) -> &MagCalibration {
        &self.calibration
    }

    /// Manual calibration override (restore from storage, bench values).
    pub fn set_calibration(&mut self, calibration: MagCalibration) {
        self.calibration = calibration;
    }

    /// Replace the gyro bias estimate (from a stationary capture).
    pub fn set_gyro_bias(&mut self, bias_dps: Vector3<f32>) {
        self.calibration.gyro_bias = bias_dps;
    }

    pub fn declination_deg(&self) -> f32 {
        self.declination_deg
    }

    pub fn set_declination(&mut self, declination_deg: f32) {
        self.declination_deg = declination_deg;
    }

    /// Restore calibration from the parameter store.
    pub fn load_calibration(&mut self, store: &ParameterStore) {
        self.calibration = MagCalibration::from_store(store);
    }

    /// Write the current calibration into the parameter store.
    pub fn store_calibration(&self, store: &mut ParameterStore) -> Result<(), ParameterError> {
        self.calibration.store_into(store)
    }
}

impl Default for OrientationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ahrs::calibration::PARAM_MAG_CAL_OK;
    use crate::parameters::ParamValue;

    const TICK_US: u64 = 10_000;

    fn level_sample() -> SensorSample {
        SensorSample {
            accel: Some(Vector3::new(0.0, 0.0, 1.0)),
            gyro: Some(Vector3::zeros()),
            mag: Some(Vector3::new(30.0, 0.0, -40.0)),
        }
    }

    fn trusted_identity_calibration() -> MagCalibration {
        MagCalibration {
            calibrated: true,
            ..Default::default()
        }
    }

    #[test]
    fn level_north_pose_reads_zero() {
        let mut engine = OrientationEngine::default();
        engine.set_calibration(trusted_identity_calibration());

        let sample = level_sample();
        for i in 0..50 {
            engine.tick(i * TICK_US, &sample, false);
        }

        let out = engine.orientation();
        assert!(out.heading_deg < 1.0 || out.heading_deg > 359.0, "heading {}", out.heading_deg);
        assert!(out.pitch_deg.abs() < 0.5);
        assert!(out.roll_deg.abs() < 0.5);
        assert!(out.mag_calibrated);
        assert_eq!(out.quality, CalibrationQuality::Good);
    }

    #[test]
    fn declination_shifts_heading() {
        let config = EngineConfig {
            declination_deg: 10.0,
            smoothing_gain: 1.0,
            ..Default::default()
        };
        let mut engine = OrientationEngine::new(config);
        engine.set_calibration(trusted_identity_calibration());

        let sample = level_sample();
        for i in 0..50 {
            engine.tick(i * TICK_US, &sample, false);
        }
        let heading = engine.orientation().heading_deg;
        assert!((heading - 10.0).abs() < 1.0, "heading {heading}");
    }

    #[test]
    fn gyro_only_rotation_advances_heading() {
        let mut engine = OrientationEngine::default();
        // No calibration: yaw is gyro-integrated and flagged as such
        let sample = SensorSample {
            accel: None,
            gyro: Some(Vector3::new(0.0, 0.0, 90.0)),
            mag: None,
        };
        for i in 0..100 {
            engine.tick(i * TICK_US, &sample, false);
        }
        let out = engine.orientation();
        assert!(
            (out.heading_deg - 90.0).abs() < 5.0,
            "heading {}",
            out.heading_deg
        );
        assert!(!out.mag_calibrated);
        assert_eq!(out.quality, CalibrationQuality::Poor);
    }

    #[test]
    fn uncalibrated_engine_ignores_mag() {
        let mut engine = OrientationEngine::default();
        // Field wildly inconsistent with a level pose; without calibration
        // it must not steer the attitude.
        let sample = SensorSample {
            accel: Some(Vector3::new(0.0, 0.0, 1.0)),
            gyro: Some(Vector3::zeros()),
            mag: Some(Vector3::new(-500.0, 321.0, 80.0)),
        };
        for i in 0..200 {
            engine.tick(i * TICK_US, &sample, false);
        }
        let out = engine.orientation();
        assert!(out.pitch_deg.abs() < 0.5);
        assert!(out.roll_deg.abs() < 0.5);
        assert!(!out.mag_calibrated);
    }

    #[test]
    fn empty_sample_does_not_crash_or_corrupt() {
        let mut engine = OrientationEngine::default();
        let empty = SensorSample::default();
        for i in 0..10 {
            engine.tick(i * TICK_US, &empty, false);
        }
        let out = engine.orientation();
        assert!(out.pitch_deg.abs() < 0.01);
        assert!((out.quaternion.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn calibration_session_lifecycle() {
        let mut engine = OrientationEngine::default();
        engine.start_calibration(0);
        assert!(engine.is_calibrating());
        assert_eq!(engine.calibration_state(), CalibrationState::Collecting);

        // Full-sphere sweep: ±500 on every axis
        let mut now_us = 0;
        let mut finished = None;
        for i in 0.. {
            now_us = i * TICK_US;
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let sample = SensorSample {
                accel: Some(Vector3::new(0.0, 0.0, 1.0)),
                gyro: Some(Vector3::zeros()),
                mag: Some(Vector3::new(sign * 500.0, sign * 500.0, sign * 500.0)),
            };
            match engine.tick(now_us, &sample, false) {
                EngineEvent::CalibrationFinished(report) => {
                    finished = Some(report);
                    break;
                }
                EngineEvent::CalibrationProgress { progress } => {
                    assert!((0.0..=1.0).contains(&progress));
                }
                _ => panic!("unexpected event during calibration"),
            }
        }

        let report = finished.expect("session never finished");
        assert!(report.passed());
        assert!(engine.is_calibrated());
        assert!(!engine.is_calibrating());
        assert!(engine.calibration().offset.norm() < 1.0);
        assert_eq!(engine.calibration().timestamp_s, (now_us / 1_000_000) as u32);
    }

    #[test]
    fn poor_session_stores_best_effort_but_stays_untrusted() {
        let mut engine = OrientationEngine::default();
        engine.start_calibration(0);

        // X/Y swept fully, Z nearly flat: fails the balance gate
        let mut finished = None;
        for i in 0.. {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let sample = SensorSample {
                accel: Some(Vector3::new(0.0, 0.0, 1.0)),
                gyro: Some(Vector3::zeros()),
                mag: Some(Vector3::new(sign * 500.0, sign * 500.0, 100.0 + sign * 50.0)),
            };
            if let EngineEvent::CalibrationFinished(report) = engine.tick(i * TICK_US, &sample, false)
            {
                finished = Some(report);
                break;
            }
        }

        let report = finished.unwrap();
        assert!(!report.passed());
        assert!(!engine.is_calibrated());
        // Best-effort values were still adopted, not discarded
        assert!((engine.calibration().offset.z - 100.0).abs() < 1.0);
        assert!(engine.calibration().scale.z > 1.0);

        // And they persist with the validity flag low
        let mut store = ParameterStore::new();
        MagCalibration::register_defaults(&mut store).unwrap();
        engine.store_calibration(&mut store).unwrap();
        assert_eq!(store.get(PARAM_MAG_CAL_OK), Some(&ParamValue::Bool(false)));
    }

    #[test]
    fn cancel_leaves_previous_calibration_untouched() {
        let mut engine = OrientationEngine::default();
        let previous = MagCalibration {
            offset: Vector3::new(12.0, -8.0, 3.0),
            calibrated: true,
            ..Default::default()
        };
        engine.set_calibration(previous);

        engine.start_calibration(0);
        let sample = SensorSample {
            accel: Some(Vector3::new(0.0, 0.0, 1.0)),
            gyro: Some(Vector3::zeros()),
            mag: Some(Vector3::new(999.0, 999.0, 999.0)),
        };
        engine.tick(TICK_US, &sample, false);
        let event = engine.tick(2 * TICK_US, &sample, true);

        assert!(matches!(event, EngineEvent::CalibrationCancelled));
        assert!(!engine.is_calibrating());
        assert_eq!(engine.calibration_state(), CalibrationState::Idle);
        assert!(engine.is_calibrated());
        assert!((engine.calibration().offset.x - 12.0).abs() < 1e-6);
    }

    #[test]
    fn heading_falls_back_to_yaw_while_calibrating() {
        let mut engine = OrientationEngine::default();
        engine.set_calibration(trusted_identity_calibration());
        let sample = level_sample();
        for i in 0..10 {
            engine.tick(i * TICK_US, &sample, false);
        }
        engine.start_calibration(10 * TICK_US);
        let event = engine.tick(11 * TICK_US, &sample, false);
        assert!(matches!(event, EngineEvent::CalibrationProgress { .. }));
        // Output keeps flowing during the session
        let out = engine.orientation();
        assert!(out.pitch_deg.abs() < 1.0);
    }

    #[test]
    fn load_calibration_restores_from_store() {
        let mut store = ParameterStore::new();
        MagCalibration::register_defaults(&mut store).unwrap();
        let saved = MagCalibration {
            offset: Vector3::new(100.0, -50.0, 25.0),
            scale: Vector3::new(1.05, 0.95, 1.0),
            calibrated: true,
            timestamp_s: 99,
            gyro_bias: Vector3::zeros(),
        };
        saved.store_into(&mut store).unwrap();

        let mut engine = OrientationEngine::default();
        engine.load_calibration(&store);
        assert!(engine.is_calibrated());
        assert!((engine.calibration().offset.x - 100.0).abs() < 1e-6);
    }
}

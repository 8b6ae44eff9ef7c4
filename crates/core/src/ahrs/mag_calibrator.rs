//! Cooperative magnetometer calibration session.
//!
//! The user rotates the device through a figure-8 while the session tracks
//! per-axis extremes of the raw field. The session is driven one `step` per
//! control-loop tick so the display and input handling keep running; there
//! is no internal wait loop.
//!
//! State machine: `Idle → Collecting → Evaluating → {Complete, Failed}`,
//! re-entrant via `start`. A cancel request observed during `Collecting`
//! drops straight back to `Idle` without producing a result.

use nalgebra::Vector3;

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    /// No session running
    Idle,
    /// Accumulating per-axis extremes from raw samples
    Collecting,
    /// Computing offset/scale from the collected extremes
    Evaluating,
    /// Last session completed and passed the quality gate
    Complete,
    /// Last session completed but failed the quality gate
    Failed,
}

/// Quality classification of a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationQuality {
    /// All axes covered adequately; result is authoritative
    Good,
    /// Coverage too small or too lopsided; result is best-effort only
    Poor,
}

impl CalibrationQuality {
    /// Human-readable classification for the display layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationQuality::Good => "good",
            CalibrationQuality::Poor => "poor",
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationConfig {
    /// Collection window in milliseconds
    pub window_ms: u64,
    /// Sample count that ends collection early
    pub sample_target: u32,
    /// Minimum acceptable per-axis range in raw units
    pub min_range: f32,
    /// Minimum acceptable min-range/max-range ratio across axes
    pub balance_ratio: f32,
    /// Floor applied to ranges before division
    pub range_epsilon: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            window_ms: 15_000,
            sample_target: 100,
            min_range: 100.0,
            balance_ratio: 0.3,
            range_epsilon: 1.0,
        }
    }
}

/// Result of a completed session.
///
/// Offset and scale are always finite and the scale strictly positive; a
/// degenerate axis falls back to the epsilon floor rather than dividing by
/// zero. `quality` says whether the values should be trusted.
#[derive(Debug, Clone, Copy)]
pub struct SessionReport {
    /// Hard-iron offset: per-axis midpoint of the observed extremes
    pub offset: Vector3<f32>,
    /// Diagonal soft-iron scale: average range over per-axis range
    pub scale: Vector3<f32>,
    /// Per-axis observed range (after the epsilon floor)
    pub range: Vector3<f32>,
    /// Quality gate verdict
    pub quality: CalibrationQuality,
    /// Samples accumulated during collection
    pub sample_count: u32,
    /// Session length in milliseconds
    pub elapsed_ms: u64,
}

impl SessionReport {
    /// True if the session passed the quality gate.
    pub fn passed(&self) -> bool {
        self.quality == CalibrationQuality::Good
    }
}

/// Outcome of one `step` call.
#[derive(Debug, Clone, Copy)]
pub enum StepOutcome {
    /// No session is running; the call did nothing
    Idle,
    /// Session continues; `progress` is in `[0, 1]`
    Collecting { progress: f32 },
    /// Session finished this tick and produced a report
    Done(SessionReport),
    /// Cancel request honored; session discarded
    Cancelled,
}

/// Magnetometer calibration session driver.
pub struct MagCalibrator {
    config: CalibrationConfig,
    state: CalibrationState,
    min: Vector3<f32>,
    max: Vector3<f32>,
    started_ms: u64,
    samples: u32,
}

impl MagCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            state: CalibrationState::Idle,
            min: Vector3::repeat(f32::INFINITY),
            max: Vector3::repeat(f32::NEG_INFINITY),
            started_ms: 0,
            samples: 0,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// True while a session is consuming samples.
    pub fn is_active(&self) -> bool {
        self.state == CalibrationState::Collecting
    }

    pub fn sample_count(&self) -> u32 {
        self.samples
    }

    /// Begin a new session. Valid from any state; any previous result is
    /// forgotten.
    pub fn start(&mut self, now_ms: u64) {
        self.min = Vector3::repeat(f32::INFINITY);
        self.max = Vector3::repeat(f32::NEG_INFINITY);
        self.samples = 0;
        self.started_ms = now_ms;
        self.state = CalibrationState::Collecting;
    }

    /// Abandon the session without producing a result.
    pub fn reset(&mut self) {
        self.state = CalibrationState::Idle;
    }

    /// Session progress in `[0, 1]`: the further along of elapsed time and
    /// sample count.
    pub fn progress(&self, now_ms: u64) -> f32 {
        if self.state != CalibrationState::Collecting {
            return 0.0;
        }
        let elapsed = now_ms.saturating_sub(self.started_ms);
        let time_fraction = elapsed as f32 / self.config.window_ms as f32;
        let sample_fraction = self.samples as f32 / self.config.sample_target as f32;
        time_fraction.max(sample_fraction).min(1.0)
    }

    /// Drive the session by one tick.
    ///
    /// `mag` is the *raw* magnetometer reading for this tick, `None` if the
    /// read failed (the session keeps running on the clock).
    /// `cancel_requested` is sampled exactly once per step.
    pub fn step(
        &mut self,
        now_ms: u64,
        mag: Option<Vector3<f32>>,
        cancel_requested: bool,
    ) -> StepOutcome {
        if self.state != CalibrationState::Collecting {
            return StepOutcome::Idle;
        }

        if cancel_requested {
            self.state = CalibrationState::Idle;
            return StepOutcome::Cancelled;
        }

        if let Some(m) = mag {
            self.min.x = self.min.x.min(m.x);
            self.min.y = self.min.y.min(m.y);
            self.min.z = self.min.z.min(m.z);
            self.max.x = self.max.x.max(m.x);
            self.max.y = self.max.y.max(m.y);
            self.max.z = self.max.z.max(m.z);
            self.samples += 1;
        }

        let elapsed = now_ms.saturating_sub(self.started_ms);
        if elapsed >= self.config.window_ms || self.samples >= self.config.sample_target {
            self.state = CalibrationState::Evaluating;
            let report = self.evaluate(elapsed);
            self.state = if report.passed() {
                CalibrationState::Complete
            } else {
                CalibrationState::Failed
            };
            return StepOutcome::Done(report);
        }

        StepOutcome::Collecting {
            progress: self.progress(now_ms),
        }
    }

    fn evaluate(&self, elapsed_ms: u64) -> SessionReport {
        if self.samples == 0 {
            // The magnetometer never produced a sample; report an identity
            // result so downstream math stays finite.
            return SessionReport {
                offset: Vector3::zeros(),
                scale: Vector3::new(1.0, 1.0, 1.0),
                range: Vector3::zeros(),
                quality: CalibrationQuality::Poor,
                sample_count: 0,
                elapsed_ms,
            };
        }

        let offset = (self.min + self.max) / 2.0;
        let range = Vector3::new(
            (self.max.x - self.min.x).max(self.config.range_epsilon),
            (self.max.y - self.min.y).max(self.config.range_epsilon),
            (self.max.z - self.min.z).max(self.config.range_epsilon),
        );
        let avg_range = (range.x + range.y + range.z) / 3.0;
        let scale = Vector3::new(avg_range / range.x, avg_range / range.y, avg_range / range.z);

        let min_range = range.x.min(range.y).min(range.z);
        let max_range = range.x.max(range.y).max(range.z);
        let coverage_ok = min_range >= self.config.min_range;
        let balance_ok = min_range / max_range >= self.config.balance_ratio;

        SessionReport {
            offset,
            scale,
            range,
            quality: if coverage_ok && balance_ok {
                CalibrationQuality::Good
            } else {
                CalibrationQuality::Poor
            },
            sample_count: self.samples,
            elapsed_ms,
        }
    }
}

impl Default for MagCalibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    /// Feed alternating extreme samples on every axis, then run out the
    /// clock. Returns the report.
    fn run_session(
        calibrator: &mut MagCalibrator,
        lo: Vector3<f32>,
        hi: Vector3<f32>,
    ) -> SessionReport {
        calibrator.start(0);
        let mut now_ms = 0;
        loop {
            now_ms += 200;
            let sample = if (now_ms / 200) % 2 == 0 { lo } else { hi };
            match calibrator.step(now_ms, Some(sample), false) {
                StepOutcome::Done(report) => return report,
                StepOutcome::Collecting { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[test]
    fn offset_is_midpoint_of_extremes() {
        let mut calibrator = MagCalibrator::default();
        let report = run_session(
            &mut calibrator,
            Vector3::new(-400.0, -100.0, -250.0),
            Vector3::new(600.0, 300.0, 150.0),
        );
        assert!((report.offset.x - 100.0).abs() < EPSILON);
        assert!((report.offset.y - 100.0).abs() < EPSILON);
        assert!((report.offset.z + 50.0).abs() < EPSILON);
    }

    #[test]
    fn scale_times_range_equals_average_range() {
        let mut calibrator = MagCalibrator::default();
        let report = run_session(
            &mut calibrator,
            Vector3::new(-500.0, -300.0, -200.0),
            Vector3::new(500.0, 300.0, 200.0),
        );
        let avg = (report.range.x + report.range.y + report.range.z) / 3.0;
        for axis in 0..3 {
            assert!(
                (report.scale[axis] * report.range[axis] - avg).abs() < 1e-2,
                "axis {axis}: scale*range = {} != {avg}",
                report.scale[axis] * report.range[axis]
            );
        }
        assert!(report.passed());
        assert_eq!(calibrator.state(), CalibrationState::Complete);
    }

    #[test]
    fn completes_on_sample_target() {
        let mut calibrator = MagCalibrator::default();
        calibrator.start(0);
        // 100 samples well inside the 15 s window, 1 ms apart
        let mut outcome = StepOutcome::Idle;
        for i in 0..100 {
            let sample = if i % 2 == 0 {
                Vector3::new(-500.0, -500.0, -500.0)
            } else {
                Vector3::new(500.0, 500.0, 500.0)
            };
            outcome = calibrator.step(i as u64, Some(sample), false);
        }
        match outcome {
            StepOutcome::Done(report) => {
                assert_eq!(report.sample_count, 100);
                assert!(report.elapsed_ms < 15_000);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn completes_on_window_even_with_failed_reads() {
        let mut calibrator = MagCalibrator::default();
        calibrator.start(0);
        assert!(matches!(
            calibrator.step(1_000, None, false),
            StepOutcome::Collecting { .. }
        ));
        match calibrator.step(15_000, None, false) {
            StepOutcome::Done(report) => {
                assert_eq!(report.sample_count, 0);
                assert_eq!(report.quality, CalibrationQuality::Poor);
                assert_eq!(report.scale, Vector3::new(1.0, 1.0, 1.0));
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(calibrator.state(), CalibrationState::Failed);
    }

    #[test]
    fn quality_gate_rejects_small_range() {
        let mut calibrator = MagCalibrator::default();
        // Device left on the table: a few µT of noise per axis
        let report = run_session(
            &mut calibrator,
            Vector3::new(-2.0, -2.0, -2.0),
            Vector3::new(2.0, 2.0, 2.0),
        );
        assert_eq!(report.quality, CalibrationQuality::Poor);
        assert_eq!(calibrator.state(), CalibrationState::Failed);
        // Values are still computed, never discarded
        assert!(report.offset.norm() < EPSILON);
        assert!(report.scale.x.is_finite());
    }

    #[test]
    fn quality_gate_rejects_one_axis_dominant_rotation() {
        let mut calibrator = MagCalibrator::default();
        // X and Y swept fully, Z barely moved: ratio 100/1000 < 0.3
        let report = run_session(
            &mut calibrator,
            Vector3::new(-500.0, -500.0, -50.0),
            Vector3::new(500.0, 500.0, 50.0),
        );
        assert_eq!(report.quality, CalibrationQuality::Poor);
        // Offsets/scales still present for best-effort use
        assert!(report.scale.z > 1.0);
        assert!((report.offset.z).abs() < EPSILON);
    }

    #[test]
    fn cancel_discards_session() {
        let mut calibrator = MagCalibrator::default();
        calibrator.start(0);
        calibrator.step(100, Some(Vector3::new(300.0, 0.0, 0.0)), false);
        assert!(matches!(
            calibrator.step(200, Some(Vector3::new(-300.0, 0.0, 0.0)), true),
            StepOutcome::Cancelled
        ));
        assert_eq!(calibrator.state(), CalibrationState::Idle);

        // A step after cancellation is a no-op
        assert!(matches!(
            calibrator.step(300, Some(Vector3::zeros()), false),
            StepOutcome::Idle
        ));
    }

    #[test]
    fn step_while_idle_is_noop() {
        let mut calibrator = MagCalibrator::default();
        assert!(matches!(
            calibrator.step(0, Some(Vector3::zeros()), false),
            StepOutcome::Idle
        ));
        assert_eq!(calibrator.sample_count(), 0);
    }

    #[test]
    fn progress_tracks_both_clocks() {
        let mut calibrator = MagCalibrator::default();
        calibrator.start(0);

        // Time-driven progress with no samples
        calibrator.step(7_500, None, false);
        assert!((calibrator.progress(7_500) - 0.5).abs() < 0.01);

        // Sample-driven progress outpaces the clock
        for i in 0..50 {
            calibrator.step(7_500 + i, Some(Vector3::new(i as f32, 0.0, 0.0)), false);
        }
        assert!(calibrator.progress(7_550) >= 0.5);
    }

    #[test]
    fn restart_clears_previous_extremes() {
        let mut calibrator = MagCalibrator::default();
        calibrator.start(0);
        calibrator.step(10, Some(Vector3::new(1000.0, 1000.0, 1000.0)), false);

        calibrator.start(1_000);
        let report = run_session_from(&mut calibrator, 1_000);
        // Extremes from the first session must not leak into the second
        assert!((report.offset.x - 0.0).abs() < EPSILON);
    }

    fn run_session_from(calibrator: &mut MagCalibrator, start_ms: u64) -> SessionReport {
        let mut now_ms = start_ms;
        loop {
            now_ms += 200;
            let sample = if (now_ms / 200) % 2 == 0 {
                Vector3::new(-500.0, -500.0, -500.0)
            } else {
                Vector3::new(500.0, 500.0, 500.0)
            };
            match calibrator.step(now_ms, Some(sample), false) {
                StepOutcome::Done(report) => return report,
                _ => {}
            }
        }
    }
}

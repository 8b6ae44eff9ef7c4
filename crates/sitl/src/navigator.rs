//! Tick-driven navigator loop.
//!
//! Wires the orientation engine to a sensor source, a monotonic clock, and
//! the calibration store. One `step` per loop iteration: gather a sample,
//! advance the engine, and persist calibration results the moment a session
//! finishes. On construction, previously persisted calibration is restored
//! so the device is usable immediately after a power cycle.

use crate::error::SimError;
use nalgebra::Vector3;
use polaris_nav_core::ahrs::{estimate_gyro_bias, MagCalibration};
use polaris_nav_core::engine::{EngineConfig, EngineEvent, OrientationEngine, OrientationOutput};
use polaris_nav_core::navigation::PARAM_DECLINATION;
use polaris_nav_core::parameters::{
    load_params, save_params, ParamFlags, ParamValue, ParameterStore,
};
use polaris_nav_core::traits::{NvmStorage, SensorSample, SensorSource, TimeSource};

/// The control loop driver: sensors in, orientation snapshots out.
pub struct Navigator<S, T, N> {
    engine: OrientationEngine,
    store: ParameterStore,
    sensors: S,
    time: T,
    nvm: N,
    cancel_requested: bool,
}

impl<S, T, N> Navigator<S, T, N>
where
    S: SensorSource,
    T: TimeSource,
    N: NvmStorage,
{
    /// Build the navigator: register parameters, restore persisted
    /// calibration and declination, and configure the engine.
    pub fn new(config: EngineConfig, sensors: S, time: T, mut nvm: N) -> Result<Self, SimError> {
        let mut store = ParameterStore::new();
        MagCalibration::register_defaults(&mut store)?;
        store.register(
            PARAM_DECLINATION,
            ParamValue::Float(config.declination_deg),
            ParamFlags::empty(),
        )?;

        let mut engine = OrientationEngine::new(config);
        if load_params(&mut store, &mut nvm) {
            engine.load_calibration(&store);
            if let Some(declination) = store.get(PARAM_DECLINATION).and_then(ParamValue::as_float)
            {
                engine.set_declination(declination);
            }
        }

        Ok(Self {
            engine,
            store,
            sensors,
            time,
            nvm,
            cancel_requested: false,
        })
    }

    /// Run one loop iteration.
    ///
    /// A finished calibration session is written through to NVM before the
    /// call returns, so a power cut after this point cannot lose it.
    pub fn step(&mut self) -> Result<EngineEvent, SimError> {
        let sample = SensorSample::read_from(&mut self.sensors);
        let cancel = core::mem::take(&mut self.cancel_requested);
        let event = self.engine.tick(self.time.now_us(), &sample, cancel);

        if matches!(event, EngineEvent::CalibrationFinished(_)) {
            self.engine.store_calibration(&mut self.store)?;
            save_params(&mut self.store, &mut self.nvm)?;
        }

        Ok(event)
    }

    /// Begin a magnetometer calibration session.
    pub fn start_calibration(&mut self) {
        self.engine.start_calibration(self.time.now_us());
    }

    /// Request cancellation; honored on the next `step`.
    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Capture gyro bias from `count` consecutive reads while stationary
    /// and persist it.
    pub fn capture_gyro_bias(&mut self, count: usize) -> Result<Vector3<f32>, SimError> {
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            if let Ok(gyro) = self.sensors.read_gyro() {
                samples.push(gyro);
            }
        }
        let bias = estimate_gyro_bias(&samples);
        self.engine.set_gyro_bias(bias);
        self.engine.store_calibration(&mut self.store)?;
        save_params(&mut self.store, &mut self.nvm)?;
        Ok(bias)
    }

    /// Update the configured declination and persist it.
    pub fn set_declination(&mut self, declination_deg: f32) -> Result<(), SimError> {
        self.engine.set_declination(declination_deg);
        self.store
            .set(PARAM_DECLINATION, ParamValue::Float(declination_deg))?;
        save_params(&mut self.store, &mut self.nvm)?;
        Ok(())
    }

    /// Latest orientation snapshot.
    pub fn orientation(&self) -> OrientationOutput {
        self.engine.orientation()
    }

    pub fn engine(&self) -> &OrientationEngine {
        &self.engine
    }

    /// Mutable sensor access, for scripting the simulated trajectory.
    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }

    pub fn time(&self) -> &T {
        &self.time
    }

    /// Tear down and hand back the NVM, e.g. to simulate a power cycle.
    pub fn into_nvm(self) -> N {
        self.nvm
    }
}

//! Host-side simulation harness for the polaris_nav orientation engine.
//!
//! Provides everything needed to run the engine without hardware: a
//! synthetic IMU with configurable noise and distortion, an in-memory NVM
//! mock with corruption injection, a wall-clock time source, and the
//! tick-driven navigator loop that wires them together.

pub mod error;
pub mod navigator;
pub mod platform;
pub mod synthetic;

pub use error::SimError;
pub use navigator::Navigator;
pub use platform::{HostTime, MockNvm};
pub use synthetic::{SyntheticImu, SyntheticImuConfig};

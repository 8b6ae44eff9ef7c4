//! Platform abstraction traits
//!
//! The engine never talks to hardware directly. Time, sensor access, and
//! non-volatile storage are injected through the traits in this module so the
//! same core logic runs on real firmware, in host simulation, and in unit
//! tests with synthetic inputs.

pub mod nvm;
pub mod sensors;
pub mod time;

pub use nvm::{NvmError, NvmStorage};
pub use sensors::{SensorError, SensorSample, SensorSource};
pub use time::{MockTime, TimeSource};

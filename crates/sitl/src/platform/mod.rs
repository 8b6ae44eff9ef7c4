//! Host implementations of the core platform traits.

pub mod nvm;
pub mod time;

pub use nvm::MockNvm;
pub use time::HostTime;

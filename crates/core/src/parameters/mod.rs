//! Parameter store and calibration persistence
//!
//! Calibration vectors, validity flags, and tuning values are held as named
//! parameters in a bounded in-RAM store and persisted to non-volatile
//! storage as CRC-protected binary blocks.
//!
//! # Components
//!
//! - [`storage`]: `ParameterStore` key-value store with flags and dirty
//!   tracking
//! - [`block`]: binary block format (header, hashed entries, CRC trailer)
//! - [`persist`]: save/load over [`NvmStorage`] with redundant block
//!   rotation
//!
//! [`NvmStorage`]: crate::traits::NvmStorage

pub mod block;
mod error;
pub mod persist;
pub mod storage;

pub use block::{hash_param_name, BlockHeader, Entry, EntryFlags};
pub use error::ParameterError;
pub use persist::{load_params, save_params};
pub use storage::{ParamFlags, ParamValue, ParameterStore, MAX_PARAMS, PARAM_NAME_LEN};

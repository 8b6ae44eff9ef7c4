//! In-RAM parameter store.
//!
//! Holds the device's named configuration and calibration values as a
//! bounded key-value map. NVM persistence is layered on top in
//! [`persist`](super::persist).

use super::error::ParameterError;
use bitflags::bitflags;
use heapless::FnvIndexMap;
use heapless::String;

/// Maximum parameter name length
pub const PARAM_NAME_LEN: usize = 16;

/// Maximum number of parameters (must be a power of two)
pub const MAX_PARAMS: usize = 32;

bitflags! {
    /// Per-parameter flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParamFlags: u8 {
        /// Parameter cannot be modified through `set`
        const READ_ONLY = 0b0000_0001;
    }
}

/// Parameter value types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Boolean flag (calibration validity, feature toggles)
    Bool(bool),
    /// 32-bit signed integer
    Int(i32),
    /// 32-bit unsigned integer (timestamps, counters)
    Uint(u32),
    /// 32-bit floating point (offsets, scales, gains)
    Float(f32),
}

impl ParamValue {
    /// Value as `f32` if this is a `Float`.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Value as `bool` if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Value as `u32` if this is a `Uint`.
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            ParamValue::Uint(v) => Some(*v),
            _ => None,
        }
    }
}

fn make_key(name: &str) -> Option<String<PARAM_NAME_LEN>> {
    let mut key = String::new();
    key.push_str(name).ok()?;
    Some(key)
}

/// Bounded key-value store for configuration and calibration parameters.
///
/// Parameters must be registered with a default before they can be set,
/// which keeps the persisted block and the RAM store in agreement about the
/// parameter universe. Mutations mark the store dirty until the owner
/// persists it.
pub struct ParameterStore {
    values: FnvIndexMap<String<PARAM_NAME_LEN>, ParamValue, MAX_PARAMS>,
    flags: FnvIndexMap<String<PARAM_NAME_LEN>, ParamFlags, MAX_PARAMS>,
    dirty: bool,
}

impl ParameterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            values: FnvIndexMap::new(),
            flags: FnvIndexMap::new(),
            dirty: false,
        }
    }

    /// Register a parameter with its default value and flags.
    ///
    /// Re-registering an existing parameter is a no-op, so defaults never
    /// clobber values restored from NVM.
    pub fn register(
        &mut self,
        name: &str,
        default_value: ParamValue,
        flags: ParamFlags,
    ) -> Result<(), ParameterError> {
        let key = make_key(name).ok_or(ParameterError::UnknownParameter)?;
        if self.values.contains_key(&key) {
            return Ok(());
        }

        self.values
            .insert(key.clone(), default_value)
            .map_err(|_| ParameterError::StoreFull)?;
        self.flags
            .insert(key, flags)
            .map_err(|_| ParameterError::StoreFull)?;
        self.dirty = true;
        Ok(())
    }

    /// Look up a parameter value.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(&make_key(name)?)
    }

    /// Update a registered parameter.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParameterError> {
        let key = make_key(name).ok_or(ParameterError::UnknownParameter)?;
        if !self.values.contains_key(&key) {
            return Err(ParameterError::UnknownParameter);
        }
        if let Some(flags) = self.flags.get(&key) {
            if flags.contains(ParamFlags::READ_ONLY) {
                return Err(ParameterError::ReadOnly);
            }
        }

        self.values.insert(key, value).ok();
        self.dirty = true;
        Ok(())
    }

    /// Insert a parameter without registration or read-only checks.
    ///
    /// Used by NVM restore, where the data comes from a CRC-validated block.
    pub fn insert_raw(&mut self, name: String<PARAM_NAME_LEN>, value: ParamValue) {
        self.values.insert(name, value).ok();
    }

    /// Iterate over all `(name, value)` pairs.
    pub fn iter_all(&self) -> impl Iterator<Item = (&String<PARAM_NAME_LEN>, &ParamValue)> {
        self.values.iter()
    }

    /// Number of parameters in the store.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no parameters are registered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if the store has changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a successful persist.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

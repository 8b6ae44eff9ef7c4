use polaris_nav_core::parameters::ParameterError;
use polaris_nav_core::traits::NvmError;

/// Errors that can occur while driving the simulated navigator.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("parameter store rejected operation: {0}")]
    Parameter(ParameterError),

    #[error("nvm operation failed: {0}")]
    Nvm(NvmError),
}

impl From<ParameterError> for SimError {
    fn from(err: ParameterError) -> Self {
        SimError::Parameter(err)
    }
}

impl From<NvmError> for SimError {
    fn from(err: NvmError) -> Self {
        SimError::Nvm(err)
    }
}

use gf_core::ParamError;
use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no {family} model named '{name}'")]
    UnknownModel { family: &'static str, name: String },

    #[error(transparent)]
    Param(#[from] ParamError),
}

impl DeviceError {
    pub fn unknown_model(family: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownModel {
            family,
            name: name.into(),
        }
    }
}

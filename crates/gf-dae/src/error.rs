use gf_core::ParamError;
use thiserror::Error;

pub type DaeResult<T> = Result<T, DaeError>;

#[derive(Error, Debug)]
pub enum DaeError {
    /// Consistent initial conditions could not be computed. This is the
    /// one initialization failure users hit routinely, so the message
    /// names the model and the reason.
    #[error("cannot initialize {model}: {reason}")]
    Init { model: String, reason: String },

    #[error("structural mismatch: {what}")]
    Structure { what: String },

    #[error(transparent)]
    Param(#[from] ParamError),
}

impl DaeError {
    pub fn init(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Init {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub fn structure(what: impl Into<String>) -> Self {
        Self::Structure { what: what.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_failures_name_the_model() {
        let err = DaeError::init("gov1", "washout requires zero desired output");
        let msg = format!("{err}");
        assert!(msg.contains("cannot initialize"));
        assert!(msg.contains("gov1"));
    }
}

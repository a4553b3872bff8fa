use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;
pub type ParamResult = Result<(), ParamError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Invariant violated: {what}")]
    Invariant { what: &'static str },
}

/// Outcome of a string-keyed parameter update.
///
/// `UnknownParameter`/`UnknownFlag` mean "not handled here"; enclosing
/// models forward those keys to their sub-models before giving up.
/// `InvalidValue` means the key was recognized and the value rejected,
/// which is always fatal to the caller.
#[derive(Error, Debug)]
pub enum ParamError {
    #[error("unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("unknown flag: {name}")]
    UnknownFlag { name: String },

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl ParamError {
    pub fn unknown(name: &str) -> Self {
        Self::UnknownParameter { name: name.to_string() }
    }

    pub fn unknown_flag(name: &str) -> Self {
        Self::UnknownFlag { name: name.to_string() }
    }

    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the key was simply not recognized and may be retried on
    /// a contained sub-model.
    pub fn is_unhandled(&self) -> bool {
        matches!(
            self,
            Self::UnknownParameter { .. } | Self::UnknownFlag { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhandled_distinguishes_unknown_from_invalid() {
        assert!(ParamError::unknown("zeta").is_unhandled());
        assert!(ParamError::unknown_flag("zeta").is_unhandled());
        assert!(!ParamError::invalid("k", "must be finite").is_unhandled());
    }

    #[test]
    fn messages_name_the_parameter() {
        let msg = format!("{}", ParamError::unknown("t1"));
        assert!(msg.contains("t1"));
        let msg = format!("{}", ParamError::invalid("omax", "below omin"));
        assert!(msg.contains("omax"));
        assert!(msg.contains("below omin"));
    }
}

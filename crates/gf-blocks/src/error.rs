use gf_core::ParamError;
use thiserror::Error;

pub type BlockResult<T> = Result<T, BlockError>;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("invalid block configuration: {what}")]
    Config { what: String },

    #[error("unable to parse block description '{text}': {reason}")]
    Parse { text: String, reason: String },

    #[error(transparent)]
    Param(#[from] ParamError),
}

impl BlockError {
    pub fn config(what: impl Into<String>) -> Self {
        Self::Config { what: what.into() }
    }

    pub fn parse(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            text: text.into(),
            reason: reason.into(),
        }
    }
}

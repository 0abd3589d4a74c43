use thiserror::Error;

use crate::gap::GapError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Gap set error: {0}")]
    Gap(#[from] GapError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the error reports broken internal state rather than a rejected request
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Gap(e) => e.is_fatal(),
            Self::Config(_) | Self::InvalidInput(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

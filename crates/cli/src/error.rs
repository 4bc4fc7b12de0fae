//! CLI error types.

use crate::config::ConfigError;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration could not be read or parsed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured policy adapter could not be opened.
    #[error(transparent)]
    AdapterInit(runtime::Error),

    /// The server failed to bind or serve.
    #[error(transparent)]
    Rpc(#[from] rpc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

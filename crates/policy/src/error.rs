//! Policy error types.

use thiserror::Error;

/// Policy errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A bundle-typed parameter is not valid JSON.
    #[error("parameter {position}: invalid attribute bundle: {source}")]
    InvalidBundle {
        position: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A bundle-typed parameter parsed, but not to a JSON object.
    #[error("parameter {position}: attribute bundle must be a JSON object")]
    NotAnObject { position: usize },

    /// The matcher reads an attribute the bundle does not carry.
    #[error("parameter {position}: attribute `{attribute}` referenced by the matcher is missing")]
    MissingAttribute { position: usize, attribute: String },

    /// An attribute value has no expression literal (floats, wide integers).
    #[error("parameter {position}: attribute `{attribute}` has an unsupported value")]
    UnsupportedValue { position: usize, attribute: String },
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rule for `{ptype}` has {len} fields (max {max})")]
    TooManyFields { ptype: String, len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for casbin::Error {
    fn from(err: Error) -> Self {
        casbin::Error::AdapterError(casbin::error::AdapterError(Box::new(err)))
    }
}

use crate::Handle;
use thiserror::Error;

/// Errors surfaced by enforcer operations.
///
/// Engine errors are carried verbatim; nothing is retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("enforcer not found: {0}")]
    HandleNotFound(Handle),

    #[error("no enforcer handles left")]
    HandlesExhausted,

    #[error("invalid model: {0}")]
    ModelParse(String),

    #[error("failed to create enforcer: {0}")]
    EnforcerInit(#[source] casbin::Error),

    #[error("invalid request parameter: {0}")]
    Coercion(#[from] policy::Error),

    #[error("evaluation failed: {0}")]
    Eval(#[source] casbin::Error),

    #[error("policy operation failed: {0}")]
    Policy(#[source] casbin::Error),

    #[error("failed to open policy adapter: {0}")]
    AdapterInit(String),
}

pub type Result<T> = std::result::Result<T, Error>;

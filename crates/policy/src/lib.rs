//! Matcher inspection and ABAC parameter coercion.
//!
//! Request parameters arrive as strings. Whether a position is a plain
//! scalar or a structured attribute bundle is decided by the model's
//! matcher, never by the shape of the value itself.

mod coerce;
mod error;
mod matcher;

pub use coerce::{ABAC_PREFIX, Attributes, Param, coerce};
pub use error::{Error, Result};
pub use matcher::{MatcherDescriptor, ParamShape};

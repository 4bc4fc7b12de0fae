//! ABAC parameter coercion.

use crate::{Error, ParamShape, Result};
use serde_json::{Map, Value};

/// Optional marker clients prepend to attribute bundles.
pub const ABAC_PREFIX: &str = "ABAC::";

/// Attribute name to value.
pub type Attributes = Map<String, Value>;

/// A request parameter after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Scalar(String),
    Bundle(Attributes),
}

impl Param {
    pub fn is_bundle(&self) -> bool {
        matches!(self, Param::Bundle(_))
    }
}

/// Interpret raw string parameters according to their declared shapes.
///
/// Positions past the end of `shapes` are treated as scalars; arity is the
/// engine's concern.
pub fn coerce(shapes: &[ParamShape], raw: &[String]) -> Result<Vec<Param>> {
    raw.iter()
        .enumerate()
        .map(|(position, value)| match shapes.get(position) {
            Some(shape) if shape.is_bundle() => parse_bundle(position, value).map(Param::Bundle),
            _ => Ok(Param::Scalar(value.clone())),
        })
        .collect()
}

fn parse_bundle(position: usize, raw: &str) -> Result<Attributes> {
    let body = raw.strip_prefix(ABAC_PREFIX).unwrap_or(raw);
    match serde_json::from_str(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::NotAnObject { position }),
        Err(source) => Err(Error::InvalidBundle { position, source }),
    }
}

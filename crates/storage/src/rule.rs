//! Policy rule rows.

use crate::{Error, Result};

/// Number of value columns in the `casbin_rule` table.
pub const MAX_FIELDS: usize = 6;

/// One persisted policy or grouping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Policy type, e.g. `p`, `p2`, `g`.
    pub ptype: String,
    pub values: Vec<String>,
}

impl Rule {
    pub fn new(ptype: impl Into<String>, values: Vec<String>) -> Result<Self> {
        let ptype = ptype.into();
        if values.len() > MAX_FIELDS {
            return Err(Error::TooManyFields {
                ptype,
                len: values.len(),
                max: MAX_FIELDS,
            });
        }
        Ok(Self { ptype, values })
    }

    /// Build a rule from stored columns, dropping trailing empty values.
    pub fn from_columns(ptype: String, columns: [String; MAX_FIELDS]) -> Self {
        let mut values = columns.to_vec();
        while values.last().is_some_and(String::is_empty) {
            values.pop();
        }
        Self { ptype, values }
    }

    /// Values padded to the column count.
    pub fn columns(&self) -> [&str; MAX_FIELDS] {
        let mut columns = [""; MAX_FIELDS];
        for (slot, value) in columns.iter_mut().zip(&self.values) {
            *slot = value.as_str();
        }
        columns
    }

    /// Model section this rule belongs to (`p` or `g`).
    pub fn section(&self) -> &str {
        self.ptype.get(..1).unwrap_or("")
    }

    /// Whether the rule matches a load filter, where empty filter values
    /// match anything.
    pub fn matches(&self, filter: &[&str]) -> bool {
        filter
            .iter()
            .enumerate()
            .all(|(i, want)| want.is_empty() || self.values.get(i).map(String::as_str) == Some(*want))
    }
}

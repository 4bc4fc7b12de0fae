//! SQLite-backed policy storage for policyd.
//!
//! This crate provides a persistence adapter for enforcers. Policy and
//! grouping rules are stored one per row in a `casbin_rule` table, with the
//! policy type (`p`, `g`, `g2`, ...) in its own column and up to six values.
//!
//! # Overview
//!
//! [`SqliteAdapter`] implements the engine's adapter protocol:
//!
//! - `load_policy` / `load_filtered_policy` read rows into a model
//! - `save_policy` replaces the table contents with the model's rules in a
//!   single transaction
//! - the incremental `add_*` / `remove_*` calls keep the table in step with
//!   management calls made through an enforcer
//!
//! # Example
//!
//! ```no_run
//! use casbin::prelude::*;
//! use storage::SqliteAdapter;
//!
//! # async fn example() -> casbin::Result<()> {
//! let adapter = SqliteAdapter::open("policy.db", true)?;
//! let model = DefaultModel::from_file("rbac_model.conf").await?;
//! let mut enforcer = Enforcer::new(model, adapter).await?;
//!
//! enforcer
//!     .add_policy(vec!["alice".into(), "data1".into(), "read".into()])
//!     .await?;
//! enforcer.save_policy().await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod error;
mod rule;

pub use adapter::SqliteAdapter;
pub use error::{Error, Result};
pub use rule::{MAX_FIELDS, Rule};

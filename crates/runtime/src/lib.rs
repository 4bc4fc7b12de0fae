//! policyd runtime: enforcer registry and service.
//!
//! This crate owns the server-side state behind the RPC surface:
//!
//! - **Registry**: an append-only map from [`Handle`] to a shared value.
//!   Handles come from a counter guarded by the same lock as insertion, so
//!   concurrent creation never loses or duplicates an entry.
//! - **Service**: builds enforcers from model text, evaluates requests with
//!   ABAC parameter coercion, and forwards policy load/save and management
//!   calls to the engine.
//! - **SharedAdapter**: the optional process-wide persistence backend that
//!   every adapter-backed enforcer shares.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{Service, open_adapter};
//!
//! # async fn example(model_text: &str) -> runtime::Result<()> {
//! let adapter = open_adapter("sqlite", "policy.db", false)?;
//! let service = Service::new(adapter);
//!
//! let handle = service.new_enforcer(model_text, true).await?;
//! let params = ["alice", "data1", "read"].map(String::from);
//! let allowed = service.enforce(handle, &params).await?;
//! println!("allowed: {allowed}");
//! # Ok(())
//! # }
//! ```

mod adapter;
mod error;
mod registry;
mod service;

pub use adapter::{SharedAdapter, open_adapter};
pub use error::{Error, Result};
pub use registry::{Handle, Registry};
pub use service::Service;

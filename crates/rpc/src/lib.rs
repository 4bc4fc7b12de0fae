//! JSON-RPC front end for the enforcer service.
//!
//! Requests and responses are JSON-RPC 2.0 objects, one per line, over TCP.
//! Every call runs on its own task, so a slow evaluation never blocks other
//! calls on the same connection.
//!
//! # Example
//!
//! ```no_run
//! use rpc::{Client, Server};
//! use runtime::Service;
//! use std::sync::Arc;
//!
//! const MODEL: &str = "[request_definition]\nr = sub, obj, act\n\
//!     [policy_definition]\np = sub, obj, act\n\
//!     [policy_effect]\ne = some(where (p.eft == allow))\n\
//!     [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n";
//!
//! # async fn example() -> rpc::Result<()> {
//! let server = Server::bind("127.0.0.1:50051", Arc::new(Service::new(None))).await?;
//! tokio::spawn(server.serve());
//!
//! let client = Client::connect("127.0.0.1:50051").await?;
//! let handle = client.new_enforcer(MODEL, false).await?;
//! client.add_policy(handle, &["alice", "data1", "read"]).await?;
//! assert!(client.enforce(handle, &["alice", "data1", "read"]).await?);
//! # Ok(())
//! # }
//! ```

mod client;
mod dispatch;
mod error;
mod protocol;
mod server;

pub use client::{Client, DEFAULT_TIMEOUT};
pub use dispatch::dispatch;
pub use error::{Error, Result};
pub use protocol::{
    BoolResult, COERCION, ENFORCER_INIT, EVAL, EmptyResult, HANDLE_NOT_FOUND, HANDLES_EXHAUSTED,
    HandleParams, HandleResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, MODEL_PARSE, NamesResult,
    NewEnforcerParams, PARSE_ERROR, POLICY, RequestId, RoleParams, RuleParams, RulesResult,
};
pub use server::{MAX_MESSAGE_SIZE, Server, handle_message};

//! Wire protocol types (JSON-RPC 2.0, one object per line).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

pub const HANDLE_NOT_FOUND: i32 = -32001;
pub const MODEL_PARSE: i32 = -32002;
pub const ENFORCER_INIT: i32 = -32003;
pub const COERCION: i32 = -32004;
pub const EVAL: i32 = -32005;
pub const POLICY: i32 = -32006;
pub const HANDLES_EXHAUSTED: i32 = -32007;

/// JSON-RPC 2.0 request.
///
/// A request without an `id` is a notification and gets no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: impl Serialize) -> Self {
        self.params = Some(serde_json::to_value(params).unwrap_or(Value::Null));
        self
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `null` when the request id could not be determined.
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns the result if successful, or an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code}] {message}")
    }
}

impl std::error::Error for JsonRpcError {}

impl From<&runtime::Error> for JsonRpcError {
    fn from(err: &runtime::Error) -> Self {
        use runtime::Error as E;
        let code = match err {
            E::HandleNotFound(_) => HANDLE_NOT_FOUND,
            E::HandlesExhausted => HANDLES_EXHAUSTED,
            E::ModelParse(_) => MODEL_PARSE,
            E::EnforcerInit(_) => ENFORCER_INIT,
            E::Coercion(_) => COERCION,
            E::Eval(_) => EVAL,
            E::Policy(_) => POLICY,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, err.to_string())
    }
}

/// Request ID (can be string or number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

// --- Method params and results ---

/// Params for `newEnforcer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEnforcerParams {
    pub model_text: String,
    #[serde(default)]
    pub use_adapter: bool,
}

/// Params for calls that only name an enforcer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleParams {
    pub handle: i32,
}

/// Params for `enforce` and the rule management calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleParams {
    pub handle: i32,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Params for role lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleParams {
    pub handle: i32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleResult {
    pub handle: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoolResult {
    pub result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesResult {
    pub rules: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamesResult {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResult {}

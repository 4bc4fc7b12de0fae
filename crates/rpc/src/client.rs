//! Client for a running enforcer server.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{
    BoolResult, EmptyResult, HandleParams, HandleResult, JsonRpcRequest, JsonRpcResponse,
    NamesResult, NewEnforcerParams, RequestId, RoleParams, RuleParams, RulesResult,
};
use crate::server::MAX_MESSAGE_SIZE;

/// Default timeout for one call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// One connection to an enforcer server.
///
/// Calls on the same client are sent one at a time.
pub struct Client {
    conn: Mutex<Connection>,
    next_id: AtomicI64,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            conn: Mutex::new(Connection {
                reader: BufReader::new(read),
                writer,
            }),
            next_id: AtomicI64::new(1),
        })
    }

    /// Build an enforcer and return its handle.
    pub async fn new_enforcer(&self, model_text: &str, use_adapter: bool) -> Result<i32> {
        let params = NewEnforcerParams {
            model_text: model_text.to_string(),
            use_adapter,
        };
        let result: HandleResult = self.request("newEnforcer", params).await?;
        Ok(result.handle)
    }

    pub async fn enforce(&self, handle: i32, params: &[&str]) -> Result<bool> {
        let result: BoolResult = self.request("enforce", rule(handle, params)).await?;
        Ok(result.result)
    }

    pub async fn load_policy(&self, handle: i32) -> Result<()> {
        let _: EmptyResult = self.request("loadPolicy", HandleParams { handle }).await?;
        Ok(())
    }

    pub async fn save_policy(&self, handle: i32) -> Result<()> {
        let _: EmptyResult = self.request("savePolicy", HandleParams { handle }).await?;
        Ok(())
    }

    pub async fn add_policy(&self, handle: i32, params: &[&str]) -> Result<bool> {
        let result: BoolResult = self.request("addPolicy", rule(handle, params)).await?;
        Ok(result.result)
    }

    pub async fn remove_policy(&self, handle: i32, params: &[&str]) -> Result<bool> {
        let result: BoolResult = self.request("removePolicy", rule(handle, params)).await?;
        Ok(result.result)
    }

    pub async fn get_policy(&self, handle: i32) -> Result<Vec<Vec<String>>> {
        let result: RulesResult = self.request("getPolicy", HandleParams { handle }).await?;
        Ok(result.rules)
    }

    pub async fn add_grouping_policy(&self, handle: i32, params: &[&str]) -> Result<bool> {
        let result: BoolResult = self
            .request("addGroupingPolicy", rule(handle, params))
            .await?;
        Ok(result.result)
    }

    pub async fn get_roles_for_user(&self, handle: i32, name: &str) -> Result<Vec<String>> {
        let params = RoleParams {
            handle,
            name: name.to_string(),
            domain: None,
        };
        let result: NamesResult = self.request("getRolesForUser", params).await?;
        Ok(result.names)
    }

    /// Send one call and wait for its response.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = JsonRpcRequest::new(id.clone(), method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        let mut conn = self.conn.lock().await;
        conn.writer.write_all(request_json.as_bytes()).await?;
        conn.writer.write_all(b"\n").await?;
        conn.writer.flush().await?;

        let response = timeout(DEFAULT_TIMEOUT, read_matching(&mut conn.reader, &id))
            .await
            .map_err(|_| Error::Timeout)??;
        drop(conn);

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}

fn rule(handle: i32, params: &[&str]) -> RuleParams {
    RuleParams {
        handle,
        params: params.iter().map(|p| p.to_string()).collect(),
    }
}

/// Read until the response for `id` arrives.
///
/// Responses to earlier calls that timed out are still in the stream; ids
/// are allocated in increasing order, so anything older is skipped.
async fn read_matching(
    reader: &mut BufReader<OwnedReadHalf>,
    id: &RequestId,
) -> Result<JsonRpcResponse> {
    loop {
        let response = read_response(reader).await?;
        match (&response.id, id) {
            (Some(got), want) if got == want => return Ok(response),
            (Some(RequestId::Number(got)), RequestId::Number(want)) if got < want => {
                debug!(id = got, "discarding late response");
            }
            (got, want) => {
                return Err(Error::InvalidResponse(format!(
                    "response ID mismatch: expected {want:?}, got {got:?}"
                )));
            }
        }
    }
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Result<JsonRpcResponse> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Err(Error::ConnectionClosed);
    }

    if line.len() > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(serde_json::from_str(&line)?)
}

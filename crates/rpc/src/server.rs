//! TCP server: connection handling and request framing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use runtime::Service;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::dispatch;
use crate::error::Result;
use crate::protocol::{
    INVALID_REQUEST, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR, RequestId,
};

/// Maximum size of one framed message (1MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Accepts connections and serves enforcer calls on them.
pub struct Server {
    listener: TcpListener,
    service: Arc<Service>,
}

impl Server {
    /// Bind a listener for the given service.
    pub async fn bind(addr: impl ToSocketAddrs, service: Arc<Service>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, service })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process exits.
    pub async fn serve(self) -> Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` completes. In-flight connections are left to
    /// finish on their own tasks.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(addr = %self.local_addr()?, "listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(%peer, "connection opened");
                    let service = Arc::clone(&self.service);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, service).await {
                            warn!(%peer, error = %e, "connection failed");
                        }
                        debug!(%peer, "connection closed");
                    });
                }
            }
        }
    }
}

/// Read requests line by line; each call runs on its own task and responses
/// are written back in completion order.
async fn serve_connection(stream: TcpStream, service: Arc<Service>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            write.write_all(message.as_bytes()).await?;
            write.write_all(b"\n").await?;
            write.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut line = Vec::new();
    loop {
        line.clear();
        let bytes_read = (&mut reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if bytes_read == 0 {
            break;
        }

        let body = line.strip_suffix(b"\n").unwrap_or(&line[..]);
        if body.len() > MAX_MESSAGE_SIZE {
            warn!(max = MAX_MESSAGE_SIZE, "message too large");
            skip_line(&mut reader).await?;
            let error = JsonRpcError::new(
                INVALID_REQUEST,
                format!("message too large (max {MAX_MESSAGE_SIZE} bytes)"),
            );
            let _ = tx.send(encode(&JsonRpcResponse::failure(None, error)));
            continue;
        }

        let message = match std::str::from_utf8(body) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => text.to_string(),
            Err(e) => {
                let error = JsonRpcError::new(PARSE_ERROR, format!("parse error: {e}"));
                let _ = tx.send(encode(&JsonRpcResponse::failure(None, error)));
                continue;
            }
        };

        let service = Arc::clone(&service);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_message(&service, &message).await {
                let _ = tx.send(encode(&response));
            }
        });
    }

    // Let outstanding calls finish and flush before closing
    drop(tx);
    writer.await.map_err(std::io::Error::other)??;
    Ok(())
}

/// Discard input up to and including the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(at) => (true, at + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

/// Decode one framed message and run it.
///
/// Returns `None` for notifications.
pub async fn handle_message(service: &Service, text: &str) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            let error = JsonRpcError::new(PARSE_ERROR, format!("parse error: {e}"));
            return Some(JsonRpcResponse::failure(None, error));
        }
    };

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            let error = JsonRpcError::new(INVALID_REQUEST, format!("invalid request: {e}"));
            return Some(JsonRpcResponse::failure(id, error));
        }
    };
    if request.jsonrpc != "2.0" {
        let error = JsonRpcError::new(
            INVALID_REQUEST,
            format!("unsupported jsonrpc version: {}", request.jsonrpc),
        );
        return Some(JsonRpcResponse::failure(request.id, error));
    }

    debug!(method = %request.method, id = ?request.id, "call");
    let result = dispatch(service, &request.method, request.params).await;
    if let Err(error) = &result {
        warn!(method = %request.method, %error, "call failed");
    }

    let id = request.id?;
    Some(match result {
        Ok(value) => JsonRpcResponse::success(Some(id), value),
        Err(error) => JsonRpcResponse::failure(Some(id), error),
    })
}

fn encode(response: &JsonRpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32603,"message":"encode response: {e}"}}}}"#
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::protocol::{HANDLE_NOT_FOUND, METHOD_NOT_FOUND};

    const MODEL: &str = "[request_definition]\nr = sub, obj, act\n\
        [policy_definition]\np = sub, obj, act\n\
        [role_definition]\ng = _, _\n\
        [policy_effect]\ne = some(where (p.eft == allow))\n\
        [matchers]\nm = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act\n";

    async fn spawn_server() -> SocketAddr {
        let server = Server::bind("127.0.0.1:0", Arc::new(Service::new(None)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());
        addr
    }

    #[tokio::test]
    async fn test_handle_message_errors() {
        let service = Service::new(None);

        let resp = handle_message(&service, "{not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
        assert!(resp.id.is_none());

        let resp = handle_message(&service, r#"{"jsonrpc":"2.0","id":7}"#).await.unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
        assert_eq!(resp.id, Some(RequestId::Number(7)));

        let resp = handle_message(&service, r#"{"jsonrpc":"1.0","id":1,"method":"enforce"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);

        let resp = handle_message(&service, r#"{"jsonrpc":"2.0","id":"a","method":"nope"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
        assert_eq!(resp.id, Some(RequestId::from("a")));
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let service = Service::new(None);
        let text = r#"{"jsonrpc":"2.0","method":"loadPolicy","params":{"handle":0}}"#;
        assert!(handle_message(&service, text).await.is_none());
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let addr = spawn_server().await;
        let client = Client::connect(addr).await.unwrap();

        let a = client.new_enforcer(MODEL, false).await.unwrap();
        let b = client.new_enforcer(MODEL, false).await.unwrap();
        assert_ne!(a, b);

        assert!(client.add_policy(a, &["alice", "data1", "read"]).await.unwrap());
        assert!(client.enforce(a, &["alice", "data1", "read"]).await.unwrap());
        assert!(!client.enforce(a, &["bob", "data1", "read"]).await.unwrap());
        assert!(!client.enforce(b, &["alice", "data1", "read"]).await.unwrap());
        assert_eq!(client.get_policy(a).await.unwrap().len(), 1);

        // Memory-only enforcers reload what they were given
        client.save_policy(a).await.unwrap();
        client.load_policy(a).await.unwrap();
        assert!(client.enforce(a, &["alice", "data1", "read"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_client_unknown_handle() {
        let addr = spawn_server().await;
        let client = Client::connect(addr).await.unwrap();

        let err = client.enforce(99, &["alice", "data1", "read"]).await.unwrap_err();
        match err {
            crate::Error::JsonRpc(error) => assert_eq!(error.code, HANDLE_NOT_FOUND),
            other => panic!("expected JSON-RPC error, got {other}"),
        }

        // The connection stays usable after a failed call
        assert!(client.new_enforcer(MODEL, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_raw_parse_error() {
        let addr = spawn_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"garbage\n").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        let resp: JsonRpcResponse = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
    }

    async fn read_response(reader: &mut BufReader<TcpStream>) -> JsonRpcResponse {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    #[tokio::test]
    async fn test_oversized_line_rejected_and_connection_kept() {
        let addr = spawn_server().await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        let mut oversized = vec![b'a'; MAX_MESSAGE_SIZE + 4096];
        oversized.push(b'\n');
        stream.get_mut().write_all(&oversized).await.unwrap();
        let call = r#"{"jsonrpc":"2.0","id":1,"method":"getPolicy","params":{"handle":0}}"#;
        stream.get_mut().write_all(format!("{call}\n").as_bytes()).await.unwrap();

        let resp = read_response(&mut stream).await;
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
        assert!(resp.id.is_none());

        let resp = read_response(&mut stream).await;
        assert_eq!(resp.id, Some(RequestId::Number(1)));
        assert_eq!(resp.error.unwrap().code, HANDLE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_parse_error() {
        let addr = spawn_server().await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());

        stream.get_mut().write_all(b"{\"jsonrpc\":\xff\xfe}\n").await.unwrap();
        let resp = read_response(&mut stream).await;
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);

        let call = r#"{"jsonrpc":"2.0","id":2,"method":"nope"}"#;
        stream.get_mut().write_all(format!("{call}\n").as_bytes()).await.unwrap();
        let resp = read_response(&mut stream).await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let server = Server::bind("127.0.0.1:0", Arc::new(Service::new(None)))
            .await
            .unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_until(async {
            let _ = stopped.await;
        }));
        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}

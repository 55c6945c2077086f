use crate::connection::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tagring_proto::TransportError;
use tokio::net::TcpStream;

/// Hard timeout for every unicast peer RPC (spec.md §4.2).
pub const WAIT_CHECK: Duration = Duration::from_secs(5);

/// Performs one connect/write/read unicast round trip with a hard timeout,
/// degrading every failure mode to a `TransportError` rather than
/// propagating a raw I/O error to the caller (spec.md §4.2, §4.3: "callers
/// must treat every property access as a network operation that may fail
/// and degrade gracefully").
pub async fn unicast_call<Req, Resp>(addr: &str, request: &Req, timeout: Duration) -> Result<Resp, TransportError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let attempt = async {
        let stream = TcpStream::connect(addr).await.map_err(|_| TransportError::Refused)?;
        let mut conn = Connection::new(stream);
        conn.write_json(request).await.map_err(|_| TransportError::Refused)?;
        match conn.read_json::<Resp>().await {
            Ok(Some(resp)) => Ok(resp),
            Ok(None) => Err(TransportError::Refused),
            Err(e) => Err(TransportError::Malformed(e.to_string())),
        }
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection as Conn;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn round_trips_a_request_and_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Conn::new(socket);
            let req: Value = conn.read_json().await.unwrap().unwrap();
            assert_eq!(req["ping"], "hi");
            conn.write_json(&json!({"pong": true})).await.unwrap();
        });

        let resp: Value = unicast_call(&addr.to_string(), &json!({"ping": "hi"}), WAIT_CHECK).await.unwrap();
        assert_eq!(resp["pong"], true);
    }

    #[tokio::test]
    async fn refused_when_nothing_is_listening() {
        let result: Result<Value, TransportError> =
            unicast_call("127.0.0.1:1", &json!({}), Duration::from_millis(200)).await;
        assert_eq!(result, Err(TransportError::Refused));
    }

    #[tokio::test]
    async fn timeout_when_peer_never_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // hold the connection open without ever replying
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let result: Result<Value, TransportError> =
            unicast_call(&addr.to_string(), &json!({}), Duration::from_millis(100)).await;
        assert_eq!(result, Err(TransportError::Timeout));
    }
}

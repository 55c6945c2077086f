//! `PeerProxy`: a stateless RPC handle to a remote ring member. Every method
//! is a full unicast round trip — connect, write one envelope, read one
//! envelope, close (spec.md §4.2, §4.3). `PeerProxy` carries no connection
//! state of its own so it can be constructed ad hoc for any `NodeRef` and
//! thrown away after one call (REDESIGN FLAGS: plain-data `NodeRef` plus a
//! separate remote-handle type, to avoid an ownership cycle between nodes).

use crate::replication::ReplicationDelta;
use serde_json::json;
use tagring_proto::{command, Envelope, Header, NodeRef, RingProperty, TransportError};
use tagring_ring::Id;
use tagring_transport::{unicast_call, WAIT_CHECK};

#[derive(Clone, Debug)]
pub struct PeerProxy {
    target: NodeRef,
}

impl PeerProxy {
    pub fn new(target: NodeRef) -> PeerProxy {
        PeerProxy { target }
    }

    pub fn target(&self) -> &NodeRef {
        &self.target
    }

    /// `arg_names` must list `data`'s top-level keys in the order the
    /// matching handler was registered with — the dispatcher keys its
    /// registry on `(command, function, arg_names)` (spec.md §4.9).
    async fn call(&self, function: &str, arg_names: &[&str], data: serde_json::Value) -> Result<Envelope, TransportError> {
        let header = Header::new(command::CHORD, function, arg_names.iter().map(|s| s.to_string()).collect());
        let request = Envelope::new(header, data);
        unicast_call(&self.target.chord_addr(), &request, WAIT_CHECK).await
    }

    /// A liveness probe. Any transport failure at all just means "dead" —
    /// callers never distinguish refused/timeout/malformed here.
    pub async fn ping(&self) -> bool {
        self.call("pon_call", &[], json!({})).await.is_ok()
    }

    pub async fn get_property(&self, prop: RingProperty) -> Result<serde_json::Value, TransportError> {
        let reply = self.call("get_property", &["property"], json!({ "property": prop.as_str() })).await?;
        extract(reply)
    }

    pub async fn set_property(&self, prop: RingProperty, value: serde_json::Value) -> Result<(), TransportError> {
        self.call("set_property", &["property", "value"], json!({ "property": prop.as_str(), "value": value })).await?;
        Ok(())
    }

    /// Like `get_property`, but decodes the result as a `NodeRef` (or `None`
    /// when the peer reports it has none, e.g. an unset predecessor).
    pub async fn get_ref(&self, prop: &str) -> Result<Option<NodeRef>, TransportError> {
        let reply = self.call("get_ref", &["property"], json!({ "property": prop })).await?;
        let value = extract(reply)?;
        if value.is_null() {
            Ok(None)
        } else {
            serde_json::from_value(value).map(Some).map_err(|e| TransportError::Malformed(e.to_string()))
        }
    }

    pub async fn set_ref(&self, prop: &str, node: &NodeRef) -> Result<(), TransportError> {
        self.call("set_ref", &["property", "value"], json!({ "property": prop, "value": node })).await?;
        Ok(())
    }

    /// `find(function, key)`: the remote "finding_call" indirection (spec.md
    /// §4.4) — asks the peer to invoke one of its own ring functions
    /// (`get_successor` or `closest_preceding_node`) against `key` and
    /// return the resulting `NodeRef`.
    pub async fn find(&self, function: &str, key: Id) -> Result<NodeRef, TransportError> {
        let reply = self.call("finding_call", &["function", "key"], json!({ "function": function, "key": key })).await?;
        let value = extract(reply)?;
        serde_json::from_value(value).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// `notify(n)`: tells this peer "I believe I might be your predecessor".
    /// Returns whether the peer actually adopted `me`.
    pub async fn notify(&self, me: &NodeRef) -> Result<bool, TransportError> {
        let reply = self.call("notify_call", &["node"], json!({ "node": me })).await?;
        let value = extract(reply)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn pull_replication(&self, since: i64) -> Result<ReplicationDelta, TransportError> {
        let reply = self.call("get_replication", &["since"], json!({ "since": since })).await?;
        let value = extract(reply)?;
        serde_json::from_value(value).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    pub async fn push_replication(&self, delta: &ReplicationDelta) -> Result<(), TransportError> {
        let data = serde_json::to_value(delta).map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.call("update_replication", &["delta"], json!({ "delta": data })).await?;
        Ok(())
    }
}

fn extract(reply: Envelope) -> Result<serde_json::Value, TransportError> {
    if let Some(err) = reply.data.get("error") {
        return Err(TransportError::RemoteError(err.as_str().unwrap_or("unknown").to_string()));
    }
    Ok(reply.data.get("result").cloned().unwrap_or(serde_json::Value::Null))
}

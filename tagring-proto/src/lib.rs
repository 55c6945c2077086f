//! Wire types shared between every node and the CLI: the JSON envelope
//! (`{header, data}`), `NodeRef` (the immutable handle to a peer), the closed
//! `RingProperty` enumeration used instead of reflection, and the transport
//! error taxonomy.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use tagring_ring::Id;

pub use tagring_ring::{between, bully};

/// An immutable handle to a node: `(ip, chord_port, data_port, protocol,
/// id)`. Two refs are the same node iff their `id`s match — `protocol` (and
/// in principle `data_port`) may be observed to change across a rolling
/// upgrade without changing identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub ip: String,
    pub chord_port: u16,
    pub data_port: u16,
    pub protocol: String,
    pub id: Id,
}

impl NodeRef {
    pub fn new(ip: impl Into<String>, chord_port: u16, data_port: u16, protocol: impl Into<String>) -> NodeRef {
        let ip = ip.into();
        let id = Id::hash(format!("{ip}:{chord_port}").as_bytes());
        NodeRef { ip, chord_port, data_port, protocol: protocol.into(), id }
    }

    pub fn chord_addr(&self) -> String {
        format!("{}:{}", self.ip, self.chord_port)
    }

    pub fn data_addr(&self) -> String {
        format!("{}:{}", self.ip, self.data_port)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A closed enumeration of the scalar/ref fields a peer may ask about or set
/// by name over RPC. The wire format still carries the string (for forward
/// compatibility per spec); unknown names surface as `TransportError`
/// `Malformed` at the dispatch boundary rather than via reflection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingProperty {
    Successor,
    Predecessor,
    Leader,
    ImLeader,
    InElection,
}

impl RingProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            RingProperty::Successor => "successor",
            RingProperty::Predecessor => "predecessor",
            RingProperty::Leader => "leader",
            RingProperty::ImLeader => "im_the_leader",
            RingProperty::InElection => "in_election",
        }
    }

    pub fn parse(s: &str) -> Option<RingProperty> {
        match s {
            "successor" => Some(RingProperty::Successor),
            "predecessor" => Some(RingProperty::Predecessor),
            "leader" => Some(RingProperty::Leader),
            "im_the_leader" => Some(RingProperty::ImLeader),
            "in_election" => Some(RingProperty::InElection),
            _ => None,
        }
    }
}

/// The request/command header: `(command_name, function, dataset)`, where
/// `dataset` names the argument keys the sender populated in `data`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    pub command_name: String,
    pub function: String,
    pub dataset: Vec<String>,
}

impl Header {
    pub fn new(command_name: impl Into<String>, function: impl Into<String>, dataset: Vec<String>) -> Header {
        Header { command_name: command_name.into(), function: function.into(), dataset }
    }
}

/// A single wire message: `{ "header": ..., "data": ... }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Header,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(header: Header, data: serde_json::Value) -> Envelope {
        Envelope { header, data }
    }
}

/// Builds an error reply body: `{"error": "..."}`.
pub fn error_reply(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

/// Registry key format for the dispatcher: `"{command}//{function}//{arg1}:?{arg2}:?…"`.
pub fn dispatch_key(command: &str, function: &str, arg_names: &[&str]) -> String {
    let mut key = format!("{command}//{function}//");
    for name in arg_names {
        key.push_str(name);
        key.push_str(":?");
    }
    key
}

/// Transport-layer failures (spec.md §4.2, §7): every unicast call degrades
/// to one of these rather than propagating a raw I/O error past the caller.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused")]
    Refused,
    #[error("operation timed out")]
    Timeout,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("remote error: {0}")]
    RemoteError(String),
}

/// Well-known command families (spec.md §4.9).
pub mod command {
    pub const CREATE: &str = "Create";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
    pub const GET: &str = "Get";
    pub const GET_ALL: &str = "GetAll";
    pub const CHORD: &str = "Chord";
    pub const ELECTION: &str = "Election";
}

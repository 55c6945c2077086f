//! Node-side logic: ring membership, leader election, discovery, request
//! routing, and the dispatcher handlers that sit behind them. This crate
//! has no network listeners of its own — `tagring-server` owns the accept
//! loops and wires them to the pieces assembled here.

mod config;
mod context;
mod discovery;
mod dispatcher;
mod elector;
mod handlers;
mod local_node;
mod peer;
mod replication;
mod router;
#[cfg(test)]
mod test_support;
mod timers;

pub use config::NodeConfig;
pub use context::Context;
pub use discovery::{Discovery, DiscoveryMessage};
pub use dispatcher::{DispatchError, Dispatcher};
pub use elector::{ElectionMessage, Elector, ElectorState, ELECTION_MOD};
pub use handlers::{register_all, register_catalog, register_chord};
pub use local_node::{LocalNode, StabilizeOutcome, FINGER_COUNT, FIX_FINGERS_BATCH};
pub use peer::PeerProxy;
pub use replication::{apply_delta, pull_from, push_to_successors, ReplicationDelta, Watermarks};
pub use router::{route, RequestOrigin, START_MOD};
pub use timers::{
    check_predecessor_loop, discovery_announce_loop, discovery_listen_loop, election_listen_loop,
    election_tick_loop, fix_fingers_loop, stabilize_loop, BROADCAST_MOD,
};

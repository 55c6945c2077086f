//! The request router (spec.md §4.7): classifies every inbound envelope by
//! the port it arrived on, then either dispatches it locally (peer traffic,
//! or client traffic on the current leader) or proxies it verbatim to the
//! leader (client traffic on a follower).

use crate::context::Context;
use crate::dispatcher::{DispatchError, Dispatcher};
use tagring_proto::{Envelope, NodeRef};
use tagring_transport::{unicast_call, WAIT_CHECK};

/// Gating interval while the ring has no confirmed, settled leader
/// (spec.md §4.7: `WAIT_CHECK*START_MOD`).
pub const START_MOD: u32 = 1;
/// Router gives up waiting for a leader after this many gating sleeps, so a
/// genuinely leaderless cluster fails a client request instead of hanging
/// it forever.
const MAX_LEADER_WAITS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOrigin {
    Peer,
    Client,
}

impl RequestOrigin {
    /// Called by `tagring-server::listener::run_listener` against the local
    /// port the accepting `TcpListener` is bound to (spec.md §4.7: classify
    /// by source port) — every connection a listener serves gets the same
    /// verdict, so the port comparison only needs to run once per listener,
    /// not per connection, but lives here so it's exercised by its own unit
    /// test independent of a live socket.
    pub fn classify(source_port: u16, config: &crate::NodeConfig) -> RequestOrigin {
        if source_port == config.chord_port || source_port == config.election_port {
            RequestOrigin::Peer
        } else {
            RequestOrigin::Client
        }
    }
}

pub async fn route(ctx: &Context, dispatcher: &Dispatcher, origin: RequestOrigin, envelope: Envelope) -> Result<serde_json::Value, DispatchError> {
    match origin {
        // Peer operations are never gated on leader state — doing so would
        // make election itself unable to make progress (spec.md §5).
        RequestOrigin::Peer => dispatcher.dispatch(&envelope.header, envelope.data, ctx.clone()).await,
        RequestOrigin::Client => {
            if !await_settled_leader(ctx).await {
                return Err(DispatchError::NotLeader);
            }
            if ctx.elector.im_leader().await {
                dispatcher.dispatch(&envelope.header, envelope.data, ctx.clone()).await
            } else {
                let leader = ctx.elector.leader().await.ok_or(DispatchError::NotLeader)?;
                forward_to_leader(&leader, envelope).await
            }
        }
    }
}

/// Blocks until the ring is out of election and a leader is known, or gives
/// up after `MAX_LEADER_WAITS` gating sleeps. Returns whether it settled.
async fn await_settled_leader(ctx: &Context) -> bool {
    for _ in 0..MAX_LEADER_WAITS {
        if !ctx.elector.in_election().await && ctx.elector.leader().await.is_some() {
            return true;
        }
        tokio::time::sleep(WAIT_CHECK * START_MOD).await;
    }
    !ctx.elector.in_election().await && ctx.elector.leader().await.is_some()
}

/// Forwards a client envelope verbatim to the leader's client port, which
/// replies with the same bare JSON value a directly-connected client would
/// see (the listener never re-wraps a dispatch result in an `Envelope`).
async fn forward_to_leader(leader: &NodeRef, envelope: Envelope) -> Result<serde_json::Value, DispatchError> {
    let reply: serde_json::Value = unicast_call(&leader.data_addr(), &envelope, WAIT_CHECK)
        .await
        .map_err(|e| DispatchError::Conflict(format!("leader forward failed: {e}")))?;
    if let Some(err) = reply.get("error") {
        return Err(DispatchError::Conflict(err.as_str().unwrap_or("unknown").to_string()));
    }
    Ok(reply)
}

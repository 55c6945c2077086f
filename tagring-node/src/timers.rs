//! Background task loops (spec.md §5): `stabilize`, `checkPredecessor`,
//! `fixFingers`, the election driver/listener, and discovery. Every loop
//! observes the shared [`Shutdown`] signal alongside its own sleep so a
//! process-wide shutdown drains between ticks instead of aborting mid-RPC.

use crate::context::Context;
use crate::discovery::{Discovery, DiscoveryMessage};
use crate::local_node::StabilizeOutcome;
use crate::replication::pull_from;
use tagring_transport::{Shutdown, WAIT_CHECK};

/// Leader liveness is rechecked (and, on the leader, announced) every
/// `STABLE_MOD`/`BROADCAST_MOD` ticks of the shared `WAIT_CHECK` clock
/// (spec.md §4.5, §4.6), rather than on every tick.
pub const BROADCAST_MOD: u32 = 4;

pub async fn stabilize_loop(ctx: Context, mut shutdown: Shutdown) {
    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = tokio::time::sleep(WAIT_CHECK) => {
                match ctx.node.stabilize().await {
                    StabilizeOutcome::Unchanged => {}
                    StabilizeOutcome::SuccessorChanged(successor) => {
                        tracing::info!(successor = %successor.chord_addr(), "stabilize adopted a new successor");
                        if let Err(err) = pull_from(&ctx.catalog, &ctx.watermarks, &successor).await {
                            tracing::warn!(%err, "pull-on-takeover from new successor failed");
                        }
                    }
                }
            }
            _ = shutdown.recv() => {}
        }
    }
}

pub async fn check_predecessor_loop(ctx: Context, mut shutdown: Shutdown) {
    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = tokio::time::sleep(WAIT_CHECK) => ctx.node.check_predecessor().await,
            _ = shutdown.recv() => {}
        }
    }
}

pub async fn fix_fingers_loop(ctx: Context, mut shutdown: Shutdown) {
    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = tokio::time::sleep(WAIT_CHECK) => ctx.node.fix_fingers().await,
            _ = shutdown.recv() => {}
        }
    }
}

/// Drives the Bully state machine's own clock (spec.md §4.5): starts
/// elections from `Leaderless`, counts down `Electing`, rechecks leader
/// liveness from `Stable`.
pub async fn election_tick_loop(ctx: Context, mut shutdown: Shutdown) {
    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = tokio::time::sleep(WAIT_CHECK) => ctx.elector.tick().await,
            _ = shutdown.recv() => {}
        }
    }
}

/// Blocks on inbound election multicast traffic and routes each datagram to
/// the elector's message handlers.
pub async fn election_listen_loop(ctx: Context, mut shutdown: Shutdown) {
    while !shutdown.is_shutdown() {
        tokio::select! {
            result = ctx.elector.listen_once() => {
                if let Err(err) = result {
                    tracing::debug!(%err, "election listen failed");
                }
            }
            _ = shutdown.recv() => {}
        }
    }
}

/// The leader's periodic discovery announcement (spec.md §4.6).
pub async fn discovery_announce_loop(ctx: Context, discovery: Discovery, mut shutdown: Shutdown) {
    let mut ticks: u32 = 0;
    while !shutdown.is_shutdown() {
        tokio::select! {
            _ = tokio::time::sleep(WAIT_CHECK) => {
                ticks = ticks.wrapping_add(1);
                if ticks % BROADCAST_MOD == 0 && ctx.elector.im_leader().await {
                    if let Some(leader) = ctx.elector.leader().await {
                        discovery.announce_leader(&leader).await;
                    }
                }
            }
            _ = shutdown.recv() => {}
        }
    }
}

/// Listens for discovery traffic: a leader announcement that disagrees with
/// what this node currently believes triggers a rejoin; a `server_ip`
/// probe from a not-yet-joined node gets answered iff this node leads.
pub async fn discovery_listen_loop(ctx: Context, discovery: Discovery, mut shutdown: Shutdown) {
    while !shutdown.is_shutdown() {
        tokio::select! {
            result = discovery.recv() => {
                match result {
                    Ok(DiscoveryMessage::LeaderAnnounce { leader }) => {
                        let known = ctx.elector.leader().await;
                        if Discovery::should_rejoin(known.as_ref(), &leader) {
                            tracing::info!(leader = %leader.chord_addr(), "discovered a different leader, rejoining");
                            match ctx.node.join(Some(leader.clone())).await {
                                Ok(()) => ctx.elector.handle_winner(leader).await,
                                Err(err) => tracing::warn!(%err, "rejoin against discovered leader failed"),
                            }
                        }
                    }
                    Ok(DiscoveryMessage::ServerIpRequest) => {
                        if ctx.elector.im_leader().await {
                            discovery.reply_server_ip(&ctx.node.self_ref).await;
                        }
                    }
                    Ok(DiscoveryMessage::ServerIpReply { .. }) => {}
                    Err(err) => tracing::debug!(%err, "discovery listen failed"),
                }
            }
            _ = shutdown.recv() => {}
        }
    }
}

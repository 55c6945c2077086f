//! The Bully leader-election state machine (spec.md §4.5): `Leaderless`,
//! `Electing(countdown)`, `Stable(leader)`, driven by a periodic `tick()`
//! from the background timer loop and by the three inbound multicast
//! messages `ELECTION`, `WINNER`, `OK`.

use crate::peer::PeerProxy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tagring_proto::{bully, NodeRef};
use tagring_ring::Id;
use tagring_transport::McastTransport;
use tokio::sync::RwLock;

/// Electing countdown length, in ticks, before a node self-promotes absent
/// a higher-id contender (spec.md §4.5: `ELECTION_TIMEOUT`).
pub const ELECTION_MOD: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectorState {
    Stable,
    Electing,
    Leaderless,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ElectionMessage {
    Election { id: Id, ip: String },
    Winner { node: NodeRef },
    Ok { id: Id },
}

struct ElectorInner {
    state: ElectorState,
    leader: Option<NodeRef>,
    im_leader: bool,
    countdown: u32,
}

/// Owns this node's view of ring leadership. One `Elector` per process,
/// shared behind an `Arc` between the background tick loop and the
/// multicast receive loop.
pub struct Elector {
    self_ref: NodeRef,
    group: SocketAddr,
    transport: Arc<dyn McastTransport>,
    inner: RwLock<ElectorInner>,
}

impl Elector {
    pub fn new(self_ref: NodeRef, group: SocketAddr, transport: Arc<dyn McastTransport>) -> Elector {
        Elector {
            self_ref,
            group,
            transport,
            inner: RwLock::new(ElectorInner {
                state: ElectorState::Leaderless,
                leader: None,
                im_leader: false,
                countdown: 0,
            }),
        }
    }

    pub async fn state(&self) -> ElectorState {
        self.inner.read().await.state
    }

    pub async fn leader(&self) -> Option<NodeRef> {
        self.inner.read().await.leader.clone()
    }

    pub async fn im_leader(&self) -> bool {
        self.inner.read().await.im_leader
    }

    pub async fn in_election(&self) -> bool {
        self.inner.read().await.state == ElectorState::Electing
    }

    /// Adopts leadership unconditionally: the solo-bootstrap path
    /// (`join(None)`) has no ring to contest an election against.
    pub async fn become_leader_alone(&self) {
        let mut inner = self.inner.write().await;
        inner.state = ElectorState::Stable;
        inner.leader = Some(self.self_ref.clone());
        inner.im_leader = true;
    }

    /// One driver tick; the caller runs this on a fixed interval.
    pub async fn tick(&self) {
        let state = self.inner.read().await.state;
        match state {
            ElectorState::Leaderless => self.start_election().await,
            ElectorState::Electing => self.decrement_countdown().await,
            ElectorState::Stable => self.check_leader_liveness().await,
        }
    }

    async fn start_election(&self) {
        {
            let mut inner = self.inner.write().await;
            inner.state = ElectorState::Electing;
            inner.countdown = ELECTION_MOD;
        }
        tracing::info!(self_id = %self.self_ref.id, "starting election");
        let msg = ElectionMessage::Election { id: self.self_ref.id, ip: self.self_ref.ip.clone() };
        self.transport.send_best_effort(&serde_json::to_value(msg).unwrap(), self.group).await;
    }

    async fn decrement_countdown(&self) {
        let expired = {
            let mut inner = self.inner.write().await;
            if inner.countdown == 0 {
                true
            } else {
                inner.countdown -= 1;
                inner.countdown == 0
            }
        };
        if expired {
            self.self_promote().await;
        }
    }

    async fn self_promote(&self) {
        {
            let mut inner = self.inner.write().await;
            inner.state = ElectorState::Stable;
            inner.leader = Some(self.self_ref.clone());
            inner.im_leader = true;
        }
        tracing::info!(self_id = %self.self_ref.id, "no higher id replied, self-promoting to leader");
        let msg = ElectionMessage::Winner { node: self.self_ref.clone() };
        self.transport.send_best_effort(&serde_json::to_value(msg).unwrap(), self.group).await;
    }

    async fn check_leader_liveness(&self) {
        let leader = self.inner.read().await.leader.clone();
        match leader {
            None => {
                self.inner.write().await.state = ElectorState::Leaderless;
            }
            Some(leader) if leader == self.self_ref => {}
            Some(leader) => {
                if !PeerProxy::new(leader).ping().await {
                    tracing::warn!("leader unreachable, returning to leaderless");
                    let mut inner = self.inner.write().await;
                    inner.state = ElectorState::Leaderless;
                    inner.leader = None;
                    inner.im_leader = false;
                }
            }
        }
    }

    /// Inbound `ELECTION{id}`: lower ids cede silently; higher ids reply
    /// `OK` and kick off their own election if not already running one.
    pub async fn handle_election(&self, candidate_id: Id) -> Option<ElectionMessage> {
        if bully(&self.self_ref.id, &candidate_id) {
            let already_electing = self.inner.read().await.state == ElectorState::Electing;
            if !already_electing {
                self.start_election().await;
            }
            Some(ElectionMessage::Ok { id: self.self_ref.id })
        } else {
            None
        }
    }

    /// Inbound `WINNER{node}`: accepted unless this node outranks it, or the
    /// current leader (if any) already outranks it.
    pub async fn handle_winner(&self, winner: NodeRef) {
        let mut inner = self.inner.write().await;
        let current_leader_outranks = inner.leader.as_ref().map(|l| bully(&l.id, &winner.id)).unwrap_or(false);
        if bully(&self.self_ref.id, &winner.id) || current_leader_outranks {
            return;
        }
        inner.im_leader = winner == self.self_ref;
        inner.leader = Some(winner);
        inner.state = ElectorState::Stable;
    }

    /// Inbound `OK{id}`: someone with a higher id than our current leader is
    /// alive and contesting, so drop the leader to trigger re-election.
    pub async fn handle_ok(&self, id: Id) {
        let mut inner = self.inner.write().await;
        let should_reset = inner.leader.as_ref().map(|l| bully(&id, &l.id)).unwrap_or(false);
        if should_reset {
            inner.leader = None;
            inner.im_leader = false;
            inner.state = ElectorState::Leaderless;
        }
    }

    /// Blocks for one multicast election datagram and routes it to the
    /// matching handler, multicasting an `OK` reply when `handle_election`
    /// produces one. Intended to be driven by a dedicated background task.
    pub async fn listen_once(&self) -> std::io::Result<()> {
        let (value, _from) = self.transport.recv().await?;
        let message: ElectionMessage =
            serde_json::from_value(value).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        match message {
            ElectionMessage::Election { id, .. } => {
                if let Some(reply) = self.handle_election(id).await {
                    self.transport.send_best_effort(&serde_json::to_value(reply).unwrap(), self.group).await;
                }
            }
            ElectionMessage::Winner { node } => self.handle_winner(node).await,
            ElectionMessage::Ok { id } => self.handle_ok(id).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagring_transport::ChannelMcast;

    fn elector(port: u16, id: u64) -> Elector {
        let mut self_ref = NodeRef::new("127.0.0.1", port, port + 1000, "tcp");
        self_ref.id = Id::from_u64(id);
        let group = ChannelMcast::new_group(16);
        let addr: SocketAddr = "224.0.0.1:10002".parse().unwrap();
        let transport = Arc::new(ChannelMcast::join(&group, addr));
        Elector::new(self_ref, addr, transport)
    }

    #[tokio::test]
    async fn starts_leaderless() {
        let e = elector(30001, 1);
        assert_eq!(e.state().await, ElectorState::Leaderless);
        assert!(!e.im_leader().await);
    }

    #[tokio::test]
    async fn become_leader_alone_is_immediately_stable() {
        let e = elector(30002, 1);
        e.become_leader_alone().await;
        assert_eq!(e.state().await, ElectorState::Stable);
        assert!(e.im_leader().await);
    }

    #[tokio::test]
    async fn higher_id_replies_ok_and_starts_its_own_election() {
        let e = elector(30003, 100);
        let reply = e.handle_election(Id::from_u64(1)).await;
        assert!(matches!(reply, Some(ElectionMessage::Ok { .. })));
        assert_eq!(e.state().await, ElectorState::Electing);
    }

    #[tokio::test]
    async fn lower_id_cedes_silently() {
        let e = elector(30004, 1);
        let reply = e.handle_election(Id::from_u64(100)).await;
        assert!(reply.is_none());
        assert_eq!(e.state().await, ElectorState::Leaderless);
    }

    #[tokio::test]
    async fn countdown_expiry_self_promotes_when_nobody_contested() {
        let e = elector(30005, 42);
        e.tick().await; // Leaderless -> Electing, countdown = ELECTION_MOD
        for _ in 0..ELECTION_MOD {
            e.tick().await;
        }
        assert_eq!(e.state().await, ElectorState::Stable);
        assert!(e.im_leader().await);
    }

    #[tokio::test]
    async fn winner_with_lower_id_than_self_is_rejected() {
        let e = elector(30006, 100);
        let weaker = {
            let mut n = NodeRef::new("127.0.0.1", 30007, 31007, "tcp");
            n.id = Id::from_u64(1);
            n
        };
        e.handle_winner(weaker).await;
        assert_eq!(e.state().await, ElectorState::Leaderless);
    }

    #[tokio::test]
    async fn winner_with_higher_id_is_accepted() {
        let e = elector(30008, 1);
        let stronger = {
            let mut n = NodeRef::new("127.0.0.1", 30009, 31009, "tcp");
            n.id = Id::from_u64(100);
            n
        };
        e.handle_winner(stronger.clone()).await;
        assert_eq!(e.state().await, ElectorState::Stable);
        assert!(!e.im_leader().await);
        assert_eq!(e.leader().await, Some(stronger));
    }

    #[tokio::test]
    async fn ok_from_a_higher_id_than_current_leader_triggers_re_election() {
        let e = elector(30010, 1);
        let weak_leader = {
            let mut n = NodeRef::new("127.0.0.1", 30011, 31011, "tcp");
            n.id = Id::from_u64(5);
            n
        };
        e.handle_winner(weak_leader).await;
        assert_eq!(e.state().await, ElectorState::Stable);
        e.handle_ok(Id::from_u64(50)).await;
        assert_eq!(e.state().await, ElectorState::Leaderless);
        assert!(e.leader().await.is_none());
    }
}

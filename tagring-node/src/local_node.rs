//! `LocalNode`: this process's place in the Chord ring — its successor,
//! predecessor, and 160-entry finger table — plus the handful of pure
//! ring-maintenance operations from spec.md §4.4 (`join`, `getSuccessor`,
//! `closestPrecedingNode`, `stabilize`, `fixFingers`, `checkPredecessor`,
//! `notify`). Each field is behind its own lock so a lookup in flight never
//! blocks a concurrent stabilization tick.

use crate::peer::PeerProxy;
use tagring_proto::{between, NodeRef, TransportError};
use tagring_ring::{strictly_between, Id};
use tokio::sync::RwLock;

pub const FINGER_COUNT: u32 = 160;
/// Fingers refreshed per `fix_fingers` tick; 160 / 20 = 8 ticks for a full
/// sweep (spec.md §4.4: "fixFingers SHOULD be batched across ticks").
pub const FIX_FINGERS_BATCH: u32 = 20;

pub struct LocalNode {
    pub self_ref: NodeRef,
    successor: RwLock<NodeRef>,
    predecessor: RwLock<Option<NodeRef>>,
    finger: Vec<RwLock<Option<NodeRef>>>,
    fix_cursor: std::sync::atomic::AtomicU32,
}

/// What changed as a result of a stabilize tick, so the caller can decide
/// whether a replication push is owed to the (possibly new) successor set.
#[derive(Debug, PartialEq, Eq)]
pub enum StabilizeOutcome {
    Unchanged,
    SuccessorChanged(NodeRef),
}

impl LocalNode {
    pub fn new(self_ref: NodeRef) -> LocalNode {
        LocalNode {
            successor: RwLock::new(self_ref.clone()),
            predecessor: RwLock::new(None),
            finger: (0..FINGER_COUNT).map(|_| RwLock::new(None)).collect(),
            fix_cursor: std::sync::atomic::AtomicU32::new(0),
            self_ref,
        }
    }

    pub async fn successor(&self) -> NodeRef {
        self.successor.read().await.clone()
    }

    pub async fn set_successor(&self, n: NodeRef) {
        *self.successor.write().await = n;
    }

    pub async fn predecessor(&self) -> Option<NodeRef> {
        self.predecessor.read().await.clone()
    }

    pub async fn set_predecessor(&self, n: Option<NodeRef>) {
        *self.predecessor.write().await = n;
    }

    pub async fn finger(&self, i: usize) -> Option<NodeRef> {
        self.finger[i].read().await.clone()
    }

    async fn set_finger(&self, i: usize, n: Option<NodeRef>) {
        *self.finger[i].write().await = n;
    }

    /// `join(seed)` (spec.md §4.4). With no seed, this node is alone on the
    /// ring: successor and predecessor are both itself. With a seed, this
    /// node asks it for its successor, splices itself in ahead of that
    /// successor, and tells both neighbors about the new link.
    pub async fn join(&self, seed: Option<NodeRef>) -> Result<(), TransportError> {
        let Some(seed_ref) = seed else {
            self.set_successor(self.self_ref.clone()).await;
            self.set_predecessor(Some(self.self_ref.clone())).await;
            return Ok(());
        };

        let seed_proxy = PeerProxy::new(seed_ref.clone());
        if !seed_proxy.ping().await {
            return Err(TransportError::Refused);
        }
        let successor = seed_proxy.find("get_successor", self.self_ref.id).await?;
        self.set_successor(successor.clone()).await;

        let successor_proxy = PeerProxy::new(successor.clone());
        let former_predecessor = successor_proxy.get_ref("predecessor").await?;
        self.set_predecessor(former_predecessor.clone()).await;
        successor_proxy.set_ref("predecessor", &self.self_ref).await?;
        if let Some(former) = former_predecessor {
            let _ = PeerProxy::new(former).set_ref("successor", &self.self_ref).await;
        }
        Ok(())
    }

    /// `getSuccessor(k)`: the node responsible for key `k` (spec.md §4.4).
    pub async fn get_successor(&self, k: Id) -> Result<NodeRef, TransportError> {
        if k == self.self_ref.id {
            return Ok(self.self_ref.clone());
        }
        let successor = self.successor().await;
        if between(&k, &self.self_ref.id, &successor.id) {
            return Ok(successor);
        }

        let mut n = self.self_ref.clone();
        let mut c = self.closest_preceding_node(k).await;
        while n != c {
            n = c.clone();
            c = if n == self.self_ref {
                self.closest_preceding_node(k).await
            } else {
                match PeerProxy::new(n.clone()).find("closest_preceding_node", k).await {
                    Ok(next) => next,
                    Err(_) => break,
                }
            };
        }

        if n == self.self_ref {
            Ok(self.successor().await)
        } else {
            PeerProxy::new(n.clone())
                .get_ref("successor")
                .await?
                .ok_or_else(|| TransportError::RemoteError("peer reported no successor".into()))
        }
    }

    /// `closestPrecedingNode(k)`: the highest finger that is both live and
    /// strictly between this node and `k` on the ring, falling back to self.
    pub async fn closest_preceding_node(&self, k: Id) -> NodeRef {
        for i in (0..FINGER_COUNT as usize).rev() {
            if let Some(finger) = self.finger(i).await {
                if finger != self.self_ref
                    && strictly_between(&finger.id, &self.self_ref.id, &k)
                    && PeerProxy::new(finger.clone()).ping().await
                {
                    return finger;
                }
            }
        }
        self.self_ref.clone()
    }

    /// `stabilize()` (spec.md §4.4): verifies the successor link is still
    /// correct and still alive, adopting a closer successor or a live
    /// finger as a fallback when it is not.
    pub async fn stabilize(&self) -> StabilizeOutcome {
        let successor = self.successor().await;
        if successor == self.self_ref {
            return StabilizeOutcome::Unchanged;
        }

        let proxy = PeerProxy::new(successor.clone());
        if proxy.ping().await {
            let mut changed = None;
            if let Ok(Some(candidate)) = proxy.get_ref("predecessor").await {
                if candidate != self.self_ref && between(&candidate.id, &self.self_ref.id, &successor.id) {
                    self.set_successor(candidate.clone()).await;
                    changed = Some(candidate);
                }
            }
            let current = self.successor().await;
            let _ = PeerProxy::new(current).set_ref("predecessor", &self.self_ref).await;
            match changed {
                Some(n) => StabilizeOutcome::SuccessorChanged(n),
                None => StabilizeOutcome::Unchanged,
            }
        } else {
            for i in 0..FINGER_COUNT as usize {
                if let Some(candidate) = self.finger(i).await {
                    if candidate != self.self_ref && PeerProxy::new(candidate.clone()).ping().await {
                        self.set_successor(candidate.clone()).await;
                        return StabilizeOutcome::SuccessorChanged(candidate);
                    }
                }
            }
            self.set_successor(self.self_ref.clone()).await;
            self.set_predecessor(Some(self.self_ref.clone())).await;
            StabilizeOutcome::SuccessorChanged(self.self_ref.clone())
        }
    }

    /// `fixFingers()`: refreshes one batch of the finger table per call so
    /// a full 160-entry sweep costs `FIX_FINGERS_BATCH` round trips per
    /// tick rather than 160 (spec.md §4.4).
    pub async fn fix_fingers(&self) {
        let start = self.fix_cursor.load(std::sync::atomic::Ordering::SeqCst);
        for offset in 0..FIX_FINGERS_BATCH {
            let i = (start + offset) % FINGER_COUNT;
            let key = self.self_ref.id.finger_start(i);
            if let Ok(owner) = self.get_successor(key).await {
                self.set_finger(i as usize, Some(owner)).await;
            }
        }
        let next = (start + FIX_FINGERS_BATCH) % FINGER_COUNT;
        self.fix_cursor.store(next, std::sync::atomic::Ordering::SeqCst);
    }

    /// `checkPredecessor()`: drops a predecessor that has stopped
    /// responding, so a subsequent `notify` can replace it.
    pub async fn check_predecessor(&self) {
        if let Some(predecessor) = self.predecessor().await {
            if !PeerProxy::new(predecessor).ping().await {
                self.set_predecessor(None).await;
            }
        }
    }

    /// `notify(n)`: a peer believes it might be our predecessor. Adopts `n`
    /// when we have none, or when `n` is strictly closer than the one we
    /// have. Returns whether the predecessor actually changed.
    pub async fn notify(&self, n: NodeRef) -> bool {
        let current = self.predecessor().await;
        let should_adopt = match &current {
            None => true,
            Some(p) => *p != n && between(&n.id, &p.id, &self.self_ref.id),
        };
        if should_adopt {
            self.set_predecessor(Some(n)).await;
        }
        should_adopt
    }
}

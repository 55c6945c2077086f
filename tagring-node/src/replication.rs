//! Replication: push-after-mutation to the `R-1` live successors, pull-on-
//! takeover when a predecessor's keys land on this node, and the wire
//! payload both directions share (spec.md §4.8, §9 Open Questions: a single
//! configurable `R` applied uniformly rather than per-tag policies).

use crate::peer::PeerProxy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tagring_catalog::{Catalog, FileRow, TagRow, UserRow};
use tagring_proto::NodeRef;
use tagring_ring::Id;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReplicationDelta {
    pub files: Vec<FileRow>,
    pub tags: Vec<TagRow>,
    pub users: Vec<UserRow>,
}

impl ReplicationDelta {
    pub fn since(catalog: &Catalog, since: i64) -> ReplicationDelta {
        ReplicationDelta {
            files: catalog.files_since(since),
            tags: catalog.tags_since(since),
            users: catalog.users_since(since),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.tags.is_empty() && self.users.is_empty()
    }

    /// The newest `updated_at` carried by this delta, or `floor` if it is
    /// empty — used to advance a peer's `last_received` watermark past
    /// exactly what this delta covered, never past rows it didn't carry.
    fn high_watermark(&self, floor: i64) -> i64 {
        self.files
            .iter()
            .map(|f| f.updated_at)
            .chain(self.tags.iter().map(|t| t.updated_at))
            .chain(self.users.iter().map(|u| u.updated_at))
            .fold(floor, i64::max)
    }
}

/// Per-peer `last_received` watermarks (spec.md §3: "ReplicationKey... each
/// with a monotonic `last_modified` timestamp used for delta pulls"),
/// collapsed from one watermark per named channel to one per source node,
/// since this node's catalog is a single undifferentiated store rather than
/// one replicated stream per entity type. Kept in memory only, per spec.md
/// §3's own allowance ("persisted only in-memory").
#[derive(Default)]
pub struct Watermarks {
    last_received: RwLock<HashMap<Id, i64>>,
}

impl Watermarks {
    pub fn new() -> Watermarks {
        Watermarks::default()
    }

    async fn get(&self, peer: Id) -> i64 {
        self.last_received.read().await.get(&peer).copied().unwrap_or(0)
    }

    async fn advance(&self, peer: Id, watermark: i64) {
        let mut table = self.last_received.write().await;
        let entry = table.entry(peer).or_insert(0);
        *entry = (*entry).max(watermark);
    }
}

/// Applies a received delta into the local catalog. Every row goes through
/// `merge_*`, so replaying the same delta twice (or receiving it from two
/// different successors after a reshuffle) is a no-op past the first apply.
pub fn apply_delta(catalog: &Catalog, delta: ReplicationDelta) {
    for file in delta.files {
        catalog.merge_file(file);
    }
    for tag in delta.tags {
        catalog.merge_tag(tag);
    }
    for user in delta.users {
        catalog.merge_user(user);
    }
}

/// Pushes everything touched at or after `since` to every node in
/// `successors`, stopping at the first `replication_factor - 1` entries
/// (the caller is expected to have already walked the successor list to
/// that length). Best-effort: a dead successor is logged and skipped, never
/// propagated to the caller (mutations must not fail because a replica is
/// briefly unreachable).
pub async fn push_to_successors(catalog: &Catalog, successors: &[NodeRef], since: i64) {
    let delta = ReplicationDelta::since(catalog, since);
    if delta.is_empty() {
        return;
    }
    for successor in successors {
        let proxy = PeerProxy::new(successor.clone());
        if let Err(err) = proxy.push_replication(&delta).await {
            tracing::warn!(peer = %successor.chord_addr(), %err, "replication push failed, continuing");
        }
    }
}

/// Pulls everything `source` has touched since the last successful pull from
/// it and merges the result locally — used when this node becomes
/// responsible for a predecessor's key range (a new successor relationship
/// formed, or a leader takeover) and needs to catch up before serving reads
/// for that range. The very first pull from a given peer has no recorded
/// watermark and so pulls full history, same as a brand-new join.
pub async fn pull_from(
    catalog: &Catalog,
    watermarks: &Watermarks,
    source: &NodeRef,
) -> Result<(), tagring_proto::TransportError> {
    let proxy = PeerProxy::new(source.clone());
    let since = watermarks.get(source.id).await;
    let delta = proxy.pull_replication(since).await?;
    let new_watermark = delta.high_watermark(since);
    apply_delta(catalog, delta);
    watermarks.advance(source.id, new_watermark).await;
    Ok(())
}

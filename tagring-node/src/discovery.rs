//! Discovery (spec.md §4.6): the leader periodically announces its address
//! over the discovery multicast group; any node whose locally-known leader
//! disagrees may re-join against the announced one. A not-yet-joined node
//! broadcasts a `{"request":"server_ip"}` probe and seeds off the first
//! reply — the only non-deterministic step in cluster formation.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tagring_proto::NodeRef;
use tagring_transport::McastTransport;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DiscoveryMessage {
    LeaderAnnounce { leader: NodeRef },
    ServerIpRequest,
    ServerIpReply { leader: NodeRef },
}

#[derive(Clone)]
pub struct Discovery {
    group: SocketAddr,
    transport: Arc<dyn McastTransport>,
}

impl Discovery {
    pub fn new(group: SocketAddr, transport: Arc<dyn McastTransport>) -> Discovery {
        Discovery { group, transport }
    }

    /// Called by the leader's background timer (spec.md §4.6:
    /// `WAIT_CHECK*BROADCAST_MOD`).
    pub async fn announce_leader(&self, leader: &NodeRef) {
        let msg = DiscoveryMessage::LeaderAnnounce { leader: leader.clone() };
        self.transport.send_best_effort(&serde_json::to_value(msg).unwrap(), self.group).await;
    }

    pub async fn request_server_ip(&self) {
        let msg = DiscoveryMessage::ServerIpRequest;
        self.transport.send_best_effort(&serde_json::to_value(msg).unwrap(), self.group).await;
    }

    pub async fn reply_server_ip(&self, leader: &NodeRef) {
        let msg = DiscoveryMessage::ServerIpReply { leader: leader.clone() };
        self.transport.send_best_effort(&serde_json::to_value(msg).unwrap(), self.group).await;
    }

    /// Blocks for the next discovery datagram.
    pub async fn recv(&self) -> std::io::Result<DiscoveryMessage> {
        let (value, _from) = self.transport.recv().await?;
        serde_json::from_value(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Given the currently-known leader (if any) and an announced leader,
    /// decides whether this node should re-join against the announced one
    /// (spec.md §4.6: "may initiate join(announcedLeader)" when the ip
    /// differs from what this node currently believes).
    pub fn should_rejoin(known_leader: Option<&NodeRef>, announced: &NodeRef) -> bool {
        match known_leader {
            None => true,
            Some(known) => known.id != announced.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagring_transport::ChannelMcast;

    fn discovery_pair() -> (Discovery, Discovery) {
        let group = ChannelMcast::new_group(16);
        let a_addr: SocketAddr = "224.0.0.1:10003".parse().unwrap();
        let b_addr: SocketAddr = "224.0.0.1:10003".parse().unwrap();
        let a = Discovery::new(a_addr, Arc::new(ChannelMcast::join(&group, "127.0.0.1:1".parse().unwrap())));
        let b = Discovery::new(b_addr, Arc::new(ChannelMcast::join(&group, "127.0.0.1:2".parse().unwrap())));
        (a, b)
    }

    #[tokio::test]
    async fn leader_announce_is_received_by_other_members() {
        let (a, b) = discovery_pair();
        let leader = NodeRef::new("127.0.0.1", 10001, 10000, "tcp");
        a.announce_leader(&leader).await;
        let msg = b.recv().await.unwrap();
        match msg {
            DiscoveryMessage::LeaderAnnounce { leader: got } => assert_eq!(got, leader),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn should_rejoin_when_no_leader_known() {
        let announced = NodeRef::new("127.0.0.1", 10001, 10000, "tcp");
        assert!(Discovery::should_rejoin(None, &announced));
    }

    #[test]
    fn should_not_rejoin_when_announced_matches_known() {
        let known = NodeRef::new("127.0.0.1", 10001, 10000, "tcp");
        let announced = known.clone();
        assert!(!Discovery::should_rejoin(Some(&known), &announced));
    }

    #[test]
    fn should_rejoin_when_announced_differs_from_known() {
        let known = NodeRef::new("127.0.0.1", 10001, 10000, "tcp");
        let announced = NodeRef::new("127.0.0.1", 10002, 10000, "tcp");
        assert!(Discovery::should_rejoin(Some(&known), &announced));
    }
}

//! Test-only `Context` builder shared by the dispatcher, handler, and
//! router unit tests. Not part of the public API.
#![cfg(test)]

use crate::context::Context;
use crate::elector::Elector;
use crate::local_node::LocalNode;
use crate::replication::Watermarks;
use crate::NodeConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tagring_catalog::Catalog;
use tagring_transport::ChannelMcast;

pub async fn test_context() -> Context {
    // `into_path()` hands back the path without scheduling cleanup; fine for
    // short-lived test processes.
    let content_path = tempfile::tempdir().unwrap().into_path();
    let config = Arc::new(NodeConfig::default());
    let node = Arc::new(LocalNode::new(config.self_ref()));
    node.join(None).await.unwrap();
    let catalog = Arc::new(Catalog::new(content_path).unwrap());
    let group = ChannelMcast::new_group(16);
    let addr: SocketAddr = config.election_addr();
    let transport = Arc::new(ChannelMcast::join(&group, addr));
    let elector = Arc::new(Elector::new(config.self_ref(), addr, transport));
    elector.become_leader_alone().await;
    let watermarks = Arc::new(Watermarks::new());
    Context { config, node, catalog, elector, watermarks }
}

//! End-to-end ring scenarios (spec.md §8): real in-process nodes talking
//! over real `127.0.0.1:0` TCP sockets for chord/peer and client/catalog
//! traffic, and a shared `ChannelMcast` group standing in for IP multicast
//! so elections and discovery run hermetically in one test process.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tagring_catalog::Catalog;
use tagring_node::{
    register_catalog, register_chord, route, Context, Dispatcher, Elector, LocalNode, NodeConfig,
    RequestOrigin, Watermarks,
};
use tagring_proto::{command, Envelope, Header, NodeRef};
use tagring_transport::{ChannelMcast, Connection, Shutdown};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The shared "multicast group" every test node's `ChannelMcast` handle
/// joins — a stand-in for the one real multicast socket address every real
/// process would bind, per `ChannelMcast`'s own test fixtures.
type McastGroup = broadcast::Sender<(Value, SocketAddr)>;

/// One simulated ring member: real peer-port and client-port TCP listeners,
/// each serving its own dispatcher through the same `route` function the
/// production binary uses (mirroring `tagring-server`'s own split between
/// `register_chord`'s peer dispatcher and `register_catalog`'s client
/// dispatcher), plus a handle to stop serving (simulating a process crash or
/// a network partition).
struct TestNode {
    ctx: Context,
    accept_tasks: Vec<JoinHandle<()>>,
    stop: broadcast::Sender<()>,
    _content_dir: tempfile::TempDir,
}

impl TestNode {
    async fn spawn(mcast_group: &McastGroup) -> TestNode {
        let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let chord_port = peer_listener.local_addr().unwrap().port();
        let data_port = client_listener.local_addr().unwrap().port();

        let mut config = NodeConfig::default();
        config.host = "127.0.0.1".into();
        config.chord_port = chord_port;
        config.port = data_port;
        let config = Arc::new(config);

        let node = Arc::new(LocalNode::new(config.self_ref()));
        let election_addr: SocketAddr = config.election_addr();
        // Each member's `ChannelMcast` is keyed by its own distinguishing
        // address, not the shared group address, so `recv()` can tell its
        // own sends apart from everyone else's (see `ChannelMcast`'s own
        // discovery.rs test fixture).
        let own_addr: SocketAddr = format!("127.0.0.1:{chord_port}").parse().unwrap();
        let transport = Arc::new(ChannelMcast::join(mcast_group, own_addr));
        let elector = Arc::new(Elector::new(config.self_ref(), election_addr, transport));
        let content_dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(Catalog::new(content_dir.path()).unwrap());
        let watermarks = Arc::new(Watermarks::new());

        let ctx = Context { config, node, catalog, elector, watermarks };

        let mut peer_dispatcher = Dispatcher::new();
        register_chord(&mut peer_dispatcher);
        let peer_dispatcher = Arc::new(peer_dispatcher);

        let mut client_dispatcher = Dispatcher::new();
        register_catalog(&mut client_dispatcher);
        let client_dispatcher = Arc::new(client_dispatcher);

        let (stop, _) = broadcast::channel(1);
        let peer_task = spawn_accept_loop(peer_listener, ctx.clone(), peer_dispatcher, RequestOrigin::Peer, stop.subscribe());
        let client_task = spawn_accept_loop(client_listener, ctx.clone(), client_dispatcher, RequestOrigin::Client, stop.subscribe());

        TestNode { ctx, accept_tasks: vec![peer_task, client_task], stop, _content_dir: content_dir }
    }

    fn self_ref(&self) -> NodeRef {
        self.ctx.node.self_ref.clone()
    }

    /// Simulates the process dying or being partitioned away: stops
    /// accepting new connections, so any in-flight `PeerProxy` call against
    /// this node's address now sees a refused connection.
    fn kill(self) {
        let _ = self.stop.send(());
        for task in self.accept_tasks {
            task.abort();
        }
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    ctx: Context,
    dispatcher: Arc<Dispatcher>,
    origin: RequestOrigin,
    stop: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let mut shutdown = Shutdown::new(stop);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { return };
                    let ctx = ctx.clone();
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let mut conn = Connection::new(stream);
                        let read: std::io::Result<Option<tagring_proto::Envelope>> = conn.read_json().await;
                        if let Ok(Some(envelope)) = read {
                            let reply = route(&ctx, &dispatcher, origin, envelope)
                                .await
                                .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
                            let _ = conn.write_json(&reply).await;
                        }
                    });
                }
            }
        }
    })
}

/// Walks `successor()` starting from `start` until it returns to `start`,
/// asserting every ring member is visited exactly once — the standard
/// Chord ring-closure invariant, independent of join order.
async fn assert_single_ring(nodes: &[&TestNode]) {
    let start = nodes[0].self_ref();
    let mut seen = vec![start.clone()];
    let mut current = start.clone();
    for _ in 0..nodes.len() {
        let next = nodes
            .iter()
            .find(|n| n.self_ref() == current)
            .unwrap()
            .ctx
            .node
            .successor()
            .await;
        if next == start {
            break;
        }
        seen.push(next.clone());
        current = next;
    }
    assert_eq!(seen.len(), nodes.len(), "ring did not close after stabilization: {seen:?}");
    for n in nodes {
        assert!(seen.contains(&n.self_ref()), "node {} missing from the closed ring", n.self_ref().chord_addr());
    }
}

async fn stabilize_round(nodes: &[&TestNode]) {
    for n in nodes {
        n.ctx.node.stabilize().await;
    }
}

#[tokio::test]
async fn single_node_bootstrap_is_its_own_entire_ring() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    a.ctx.elector.become_leader_alone().await;

    assert_eq!(a.ctx.node.successor().await, a.self_ref());
    assert_eq!(a.ctx.node.predecessor().await, Some(a.self_ref()));
    assert!(a.ctx.elector.im_leader().await);
    assert_eq!(a.ctx.elector.leader().await, Some(a.self_ref()));
}

#[tokio::test]
async fn two_node_join_links_both_neighbors_immediately() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    a.ctx.elector.become_leader_alone().await;

    b.ctx.node.join(Some(a.self_ref())).await.unwrap();
    b.ctx.elector.handle_winner(a.self_ref()).await;

    assert_eq!(a.ctx.node.successor().await, b.self_ref());
    assert_eq!(a.ctx.node.predecessor().await, Some(b.self_ref()));
    assert_eq!(b.ctx.node.successor().await, a.self_ref());
    assert_eq!(b.ctx.node.predecessor().await, Some(a.self_ref()));
    assert!(!b.ctx.elector.im_leader().await);
    assert_eq!(b.ctx.elector.leader().await, Some(a.self_ref()));
}

#[tokio::test]
async fn three_node_ring_converges_after_stabilization() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;
    let c = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    b.ctx.node.join(Some(a.self_ref())).await.unwrap();
    c.ctx.node.join(Some(a.self_ref())).await.unwrap();

    let all = [&a, &b, &c];
    // A handful of stabilize rounds is enough for a 3-node ring to converge
    // regardless of join order, mirroring the periodic stabilize_loop.
    for _ in 0..5 {
        stabilize_round(&all).await;
    }

    assert_single_ring(&all).await;
}

#[tokio::test]
async fn leader_death_triggers_reelection_among_survivors() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    a.ctx.elector.become_leader_alone().await;
    b.ctx.node.join(Some(a.self_ref())).await.unwrap();
    b.ctx.elector.handle_winner(a.self_ref()).await;

    assert_eq!(b.ctx.elector.leader().await, Some(a.self_ref()));

    a.kill();

    // check_leader_liveness: the leader ping fails, survivor drops to
    // Leaderless.
    b.ctx.elector.tick().await;
    assert!(b.ctx.elector.leader().await.is_none());

    // Leaderless -> Electing -> self-promote once the countdown expires with
    // no higher-id contender still alive to reply.
    b.ctx.elector.tick().await;
    for _ in 0..tagring_node::ELECTION_MOD {
        b.ctx.elector.tick().await;
    }

    assert!(b.ctx.elector.im_leader().await);
    assert_eq!(b.ctx.elector.leader().await, Some(b.self_ref()));
}

/// spec.md §8 scenario 5: drop multicast between `{a}` and `{b, c}`; both
/// sides elect independently; once the link is restored, exactly one leader
/// remains everywhere. The Chord ring itself (real TCP) stays connected
/// throughout — only the multicast election channel is partitioned, exactly
/// as the scenario describes.
#[tokio::test]
async fn partition_heals_to_exactly_one_leader() {
    let group_a = ChannelMcast::new_group(16);
    let group_bc = ChannelMcast::new_group(16);

    let a = TestNode::spawn(&group_a).await;
    let b = TestNode::spawn(&group_bc).await;
    let c = TestNode::spawn(&group_bc).await;

    a.ctx.node.join(None).await.unwrap();
    b.ctx.node.join(Some(a.self_ref())).await.unwrap();
    c.ctx.node.join(Some(a.self_ref())).await.unwrap();

    // Partitioned: a is alone on its side and simply self-promotes.
    a.ctx.elector.become_leader_alone().await;

    // b and c, cut off from a, run their own election over group_bc.
    b.ctx.elector.tick().await; // Leaderless -> Electing
    for _ in 0..tagring_node::ELECTION_MOD {
        b.ctx.elector.tick().await;
    }
    // b's self-promotion WINNER reaches c over their shared group.
    c.ctx.elector.listen_once().await.unwrap();

    assert!(a.ctx.elector.im_leader().await);
    let bc_leader = b.ctx.elector.leader().await.unwrap();
    assert_eq!(c.ctx.elector.leader().await, Some(bc_leader.clone()));
    assert_ne!(a.self_ref(), bc_leader, "the two sides must have elected independently");

    // Multicast restored: each side's WINNER now reaches everyone on the
    // other side, and bully resolves the two leaders down to one.
    let a_leader = a.self_ref();
    a.ctx.elector.handle_winner(bc_leader.clone()).await;
    b.ctx.elector.handle_winner(a_leader.clone()).await;
    c.ctx.elector.handle_winner(a_leader).await;

    let a_final = a.ctx.elector.leader().await;
    let b_final = b.ctx.elector.leader().await;
    let c_final = c.ctx.elector.leader().await;
    assert!(a_final.is_some());
    assert_eq!(a_final, b_final, "a and b disagree on the post-heal leader");
    assert_eq!(b_final, c_final, "b and c disagree on the post-heal leader");
}

#[tokio::test]
async fn replication_catch_up_pulls_everything_written_before_the_join() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    let uid = a.ctx.catalog.get_or_create_user_id("alice", 1);
    a.ctx
        .catalog
        .add_file("report.md", "md", 11, uid, b"hello world", &["project-x".into()], 1)
        .unwrap();

    b.ctx.node.join(Some(a.self_ref())).await.unwrap();

    tagring_node::pull_from(&b.ctx.catalog, &b.ctx.watermarks, &a.self_ref()).await.unwrap();

    let files = b.ctx.catalog.list_files(&["project-x".into()]);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "report.md");
}

#[tokio::test]
async fn replication_pull_only_fetches_what_changed_since_the_last_pull() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    b.ctx.node.join(Some(a.self_ref())).await.unwrap();

    let uid = a.ctx.catalog.get_or_create_user_id("alice", 1);
    a.ctx.catalog.add_file("first.md", "md", 5, uid, b"first", &["batch-one".into()], 10).unwrap();

    tagring_node::pull_from(&b.ctx.catalog, &b.ctx.watermarks, &a.self_ref()).await.unwrap();
    assert_eq!(b.ctx.catalog.list_files(&["batch-one".into()]).len(), 1);

    a.ctx.catalog.add_file("second.md", "md", 6, uid, b"second", &["batch-two".into()], 20).unwrap();

    // A second pull from the same peer must only carry `second.md` — the
    // watermark recorded by the first pull should exclude `first.md` from
    // this delta, not resend full history.
    tagring_node::pull_from(&b.ctx.catalog, &b.ctx.watermarks, &a.self_ref()).await.unwrap();
    assert_eq!(b.ctx.catalog.list_files(&["batch-one".into()]).len(), 1);
    assert_eq!(b.ctx.catalog.list_files(&["batch-two".into()]).len(), 1);
}

#[tokio::test]
async fn replication_push_reaches_the_successor_after_a_mutation() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    b.ctx.node.join(Some(a.self_ref())).await.unwrap();

    let uid = a.ctx.catalog.get_or_create_user_id("bob", 2);
    a.ctx
        .catalog
        .add_file("notes.txt", "txt", 5, uid, b"abcde", &["scratch".into()], 1)
        .unwrap();

    tagring_node::push_to_successors(&a.ctx.catalog, &[b.self_ref()], 0).await;

    let files = b.ctx.catalog.list_files(&["scratch".into()]);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "notes.txt");
}

/// spec.md §4.7's "client request on follower" branch: a catalog mutation
/// sent to a non-leader must be forwarded verbatim to the leader and the
/// leader's reply returned unchanged, rather than failing or being applied
/// locally.
#[tokio::test]
async fn client_request_on_a_follower_forwards_to_the_leader() {
    let group = ChannelMcast::new_group(16);
    let a = TestNode::spawn(&group).await;
    let b = TestNode::spawn(&group).await;

    a.ctx.node.join(None).await.unwrap();
    a.ctx.elector.become_leader_alone().await;
    b.ctx.node.join(Some(a.self_ref())).await.unwrap();
    b.ctx.elector.handle_winner(a.self_ref()).await;
    assert!(!b.ctx.elector.im_leader().await);

    let uid = a.ctx.catalog.get_or_create_user_id("alice", 1);
    let header = Header::new(command::CREATE, "add", vec!["file".into(), "tags".into()]);
    let data = json!({
        "file": {"name": "via-follower.md", "file_type": "md", "size": 1, "user_id": uid, "content": "x"},
        "tags": ["from-follower"],
    });
    let envelope = Envelope::new(header, data);

    // Routed against the follower's own Context with RequestOrigin::Client:
    // not the leader, so `route` must forward to `a`'s client listener
    // rather than dispatching locally or failing.
    let mut follower_dispatcher = Dispatcher::new();
    register_catalog(&mut follower_dispatcher);
    let reply = route(&b.ctx, &follower_dispatcher, RequestOrigin::Client, envelope).await.unwrap();

    assert_eq!(reply["result"]["name"], "via-follower.md");
    let files = a.ctx.catalog.list_files(&["from-follower".into()]);
    assert_eq!(files.len(), 1, "the mutation must have actually landed on the leader");
}

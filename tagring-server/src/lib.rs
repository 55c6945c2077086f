//! Node process wiring: binds the four ports (spec.md §6), bootstraps ring
//! membership via `server_ip` discovery, and spawns the background timers
//! alongside the two request listeners, all observing one shared shutdown
//! signal (teacher's `mqtt-core::shutdown::Shutdown` pattern).

mod listener;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tagring_catalog::Catalog;
use tagring_node::{
    check_predecessor_loop, discovery_announce_loop, discovery_listen_loop, election_listen_loop,
    election_tick_loop, fix_fingers_loop, register_catalog, register_chord, stabilize_loop, Context,
    Discovery, DiscoveryMessage, Dispatcher, Elector, LocalNode, NodeConfig, Watermarks,
};
use tagring_transport::{McastSocket, McastTransport, Shutdown};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// How long a freshly-started node waits for a `server_ip` reply before
/// concluding it is the first node and self-promoting (spec.md §4.6).
const BOOTSTRAP_WAIT: Duration = Duration::from_secs(2);

pub async fn run(config: NodeConfig, shutdown_signal: impl std::future::Future<Output = ()>) -> Result<()> {
    let config = Arc::new(config);
    let self_ip: IpAddr = config.host.parse()?;

    let election_transport: Arc<dyn McastTransport> =
        Arc::new(McastSocket::bind(config.mcast_addr, config.election_port, self_ip).await?);
    let discovery_transport: Arc<dyn McastTransport> =
        Arc::new(McastSocket::bind(config.mcast_addr, config.discovery_port, self_ip).await?);

    let node = Arc::new(LocalNode::new(config.self_ref()));
    let elector = Arc::new(Elector::new(config.self_ref(), config.election_addr(), election_transport));
    let discovery = Discovery::new(config.discovery_addr(), discovery_transport);
    let catalog = Arc::new(Catalog::new(config.content_path.clone())?);

    bootstrap(&node, &elector, &discovery).await;

    let watermarks = Arc::new(Watermarks::new());
    let ctx = Context { config: config.clone(), node, catalog, elector, watermarks };

    // Catalog verbs and Chord/election/replication RPCs live in separate
    // dispatcher instances, one per listener: a peer-origin request can
    // never reach a catalog mutation handler, even one that bypassed
    // `route`'s own origin match (spec.md §4.7's leader-gating guarantee).
    let mut client_dispatcher = Dispatcher::new();
    register_catalog(&mut client_dispatcher);
    let client_dispatcher = Arc::new(client_dispatcher);

    let mut peer_dispatcher = Dispatcher::new();
    register_chord(&mut peer_dispatcher);
    let peer_dispatcher = Arc::new(peer_dispatcher);

    let client_listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let peer_listener = TcpListener::bind((config.host.as_str(), config.chord_port)).await?;

    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::unbounded_channel();

    tokio::spawn(listener::run_listener(
        client_listener,
        ctx.clone(),
        client_dispatcher,
        Shutdown::new(notify_shutdown.subscribe()),
        shutdown_complete_tx.clone(),
    ));
    tokio::spawn(listener::run_listener(
        peer_listener,
        ctx.clone(),
        peer_dispatcher,
        Shutdown::new(notify_shutdown.subscribe()),
        shutdown_complete_tx.clone(),
    ));

    tokio::spawn(stabilize_loop(ctx.clone(), Shutdown::new(notify_shutdown.subscribe())));
    tokio::spawn(check_predecessor_loop(ctx.clone(), Shutdown::new(notify_shutdown.subscribe())));
    tokio::spawn(fix_fingers_loop(ctx.clone(), Shutdown::new(notify_shutdown.subscribe())));
    tokio::spawn(election_tick_loop(ctx.clone(), Shutdown::new(notify_shutdown.subscribe())));
    tokio::spawn(election_listen_loop(ctx.clone(), Shutdown::new(notify_shutdown.subscribe())));
    tokio::spawn(discovery_announce_loop(ctx.clone(), discovery.clone(), Shutdown::new(notify_shutdown.subscribe())));
    tokio::spawn(discovery_listen_loop(ctx, discovery, Shutdown::new(notify_shutdown.subscribe())));

    shutdown_signal.await;
    tracing::info!("stopping");
    drop(notify_shutdown);
    drop(shutdown_complete_tx);
    let _ = shutdown_complete_rx.recv().await;
    Ok(())
}

/// Broadcasts a `server_ip` probe and waits briefly for a reply (spec.md
/// §4.6): a reply means an existing ring to join; silence means this is the
/// first node, which becomes its own leader.
async fn bootstrap(node: &LocalNode, elector: &Elector, discovery: &Discovery) {
    discovery.request_server_ip().await;
    let reply = tokio::time::timeout(BOOTSTRAP_WAIT, async {
        loop {
            match discovery.recv().await {
                Ok(DiscoveryMessage::ServerIpReply { leader }) => return Some(leader),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .unwrap_or(None);

    match reply {
        Some(leader) => {
            tracing::info!(leader = %leader.chord_addr(), "joining existing ring via discovery");
            if node.join(Some(leader.clone())).await.is_ok() {
                elector.handle_winner(leader).await;
            } else {
                tracing::warn!("join against discovered leader failed, bootstrapping alone");
                node.join(None).await.expect("solo join cannot fail");
                elector.become_leader_alone().await;
            }
        }
        None => {
            tracing::info!("no server_ip reply received, bootstrapping as the first node");
            node.join(None).await.expect("solo join cannot fail");
            elector.become_leader_alone().await;
        }
    }
}

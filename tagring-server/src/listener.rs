//! Accept loops for the client and peer TCP ports (spec.md §5, mirroring the
//! teacher's `mqtt-broker::broker` shape): one `Listener` per bound port, a
//! `Semaphore`-bounded connection count, one spawned task per accepted
//! connection doing exactly one request-reply round trip, then closing.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tagring_node::{route, Context, Dispatcher, RequestOrigin};
use tagring_proto::{error_reply, Envelope};
use tagring_transport::{Connection, Shutdown};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};

const MAX_CONNECTIONS: usize = 250;

/// Binds one accept loop to `listener` and classifies every connection it
/// serves by which local port `listener` is bound to (spec.md §4.7's
/// "classify by source port" rule, via `RequestOrigin::classify`) — the
/// caller picks which dispatcher to hand it (catalog verbs for the client
/// port, Chord/election/replication RPCs for the peer port), but the origin
/// itself is derived, not asserted by the caller.
pub async fn run_listener(listener: TcpListener, ctx: Context, dispatcher: Arc<Dispatcher>, shutdown: Shutdown, shutdown_complete_tx: mpsc::UnboundedSender<()>) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    let origin = RequestOrigin::classify(port, &ctx.config);
    serve(listener, origin, ctx, dispatcher, shutdown, shutdown_complete_tx).await
}

async fn serve(listener: TcpListener, origin: RequestOrigin, ctx: Context, dispatcher: Arc<Dispatcher>, mut shutdown: Shutdown, shutdown_complete_tx: mpsc::UnboundedSender<()>) {
    let limit_connections = Arc::new(Semaphore::new(MAX_CONNECTIONS));
    info!(port = listener.local_addr().map(|a| a.port()).unwrap_or(0), origin = ?origin, "listener accepting connections");

    loop {
        let accepted = tokio::select! {
            res = accept(&listener) => res,
            _ = shutdown.recv() => return,
        };
        let (socket, addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                error!(%err, "accept failed, listener shutting down");
                return;
            }
        };

        limit_connections.clone().acquire_owned().await.expect("semaphore never closed").forget();
        let ctx = ctx.clone();
        let dispatcher = dispatcher.clone();
        let permits = limit_connections.clone();
        let _shutdown_complete = shutdown_complete_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, origin, &ctx, &dispatcher).await {
                warn!(%addr, %err, "connection error");
            }
            permits.add_permits(1);
        });
    }
}

async fn accept(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok(pair) => return Ok(pair),
            Err(err) => {
                if backoff > 64 {
                    return Err(err);
                }
            }
        }
        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

/// One request, one reply, then the connection closes — every unicast call
/// in this system is a single round trip (spec.md §4.2).
async fn handle_connection(socket: TcpStream, origin: RequestOrigin, ctx: &Context, dispatcher: &Dispatcher) -> io::Result<()> {
    let mut conn = Connection::new(socket);
    let envelope: Envelope = match conn.read_json().await? {
        Some(envelope) => envelope,
        None => return Ok(()),
    };
    debug!(command = %envelope.header.command_name, function = %envelope.header.function, ?origin, "dispatching request");
    let reply = match route(ctx, dispatcher, origin, envelope).await {
        Ok(value) => value,
        Err(err) => error_reply(err.to_string()),
    };
    conn.write_json(&reply).await
}

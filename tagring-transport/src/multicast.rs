use async_trait::async_trait;
use serde_json::Value;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

/// Best-effort multicast datagram transport, abstracted so the election and
/// discovery state machines in the node crate can be unit-tested without a
/// real multicast-capable network (loopback does not route multicast inside
/// most containers). Messages are pre-encoded to JSON by the caller so both
/// implementations share one wire representation.
#[async_trait]
pub trait McastTransport: Send + Sync {
    async fn send_best_effort(&self, value: &Value, target: SocketAddr);
    async fn recv(&self) -> io::Result<(Value, SocketAddr)>;
}

/// A UDP multicast endpoint used for election and discovery traffic
/// (spec.md §4.2): joins the configured group with `SO_REUSEADDR`, and
/// filters out datagrams that originated from this node's own IP or from
/// loopback noise.
pub struct McastSocket {
    socket: UdpSocket,
    self_ip: IpAddr,
}

impl McastSocket {
    pub async fn bind(group: Ipv4Addr, port: u16, self_ip: IpAddr) -> io::Result<McastSocket> {
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        raw.set_nonblocking(true)?;
        raw.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        let std_socket: std::net::UdpSocket = raw.into();
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(McastSocket { socket, self_ip })
    }
}

#[async_trait]
impl McastTransport for McastSocket {
    /// Best-effort multicast send — spec.md §4.2: "Multicast sends are
    /// best-effort and never fail the caller."
    async fn send_best_effort(&self, value: &Value, target: SocketAddr) {
        match serde_json::to_vec(value) {
            Ok(payload) => {
                if let Err(err) = self.socket.send_to(&payload, target).await {
                    tracing::warn!(%err, "multicast send failed, continuing");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to encode multicast payload"),
        }
    }

    /// Blocks for the next datagram that is not from this node's own IP or
    /// from loopback, and decodes it as JSON. Malformed datagrams from other
    /// hosts are dropped silently and the wait continues.
    async fn recv(&self) -> io::Result<(Value, SocketAddr)> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            if from.ip() == self.self_ip || from.ip().is_loopback() {
                continue;
            }
            match serde_json::from_slice::<Value>(&buf[..n]) {
                Ok(value) => return Ok((value, from)),
                Err(err) => {
                    tracing::debug!(%err, %from, "dropping malformed multicast datagram");
                    continue;
                }
            }
        }
    }
}

/// In-process stand-in for [`McastSocket`] used by node-crate tests: every
/// member of a test ring shares one `broadcast` channel keyed by the
/// "multicast group", so a send from one member's handle is observed by all
/// others' `recv()` without touching a real socket.
pub struct ChannelMcast {
    self_addr: SocketAddr,
    tx: broadcast::Sender<(Value, SocketAddr)>,
    rx: tokio::sync::Mutex<broadcast::Receiver<(Value, SocketAddr)>>,
}

impl ChannelMcast {
    /// Builds one endpoint of a shared ring. Clone the returned sender via
    /// [`ChannelMcast::group`] to wire up more members of the same group.
    pub fn new_group(capacity: usize) -> broadcast::Sender<(Value, SocketAddr)> {
        broadcast::channel(capacity).0
    }

    pub fn join(group: &broadcast::Sender<(Value, SocketAddr)>, self_addr: SocketAddr) -> ChannelMcast {
        ChannelMcast { self_addr, tx: group.clone(), rx: tokio::sync::Mutex::new(group.subscribe()) }
    }
}

#[async_trait]
impl McastTransport for ChannelMcast {
    async fn send_best_effort(&self, value: &Value, _target: SocketAddr) {
        let _ = self.tx.send((value.clone(), self.self_addr));
    }

    async fn recv(&self) -> io::Result<(Value, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok((value, from)) if from != self.self_addr => return Ok((value, from)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "multicast group closed"))
                }
            }
        }
    }
}

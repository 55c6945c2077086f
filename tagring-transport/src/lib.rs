mod connection;
mod multicast;
mod shutdown;
mod unicast;

pub use connection::{Connection, MAX_MESSAGE_BYTES};
pub use multicast::{ChannelMcast, McastSocket, McastTransport};
pub use shutdown::Shutdown;
pub use unicast::{unicast_call, WAIT_CHECK};

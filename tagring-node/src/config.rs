use std::net::Ipv4Addr;
use std::path::PathBuf;
use tagring_proto::NodeRef;

/// Process configuration, loaded once at startup and then passed around
/// explicitly via `Context` (REDESIGN FLAGS: no global singletons).
/// Recognized keys mirror spec.md §6 exactly, plus two ports the original
/// spec leaves implicit (`ELECTION_PORT`, `DISCOVERY_PORT`).
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub chord_port: u16,
    pub election_port: u16,
    pub discovery_port: u16,
    pub mcast_addr: Ipv4Addr,
    pub db_base_url: String,
    pub db_name: String,
    pub content_path: PathBuf,
    /// Replication factor `R`: the key's owner plus `R-1` successors hold a
    /// copy (spec.md §9 Open Questions: "a single configurable R").
    pub replication_factor: usize,
}

impl Default for NodeConfig {
    fn default() -> NodeConfig {
        NodeConfig {
            protocol: "tcp".into(),
            host: "127.0.0.1".into(),
            port: 10000,
            chord_port: 10001,
            election_port: 10002,
            discovery_port: 10003,
            mcast_addr: Ipv4Addr::new(224, 0, 0, 1),
            db_base_url: "./data/".into(),
            db_name: "tagring.db".into(),
            content_path: "content".into(),
            replication_factor: 3,
        }
    }
}

impl NodeConfig {
    /// Loads configuration from the process environment, falling back to
    /// the defaults above for any key that is unset.
    pub fn from_env() -> Result<NodeConfig, config::ConfigError> {
        let defaults = NodeConfig::default();
        let built = config::Config::builder()
            .set_default("protocol", defaults.protocol.clone())?
            .set_default("host", defaults.host.clone())?
            .set_default("port", defaults.port as i64)?
            .set_default("chord_port", defaults.chord_port as i64)?
            .set_default("election_port", defaults.election_port as i64)?
            .set_default("discovery_port", defaults.discovery_port as i64)?
            .set_default("mcast_addr", defaults.mcast_addr.to_string())?
            .set_default("db_base_url", defaults.db_base_url.clone())?
            .set_default("db_name", defaults.db_name.clone())?
            .set_default("content_path", defaults.content_path.to_string_lossy().to_string())?
            .set_default("replication_factor", defaults.replication_factor as i64)?
            .add_source(config::Environment::default())
            .build()?;

        Ok(NodeConfig {
            protocol: built.get_string("protocol")?,
            host: built.get_string("host")?,
            port: built.get_int("port")? as u16,
            chord_port: built.get_int("chord_port")? as u16,
            election_port: built.get_int("election_port")? as u16,
            discovery_port: built.get_int("discovery_port")? as u16,
            mcast_addr: built
                .get_string("mcast_addr")?
                .parse()
                .map_err(|e| config::ConfigError::Message(format!("invalid MCAST_ADDR: {e}")))?,
            db_base_url: built.get_string("db_base_url")?,
            db_name: built.get_string("db_name")?,
            content_path: PathBuf::from(built.get_string("content_path")?),
            replication_factor: built.get_int("replication_factor")? as usize,
        })
    }

    pub fn self_ref(&self) -> NodeRef {
        NodeRef::new(self.host.clone(), self.chord_port, self.port, self.protocol.clone())
    }

    pub fn election_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.mcast_addr.into(), self.election_port)
    }

    pub fn discovery_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.mcast_addr.into(), self.discovery_port)
    }
}

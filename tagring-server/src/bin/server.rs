use tagring_node::NodeConfig;

#[tokio::main]
async fn main() -> tagring_server::Result<()> {
    tracing_subscriber::fmt::try_init()?;
    let config = NodeConfig::from_env()?;
    tagring_server::run(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

use proverb_server::{ProverbSet, Server, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proverb_server::init_logging();
    let server = Server::bind(ServerConfig::default(), ProverbSet::go_proverbs()).await?;
    info!("proverb server is listening on {} (tcp4)", server.local_addr()?);
    server.run().await;
    Ok(())
}

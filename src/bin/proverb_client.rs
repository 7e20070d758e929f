//! Watch the proverb stream in your terminal. Type `q` and Enter to quit.
//!
//!     proverb_client [ADDR]

use anyhow::Context;
use tokio::net::TcpStream;
use tracing::{info, warn};

const DEFAULT_ADDR: &str = "127.0.0.1:12345";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proverb_server::init_logging();
    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_owned());
    let socket = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (mut reader, mut writer) = socket.into_split();

    // Keystrokes go to the server as they are. The server only cares about `q`.
    tokio::task::spawn(async move {
        if let Err(err) = tokio::io::copy(&mut tokio::io::stdin(), &mut writer).await {
            warn!(error = %err, "stopped forwarding stdin");
        }
    });

    // The server closes the connection after `q`, which ends this copy.
    tokio::io::copy(&mut reader, &mut tokio::io::stdout())
        .await
        .context("lost connection to the server")?;
    info!("server closed the connection");

    // Tokio's stdin reads on a blocking thread, and runtime shutdown would wait
    // for that read to return.
    std::process::exit(0);
}

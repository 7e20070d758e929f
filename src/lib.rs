//! A TCP server that streams a random Go proverb to every connected client
//! every few seconds, repainting the same terminal line each time. Clients
//! press `q` to leave.

pub mod config;
pub mod error;
pub mod proverbs;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::{Error, Result, SessionError};
pub use proverbs::{ProverbSet, ProverbSource};
pub use server::{ActiveSessions, Server};
pub use session::{CLOSING_MESSAGE, Session, Termination, greeting, proverb_line};

use tracing_subscriber::EnvFilter;

/// Log to stderr at `info` unless `RUST_LOG` says otherwise. Stdout is left
/// alone so the client can use it for the proverb stream.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

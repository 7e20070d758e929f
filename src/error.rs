use std::io;
use std::net::SocketAddrV4;

use thiserror::Error;

/// Errors that stop the server before it starts serving.
#[derive(Error, Debug)]
pub enum Error {
    #[error("proverb set must contain at least one proverb")]
    EmptyProverbSet,

    #[error("tick period must be greater than zero")]
    ZeroPeriod,

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
}

/// Errors that end a single session. These never leave the session's task.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to write greeting: {0}")]
    Handshake(#[source] io::Error),

    #[error("failed to write proverb: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time;
use tracing::{Instrument, info, info_span, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::proverbs::{ProverbSet, ProverbSource};
use crate::session::Session;

/// Pause after a failed accept. Errors like EMFILE repeat until something
/// else gives up a descriptor.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How many sessions are running right now. Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions(Arc<AtomicUsize>);

impl ActiveSessions {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> SessionGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        SessionGuard(self.clone())
    }
}

// Decrements the count when the session task finishes, including by panic.
struct SessionGuard(ActiveSessions);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    proverbs: ProverbSet,
    next_session_id: u64,
    active: ActiveSessions,
}

impl Server {
    /// Bind the listening socket. This is the only failure that stops the
    /// server.
    pub async fn bind(config: ServerConfig, proverbs: ProverbSet) -> Result<Self> {
        if config.period.is_zero() {
            return Err(Error::ZeroPeriod);
        }
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.addr,
                source,
            })?;
        Ok(Self {
            listener,
            config,
            proverbs,
            next_session_id: 1,
            active: ActiveSessions::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_sessions(&self) -> ActiveSessions {
        self.active.clone()
    }

    /// Accept clients forever. Each one runs on its own task, so a stuck
    /// client never holds up the accept loop.
    pub async fn run(mut self) {
        loop {
            let (stream, peer) = accept_next(|| self.listener.accept()).await;
            let id = self.next_session_id;
            self.next_session_id += 1;
            info!(session = id, %peer, "new client connected");

            let source = ProverbSource::for_session(self.proverbs.clone(), id);
            let session = Session::new(id, stream, source, &self.config);
            let guard = self.active.enter();
            let span = info_span!("session", id = session.id(), %peer);
            tokio::task::spawn(
                async move {
                    let _guard = guard;
                    match session.run().await {
                        Ok(reason) => info!(?reason, "client disconnected"),
                        Err(err) => warn!(error = %err, "session ended"),
                    }
                }
                .instrument(span),
            );
        }
    }
}

// Keep trying until an accept succeeds. Failures are logged and never end
// the loop.
async fn accept_next<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

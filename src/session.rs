//! One client connection, from the greeting to the close.
//!
//! A session is two units of work. The session task writes the greeting and
//! then a proverb on every tick. A watcher task reads the client one byte at
//! a time and fires a oneshot when it sees the quit byte, EOF, or a read
//! error. The session task races both the next tick and every write against
//! that oneshot, checking the oneshot first. It never starts a proverb after
//! it has seen the signal, and a client that stops reading can't park it in
//! a write either.
//!
//! The stream is split into two halves. Whatever ends the session, the
//! watcher is aborted and awaited before `run` returns, so both halves are
//! dropped on the way out and the stream closes exactly once.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::proverbs::ProverbSource;

/// Sent after the client quits or goes away. Best effort.
pub const CLOSING_MESSAGE: &str = "\n\x1b[1;1HConnection closed\n";

/// Clear the screen, print the header, and park the cursor on row 7 where
/// the proverbs get redrawn.
pub fn greeting(period: Duration) -> String {
    format!(
        "\x1b[2J\x1b[H\
         \x1b[1;1H=== Go Proverbs Server ===\
         \x1b[2;1H(press 'q' to quit)\
         \x1b[4;1HNew proverb every {}:\
         \x1b[5;1H---------------------------\
         \x1b[7;1H",
        describe_period(period),
    )
}

/// Carriage return and clear-to-end-of-line, so each proverb repaints the
/// same line.
pub fn proverb_line(proverb: &str) -> String {
    format!("\r\x1b[K{proverb}\n")
}

fn describe_period(period: Duration) -> String {
    match (period.as_secs(), period.subsec_nanos()) {
        (1, 0) => "second".to_owned(),
        (secs, 0) => format!("{secs} seconds"),
        _ if period < Duration::from_millis(1) => format!("{} µs", period.as_micros()),
        _ => format!("{} ms", period.as_millis()),
    }
}

/// Why the watcher told the session to stop.
#[derive(Debug)]
pub enum Termination {
    QuitByte,
    PeerClosed,
    ReadFailed(io::Error),
    /// The watcher went away without saying why. Only happens if it panics.
    WatcherGone,
}

/// One client. The server runs these over `TcpStream`s.
pub struct Session<S = TcpStream> {
    id: u64,
    stream: S,
    source: ProverbSource,
    period: Duration,
    quit_byte: u8,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(id: u64, stream: S, source: ProverbSource, config: &ServerConfig) -> Self {
        Self {
            id,
            stream,
            source,
            period: config.period,
            quit_byte: config.quit_byte,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn run(self) -> Result<Termination, SessionError> {
        let Session {
            mut stream,
            mut source,
            period,
            quit_byte,
            ..
        } = self;

        // The greeting goes out before the watcher exists. If it fails, there's
        // nothing else to clean up.
        stream
            .write_all(greeting(period).as_bytes())
            .await
            .map_err(SessionError::Handshake)?;

        let (reader, mut writer) = tokio::io::split(stream);
        let (quit_sender, mut quit_receiver) = oneshot::channel();
        let watcher = tokio::task::spawn(watch_for_quit(reader, quit_byte, quit_sender));

        let result = stream_proverbs(&mut writer, &mut source, period, &mut quit_receiver).await;

        // After a write failure the watcher may still be parked in read().
        watcher.abort();
        _ = watcher.await;
        result
    }
}

async fn stream_proverbs<S: AsyncWrite>(
    writer: &mut WriteHalf<S>,
    source: &mut ProverbSource,
    period: Duration,
    quit: &mut oneshot::Receiver<Termination>,
) -> Result<Termination, SessionError> {
    // The first proverb is due one full period after the greeting, not
    // immediately.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let signal = loop {
        tokio::select! {
            biased;
            signal = &mut *quit => break signal,
            _ = ticker.tick() => {}
        }
        let line = proverb_line(source.pick());
        // A client that stops reading fills the socket buffers and parks this
        // write, so the signal is watched here too.
        let written = tokio::select! {
            biased;
            signal = &mut *quit => break signal,
            written = writer.write_all(line.as_bytes()) => written,
        };
        written.map_err(SessionError::Write)?;
    };

    let reason = signal.unwrap_or(Termination::WatcherGone);
    debug!(?reason, "termination signal received");
    // Same stalled client: give the goodbye one period, then close anyway.
    if time::timeout(period, writer.write_all(CLOSING_MESSAGE.as_bytes()))
        .await
        .is_err()
    {
        debug!("closing message timed out");
    }
    Ok(reason)
}

async fn watch_for_quit<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    quit_byte: u8,
    signal: oneshot::Sender<Termination>,
) {
    let mut byte = [0u8; 1];
    let reason = loop {
        match reader.read(&mut byte).await {
            Ok(0) => break Termination::PeerClosed,
            Ok(_) if byte[0] == quit_byte => break Termination::QuitByte,
            // Anything else the client types is ignored.
            Ok(_) => continue,
            Err(err) => break Termination::ReadFailed(err),
        }
    };
    // Sending consumes the sender, so the signal can only fire once. The
    // receiver is gone if the session already ended on a write failure.
    _ = signal.send(reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proverbs::ProverbSet;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio::net::TcpListener;

    /// Takes `budget` bytes of writes, then fails every write with a broken
    /// pipe. Reads never complete, like a client that never types anything.
    struct ScriptedStream {
        budget: usize,
        dropped: Arc<AtomicBool>,
    }

    impl ScriptedStream {
        fn new(budget: usize) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            let stream = ScriptedStream {
                budget,
                dropped: Arc::clone(&dropped),
            };
            (stream, dropped)
        }
    }

    impl AsyncRead for ScriptedStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for ScriptedStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if buf.len() > self.budget {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            self.budget -= buf.len();
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    fn session(stream: TcpStream, period: Duration) -> Session {
        let config = ServerConfig::default().with_period(period);
        let source = ProverbSource::new(ProverbSet::go_proverbs(), 1);
        Session::new(1, stream, source, &config)
    }

    async fn read_greeting(client: &mut TcpStream, period: Duration) {
        let expected = greeting(period);
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected.as_bytes());
    }

    #[test]
    fn greeting_has_header_and_instructions() {
        let text = greeting(Duration::from_secs(3));
        assert!(text.starts_with("\x1b[2J\x1b[H"));
        assert!(text.contains("=== Go Proverbs Server ==="));
        assert!(text.contains("(press 'q' to quit)"));
        assert!(text.contains("New proverb every 3 seconds:"));
        assert!(text.ends_with("\x1b[7;1H"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn period_descriptions() {
        assert_eq!(describe_period(Duration::from_secs(1)), "second");
        assert_eq!(describe_period(Duration::from_secs(3)), "3 seconds");
        assert_eq!(describe_period(Duration::from_millis(10)), "10 ms");
        assert_eq!(describe_period(Duration::from_millis(1500)), "1500 ms");
        assert_eq!(describe_period(Duration::from_micros(10)), "10 µs");
    }

    #[test]
    fn proverb_line_redraws_in_place() {
        assert_eq!(proverb_line("Don't panic."), "\r\x1b[KDon't panic.\n");
    }

    #[tokio::test]
    async fn quit_byte_ends_the_session() {
        let period = Duration::from_secs(60);
        let (mut client, server) = socket_pair().await;
        let handle = tokio::spawn(session(server, period).run());

        read_greeting(&mut client, period).await;
        // Other bytes are ignored; only the quit byte counts.
        client.write_all(b"xyq").await.unwrap();

        let reason = handle.await.unwrap().unwrap();
        assert!(matches!(reason, Termination::QuitByte), "{reason:?}");

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, CLOSING_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn peer_close_ends_the_session_without_a_proverb() {
        let period = Duration::from_secs(60);
        let (mut client, server) = socket_pair().await;
        let handle = tokio::spawn(session(server, period).run());

        read_greeting(&mut client, period).await;
        drop(client);

        let reason = time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(reason, Termination::PeerClosed), "{reason:?}");
    }

    #[tokio::test]
    async fn proverbs_arrive_on_each_tick() {
        let period = Duration::from_millis(20);
        let (mut client, server) = socket_pair().await;
        let set = ProverbSet::go_proverbs();
        let handle = tokio::spawn(session(server, period).run());

        read_greeting(&mut client, period).await;
        let mut reader = tokio::io::BufReader::new(&mut client);
        for _ in 0..3 {
            let mut line = Vec::new();
            tokio::io::AsyncBufReadExt::read_until(&mut reader, b'\n', &mut line)
                .await
                .unwrap();
            let line = String::from_utf8(line).unwrap();
            let proverb = line
                .strip_prefix("\r\x1b[K")
                .and_then(|l| l.strip_suffix('\n'))
                .unwrap();
            assert!(set.contains(proverb), "{proverb:?}");
        }
        drop(reader);
        client.write_all(b"q").await.unwrap();
        let reason = handle.await.unwrap().unwrap();
        assert!(matches!(reason, Termination::QuitByte), "{reason:?}");
    }

    #[tokio::test]
    async fn failed_greeting_ends_the_session_before_the_watcher() {
        let (stream, dropped) = ScriptedStream::new(0);
        let config = ServerConfig::default();
        let source = ProverbSource::new(ProverbSet::go_proverbs(), 1);

        let result = Session::new(1, stream, source, &config).run().await;
        match result {
            Err(SessionError::Handshake(err)) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected a handshake error, got {other:?}"),
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_write_ends_the_session_and_reaps_the_watcher() {
        let period = Duration::from_millis(10);
        let (stream, dropped) = ScriptedStream::new(greeting(period).len());
        let config = ServerConfig::default().with_period(period);
        let source = ProverbSource::new(ProverbSet::go_proverbs(), 1);

        let result = time::timeout(
            Duration::from_secs(5),
            Session::new(1, stream, source, &config).run(),
        )
        .await
        .expect("session kept running after a failed write");
        match result {
            Err(SessionError::Write(err)) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected a write error, got {other:?}"),
        }
        // The watcher held the read half. The stream only drops once both
        // halves are gone.
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn quit_is_seen_while_a_proverb_write_is_stuck() {
        let period = Duration::from_millis(10);
        let (mut client, server) = socket_pair().await;
        // Far bigger than the loopback socket buffers, so the first proverb
        // write can't finish while the client isn't reading.
        let huge = ProverbSet::new(["x".repeat(16 << 20)]).unwrap();
        let config = ServerConfig::default().with_period(period);
        let session = Session::new(1, server, ProverbSource::new(huge, 1), &config);
        let handle = tokio::spawn(session.run());

        read_greeting(&mut client, period).await;
        time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());

        client.write_all(b"q").await.unwrap();
        let reason = time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session ignored the quit byte during a stuck write")
            .unwrap()
            .unwrap();
        assert!(matches!(reason, Termination::QuitByte), "{reason:?}");
    }
}

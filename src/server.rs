//! TCP responder.
//!
//! One task per accepted connection runs a [`Session`]: a read loop feeds
//! socket bytes through a [`FrameBuffer`], every complete frame goes to the
//! session, and the frames it answers with are queued on the connection's
//! writer task.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pesit_engine::{Config, LocalFileStore, Server};
//!
//! #[tokio::main]
//! async fn main() -> pesit_engine::Result<()> {
//!     let config = Config::load("pesit.toml")?;
//!     let store = Arc::new(LocalFileStore::new("/var/spool/pesit"));
//!     Server::from_config(&config, store).run().await
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PesitError, Result};
use crate::protocol::FrameBuffer;
use crate::session::{Session, SessionEnv, SessionState, Step};
use crate::store::FileStore;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Accepts connections and runs one session per connection.
pub struct Server {
    env: Arc<SessionEnv>,
    slots: Arc<Semaphore>,
    max_connections: usize,
    next_id: AtomicU8,
    writer_config: WriterConfig,
}

impl Server {
    pub fn new(env: SessionEnv) -> Self {
        let max_connections = env.server.max_connections;
        Self {
            env: Arc::new(env),
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            next_id: AtomicU8::new(0),
            writer_config: WriterConfig::default(),
        }
    }

    /// Server for `config`, with partners and files from the config and no
    /// transfer sink.
    pub fn from_config(config: &Config, store: Arc<dyn FileStore>) -> Self {
        Self::new(SessionEnv::new(config, store))
    }

    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    pub fn env(&self) -> &Arc<SessionEnv> {
        &self.env
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.slots.available_permits()
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.env.server.listen).await?;
        info!(addr = %listener.local_addr()?, server_id = %self.env.server.server_id, "listening");
        Ok(listener)
    }

    /// Bind and serve forever.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down listener");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                        warn!(
                            %peer,
                            limit = self.max_connections,
                            "connection limit reached, dropping"
                        );
                        continue;
                    };
                    stream.set_nodelay(true).ok();

                    let id = self.next_connection_id();
                    let env = self.env.clone();
                    let writer_config = self.writer_config.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        info!(conn = id, %peer, "connection opened");
                        match serve_connection(stream, id, env, writer_config).await {
                            Ok(()) => info!(conn = id, "connection closed"),
                            Err(e) => warn!(conn = id, error = %e, "connection ended"),
                        }
                    });
                }
            }
        }
    }

    /// Connection ids run 1..=255 and wrap.
    fn next_connection_id(&self) -> u8 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Run one session over `stream` until it closes.
///
/// Returns `Ok` once the session ended with RELCONF, RCONNECT or ABORT and
/// the final frame was written. A timeout, reset or early close counts as a
/// transport fault: the session marks its transfer interrupted and the
/// error is returned.
pub async fn serve_connection<S>(
    stream: S,
    id: u8,
    env: Arc<SessionEnv>,
    writer_config: WriterConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let read_timeout = env.server.read_timeout;
    let (mut reader, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer_task(write_half, writer_config);
    let mut session = Session::new(id, env);

    let result = read_loop(&mut reader, &mut session, &writer, read_timeout).await;
    if result.is_err() && session.state() != SessionState::Disconnected {
        session.on_transport_fault();
    }

    // let the writer drain before the socket goes away
    drop(writer);
    match writer_task.await {
        Ok(Err(e)) => debug!(conn = id, error = %e, "writer stopped"),
        Err(e) => warn!(conn = id, error = %e, "writer task failed"),
        Ok(Ok(())) => {}
    }
    result
}

async fn read_loop<R>(
    reader: &mut R,
    session: &mut Session,
    writer: &WriterHandle,
    read_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match tokio::time::timeout(read_timeout, reader.read(&mut buf)).await {
            Err(_) => return Err(PesitError::Timeout),
            Ok(Ok(0)) => return Err(PesitError::ConnectionClosed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(PesitError::Io(e)),
        };

        let complete = match frames.push(&buf[..n]) {
            Ok(complete) => complete,
            Err(e) => {
                warn!(conn = session.local_id(), error = %e, "framing error");
                let step = session.on_framing_error();
                writer.send_all(&step.into_frames()).await?;
                return Ok(());
            }
        };

        for frame in complete {
            match session.process_frame(&frame) {
                Step::Reply(replies) => writer.send_all(&replies).await?,
                Step::Await => {}
                Step::Close(last) => {
                    if let Some(last) = last {
                        writer.send_fpdu(&last).await?;
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{pi, FpduKind};
    use crate::directory::Partner;
    use crate::journal::{EventKind, MemoryJournal};
    use crate::protocol::{codec, ConnectBuilder, CreateBuilder, Fpdu, Leaf};
    use crate::store::MemoryFileStore;
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn env(journal: Arc<MemoryJournal>) -> Arc<SessionEnv> {
        let mut config = Config::default();
        config.partners = vec![Partner::new("LOOP")];
        config.server.read_timeout = Duration::from_secs(5);
        Arc::new(SessionEnv::new(&config, Arc::new(MemoryFileStore::new())).with_sink(journal))
    }

    async fn send(stream: &mut DuplexStream, fpdu: Fpdu) {
        stream.write_all(&codec::encode(&fpdu).unwrap()).await.unwrap();
    }

    async fn recv(stream: &mut DuplexStream, buffer: &mut FrameBuffer) -> Fpdu {
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed");
            if let Some(frame) = buffer.push(&buf[..n]).unwrap().first() {
                return codec::decode(frame).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_connect_and_release() {
        let (mut client, server) = duplex(64 * 1024);
        let journal = Arc::new(MemoryJournal::new());
        let task = tokio::spawn(serve_connection(server, 9, env(journal), WriterConfig::default()));
        let mut buffer = FrameBuffer::new();

        send(&mut client, ConnectBuilder::new("LOOP", "PESIT_SERVER").build(2)).await;
        let ack = recv(&mut client, &mut buffer).await;
        assert_eq!(ack.kind(), FpduKind::Aconnect);
        assert_eq!((ack.src(), ack.dst()), (9, 2));

        let release = Fpdu::new(FpduKind::Release)
            .with_ids(9, 2)
            .with_diagnostic(crate::diagnostic::Diagnostic::SUCCESS);
        send(&mut client, release).await;
        assert_eq!(recv(&mut client, &mut buffer).await.kind(), FpduKind::Relconf);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_refused_connect_closes() {
        let (mut client, server) = duplex(4096);
        let journal = Arc::new(MemoryJournal::new());
        let task = tokio::spawn(serve_connection(server, 1, env(journal), WriterConfig::default()));
        let mut buffer = FrameBuffer::new();

        send(&mut client, ConnectBuilder::new("LOOP", "ELSEWHERE").build(2)).await;
        let refusal = recv(&mut client, &mut buffer).await;
        assert_eq!(refusal.kind(), FpduKind::Rconnect);
        assert_eq!(refusal.leaf(pi::DIAGNOSTIC).unwrap().value().as_ref(), &[2, 0, 7]);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_bad_length_prefix_aborts() {
        let (mut client, server) = duplex(4096);
        let journal = Arc::new(MemoryJournal::new());
        let task = tokio::spawn(serve_connection(server, 1, env(journal), WriterConfig::default()));
        let mut buffer = FrameBuffer::new();

        send(&mut client, ConnectBuilder::new("LOOP", "PESIT_SERVER").build(2)).await;
        recv(&mut client, &mut buffer).await;
        client.write_all(&[0, 3, 0, 0]).await.unwrap();
        let abort = recv(&mut client, &mut buffer).await;
        assert_eq!(abort.kind(), FpduKind::Abort);
        assert_eq!(abort.diagnostic(), Some(crate::diagnostic::Diagnostic::D3_311));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_interrupts_transfer() {
        let journal = Arc::new(MemoryJournal::new());
        let (mut client, server) = duplex(64 * 1024);
        let config = WriterConfig::default();
        let task = tokio::spawn(serve_connection(server, 1, env(journal.clone()), config));
        let mut buffer = FrameBuffer::new();

        send(&mut client, ConnectBuilder::new("LOOP", "PESIT_SERVER").build(2)).await;
        recv(&mut client, &mut buffer).await;
        send(&mut client, CreateBuilder::new("FILE").build().with_ids(1, 0)).await;
        recv(&mut client, &mut buffer).await;
        send(&mut client, Fpdu::new(FpduKind::Open).with_ids(1, 0)).await;
        recv(&mut client, &mut buffer).await;
        send(&mut client, Fpdu::new(FpduKind::Write).with_ids(1, 0)).await;
        recv(&mut client, &mut buffer).await;
        let article = Fpdu::data_frame(FpduKind::Dtf, Bytes::from_static(b"abc")).with_ids(1, 0);
        send(&mut client, article).await;
        let sync = Fpdu::new(FpduKind::Syn)
            .with_ids(1, 0)
            .with(Leaf::numeric(pi::SYNC_NUMBER, 1));
        send(&mut client, sync).await;
        recv(&mut client, &mut buffer).await;

        let result = task.await.unwrap();
        assert!(matches!(result, Err(PesitError::Timeout)));
        let last = journal.last().unwrap();
        assert_eq!(last.kind, EventKind::Interrupted);
        assert_eq!(last.checkpoint.unwrap().bytes, 3);
    }

    #[tokio::test]
    async fn test_connection_ids_wrap_past_zero() {
        let env = SessionEnv::new(&Config::default(), Arc::new(MemoryFileStore::new()));
        let server = Server::new(env);
        assert_eq!(server.next_connection_id(), 1);
        server.next_id.store(254, Ordering::Relaxed);
        assert_eq!(server.next_connection_id(), 255);
        assert_eq!(server.next_connection_id(), 1);
        assert_eq!(server.active_connections(), 0);
    }
}

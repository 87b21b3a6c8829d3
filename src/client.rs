//! Requester side: connect to a PeSIT server and run transfers.
//!
//! The [`ClientBuilder`] holds connect options; [`ClientBuilder::connect`]
//! runs the CONNECT exchange over any byte stream and returns a [`Client`].
//! Each high-level call runs a complete request/acknowledgment sequence and
//! fails with [`PesitError::Rejected`] when the server refuses a step.
//!
//! # Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use pesit_engine::protocol::CreateBuilder;
//! use pesit_engine::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> pesit_engine::Result<()> {
//!     let mut client = ClientBuilder::new("LOOP", "PESIT_SERVER")
//!         .sync_points(16, 4)
//!         .connect_tcp("127.0.0.1:5000")
//!         .await?;
//!
//!     let outcome = client
//!         .send_file(CreateBuilder::new("PAYROLL"), Bytes::from_static(b"..."))
//!         .await?;
//!     println!("sent {} bytes", outcome.bytes);
//!
//!     client.release().await
//! }
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{pgi, pi, FpduKind};
use crate::diagnostic::Diagnostic;
use crate::error::{PesitError, Result};
use crate::protocol::{
    codec, AccessType, ConnectBuilder, CreateBuilder, Fpdu, FrameBuffer, Group, Leaf, SelectBuilder,
    MAX_FRAME_SIZE,
};
use crate::session::{chunk, chunk_limit, split_articles, Direction};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default wait for any single response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest message text sent in a single MSG; longer text is segmented.
pub const MAX_MESSAGE_SEGMENT: usize = 4096;

/// Connect options for a requester.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    requestor: String,
    server_id: String,
    password: Option<String>,
    version: u16,
    access: AccessType,
    sync: Option<(u16, u8)>,
    resync: bool,
    max_entity_size: usize,
    connection_id: u8,
    read_timeout: Duration,
    writer_config: WriterConfig,
}

impl ClientBuilder {
    pub fn new(requestor: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            requestor: requestor.into(),
            server_id: server_id.into(),
            password: None,
            version: 2,
            access: AccessType::Mixed,
            sync: None,
            resync: false,
            max_entity_size: MAX_FRAME_SIZE,
            connection_id: 1,
            read_timeout: DEFAULT_READ_TIMEOUT,
            writer_config: WriterConfig::default(),
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Access requested at CONNECT. Default: [`AccessType::Mixed`].
    pub fn access(mut self, access: AccessType) -> Self {
        self.access = access;
        self
    }

    /// Offer a sync point every `interval_kb` KiB while sending.
    pub fn sync_points(mut self, interval_kb: u16, window: u8) -> Self {
        self.sync = Some((interval_kb, window));
        self
    }

    pub fn resync(mut self, enabled: bool) -> Self {
        self.resync = enabled;
        self
    }

    /// Upper bound for data frames we send, whatever the server accepts.
    pub fn max_entity_size(mut self, size: usize) -> Self {
        self.max_entity_size = size;
        self
    }

    /// Our id in session-level frames. Default: 1.
    pub fn connection_id(mut self, id: u8) -> Self {
        self.connection_id = id;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Open a TCP connection and connect over it.
    pub async fn connect_tcp(self, addr: impl ToSocketAddrs) -> Result<Client<TcpStream>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        self.connect(stream).await
    }

    /// Run CONNECT over `stream`.
    ///
    /// An RCONNECT comes back as [`PesitError::Rejected`] with its diagnostic.
    pub async fn connect<S>(self, stream: S) -> Result<Client<S>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, self.writer_config.clone());

        let mut connect = ConnectBuilder::new(&self.requestor, &self.server_id)
            .version(self.version)
            .access(self.access)
            .resync(self.resync);
        if let Some(password) = &self.password {
            connect = connect.password(password);
        }
        if let Some((interval, window)) = self.sync {
            connect = connect.sync_points(interval, window);
        }

        let mut client = Client {
            reader,
            writer,
            writer_task,
            frames: FrameBuffer::new(),
            inbound: VecDeque::new(),
            read_timeout: self.read_timeout,
            local_id: self.connection_id,
            max_entity_size: self.max_entity_size,
            server_id: 0,
            version: self.version,
            sync_interval: 0,
            resync: false,
        };
        client.writer.send_fpdu(&connect.build(self.connection_id)).await?;

        let reply = client.recv().await?;
        match reply.kind() {
            FpduKind::Aconnect => {}
            FpduKind::Rconnect => {
                return Err(PesitError::Rejected(reply.diagnostic().unwrap_or(Diagnostic::D3_399)));
            }
            other => return Err(PesitError::Protocol(format!("expected ACONNECT, got {other}"))),
        }

        client.server_id = reply.src();
        client.version = reply.number(pi::VERSION).unwrap_or(self.version as u64) as u16;
        if let Some(value) = reply.leaf(pi::SYNC_POINTS).map(|leaf| leaf.value().clone()) {
            if value.len() == 3 {
                client.sync_interval = u16::from_be_bytes([value[0], value[1]]);
            }
        }
        client.resync = reply.flag(pi::RESYNC) == Some(1);

        info!(
            requestor = %self.requestor,
            server = %self.server_id,
            version = client.version,
            sync_interval_kb = client.sync_interval,
            "connected"
        );
        Ok(client)
    }
}

/// How a transfer ended.
///
/// A refusal by the server (a non-zero diagnostic or an ABORT) is reported
/// here with `success == false`; the counters then hold what was exchanged
/// before the refusal. Transport faults are returned as errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub direction: Direction,
    pub bytes: u64,
    pub records: u64,
    /// Sync point the data phase started from (0 for a fresh transfer).
    pub restart_point: u32,
    pub diagnostic: Diagnostic,
}

impl TransferOutcome {
    fn new(direction: Direction) -> Self {
        Self {
            success: false,
            direction,
            bytes: 0,
            records: 0,
            restart_point: 0,
            diagnostic: Diagnostic::SUCCESS,
        }
    }

    /// Fold a step's result into the outcome; rejections are absorbed.
    fn settle(mut self, result: Result<Diagnostic>) -> Result<Self> {
        match result {
            Ok(diag) => {
                self.success = true;
                self.diagnostic = diag;
                Ok(self)
            }
            Err(PesitError::Rejected(diag)) => {
                warn!(direction = ?self.direction, bytes = self.bytes, %diag, "transfer refused");
                self.diagnostic = diag;
                Ok(self)
            }
            Err(e) => Err(e),
        }
    }
}

/// A connected requester.
pub struct Client<S> {
    reader: ReadHalf<S>,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    frames: FrameBuffer,
    inbound: VecDeque<Fpdu>,
    read_timeout: Duration,
    local_id: u8,
    max_entity_size: usize,
    server_id: u8,
    version: u16,
    sync_interval: u16,
    resync: bool,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Server's connection id, from ACONNECT.
    pub fn server_id(&self) -> u8 {
        self.server_id
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Sync interval agreed at CONNECT, in KiB. 0 when no sync points.
    pub fn sync_interval_kb(&self) -> u16 {
        self.sync_interval
    }

    pub fn resync_enabled(&self) -> bool {
        self.resync
    }

    /// Send a file: CREATE, OPEN, WRITE, data, TRANS_END, CLOSE, DESELECT.
    ///
    /// With a `restarted` CREATE the server answers WRITE with the sync point
    /// it holds; sending resumes from the matching offset in `content`.
    pub async fn send_file(
        &mut self,
        create: CreateBuilder,
        content: Bytes,
    ) -> Result<TransferOutcome> {
        let mut outcome = TransferOutcome::new(Direction::Send);
        let result = self.write_file(create, content, &mut outcome).await;
        outcome.settle(result)
    }

    async fn write_file(
        &mut self,
        create: CreateBuilder,
        content: Bytes,
        outcome: &mut TransferOutcome,
    ) -> Result<Diagnostic> {
        let create = create.build();
        let record_length = create.number(pi::ARTICLE_LENGTH).unwrap_or(0) as usize;
        let ack = self.request(create).await?;
        let max_entity = ack
            .number(pi::MAX_ENTITY_SIZE)
            .map_or(self.max_entity_size, |n| (n as usize).min(self.max_entity_size));

        self.request(Fpdu::new(FpduKind::Open)).await?;
        let ack = self.request(Fpdu::new(FpduKind::Write)).await?;
        let restart_point = ack.number(pi::RESTART_POINT).unwrap_or(0) as u32;
        outcome.restart_point = restart_point;

        let limit = chunk_limit(max_entity, record_length);
        let interval = self.sync_interval as u64 * 1024;
        let marks = sync_marks(content.len() as u64, limit, interval);
        let (start, records) = match restart_point {
            0 => (0, 0),
            point => marks
                .get(point as usize - 1)
                .copied()
                .ok_or_else(|| {
                    PesitError::Protocol(format!("server restarts from unknown sync point {point}"))
                })?,
        };
        outcome.bytes = start;
        outcome.records = records;
        debug!(restart_point, start, limit, "sending data");

        let mut sync_point = restart_point;
        let mut since_sync = 0u64;
        for piece in chunk(&content.slice(start as usize..), limit) {
            let len = piece.len() as u64;
            self.send(Fpdu::data_frame(FpduKind::Dtf, piece)).await?;
            outcome.bytes += len;
            outcome.records += 1;
            since_sync += len;
            if interval > 0 && since_sync >= interval {
                sync_point += 1;
                let syn = Fpdu::new(FpduKind::Syn)
                    .with(Leaf::numeric(pi::SYNC_NUMBER, sync_point as u64));
                self.request(syn).await?;
                since_sync = 0;
            }
        }
        self.send(Fpdu::new(FpduKind::DtfEnd).with_diagnostic(Diagnostic::SUCCESS)).await?;

        let diag = self.end_transfer(outcome).await?;
        info!(bytes = outcome.bytes, records = outcome.records, restart_point, "file sent");
        Ok(diag)
    }

    /// Fetch a file: SELECT, OPEN, READ, data until DTF_END, TRANS_END,
    /// CLOSE, DESELECT.
    ///
    /// The content is empty when the server refused the transfer.
    pub async fn receive_file(
        &mut self,
        select: SelectBuilder,
    ) -> Result<(Bytes, TransferOutcome)> {
        let mut outcome = TransferOutcome::new(Direction::Receive);
        let mut content = BytesMut::new();
        let result = self.read_file(select, &mut content, &mut outcome).await;
        let outcome = outcome.settle(result)?;
        let content = if outcome.success { content.freeze() } else { Bytes::new() };
        Ok((content, outcome))
    }

    async fn read_file(
        &mut self,
        select: SelectBuilder,
        content: &mut BytesMut,
        outcome: &mut TransferOutcome,
    ) -> Result<Diagnostic> {
        self.request(select.build()).await?;
        self.request(Fpdu::new(FpduKind::Open)).await?;
        let read = Fpdu::new(FpduKind::Read).with(Leaf::numeric(pi::RESTART_POINT, 0));
        self.request(read).await?;

        loop {
            let fpdu = self.recv().await?;
            match fpdu.kind() {
                FpduKind::DtfMa => {
                    let articles = split_articles(fpdu.data()).map_err(PesitError::Rejected)?;
                    outcome.records += articles.len() as u64;
                    for article in articles {
                        content.extend_from_slice(article);
                    }
                }
                FpduKind::DtfDa => content.extend_from_slice(fpdu.data()),
                FpduKind::Dtf | FpduKind::DtfFa => {
                    outcome.records += 1;
                    content.extend_from_slice(fpdu.data());
                }
                FpduKind::DtfEnd => break,
                FpduKind::Abort => return Err(rejection(&fpdu)),
                other => {
                    return Err(PesitError::Protocol(format!("unexpected {other} during READ")))
                }
            }
            outcome.bytes = content.len() as u64;
        }

        let diag = self.end_transfer(outcome).await?;
        info!(bytes = outcome.bytes, records = outcome.records, "file received");
        Ok(diag)
    }

    /// TRANS_END with our counts, then CLOSE and DESELECT.
    async fn end_transfer(&mut self, outcome: &TransferOutcome) -> Result<Diagnostic> {
        let end = Fpdu::new(FpduKind::TransEnd)
            .with(Leaf::numeric(pi::BYTE_COUNT, outcome.bytes))
            .with(Leaf::numeric(pi::ARTICLE_COUNT, outcome.records));
        let ack = self.request(end).await?;
        self.request(Fpdu::new(FpduKind::Close).with_diagnostic(Diagnostic::SUCCESS))
            .await?;
        self.request(Fpdu::new(FpduKind::Deselect).with_diagnostic(Diagnostic::SUCCESS))
            .await?;
        Ok(ack.diagnostic().unwrap_or(Diagnostic::SUCCESS))
    }

    /// Send a free-text message, segmented when longer than
    /// [`MAX_MESSAGE_SEGMENT`].
    pub async fn send_message(&mut self, transfer_id: u32, text: &str) -> Result<()> {
        let header = |kind: FpduKind, segment: &str| {
            Fpdu::new(kind)
                .with(
                    Group::new(pgi::FILE_ID)
                        .with(Leaf::numeric(pi::FILE_TYPE, 0))
                        .with(Leaf::text(pi::FILENAME, "MESSAGE")),
                )
                .with(Leaf::numeric(pi::TRANSFER_ID, transfer_id as u64))
                .with(Leaf::text(pi::MESSAGE, segment))
        };

        let segments = split_text(text, MAX_MESSAGE_SEGMENT);
        if segments.len() <= 1 {
            self.request(header(FpduKind::Msg, text)).await?;
            return Ok(());
        }

        let last = segments.len() - 1;
        for (i, segment) in segments.into_iter().enumerate() {
            let fpdu = match i {
                0 => header(FpduKind::MsgDm, segment),
                i if i == last => Fpdu::new(FpduKind::MsgFm).with(Leaf::text(pi::MESSAGE, segment)),
                _ => Fpdu::new(FpduKind::MsgMm).with(Leaf::text(pi::MESSAGE, segment)),
            };
            if i == last {
                self.expect(FpduKind::MsgFm, fpdu).await?;
            } else {
                self.send(fpdu).await?;
            }
        }
        Ok(())
    }

    /// RELEASE and wait for RELCONF, then close the connection.
    pub async fn release(mut self) -> Result<()> {
        let release = Fpdu::new(FpduKind::Release)
            .with_ids(self.server_id, self.local_id)
            .with_diagnostic(Diagnostic::SUCCESS);
        self.writer.send_fpdu(&release).await?;
        let reply = self.recv().await?;
        match reply.kind() {
            FpduKind::Relconf => {}
            FpduKind::Abort => return Err(rejection(&reply)),
            other => return Err(PesitError::Protocol(format!("expected RELCONF, got {other}"))),
        }
        self.shutdown().await
    }

    /// Send ABORT with `diag` and close the connection.
    pub async fn abort(self, diag: Diagnostic) -> Result<()> {
        let abort = Fpdu::new(FpduKind::Abort)
            .with_ids(self.server_id, self.local_id)
            .with_diagnostic(diag);
        self.writer.send_fpdu(&abort).await?;
        self.shutdown().await
    }

    async fn shutdown(self) -> Result<()> {
        let Client {
            writer, writer_task, ..
        } = self;
        drop(writer);
        writer_task
            .await
            .map_err(|e| PesitError::Protocol(format!("writer task failed: {e}")))?
    }

    /// Send a file-level frame addressed to the server.
    async fn send(&self, fpdu: Fpdu) -> Result<()> {
        self.writer.send_fpdu(&fpdu.with_ids(self.server_id, 0)).await
    }

    /// Send a request and wait for its acknowledgment.
    async fn request(&mut self, fpdu: Fpdu) -> Result<Fpdu> {
        let kind = fpdu.kind();
        self.expect(kind, fpdu).await
    }

    /// Send `fpdu` and wait for the acknowledgment `request` calls for.
    ///
    /// ABORT, an unexpected type or a non-zero diagnostic fail the call.
    async fn expect(&mut self, request: FpduKind, fpdu: Fpdu) -> Result<Fpdu> {
        self.send(fpdu).await?;
        let reply = self.recv().await?;
        if reply.kind() == FpduKind::Abort {
            return Err(rejection(&reply));
        }
        if !request.is_expected_ack(reply.kind()) {
            return Err(PesitError::Protocol(format!(
                "expected {} after {request}, got {}",
                request.ack().map_or("nothing", FpduKind::name),
                reply.kind()
            )));
        }
        match reply.diagnostic() {
            Some(diag) if !diag.is_success() => Err(PesitError::Rejected(diag)),
            _ => Ok(reply),
        }
    }

    /// Next inbound frame.
    async fn recv(&mut self) -> Result<Fpdu> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(fpdu) = self.inbound.pop_front() {
                debug!(fpdu = %fpdu.kind(), "inbound");
                return Ok(fpdu);
            }
            let n = tokio::time::timeout(self.read_timeout, self.reader.read(&mut buf))
                .await
                .map_err(|_| PesitError::Timeout)??;
            if n == 0 {
                return Err(PesitError::ConnectionClosed);
            }
            for frame in self.frames.push(&buf[..n])? {
                self.inbound.push_back(codec::decode(&frame)?);
            }
        }
    }
}

fn rejection(abort: &Fpdu) -> PesitError {
    PesitError::Rejected(abort.diagnostic().unwrap_or(Diagnostic::D3_399))
}

/// `(bytes, records)` at each sync point when `total` bytes are sent in
/// pieces of `limit`, with a sync point once `interval` bytes accumulated.
fn sync_marks(total: u64, limit: usize, interval: u64) -> Vec<(u64, u64)> {
    let mut marks = Vec::new();
    if interval == 0 {
        return marks;
    }
    let limit = limit.max(1) as u64;
    let (mut sent, mut records, mut since_sync) = (0u64, 0u64, 0u64);
    while sent < total {
        let piece = limit.min(total - sent);
        sent += piece;
        records += 1;
        since_sync += piece;
        if since_sync >= interval {
            marks.push((sent, records));
            since_sync = 0;
        }
    }
    marks
}

/// Split `text` into pieces of at most `max` bytes on char boundaries.
fn split_text(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}

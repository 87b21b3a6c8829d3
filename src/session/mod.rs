//! Responder-side session engine.
//!
//! A [`Session`] consumes one inbound FPDU at a time and answers with the
//! frames to send. Every inbound frame is checked in the same order:
//!
//! 1. ABORT ends the session whatever the state.
//! 2. Mandatory parameters of the type must be present (else D3-318).
//! 3. The `(state, type)` pair must have a row in [`TRANSITIONS`] (else D3-311).
//! 4. The row's action runs its semantic checks.
//! 5. Only then does the state advance and the acknowledgment go out.
//!
//! Any failure ends the session: RCONNECT before a connection is accepted,
//! ABORT afterwards, both carrying the diagnostic.
//!
//! The engine does no I/O on the transport. File content goes through the
//! [`FileStore`] and lifecycle events through the [`TransferSink`], both held
//! by the shared [`SessionEnv`].

mod chunk;
mod context;
mod state;
mod transitions;
pub mod validator;

use std::sync::Arc;

use bytes::Bytes;
use chrono::{Local, Utc};
use tracing::{debug, info, warn};

use crate::catalog::{pgi, pi, FpduKind};
use crate::config::{Config, ServerConfig, TransferConfig};
use crate::diagnostic::Diagnostic;
use crate::directory::{expand_template, FileDirectory, Partner, PartnerDirectory, VirtualFile};
use crate::error::PesitError;
use crate::journal::{EventKind, NullSink, TransferEvent, TransferSink};
use crate::protocol::{codec, AccessType, Fpdu, Group, Leaf, RecordFormat};
use crate::store::FileStore;

pub use chunk::{chunk, chunk_limit, join_articles, split_articles};
pub use context::{Direction, SyncMark, TransferContext};
pub use state::SessionState;
pub use transitions::{lookup, Action, Transition, TRANSITIONS};

/// Everything a session needs besides its own state.
///
/// Built once and shared by every connection of a server.
pub struct SessionEnv {
    pub server: ServerConfig,
    pub transfer: TransferConfig,
    pub partners: Arc<dyn PartnerDirectory>,
    pub files: Arc<dyn FileDirectory>,
    pub store: Arc<dyn FileStore>,
    pub sink: Arc<dyn TransferSink>,
}

impl SessionEnv {
    /// Environment with the partners and files listed in `config`, and no sink.
    pub fn new(config: &Config, store: Arc<dyn FileStore>) -> Self {
        let directory = Arc::new(config.directory());
        Self {
            server: config.server.clone(),
            transfer: config.transfer.clone(),
            partners: directory.clone(),
            files: directory,
            store,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TransferSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_partners(mut self, partners: Arc<dyn PartnerDirectory>) -> Self {
        self.partners = partners;
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileDirectory>) -> Self {
        self.files = files;
        self
    }
}

/// What the connection should do after a frame was processed.
#[derive(Debug)]
pub enum Step {
    /// Send these frames, in order, and keep reading.
    Reply(Vec<Fpdu>),
    /// Nothing to send; keep reading.
    Await,
    /// Send the frame if any, then close the connection.
    Close(Option<Fpdu>),
}

impl Step {
    pub fn is_close(&self) -> bool {
        matches!(self, Step::Close(_))
    }

    /// Frames to send, in order.
    pub fn into_frames(self) -> Vec<Fpdu> {
        match self {
            Step::Reply(frames) => frames,
            Step::Await => Vec::new(),
            Step::Close(frame) => frame.into_iter().collect(),
        }
    }
}

/// Options settled at CONNECT.
#[derive(Debug, Clone, Copy, Default)]
struct Negotiated {
    sync: bool,
    sync_interval_kb: u16,
    sync_window: u8,
    resync: bool,
}

/// Segmented message being reassembled.
#[derive(Debug)]
struct PendingMessage {
    transfer_id: Option<u64>,
    text: String,
}

type Outcome = Result<Step, Diagnostic>;

/// State of one connection, from CONNECT to RELEASE or ABORT.
pub struct Session {
    env: Arc<SessionEnv>,
    local_id: u8,
    peer_id: u8,
    state: SessionState,
    version: u16,
    requestor: String,
    partner: Option<Partner>,
    access: AccessType,
    negotiated: Negotiated,
    transfer: Option<TransferContext>,
    message: Option<PendingMessage>,
}

impl Session {
    /// New session; `local_id` is the connection id we put in session-level
    /// frames.
    pub fn new(local_id: u8, env: Arc<SessionEnv>) -> Self {
        Self {
            env,
            local_id,
            peer_id: 0,
            state: SessionState::Disconnected,
            version: 0,
            requestor: String::new(),
            partner: None,
            access: AccessType::Write,
            negotiated: Negotiated::default(),
            transfer: None,
            message: None,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Active transfer, or the last one if the session ended during it.
    #[inline]
    pub fn transfer(&self) -> Option<&TransferContext> {
        self.transfer.as_ref()
    }

    /// Negotiated protocol version (0 before CONNECT).
    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[inline]
    pub fn local_id(&self) -> u8 {
        self.local_id
    }

    #[inline]
    pub fn peer_id(&self) -> u8 {
        self.peer_id
    }

    /// Requestor identification from CONNECT.
    pub fn requestor(&self) -> &str {
        &self.requestor
    }

    /// Decode and process one complete frame.
    ///
    /// A frame that does not decode leaves the stream untrustworthy, so it
    /// always ends the session with ABORT D3-311.
    pub fn process_frame(&mut self, frame: &[u8]) -> Step {
        match codec::decode(frame) {
            Ok(fpdu) => self.process(fpdu),
            Err(e) => {
                warn!(conn = self.local_id, error = %e, "undecodable frame");
                self.on_framing_error()
            }
        }
    }

    /// The byte stream cannot be split into frames any more.
    pub fn on_framing_error(&mut self) -> Step {
        self.terminate(FpduKind::Abort, Diagnostic::D3_311)
    }

    /// Process one decoded frame.
    pub fn process(&mut self, fpdu: Fpdu) -> Step {
        let kind = fpdu.kind();
        debug!(conn = self.local_id, state = %self.state, fpdu = %kind, "inbound");

        if kind == FpduKind::Abort {
            return self.on_abort(&fpdu);
        }

        if let Some(id) = fpdu.missing_mandatory() {
            warn!(conn = self.local_id, fpdu = %kind, pi = id, "mandatory parameter missing");
            return self.reject(Diagnostic::D3_318);
        }
        if let Some(id) = fpdu.oversized_parameter() {
            warn!(conn = self.local_id, fpdu = %kind, pi = id, "parameter longer than its width");
            return self.reject(Diagnostic::D3_318);
        }

        let Some(transition) = lookup(self.state, kind) else {
            warn!(conn = self.local_id, state = %self.state, fpdu = %kind, "out of sequence");
            return self.reject(Diagnostic::D3_311);
        };

        match self.dispatch(transition.action, &fpdu) {
            Ok(step) => {
                if self.state != transition.to {
                    debug!(
                        conn = self.local_id,
                        from = %self.state,
                        to = %transition.to,
                        "transition"
                    );
                }
                self.state = transition.to;
                step
            }
            Err(diag) => {
                warn!(
                    conn = self.local_id,
                    partner = %self.requestor,
                    fpdu = %kind,
                    diagnostic = %diag,
                    "request refused"
                );
                self.reject(diag)
            }
        }
    }

    /// The transport failed (timeout, reset, I/O error).
    ///
    /// No frame can be sent. A transfer in progress is marked interrupted so
    /// it can resume from its last sync point.
    pub fn on_transport_fault(&mut self) {
        let interrupted = match self.transfer.as_mut() {
            Some(ctx) if !ctx.is_completed() && !ctx.is_interrupted() => {
                ctx.set_interrupted();
                true
            }
            _ => false,
        };
        if interrupted {
            info!(
                conn = self.local_id,
                partner = %self.requestor,
                "transfer interrupted by transport fault"
            );
            self.emit(EventKind::Interrupted, None);
        }
        self.state = SessionState::Disconnected;
        self.message = None;
    }

    fn dispatch(&mut self, action: Action, fpdu: &Fpdu) -> Outcome {
        match action {
            Action::Connect => self.on_connect(fpdu),
            Action::Release => self.on_release(),
            Action::Abort => Ok(self.on_abort(fpdu)),
            Action::Create => self.on_create(fpdu),
            Action::Select => self.on_select(fpdu),
            Action::Deselect => self.on_deselect(),
            Action::Open => self.on_open(),
            Action::Close => self.on_close(),
            Action::Write => self.on_write(),
            Action::Read => self.on_read(fpdu),
            Action::Data => self.on_data(fpdu),
            Action::DataEnd => self.on_data_end(),
            Action::TransEnd => self.on_trans_end(fpdu),
            Action::Sync => self.on_sync(fpdu),
            Action::Resync => self.on_resync(fpdu),
            Action::Interrupt => self.on_interrupt(),
            Action::Message => self.on_message(fpdu),
            Action::MessageStart => self.on_message_start(fpdu),
            Action::MessagePart => self.on_message_part(fpdu),
            Action::MessageEnd => self.on_message_end(fpdu),
        }
    }

    // ---- frame helpers ----

    fn session_frame(&self, kind: FpduKind) -> Fpdu {
        Fpdu::new(kind).with_ids(self.peer_id, self.local_id)
    }

    fn file_frame(&self, kind: FpduKind) -> Fpdu {
        Fpdu::new(kind).with_ids(self.peer_id, 0)
    }

    fn data_frame(&self, payload: Bytes) -> Fpdu {
        Fpdu::data_frame(FpduKind::Dtf, payload).with_ids(self.peer_id, 0)
    }

    /// Refuse the current frame and end the session.
    fn reject(&mut self, diag: Diagnostic) -> Step {
        let kind = if self.state == SessionState::Disconnected {
            FpduKind::Rconnect
        } else {
            FpduKind::Abort
        };
        self.terminate(kind, diag)
    }

    fn terminate(&mut self, kind: FpduKind, diag: Diagnostic) -> Step {
        self.fail_transfer(diag);
        self.state = SessionState::Disconnected;
        self.message = None;
        Step::Close(Some(self.session_frame(kind).with_diagnostic(diag)))
    }

    fn fail_transfer(&mut self, diag: Diagnostic) {
        if self.transfer.as_ref().is_some_and(|ctx| !ctx.is_completed()) {
            self.emit(EventKind::Failed, Some(diag));
        }
    }

    /// Report a lifecycle step of the current transfer.
    ///
    /// Sink failures are logged and otherwise ignored.
    fn emit(&self, kind: EventKind, diagnostic: Option<Diagnostic>) {
        let Some(ctx) = &self.transfer else {
            return;
        };
        let checkpoint = match kind {
            EventKind::Interrupted | EventKind::Failed => ctx.checkpoint(&self.requestor),
            _ => None,
        };
        let event = TransferEvent {
            at: Utc::now(),
            kind,
            partner: self.requestor.clone(),
            transfer_id: ctx.transfer_id,
            filename: ctx.filename.clone(),
            direction: ctx.direction,
            bytes: ctx.bytes(),
            records: ctx.records(),
            sync_point: ctx.current_sync(),
            diagnostic,
            checkpoint,
        };
        if let Err(e) = self.env.sink.record(&event) {
            warn!(conn = self.local_id, error = %e, "transfer sink failed");
        }
    }

    fn transfer_mut(&mut self) -> Result<&mut TransferContext, Diagnostic> {
        self.transfer.as_mut().ok_or(Diagnostic::D3_311)
    }

    // ---- session level ----

    fn on_connect(&mut self, fpdu: &Fpdu) -> Outcome {
        let server = &self.env.server;
        let transfer = &self.env.transfer;

        let called = fpdu.text(pi::SERVER).unwrap_or_default();
        if !called.eq_ignore_ascii_case(&server.server_id) {
            return Err(Diagnostic::D2_007);
        }

        let version = fpdu.number(pi::VERSION).unwrap_or(0);
        validator::check_version(version, server.protocol_version)?;

        let requestor = fpdu.text(pi::REQUESTOR).unwrap_or_default();
        let access = fpdu
            .flag(pi::ACCESS_TYPE)
            .and_then(AccessType::from_code)
            .ok_or(Diagnostic::D3_318)?;

        let partner = self.env.partners.find_partner(&requestor);
        match &partner {
            None if server.strict_partner_check => return Err(Diagnostic::D2_001),
            None => {}
            Some(p) => {
                let password = fpdu.text(pi::ACCESS_CONTROL);
                if !p.enabled
                    || !p.password_matches(password.as_deref())
                    || !p.access.allows(access)
                {
                    return Err(Diagnostic::D3_304);
                }
            }
        }

        let mut negotiated = Negotiated {
            sync: transfer.sync_points_enabled,
            sync_interval_kb: transfer.sync_interval_kb,
            sync_window: transfer.sync_window,
            resync: false,
        };
        let mut sync_echo = None;
        if let Some(value) = fpdu.leaf(pi::SYNC_POINTS).map(|leaf| leaf.value().clone()) {
            if value.len() != 3 {
                return Err(Diagnostic::D3_318);
            }
            let requested = u16::from_be_bytes([value[0], value[1]]);
            if transfer.sync_points_enabled && requested > 0 {
                let interval = match transfer.sync_interval_kb {
                    0 => requested,
                    limit => requested.min(limit),
                };
                negotiated.sync_interval_kb = interval;
                negotiated.sync_window = value[2].min(transfer.sync_window);
                sync_echo = Some((interval, negotiated.sync_window));
            } else {
                negotiated.sync = false;
            }
        }
        negotiated.resync = transfer.resync_enabled && fpdu.flag(pi::RESYNC) == Some(1);

        self.peer_id = fpdu.src();
        self.version = version as u16;
        self.requestor = requestor;
        self.partner = partner;
        self.access = access;
        self.negotiated = negotiated;

        let mut ack = self
            .session_frame(FpduKind::Aconnect)
            .with(Leaf::numeric(pi::VERSION, version));
        if let Some((interval, window)) = sync_echo {
            let [hi, lo] = interval.to_be_bytes();
            ack = ack.with(Leaf::new(pi::SYNC_POINTS, vec![hi, lo, window]));
        }
        if negotiated.resync {
            ack = ack.with(Leaf::flag(pi::RESYNC, 1));
        }

        info!(
            conn = self.local_id,
            partner = %self.requestor,
            version = self.version,
            sync = negotiated.sync,
            resync = negotiated.resync,
            "connection accepted"
        );
        Ok(Step::Reply(vec![ack]))
    }

    fn on_release(&mut self) -> Outcome {
        info!(conn = self.local_id, partner = %self.requestor, "connection released");
        self.transfer = None;
        Ok(Step::Close(Some(self.session_frame(FpduKind::Relconf))))
    }

    fn on_abort(&mut self, fpdu: &Fpdu) -> Step {
        let diag = fpdu.diagnostic().unwrap_or(Diagnostic::D3_399);
        info!(
            conn = self.local_id,
            partner = %self.requestor,
            diagnostic = %diag,
            "aborted by peer"
        );
        self.fail_transfer(diag);
        self.state = SessionState::Disconnected;
        self.message = None;
        Step::Close(None)
    }

    // ---- file selection ----

    /// Partner and access-type rights for a transfer in `direction`.
    fn check_rights(&self, filename: &str, direction: Direction) -> validator::Check {
        let access_ok = match direction {
            Direction::Receive => self.access != AccessType::Read,
            Direction::Send => self.access != AccessType::Write,
        };
        if !access_ok {
            return Err(Diagnostic::D2_226);
        }
        if let Some(partner) = &self.partner {
            let allowed = match direction {
                Direction::Receive => partner.access.can_write(),
                Direction::Send => partner.access.can_read(),
            };
            if !allowed || !partner.can_access_file(filename) {
                return Err(Diagnostic::D2_226);
            }
        }
        Ok(())
    }

    fn resolve_file(
        &self,
        filename: &str,
        direction: Direction,
    ) -> Result<Option<VirtualFile>, Diagnostic> {
        match self.env.files.find_file(filename) {
            None if self.env.server.strict_file_check => Err(Diagnostic::D2_205),
            None => Ok(None),
            Some(file) if !file.enabled => Err(Diagnostic::D2_205),
            Some(file) => {
                let allowed = match direction {
                    Direction::Receive => file.direction.can_receive(),
                    Direction::Send => file.direction.can_send(),
                };
                if !allowed {
                    return Err(Diagnostic::D2_226);
                }
                Ok(Some(file))
            }
        }
    }

    fn negotiate_entity_size(&self, fpdu: &Fpdu) -> usize {
        let local = self.env.transfer.max_entity_size as u64;
        fpdu.number(pi::MAX_ENTITY_SIZE).unwrap_or(local).min(local) as usize
    }

    fn on_create(&mut self, fpdu: &Fpdu) -> Outcome {
        validator::check_create(fpdu)?;
        let filename = fpdu.text(pi::FILENAME).unwrap_or_default();
        let transfer_id = fpdu.number(pi::TRANSFER_ID).unwrap_or(0) as u32;
        self.check_rights(&filename, Direction::Receive)?;
        let file = self.resolve_file(&filename, Direction::Receive)?;

        let server = &self.env.server;
        let path = match &file {
            Some(vf) => vf
                .receive_directory
                .clone()
                .unwrap_or_else(|| server.receive_directory.clone())
                .join(expand_template(&vf.receive_filename, &filename, transfer_id, Local::now())),
            None => server.receive_directory.join(&filename),
        };

        let mut ctx = TransferContext::new(transfer_id, filename, Direction::Receive);
        ctx.path = path;
        ctx.overwrite = file.as_ref().is_some_and(|vf| vf.overwrite);
        ctx.format = fpdu
            .flag(pi::ARTICLE_FORMAT)
            .map(RecordFormat::from_code)
            .unwrap_or_default();
        ctx.record_length = fpdu.number(pi::ARTICLE_LENGTH).unwrap_or(0) as usize;
        ctx.max_entity_size = self.negotiate_entity_size(fpdu);
        ctx.announced_size = announced_size(fpdu, file.as_ref());

        if fpdu.flag(pi::RESTARTED) == Some(1) {
            let checkpoint = match self.env.sink.checkpoint(&self.requestor, transfer_id) {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    warn!(conn = self.local_id, error = %e, "checkpoint lookup failed");
                    None
                }
            };
            let checkpoint = checkpoint.ok_or(Diagnostic::D2_214)?;
            ctx.resume_from(&checkpoint);
        } else if !ctx.overwrite {
            match self.env.store.exists(&ctx.path) {
                Ok(false) => {}
                Ok(true) => return Err(Diagnostic::D2_204),
                Err(e) => {
                    warn!(conn = self.local_id, error = %e, "file store unavailable");
                    return Err(Diagnostic::D2_213);
                }
            }
        }

        let ack = self
            .file_frame(FpduKind::AckCreate)
            .with_diagnostic(Diagnostic::SUCCESS)
            .with(Leaf::numeric(pi::TRANSFER_ID, transfer_id as u64))
            .with(Leaf::numeric(pi::MAX_ENTITY_SIZE, ctx.max_entity_size as u64));

        info!(
            conn = self.local_id,
            partner = %self.requestor,
            transfer_id,
            file = %ctx.filename,
            path = %ctx.path.display(),
            restart_point = ctx.restart_point(),
            "file created"
        );
        self.transfer = Some(ctx);
        Ok(Step::Reply(vec![ack]))
    }

    fn on_select(&mut self, fpdu: &Fpdu) -> Outcome {
        let filename = fpdu.text(pi::FILENAME).unwrap_or_default();
        if filename.is_empty() {
            return Err(Diagnostic::D3_318);
        }
        let transfer_id = fpdu.number(pi::TRANSFER_ID).unwrap_or(0) as u32;
        self.check_rights(&filename, Direction::Send)?;
        let file = self.resolve_file(&filename, Direction::Send)?;

        let path = file
            .as_ref()
            .and_then(|vf| vf.send_directory.clone())
            .unwrap_or_else(|| self.env.server.send_directory.clone())
            .join(&filename);
        match self.env.store.exists(&path) {
            Ok(true) => {}
            Ok(false) => return Err(Diagnostic::D2_205),
            Err(e) => {
                warn!(conn = self.local_id, error = %e, "file store unavailable");
                return Err(Diagnostic::D2_213);
            }
        }
        let content = self.env.store.read(&path).map_err(|e| {
            warn!(conn = self.local_id, error = %e, "file read failed");
            Diagnostic::D2_213
        })?;
        let size = content.len() as u64;

        let mut ctx =
            TransferContext::new(transfer_id, filename, Direction::Send).with_source(content);
        ctx.path = path;
        ctx.max_entity_size = self.negotiate_entity_size(fpdu);
        ctx.record_length = chunk_limit(ctx.max_entity_size, 0);

        let file_type = file
            .as_ref()
            .and_then(|vf| vf.file_type)
            .map(u64::from)
            .or_else(|| fpdu.number(pi::FILE_TYPE))
            .unwrap_or(0);
        let ack = self
            .file_frame(FpduKind::AckSelect)
            .with_diagnostic(Diagnostic::SUCCESS)
            .with(
                Group::new(pgi::FILE_ID)
                    .with(Leaf::numeric(pi::FILE_TYPE, file_type))
                    .with(Leaf::text(pi::FILENAME, &ctx.filename)),
            )
            .with(Leaf::numeric(pi::TRANSFER_ID, transfer_id as u64))
            .with(Leaf::numeric(pi::MAX_ENTITY_SIZE, ctx.max_entity_size as u64))
            .with(
                Group::new(pgi::LOGICAL_ATTRIBUTES)
                    .with(Leaf::flag(pi::ARTICLE_FORMAT, ctx.format.code()))
                    .with(Leaf::numeric(pi::ARTICLE_LENGTH, ctx.record_length as u64)),
            )
            .with(
                Group::new(pgi::PHYSICAL_ATTRIBUTES)
                    .with(Leaf::numeric(pi::MAX_RESERVATION, size.div_ceil(1024))),
            )
            .with(
                Group::new(pgi::HISTORICAL_ATTRIBUTES)
                    .with(Leaf::date(pi::CREATION_DATE, Local::now().naive_local())),
            );

        info!(
            conn = self.local_id,
            partner = %self.requestor,
            transfer_id,
            file = %ctx.filename,
            size,
            "file selected"
        );
        self.transfer = Some(ctx);
        Ok(Step::Reply(vec![ack]))
    }

    fn on_deselect(&mut self) -> Outcome {
        self.transfer = None;
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckDeselect)
            .with_diagnostic(Diagnostic::SUCCESS)]))
    }

    fn on_open(&mut self) -> Outcome {
        validator::require_context(self.transfer.as_ref())?;
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckOpen)
            .with_diagnostic(Diagnostic::SUCCESS)]))
    }

    fn on_close(&mut self) -> Outcome {
        validator::require_context(self.transfer.as_ref())?;
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckClose)
            .with_diagnostic(Diagnostic::SUCCESS)]))
    }

    // ---- data phase ----

    fn on_write(&mut self) -> Outcome {
        let ctx = self.transfer_mut()?;
        if ctx.direction != Direction::Receive {
            return Err(Diagnostic::D3_311);
        }
        ctx.begin_data_phase();
        let restart_point = ctx.restart_point();

        debug!(conn = self.local_id, restart_point, "write started");
        self.emit(EventKind::Started, None);
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckWrite)
            .with_diagnostic(Diagnostic::SUCCESS)
            .with(Leaf::numeric(pi::RESTART_POINT, restart_point as u64))]))
    }

    /// READ: acknowledge, then stream the whole file (from the requested
    /// restart point) followed by DTF_END.
    fn on_read(&mut self, fpdu: &Fpdu) -> Outcome {
        let requested = fpdu.number(pi::RESTART_POINT).unwrap_or(0) as u32;
        let ctx = self.transfer_mut()?;
        if ctx.direction != Direction::Send {
            return Err(Diagnostic::D3_311);
        }
        ctx.begin_data_phase();
        let mark = ctx.mark(requested).ok_or(Diagnostic::D2_214)?;
        ctx.rollback(mark);

        let start = (mark.bytes as usize).min(ctx.content().len());
        let remaining = Bytes::copy_from_slice(&ctx.content()[start..]);
        let pieces = chunk(&remaining, chunk_limit(ctx.max_entity_size, ctx.record_length));
        for piece in &pieces {
            ctx.record_data(piece, 1);
        }

        let mut frames = Vec::with_capacity(pieces.len() + 2);
        frames.push(self.file_frame(FpduKind::AckRead).with_diagnostic(Diagnostic::SUCCESS));
        frames.extend(pieces.into_iter().map(|piece| self.data_frame(piece)));
        frames.push(self.file_frame(FpduKind::DtfEnd).with_diagnostic(Diagnostic::SUCCESS));

        debug!(
            conn = self.local_id,
            frames = frames.len(),
            restart_point = mark.point,
            "read served"
        );
        self.emit(EventKind::Started, None);
        Ok(Step::Reply(frames))
    }

    fn on_data(&mut self, fpdu: &Fpdu) -> Outcome {
        let payload = fpdu.data();
        let ctx = validator::require_context(self.transfer.as_ref())?;
        if ctx.direction != Direction::Receive {
            return Err(Diagnostic::D3_311);
        }
        validator::check_entity_size(payload.len(), ctx)?;

        let articles = match fpdu.kind() {
            FpduKind::DtfMa => split_articles(payload)?,
            _ => vec![&payload[..]],
        };
        for article in &articles {
            validator::check_article(article.len(), ctx)?;
        }
        let total: usize = articles.iter().map(|a| a.len()).sum();
        validator::check_announced_size(total, ctx)?;

        let ctx = self.transfer_mut()?;
        match fpdu.kind() {
            FpduKind::DtfMa => {
                for article in articles {
                    ctx.record_data(article, 1);
                }
            }
            // first segment of an article; the record is counted on its last
            FpduKind::DtfDa => ctx.record_data(payload, 0),
            _ => ctx.record_data(payload, 1),
        }
        Ok(Step::Await)
    }

    fn on_data_end(&mut self) -> Outcome {
        let ctx = validator::require_context(self.transfer.as_ref())?;
        debug!(conn = self.local_id, bytes = ctx.bytes(), records = ctx.records(), "data ended");
        Ok(Step::Await)
    }

    fn on_trans_end(&mut self, fpdu: &Fpdu) -> Outcome {
        let ctx = validator::require_context(self.transfer.as_ref())?;
        validator::check_counts(fpdu, ctx)?;

        if ctx.direction == Direction::Receive {
            match self.env.store.write(&ctx.path, ctx.content(), ctx.overwrite) {
                Ok(()) => {}
                Err(PesitError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(Diagnostic::D2_204);
                }
                Err(e) => {
                    warn!(conn = self.local_id, error = %e, "file write failed");
                    return Err(Diagnostic::D2_213);
                }
            }
        }

        let ctx = self.transfer_mut()?;
        ctx.set_completed();
        let (bytes, records) = (ctx.bytes(), ctx.records());

        info!(
            conn = self.local_id,
            partner = %self.requestor,
            transfer_id = self.transfer.as_ref().map_or(0, |c| c.transfer_id),
            bytes,
            records,
            "transfer completed"
        );
        self.emit(EventKind::Completed, Some(Diagnostic::SUCCESS));
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckTransEnd)
            .with_diagnostic(Diagnostic::SUCCESS)
            .with(Leaf::numeric(pi::BYTE_COUNT, bytes))
            .with(Leaf::numeric(pi::ARTICLE_COUNT, records))]))
    }

    fn on_sync(&mut self, fpdu: &Fpdu) -> Outcome {
        let point = fpdu.number(pi::SYNC_NUMBER).unwrap_or(0) as u32;
        if !self.negotiated.sync {
            return Err(Diagnostic::D3_307);
        }
        let ctx = validator::require_context(self.transfer.as_ref())?;
        validator::check_sync(point, ctx)?;

        self.transfer_mut()?.mark_sync(point);
        debug!(conn = self.local_id, point, "sync point acknowledged");
        self.emit(EventKind::Progressed, None);
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckSyn)
            .with(Leaf::numeric(pi::SYNC_NUMBER, point as u64))]))
    }

    fn on_resync(&mut self, fpdu: &Fpdu) -> Outcome {
        let point = fpdu.number(pi::RESTART_POINT).unwrap_or(0) as u32;
        if !self.negotiated.resync {
            return Err(Diagnostic::D3_306);
        }
        let max_resyncs = self.env.transfer.max_resyncs;
        let ctx = self.transfer_mut()?;
        if ctx.direction != Direction::Receive {
            return Err(Diagnostic::D3_306);
        }
        if ctx.resyncs() >= max_resyncs {
            return Err(Diagnostic::D3_320);
        }
        let mark = ctx.mark(point).ok_or(Diagnostic::D2_218)?;
        ctx.rollback(mark);
        ctx.count_resync();

        info!(conn = self.local_id, point, bytes = mark.bytes, "resynchronized");
        Ok(Step::Reply(vec![self
            .file_frame(FpduKind::AckResyn)
            .with(Leaf::numeric(pi::RESTART_POINT, point as u64))]))
    }

    fn on_interrupt(&mut self) -> Outcome {
        self.transfer_mut()?.set_interrupted();
        info!(conn = self.local_id, partner = %self.requestor, "transfer interrupted by peer");
        self.emit(EventKind::Interrupted, None);
        Ok(Step::Reply(vec![self.file_frame(FpduKind::AckIdt)]))
    }

    // ---- messages ----

    fn deliver_message(&self, transfer_id: Option<u64>, text: &str) -> Step {
        info!(
            conn = self.local_id,
            partner = %self.requestor,
            len = text.len(),
            "message received"
        );
        if let Err(e) = self.env.sink.message(&self.requestor, text) {
            warn!(conn = self.local_id, error = %e, "message sink failed");
        }
        let mut ack = self.file_frame(FpduKind::AckMsg).with_diagnostic(Diagnostic::SUCCESS);
        if let Some(id) = transfer_id {
            ack = ack.with(Leaf::numeric(pi::TRANSFER_ID, id));
        }
        Step::Reply(vec![ack])
    }

    fn on_message(&mut self, fpdu: &Fpdu) -> Outcome {
        let text = fpdu.text(pi::MESSAGE).unwrap_or_default();
        Ok(self.deliver_message(fpdu.number(pi::TRANSFER_ID), &text))
    }

    fn on_message_start(&mut self, fpdu: &Fpdu) -> Outcome {
        self.message = Some(PendingMessage {
            transfer_id: fpdu.number(pi::TRANSFER_ID),
            text: fpdu.text(pi::MESSAGE).unwrap_or_default(),
        });
        Ok(Step::Await)
    }

    fn on_message_part(&mut self, fpdu: &Fpdu) -> Outcome {
        let pending = self.message.as_mut().ok_or(Diagnostic::D3_311)?;
        pending.text.push_str(&fpdu.text(pi::MESSAGE).unwrap_or_default());
        Ok(Step::Await)
    }

    fn on_message_end(&mut self, fpdu: &Fpdu) -> Outcome {
        let mut pending = self.message.take().ok_or(Diagnostic::D3_311)?;
        pending.text.push_str(&fpdu.text(pi::MESSAGE).unwrap_or_default());
        Ok(self.deliver_message(pending.transfer_id, &pending.text))
    }
}

/// Size limit for a received file: the smaller of the size announced in
/// CREATE (PI 42, in KiB) and the virtual file's cap. 0 when neither is set.
fn announced_size(fpdu: &Fpdu, file: Option<&VirtualFile>) -> u64 {
    let declared = fpdu.number(pi::MAX_RESERVATION).unwrap_or(0).saturating_mul(1024);
    let cap = file.map_or(0, |vf| vf.max_file_size);
    match (declared, cap) {
        (0, cap) => cap,
        (declared, 0) => declared,
        (declared, cap) => declared.min(cap),
    }
}

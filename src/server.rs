//! Platform session engine.
//!
//! Accepts terminal connections, runs the register/authenticate handshake,
//! then services each session: location and parameter traffic, multimedia
//! reassembly and fragmented upgrade pushes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::area::PolygonArea;
use crate::config::ServerConfig;
use crate::error::{CodecError, Error, ProtocolError, Result, TransportError};
use crate::location::{ExtensionMap, LocationBasic, TrackingControl};
use crate::media::MultimediaUpload;
use crate::packager::{package_frame, EncodeFn, Packager};
use crate::params::TerminalParameters;
use crate::parser::{parse_frame, DecodeFn, Parser};
use crate::protocol::fragment::{fragment_count, split, Reassembly};
use crate::protocol::message::{is_response_command, msg_id, Acknowledge};
use crate::protocol::{FrameBuffer, ProtocolParameter, MAX_BODY_SIZE};
use crate::transport::{TcpAcceptor, Transport};
use crate::types::{FlowNumber, GeneralResult, RegisterResult};

/// Server-side session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Registered,
    Active,
    Upgrading,
}

/// Callback invoked with each completed multimedia upload:
/// `(phone, upload)`.
pub type MediaCallback = Box<dyn Fn(&str, &MultimediaUpload) + Send + Sync>;

/// Callback invoked with each location report: `(phone, basic, items)`.
pub type LocationCallback = Box<dyn Fn(&str, &LocationBasic, &ExtensionMap) + Send + Sync>;

/// Callback invoked with each parameter query reply: `(phone, params)`.
pub type ParametersReplyCallback = Box<dyn Fn(&str, &TerminalParameters) + Send + Sync>;

/// One authenticated terminal connection.
pub struct TerminalSession {
    peer: Option<SocketAddr>,
    transport: Arc<dyn Transport>,
    param: Mutex<ProtocolParameter>,
    state: RwLock<SessionState>,
    /// Serializes packaging + send so flow numbers are issued in order.
    send_gate: AsyncMutex<()>,
    frames: Mutex<FrameBuffer>,
    /// Terminal acks (0x0001) observed by the service loop.
    acks: broadcast::Sender<Acknowledge>,
    media_buf: Mutex<Option<Reassembly>>,
}

impl TerminalSession {
    fn new(transport: Arc<dyn Transport>, peer: Option<SocketAddr>) -> Self {
        let (acks, _) = broadcast::channel(32);
        let mut param = ProtocolParameter::new();
        param.desired.head.flow_num = FlowNumber(1);
        Self {
            peer,
            transport,
            param: Mutex::new(param),
            state: RwLock::new(SessionState::Accepted),
            send_gate: AsyncMutex::new(()),
            frames: Mutex::new(FrameBuffer::new()),
            acks,
            media_buf: Mutex::new(None),
        }
    }

    /// Session state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Remote peer address, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Terminal phone number (empty before registration).
    pub fn phone(&self) -> String {
        self.param.lock().parse.head.phone.to_string()
    }

    /// Terminal parameters last reported by this terminal.
    pub fn reported_parameters(&self) -> TerminalParameters {
        self.param.lock().parse.parameters.clone()
    }

    async fn send_staged(
        &self,
        packager: &RwLock<Packager>,
        id: u16,
        stage: impl FnOnce(&mut ProtocolParameter),
    ) -> Result<()> {
        let _gate = self.send_gate.lock().await;
        let frame = {
            let mut param = self.param.lock();
            param.desired.head.msg_id = id;
            // Outbound frames carry the terminal's phone number and are
            // unfragmented unless the stage closure says so.
            param.desired.head.phone = param.parse.head.phone.clone();
            param.desired.head.attr.set_fragmented(false);
            param.desired.head.total_packets = 0;
            param.desired.head.packet_seq = 0;
            stage(&mut param);
            package_frame(&packager.read(), &param)?
        };
        self.transport.send(&frame).await?;
        let mut param = self.param.lock();
        param.desired.head.flow_num = param.desired.head.flow_num.next();
        Ok(())
    }

    async fn recv_frame(&self, deadline: Duration) -> Result<Vec<u8>> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(frame) = self.frames.lock().next_frame()? {
                return Ok(frame);
            }
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(TransportError::Timeout.into());
            }
            let mut chunk = [0u8; 4096];
            let n = self.transport.recv(&mut chunk, deadline - elapsed).await?;
            self.frames.lock().extend(&chunk[..n]);
        }
    }

    async fn ack(&self, packager: &RwLock<Packager>, result: GeneralResult) -> Result<()> {
        self.send_staged(packager, msg_id::PLATFORM_GENERAL_RESPONSE, |para| {
            para.stage_ack(result as u8);
        })
        .await
    }
}

/// The JT808 platform server.
///
/// ```no_run
/// # use jt808::server::PlatformServer;
/// # use jt808::config::ServerConfig;
/// # async fn demo() -> jt808::Result<()> {
/// let server = PlatformServer::new(ServerConfig::default());
/// let addr = server.start().await?;
/// println!("listening on {addr}");
/// # Ok(())
/// # }
/// ```
pub struct PlatformServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    packager: RwLock<Packager>,
    parser: RwLock<Parser>,
    running: AtomicBool,
    sessions: DashMap<String, Arc<TerminalSession>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_media: RwLock<Option<MediaCallback>>,
    on_location: RwLock<Option<LocationCallback>>,
    on_parameters: RwLock<Option<ParametersReplyCallback>>,
}

impl PlatformServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                packager: RwLock::new(Packager::with_defaults()),
                parser: RwLock::new(Parser::with_defaults()),
                running: AtomicBool::new(false),
                sessions: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
                on_media: RwLock::new(None),
                on_location: RwLock::new(None),
                on_parameters: RwLock::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Number of authenticated sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Phone numbers of the live sessions.
    pub fn session_phones(&self) -> Vec<String> {
        self.inner.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Look up a session by phone number.
    pub fn session(&self, phone: &str) -> Option<Arc<TerminalSession>> {
        self.inner.sessions.get(phone).map(|e| Arc::clone(e.value()))
    }

    // Registry access. Mutation is refused once the server runs.

    pub fn append_encoder(&self, id: u16, handler: EncodeFn) -> Result<bool> {
        self.inner.check_not_running("append encoder")?;
        Ok(self.inner.packager.write().append(id, handler))
    }

    pub fn override_encoder(&self, id: u16, handler: EncodeFn) -> Result<bool> {
        self.inner.check_not_running("override encoder")?;
        Ok(self.inner.packager.write().override_handler(id, handler))
    }

    pub fn append_decoder(&self, id: u16, handler: DecodeFn) -> Result<bool> {
        self.inner.check_not_running("append decoder")?;
        Ok(self.inner.parser.write().append(id, handler))
    }

    pub fn override_decoder(&self, id: u16, handler: DecodeFn) -> Result<bool> {
        self.inner.check_not_running("override decoder")?;
        Ok(self.inner.parser.write().override_handler(id, handler))
    }

    // Callbacks.

    pub fn on_multimedia_uploaded(&self, callback: MediaCallback) {
        *self.inner.on_media.write() = Some(callback);
    }

    pub fn on_location_reported(&self, callback: LocationCallback) {
        *self.inner.on_location.write() = Some(callback);
    }

    pub fn on_parameters_reported(&self, callback: ParametersReplyCallback) {
        *self.inner.on_parameters.write() = Some(callback);
    }

    /// Bind the configured address, start the accept loop, and return the
    /// bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::BadState {
                state: "running",
                operation: "start",
            }
            .into());
        }
        let acceptor = TcpAcceptor::bind(self.inner.config.listen_addr).await?;
        let addr = acceptor.local_addr();
        info!(%addr, "platform listening");

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.accept_loop(acceptor).await;
        });
        self.inner.tasks.lock().push(task);
        Ok(addr)
    }

    /// Accept one already-connected transport (tests use in-memory pipes).
    /// The handshake and service loop run on a spawned task.
    pub fn serve_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.handle_connection(transport, None).await;
        });
        self.inner.tasks.lock().push(task);
    }

    /// Stop the server and close every session.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        // Closing first unblocks service loops parked in a receive.
        for entry in self.inner.sessions.iter() {
            let _ = entry.value().transport.close().await;
        }
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            // The accept loop observes the flag within its poll tick;
            // anything still stuck after the grace period is abandoned.
            let _ = timeout(Duration::from_secs(2), task).await;
        }
        self.inner.sessions.clear();
    }

    /// Push an upgrade package to a terminal, fragmenting as needed.
    /// Every fragment must be acknowledged before the next is sent.
    pub async fn push_upgrade(
        &self,
        phone: &str,
        target: u8,
        manufacturer_id: Vec<u8>,
        version: &str,
        data: &[u8],
        fragment_size: Option<usize>,
    ) -> Result<()> {
        let session = self
            .session(phone)
            .ok_or_else(|| ProtocolError::SessionNotFound(phone.to_string()))?;
        let inner = &self.inner;

        // Fixed body overhead: target(1) + manufacturer(5) + version
        // length(1) + version + total_len(4).
        let overhead = 11 + version.len();
        let max_chunk = fragment_size
            .unwrap_or(inner.config.upgrade_fragment_size)
            .min(MAX_BODY_SIZE - overhead);

        *session.state.write() = SessionState::Upgrading;
        let result = inner
            .push_upgrade_inner(&session, target, manufacturer_id, version, data, max_chunk)
            .await;
        *session.state.write() = SessionState::Active;
        result
    }

    /// Send a parameter update to a terminal.
    pub async fn set_parameters(&self, phone: &str, params: TerminalParameters) -> Result<()> {
        self.send_to(phone, msg_id::SET_PARAMETERS, move |para| {
            para.desired.parameters = params;
        })
        .await
    }

    /// Ask a terminal for its full parameter table.
    pub async fn query_all_parameters(&self, phone: &str) -> Result<()> {
        self.send_to(phone, msg_id::QUERY_PARAMETERS, |_| {}).await
    }

    /// Ask a terminal for specific parameters; the reply preserves the
    /// queried order.
    pub async fn query_parameters(&self, phone: &str, ids: Vec<u32>) -> Result<()> {
        self.send_to(phone, msg_id::QUERY_SPECIFIC_PARAMETERS, move |para| {
            para.desired.query_param_ids = ids;
        })
        .await
    }

    /// Ask a terminal for an immediate location fix.
    pub async fn query_location(&self, phone: &str) -> Result<()> {
        self.send_to(phone, msg_id::QUERY_LOCATION, |_| {}).await
    }

    /// Put a terminal into temporary tracking mode.
    pub async fn set_tracking(&self, phone: &str, control: TrackingControl) -> Result<()> {
        self.send_to(phone, msg_id::TRACKING_CONTROL, move |para| {
            para.desired.tracking = control;
        })
        .await
    }

    /// Install a polygon geofence on a terminal.
    pub async fn set_polygon_area(&self, phone: &str, area: PolygonArea) -> Result<()> {
        self.send_to(phone, msg_id::SET_POLYGON_AREA, move |para| {
            para.desired.polygon_area = area;
        })
        .await
    }

    /// Delete polygon geofences on a terminal; an empty list deletes all.
    pub async fn delete_polygon_areas(&self, phone: &str, ids: Vec<u32>) -> Result<()> {
        self.send_to(phone, msg_id::DELETE_POLYGON_AREA, move |para| {
            para.desired.delete_area_ids = ids;
        })
        .await
    }

    async fn send_to(
        &self,
        phone: &str,
        id: u16,
        stage: impl FnOnce(&mut ProtocolParameter),
    ) -> Result<()> {
        let session = self
            .session(phone)
            .ok_or_else(|| ProtocolError::SessionNotFound(phone.to_string()))?;
        session.send_staged(&self.inner.packager, id, stage).await
    }
}

impl ServerInner {
    fn check_not_running(&self, operation: &'static str) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ProtocolError::BadState {
                state: "running",
                operation,
            }
            .into());
        }
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, acceptor: TcpAcceptor) {
        while self.running.load(Ordering::SeqCst) {
            let accepted = match timeout(Duration::from_millis(500), acceptor.accept()).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
                Err(_) => continue,
            };
            let (transport, addr) = accepted;
            if self.sessions.len() >= self.config.max_connections {
                warn!(%addr, "connection limit reached, rejecting");
                let _ = transport.close().await;
                continue;
            }
            debug!(%addr, "terminal connected");
            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                inner.handle_connection(Arc::new(transport), Some(addr)).await;
            });
        }
        debug!("accept loop stopped");
    }

    async fn handle_connection(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        addr: Option<SocketAddr>,
    ) {
        let session = Arc::new(TerminalSession::new(Arc::clone(&transport), addr));

        let handshake = timeout(self.config.auth_timeout, self.handshake(&session)).await;
        let phone = match handshake {
            Ok(Ok(phone)) => phone,
            Ok(Err(e)) => {
                warn!(error = %e, "handshake failed, closing");
                let _ = transport.close().await;
                return;
            }
            Err(_) => {
                warn!("handshake timed out, closing");
                let _ = transport.close().await;
                return;
            }
        };

        info!(%phone, "terminal authenticated");
        if let Some(old) = self.sessions.insert(phone.clone(), Arc::clone(&session)) {
            warn!(%phone, "replacing an existing session");
            let _ = old.transport.close().await;
        }

        self.service_loop(&session, &phone).await;

        self.sessions
            .remove_if(&phone, |_, live| Arc::ptr_eq(live, &session));
        let _ = transport.close().await;
        info!(%phone, "session closed");
    }

    /// Register/authenticate handshake. Returns the terminal phone number.
    async fn handshake(&self, session: &Arc<TerminalSession>) -> Result<String> {
        let step = Duration::from_secs(3);

        let frame = session.recv_frame(step).await?;
        let id = self.parse_one(session, &frame)?;
        if id != msg_id::TERMINAL_REGISTER {
            return Err(ProtocolError::BadState {
                state: "accepted",
                operation: "expected register",
            }
            .into());
        }
        *session.state.write() = SessionState::Registered;
        {
            let param = session.param.lock();
            let info = &param.parse.register_info;
            info!(
                phone = %param.parse.head.phone,
                province = info.province_id,
                city = info.city_id,
                plate = %info.plate_number,
                "terminal registering"
            );
        }

        // Issue a random numeric authentication code.
        let code = rand::thread_rng().gen_range(1000u32..=99_999_999).to_string();
        session.param.lock().desired.auth_code = code.clone().into_bytes();
        session
            .send_staged(&self.packager, msg_id::REGISTER_RESPONSE, |para| {
                para.stage_ack(RegisterResult::Success as u8);
            })
            .await?;

        let frame = session.recv_frame(step).await?;
        let id = self.parse_one(session, &frame)?;
        let authenticated = {
            let param = session.param.lock();
            id == msg_id::TERMINAL_AUTH && param.parse.auth_code == param.desired.auth_code
        };
        if !authenticated {
            return Err(ProtocolError::AuthRejected(GeneralResult::Failure as u8).into());
        }

        session.ack(&self.packager, GeneralResult::Success).await?;
        *session.state.write() = SessionState::Active;
        Ok(session.phone())
    }

    fn parse_one(&self, session: &TerminalSession, frame: &[u8]) -> Result<u16> {
        let parser = self.parser.read();
        let mut param = session.param.lock();
        parse_frame(&parser, frame, &mut param)
    }

    /// Idle cutoff: three missed heartbeats. The heartbeat interval comes
    /// from the terminal's reported parameter table when available.
    fn idle_cutoff(&self, session: &TerminalSession) -> Duration {
        let heartbeat = session
            .param
            .lock()
            .parse
            .parameters
            .heartbeat_interval()
            .map(|s| Duration::from_secs(u64::from(s)))
            .unwrap_or(self.config.default_heartbeat_interval);
        heartbeat * 3
    }

    async fn service_loop(&self, session: &Arc<TerminalSession>, phone: &str) {
        while self.running.load(Ordering::SeqCst) && session.transport.is_connected() {
            let cutoff = self.idle_cutoff(session);
            let frame = match session.recv_frame(cutoff).await {
                Ok(frame) => frame,
                Err(Error::Transport(TransportError::Timeout)) => {
                    info!(%phone, "no traffic within heartbeat cutoff, closing");
                    break;
                }
                Err(Error::Transport(TransportError::Closed)) => {
                    debug!(%phone, "terminal disconnected");
                    break;
                }
                Err(e) => {
                    warn!(%phone, error = %e, "receive failed");
                    break;
                }
            };

            match self.parse_one(session, &frame) {
                Ok(id) => {
                    if let Err(e) = self.dispatch(session, phone, id).await {
                        if e.is_frame_local() {
                            warn!(%phone, error = %e, "command handling failed");
                        } else {
                            warn!(%phone, error = %e, "session failed");
                            break;
                        }
                    }
                    if id == msg_id::TERMINAL_LOGOUT {
                        break;
                    }
                }
                Err(Error::Codec(CodecError::BadChecksum { .. })) => {
                    // Silent drop; the terminal retransmits.
                    debug!(%phone, "checksum mismatch, frame dropped");
                }
                Err(Error::Codec(CodecError::BadEscape | CodecError::BadFrame | CodecError::BadHeader)) => {
                    warn!(%phone, "malformed frame dropped");
                }
                Err(Error::Protocol(ProtocolError::NoHandler(id))) => {
                    warn!(%phone, msg_id = format_args!("{id:#06x}"), "unsupported message");
                    let _ = session.ack(&self.packager, GeneralResult::NotSupported).await;
                }
                Err(e) if e.is_frame_local() => {
                    warn!(%phone, error = %e, "bad message body");
                    let _ = session
                        .ack(&self.packager, GeneralResult::MessageHasWrong)
                        .await;
                }
                Err(e) => {
                    warn!(%phone, error = %e, "parse failed fatally");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, session: &Arc<TerminalSession>, phone: &str, id: u16) -> Result<()> {
        match id {
            msg_id::TERMINAL_GENERAL_RESPONSE => {
                let ack = session.param.lock().parse.ack;
                debug!(
                    %phone,
                    acked = format_args!("{:#06x}", ack.msg_id),
                    result = ack.result,
                    "terminal ack"
                );
                let _ = session.acks.send(ack);
            }
            msg_id::TERMINAL_HEARTBEAT => {
                debug!(%phone, "heartbeat");
                session.ack(&self.packager, GeneralResult::Success).await?;
            }
            msg_id::TERMINAL_LOGOUT => {
                info!(%phone, "terminal logged out");
                session.ack(&self.packager, GeneralResult::Success).await?;
            }
            msg_id::LOCATION_REPORT => {
                let (basic, items) = {
                    let param = session.param.lock();
                    (param.parse.location.clone(), param.parse.extensions.clone())
                };
                info!(
                    %phone,
                    lat = basic.latitude_degrees(),
                    lon = basic.longitude_degrees(),
                    speed_kmh = basic.speed_kmh(),
                    bearing = basic.bearing,
                    positioned = basic.status.positioned(),
                    alarm = format_args!("{:#010x}", basic.alarm.raw()),
                    time = %basic.time,
                    "location report"
                );
                if let Some(cb) = self.on_location.read().as_ref() {
                    cb(phone, &basic, &items);
                }
                session.ack(&self.packager, GeneralResult::Success).await?;
            }
            msg_id::QUERY_PARAMETERS_RESPONSE => {
                let params = session.param.lock().parse.parameters.clone();
                info!(%phone, count = params.len(), "parameter query reply");
                for (pid, value) in params.iter() {
                    debug!(%phone, id = format_args!("{pid:#010x}"), len = value.len(), "parameter");
                }
                if let Some(cb) = self.on_parameters.read().as_ref() {
                    cb(phone, &params);
                }
            }
            msg_id::QUERY_LOCATION_RESPONSE => {
                let basic = session.param.lock().parse.location.clone();
                info!(
                    %phone,
                    lat = basic.latitude_degrees(),
                    lon = basic.longitude_degrees(),
                    "location query reply"
                );
            }
            msg_id::MULTIMEDIA_UPLOAD => {
                self.handle_media(session, phone).await?;
            }
            msg_id::UPGRADE_RESULT => {
                let up = session.param.lock().parse.upgrade.clone();
                info!(%phone, target = up.target, result = up.result, "upgrade result");
                session.ack(&self.packager, GeneralResult::Success).await?;
            }
            other if is_response_command(other) => {
                debug!(%phone, msg_id = format_args!("{other:#06x}"), "response frame consumed");
            }
            other => {
                debug!(%phone, msg_id = format_args!("{other:#06x}"), "acknowledging command");
                session.ack(&self.packager, GeneralResult::Success).await?;
            }
        }
        Ok(())
    }

    /// One 0x0801 frame: ack the fragment, reassemble, and close the
    /// transfer with 0x8800 (listing missing fragments when the final
    /// sequence number arrives with gaps).
    async fn handle_media(&self, session: &Arc<TerminalSession>, phone: &str) -> Result<()> {
        let (fragmented, seq, total, mut media) = {
            let param = session.param.lock();
            (
                param.parse.head.attr.fragmented(),
                param.parse.head.packet_seq,
                param.parse.head.total_packets,
                param.parse.media.clone(),
            )
        };

        if !fragmented {
            info!(%phone, media_id = media.media_id, bytes = media.data.len(), "multimedia upload");
            if let Some(cb) = self.on_media.read().as_ref() {
                cb(phone, &media);
            }
            let media_id = media.media_id;
            session
                .send_staged(&self.packager, msg_id::MULTIMEDIA_UPLOAD_RESPONSE, |para| {
                    para.desired.media_ack.media_id = media_id;
                    para.desired.media_ack.reload_packet_ids.clear();
                })
                .await?;
            return Ok(());
        }

        {
            let mut buf = session.media_buf.lock();
            if seq == 1 && buf.is_none() {
                *buf = Some(Reassembly::new(total, media.data.len()));
            }
            match buf.as_mut() {
                Some(assembly) => assembly.insert(seq, &media.data)?,
                None => {
                    warn!(%phone, seq, "media fragment before the first, dropped");
                    return Ok(());
                }
            }
        }
        session.ack(&self.packager, GeneralResult::Success).await?;

        let (complete, missing) = {
            let buf = session.media_buf.lock();
            let assembly = buf.as_ref().expect("populated above");
            (assembly.is_complete(), assembly.missing())
        };

        if complete {
            let assembly = session.media_buf.lock().take().expect("checked above");
            media.data = assembly.assemble()?;
            info!(%phone, media_id = media.media_id, bytes = media.data.len(), "multimedia reassembled");
            if let Some(cb) = self.on_media.read().as_ref() {
                cb(phone, &media);
            }
            let media_id = media.media_id;
            session
                .send_staged(&self.packager, msg_id::MULTIMEDIA_UPLOAD_RESPONSE, |para| {
                    para.desired.media_ack.media_id = media_id;
                    para.desired.media_ack.reload_packet_ids.clear();
                })
                .await?;
        } else if seq == total {
            // Final fragment arrived with gaps: request re-sends.
            warn!(%phone, missing = missing.len(), "media transfer has gaps");
            let media_id = media.media_id;
            session
                .send_staged(&self.packager, msg_id::MULTIMEDIA_UPLOAD_RESPONSE, move |para| {
                    para.desired.media_ack.media_id = media_id;
                    para.desired.media_ack.reload_packet_ids = missing;
                })
                .await?;
        }
        Ok(())
    }

    async fn push_upgrade_inner(
        &self,
        session: &Arc<TerminalSession>,
        target: u8,
        manufacturer_id: Vec<u8>,
        version: &str,
        data: &[u8],
        max_chunk: usize,
    ) -> Result<()> {
        {
            let mut param = session.param.lock();
            param.desired.upgrade.target = target;
            param.desired.upgrade.manufacturer_id = manufacturer_id;
            param.desired.upgrade.version = version.to_string();
            param.desired.upgrade.total_len = data.len() as u32;
        }

        let mut acks = session.acks.subscribe();

        if data.len() <= max_chunk {
            let payload = data.to_vec();
            session
                .send_staged(&self.packager, msg_id::UPGRADE_PACKAGE, move |para| {
                    para.desired.upgrade.data = payload;
                })
                .await?;
            self.wait_upgrade_ack(&mut acks).await?;
            return Ok(());
        }

        let total = fragment_count(data.len(), max_chunk);
        info!(total, bytes = data.len(), "pushing fragmented upgrade");
        for (idx, chunk) in split(data, max_chunk).iter().enumerate() {
            let seq = (idx + 1) as u16;
            let payload = chunk.to_vec();
            session
                .send_staged(&self.packager, msg_id::UPGRADE_PACKAGE, move |para| {
                    para.desired.upgrade.data = payload;
                    para.desired.head.attr.set_fragmented(true);
                    para.desired.head.total_packets = total;
                    para.desired.head.packet_seq = seq;
                })
                .await?;
            // Each fragment must be acked before the next goes out.
            self.wait_upgrade_ack(&mut acks).await?;
        }
        Ok(())
    }

    async fn wait_upgrade_ack(
        &self,
        acks: &mut broadcast::Receiver<Acknowledge>,
    ) -> Result<()> {
        let deadline = self.config.upgrade_ack_timeout;
        let ack = timeout(deadline, async {
            loop {
                match acks.recv().await {
                    Ok(ack) if ack.msg_id == msg_id::UPGRADE_PACKAGE => return Some(ack),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .map_err(|_| Error::from(TransportError::Timeout))?
        .ok_or_else(|| Error::from(TransportError::Closed))?;

        if ack.result != GeneralResult::Success as u8 {
            return Err(ProtocolError::AckFailed {
                msg_id: msg_id::UPGRADE_PACKAGE,
                result: ack.result,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_has_no_sessions() {
        let server = PlatformServer::new(ServerConfig::default());
        assert_eq!(server.session_count(), 0);
        assert!(!server.is_running());
        assert!(server.session("13523339527").is_none());
    }

    #[test]
    fn registry_mutation_allowed_before_start() {
        let server = PlatformServer::new(ServerConfig::default());
        let encoder: EncodeFn = Arc::new(|_| Ok(vec![1]));
        assert!(server.append_encoder(0x8F00, encoder).unwrap());
    }
}

//! Terminal session engine.
//!
//! Drives the client side of the protocol: registration, authentication,
//! periodic heartbeat and location reports, platform command handling,
//! fragmented upgrade reception and multimedia upload.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, info, warn};

use crate::area::{PolygonArea, PolygonAreaSet};
use crate::config::ClientConfig;
use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::location::{extension_id, AlarmBits, LocationBasic, StatusBits};
use crate::media::MultimediaUploadAck;
use crate::packager::{package_frame, EncodeFn, Packager};
use crate::params::TerminalParameters;
use crate::parser::{parse_frame, DecodeFn, Parser};
use crate::protocol::fragment::{fragment_count, split, Reassembly};
use crate::protocol::message::{msg_id, is_response_command, MessageContent};
use crate::protocol::{FrameBuffer, ProtocolParameter, MAX_BODY_SIZE};
use crate::transport::{TcpTransport, Transport};
use crate::types::{FlowNumber, GeneralResult, PhoneNumber};

/// Client session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Registering,
    Authenticating,
    Active,
    Upgrading,
    MediaUploading,
}

/// Immediate-report triggers.
mod report_flag {
    pub const ALARM_OCCURRED: u8 = 0x1;
    pub const STATE_CHANGED: u8 = 0x2;
}

/// Callback invoked when an upgrade package has been fully received:
/// `(target, data)`.
pub type UpgradeCallback = Box<dyn Fn(u8, &[u8]) + Send + Sync>;

/// Callback invoked when the platform updates terminal parameters.
pub type ParametersCallback = Box<dyn Fn(&TerminalParameters) + Send + Sync>;

/// Callback invoked when the platform changes the polygon area set.
pub type AreasCallback = Box<dyn Fn(&PolygonAreaSet) + Send + Sync>;

#[derive(Debug, Clone)]
enum ClientEvent {
    MediaAck(MultimediaUploadAck),
}

/// The JT808 terminal client.
///
/// ```no_run
/// # use jt808::client::TerminalClient;
/// # use jt808::config::ClientConfig;
/// # async fn demo() -> jt808::Result<()> {
/// let client = TerminalClient::new(ClientConfig::default());
/// client.connect().await?;
/// client.authenticate().await?;
/// client.run()?;
/// # Ok(())
/// # }
/// ```
pub struct TerminalClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    packager: RwLock<Packager>,
    parser: RwLock<Parser>,
    running: AtomicBool,
    state: RwLock<ClientState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    param: Mutex<ProtocolParameter>,
    /// Serializes packaging + send so flow numbers are issued in order.
    send_gate: AsyncMutex<()>,
    frames: Mutex<FrameBuffer>,
    report_flags: AtomicU8,
    /// Active tracking control: (interval, deadline).
    tracking: Mutex<Option<(Duration, Instant)>>,
    polygons: RwLock<PolygonAreaSet>,
    upgrade_buf: Mutex<Option<Reassembly>>,
    events: broadcast::Sender<ClientEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_upgrade: RwLock<Option<UpgradeCallback>>,
    on_parameters: RwLock<Option<ParametersCallback>>,
    on_areas: RwLock<Option<AreasCallback>>,
}

impl TerminalClient {
    /// Create a client from configuration. The phone number and register
    /// identity are staged into the outbound side immediately.
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        let mut param = ProtocolParameter::new();
        param.desired.head.phone =
            PhoneNumber::new(config.phone.clone()).unwrap_or_default();
        param.desired.head.flow_num = FlowNumber(1);
        param.desired.register_info = config.register.to_register_info();

        Self {
            inner: Arc::new(ClientInner {
                config,
                packager: RwLock::new(Packager::with_defaults()),
                parser: RwLock::new(Parser::with_defaults()),
                running: AtomicBool::new(false),
                state: RwLock::new(ClientState::Disconnected),
                transport: RwLock::new(None),
                param: Mutex::new(param),
                send_gate: AsyncMutex::new(()),
                frames: Mutex::new(FrameBuffer::new()),
                report_flags: AtomicU8::new(0),
                tracking: Mutex::new(None),
                polygons: RwLock::new(PolygonAreaSet::new()),
                upgrade_buf: Mutex::new(None),
                events,
                tasks: Mutex::new(Vec::new()),
                on_upgrade: RwLock::new(None),
                on_parameters: RwLock::new(None),
                on_areas: RwLock::new(None),
            }),
        }
    }

    /// Current session state.
    pub fn state(&self) -> ClientState {
        *self.inner.state.read()
    }

    /// Whether the service loops are running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // Registry access. Mutation is refused once the service loops run.

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

    /// Connect over TCP to the configured platform address.
    pub async fn connect(&self) -> Result<()> {
        *self.inner.state.write() = ClientState::Connecting;
        let transport = TcpTransport::connect(
            self.inner.config.remote_addr,
            self.inner.config.connect_timeout,
        )
        .await
        .inspect_err(|_| {
            *self.inner.state.write() = ClientState::Disconnected;
        })?;
        self.attach_transport(Arc::new(transport));
        Ok(())
    }

    /// Attach an already-connected transport (tests use in-memory pipes).
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        *self.inner.transport.write() = Some(transport);
        *self.inner.frames.lock() = FrameBuffer::new();
        *self.inner.state.write() = ClientState::Registering;
    }

    /// Run the register/authenticate handshake to the `Active` state.
    pub async fn authenticate(&self) -> Result<()> {
        let inner = &self.inner;
        let deadline = inner.config.response_timeout;

        // Register.
        *inner.state.write() = ClientState::Registering;
        inner.send_message(msg_id::TERMINAL_REGISTER).await?;
        let (result, auth_code) = timeout(deadline, async {
            loop {
                let frame = match inner.recv_frame().await {
                    Ok(frame) => frame,
                    Err(Error::Transport(TransportError::Timeout)) => continue,
                    Err(e) => return Err(e),
                };
                match inner.parse_one(&frame) {
                    Ok(msg_id::REGISTER_RESPONSE) => {
                        let param = inner.param.lock();
                        return Ok::<_, Error>((
                            param.parse.ack.result,
                            param.parse.auth_code.clone(),
                        ));
                    }
                    Ok(id) => debug!(msg_id = format_args!("{id:#06x}"), "ignored during register"),
                    Err(e) if e.is_frame_local() => warn!(error = %e, "bad frame during register"),
                    Err(e) => return Err(e),
                }
            }
        })
        .await
        .map_err(|_| Error::from(TransportError::Timeout))??;

        if result != 0 {
            *inner.state.write() = ClientState::Disconnected;
            return Err(ProtocolError::RegisterRejected(result).into());
        }
        info!(code_len = auth_code.len(), "registered, authenticating");
        inner.param.lock().desired.auth_code = auth_code;

        // Authenticate.
        *inner.state.write() = ClientState::Authenticating;
        inner.send_message(msg_id::TERMINAL_AUTH).await?;
        let ack = timeout(deadline, async {
            loop {
                let frame = match inner.recv_frame().await {
                    Ok(frame) => frame,
                    Err(Error::Transport(TransportError::Timeout)) => continue,
                    Err(e) => return Err(e),
                };
                match inner.parse_one(&frame) {
                    Ok(msg_id::PLATFORM_GENERAL_RESPONSE) => {
                        return Ok::<_, Error>(inner.param.lock().parse.ack);
                    }
                    Ok(id) => debug!(msg_id = format_args!("{id:#06x}"), "ignored during auth"),
                    Err(e) if e.is_frame_local() => warn!(error = %e, "bad frame during auth"),
                    Err(e) => return Err(e),
                }
            }
        })
        .await
        .map_err(|_| Error::from(TransportError::Timeout))??;

        if ack.msg_id != msg_id::TERMINAL_AUTH || ack.result != 0 {
            *inner.state.write() = ClientState::Disconnected;
            return Err(ProtocolError::AuthRejected(ack.result).into());
        }

        *inner.state.write() = ClientState::Active;
        info!("authenticated, session active");
        Ok(())
    }

    /// Start the send and receive loops. Requires the `Active` state.
    pub fn run(&self) -> Result<()> {
        if self.state() != ClientState::Active {
            return Err(ProtocolError::BadState {
                state: "not active",
                operation: "run",
            }
            .into());
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::BadState {
                state: "running",
                operation: "run",
            }
            .into());
        }

        let recv_inner = Arc::clone(&self.inner);
        let recv_task = tokio::spawn(async move {
            recv_inner.receive_loop().await;
        });
        let send_inner = Arc::clone(&self.inner);
        let send_task = tokio::spawn(async move {
            send_inner.periodic_loop().await;
        });
        let mut tasks = self.inner.tasks.lock();
        tasks.push(recv_task);
        tasks.push(send_task);
        Ok(())
    }

    /// Stop the loops and close the connection.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        // Closing first unblocks any loop parked in a receive.
        if let Some(transport) = self.inner.transport.write().take() {
            let _ = transport.close().await;
        }
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = timeout(Duration::from_secs(2), task).await;
        }
        *self.inner.state.write() = ClientState::Disconnected;
    }

    /// Wait up to `deadline` for the in-flight outbound frame to drain,
    /// then stop.
    pub async fn waiting_stop(&self, deadline: Duration) {
        let _ = timeout(deadline, self.inner.send_gate.lock()).await;
        self.stop().await;
    }

    /// Send a logout and stop.
    pub async fn logout(&self) -> Result<()> {
        self.inner.send_message(msg_id::TERMINAL_LOGOUT).await?;
        self.stop().await;
        Ok(())
    }

    // Location reporting.

    /// Replace the staged location fix.
    pub fn update_location(&self, location: LocationBasic) {
        self.inner.param.lock().desired.location = location;
    }

    /// Update the staged location fix from application units.
    pub fn update_location_units(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: f32,
        speed_kmh: f32,
        bearing: f32,
        time: impl Into<String>,
    ) {
        let mut param = self.inner.param.lock();
        let old = &param.desired.location;
        let mut next = LocationBasic::from_units(latitude, longitude, altitude, speed_kmh, bearing, time);
        next.alarm = old.alarm;
        next.status = old.status;
        param.desired.location = next;
    }

    /// Replace the alarm word; triggers an immediate report.
    pub fn set_alarm_bits(&self, alarm: u32) {
        self.inner.param.lock().desired.location.alarm = AlarmBits::new(alarm);
        self.inner
            .report_flags
            .fetch_or(report_flag::ALARM_OCCURRED, Ordering::SeqCst);
    }

    pub fn alarm_bits(&self) -> u32 {
        self.inner.param.lock().desired.location.alarm.raw()
    }

    /// Replace the status word; triggers an immediate report.
    pub fn set_status_bits(&self, status: u32) {
        self.inner.param.lock().desired.location.status = StatusBits::new(status);
        self.inner
            .report_flags
            .fetch_or(report_flag::STATE_CHANGED, Ordering::SeqCst);
    }

    pub fn status_bits(&self) -> u32 {
        self.inner.param.lock().desired.location.status.raw()
    }

    /// Raise the in/out-area alarm with its detail extension item.
    pub fn set_in_out_area_alarm(&self, detail: Vec<u8>) {
        let mut param = self.inner.param.lock();
        param.desired.location.alarm.set_in_out_area(true);
        param
            .desired
            .extensions
            .insert(extension_id::AREA_ROUTE_ALARM, detail);
        drop(param);
        self.inner
            .report_flags
            .fetch_or(report_flag::ALARM_OCCURRED, Ordering::SeqCst);
    }

    /// Set or replace one location extension item.
    pub fn set_location_extension(&self, id: u8, value: Vec<u8>) {
        self.inner.param.lock().desired.extensions.insert(id, value);
    }

    /// Force one location report now.
    pub async fn report_location_now(&self) -> Result<()> {
        self.inner.send_message(msg_id::LOCATION_REPORT).await
    }

    /// Send a heartbeat now.
    pub async fn heartbeat_now(&self) -> Result<()> {
        self.inner.send_message(msg_id::TERMINAL_HEARTBEAT).await
    }

    // Terminal parameters.

    pub fn terminal_parameters(&self) -> TerminalParameters {
        self.inner.param.lock().desired.parameters.clone()
    }

    pub fn set_terminal_parameters(&self, params: TerminalParameters) {
        self.inner.param.lock().desired.parameters = params;
    }

    /// Heartbeat interval from the parameter table; absent means none.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.inner
            .param
            .lock()
            .desired
            .parameters
            .heartbeat_interval()
            .map(|s| Duration::from_secs(u64::from(s)))
    }

    pub fn set_heartbeat_interval(&self, seconds: u32) {
        self.inner
            .param
            .lock()
            .desired
            .parameters
            .set_heartbeat_interval(seconds);
    }

    // Polygon areas.

    pub fn polygon_areas(&self) -> PolygonAreaSet {
        self.inner.polygons.read().clone()
    }

    pub fn polygon_area(&self, id: u32) -> Result<PolygonArea> {
        self.inner.polygons.read().get(id).cloned()
    }

    pub fn add_polygon_area(&self, area: PolygonArea) -> Result<()> {
        self.inner.polygons.write().add(area)
    }

    pub fn update_polygon_area(&self, area: PolygonArea) {
        self.inner.polygons.write().update(area);
    }

    pub fn delete_polygon_areas(&self, ids: &[u32]) {
        self.inner.polygons.write().remove_ids(ids);
    }

    // Callbacks.

    pub fn on_upgrade(&self, callback: UpgradeCallback) {
        *self.inner.on_upgrade.write() = Some(callback);
    }

    pub fn on_parameters_updated(&self, callback: ParametersCallback) {
        *self.inner.on_parameters.write() = Some(callback);
    }

    pub fn on_areas_updated(&self, callback: AreasCallback) {
        *self.inner.on_areas.write() = Some(callback);
    }

    /// Upload a multimedia payload, fragmenting when it exceeds the
    /// single-frame budget, and wait for the platform's 0x8800.
    pub async fn upload_multimedia(
        &self,
        media_id: u32,
        media_type: u8,
        media_format: u8,
        event: u8,
        channel_id: u8,
        data: &[u8],
    ) -> Result<()> {
        let inner = &self.inner;
        let previous = *inner.state.read();
        *inner.state.write() = ClientState::MediaUploading;
        let result = inner
            .upload_multimedia_inner(media_id, media_type, media_format, event, channel_id, data)
            .await;
        *inner.state.write() = previous;
        result
    }

    /// Report the outcome of a completed upgrade.
    pub async fn report_upgrade_result(&self, target: u8, result: u8) -> Result<()> {
        {
            let mut param = self.inner.param.lock();
            param.desired.upgrade.target = target;
            param.desired.upgrade.result = result;
        }
        self.inner.send_message(msg_id::UPGRADE_RESULT).await
    }
}

impl ClientInner {
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

    fn current_transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport
            .read()
            .clone()
            .ok_or_else(|| TransportError::NotConnected.into())
    }

    /// Package and send one message. The send gate serializes packaging
    /// and transmission; the flow number advances only after a
    /// successful send.
    async fn send_message(&self, id: u16) -> Result<()> {
        self.send_staged(id, |_| {}).await
    }

    async fn send_staged(
        &self,
        id: u16,
        stage: impl FnOnce(&mut ProtocolParameter),
    ) -> Result<()> {
        let transport = self.current_transport()?;
        let _gate = self.send_gate.lock().await;
        let frame = {
            let mut param = self.param.lock();
            param.desired.head.msg_id = id;
            // Frames are unfragmented unless the stage closure says so.
            param.desired.head.attr.set_fragmented(false);
            param.desired.head.total_packets = 0;
            param.desired.head.packet_seq = 0;
            stage(&mut param);
            package_frame(&self.packager.read(), &param)?
        };
        transport.send(&frame).await?;
        let mut param = self.param.lock();
        param.desired.head.flow_num = param.desired.head.flow_num.next();
        Ok(())
    }

    /// Pull the next complete frame off the transport.
    async fn recv_frame(&self) -> Result<Vec<u8>> {
        let transport = self.current_transport()?;
        loop {
            if let Some(frame) = self.frames.lock().next_frame()? {
                return Ok(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = transport.recv(&mut chunk, Duration::from_millis(500)).await?;
            self.frames.lock().extend(&chunk[..n]);
        }
    }

    fn parse_one(&self, frame: &[u8]) -> Result<u16> {
        let parser = self.parser.read();
        let mut param = self.param.lock();
        parse_frame(&parser, frame, &mut param)
    }

    /// Receive loop: parse inbound frames and apply platform commands.
    async fn receive_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let frame = match self.recv_frame().await {
                Ok(frame) => frame,
                Err(Error::Transport(TransportError::Timeout)) => continue,
                Err(e) if e.is_frame_local() => {
                    warn!(error = %e, "dropping malformed frame");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "transport failed, leaving session");
                    self.running.store(false, Ordering::SeqCst);
                    *self.state.write() = ClientState::Disconnected;
                    break;
                }
            };

            match self.parse_one(&frame) {
                Ok(id) => {
                    if let Err(e) = self.handle_inbound(id).await {
                        warn!(msg_id = format_args!("{id:#06x}"), error = %e, "inbound handling failed");
                    }
                }
                Err(Error::Codec(crate::error::CodecError::BadChecksum { .. })) => {
                    // Silent drop; the peer retransmits.
                    debug!("checksum mismatch, frame dropped");
                }
                Err(e) if e.is_frame_local() => {
                    warn!(error = %e, "bad inbound frame");
                    let _ = self
                        .send_staged(msg_id::TERMINAL_GENERAL_RESPONSE, |para| {
                            para.stage_ack(GeneralResult::MessageHasWrong as u8);
                        })
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "parse failed fatally");
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
        debug!("client receive loop stopped");
    }

    /// Periodic loop: heartbeats and location reports.
    async fn periodic_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(250));
        let mut last_heartbeat = Instant::now();
        let mut last_report = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            let now = Instant::now();

            // Heartbeat cadence comes from the parameter table; a missing
            // parameter means no heartbeat.
            let heartbeat = self
                .param
                .lock()
                .desired
                .parameters
                .heartbeat_interval()
                .map(|s| Duration::from_secs(u64::from(s)));
            if let Some(every) = heartbeat {
                if now.duration_since(last_heartbeat) >= every {
                    if let Err(e) = self.send_message(msg_id::TERMINAL_HEARTBEAT).await {
                        warn!(error = %e, "heartbeat send failed");
                    }
                    last_heartbeat = now;
                }
            }

            // Tracking control overrides the configured report interval
            // until its validity window lapses.
            let tracking = {
                let mut guard = self.tracking.lock();
                match *guard {
                    Some((every, until)) if now < until => Some(every),
                    Some(_) => {
                        *guard = None;
                        None
                    }
                    None => None,
                }
            };
            let report_every = tracking.unwrap_or(self.config.location_report_interval);
            let immediate = self.report_flags.swap(0, Ordering::SeqCst) != 0;
            if immediate || now.duration_since(last_report) >= report_every {
                if let Err(e) = self.send_message(msg_id::LOCATION_REPORT).await {
                    warn!(error = %e, "location report failed");
                }
                last_report = now;
            }
        }
        debug!("client periodic loop stopped");
    }

    /// Apply one parsed platform command and answer it.
    async fn handle_inbound(self: &Arc<Self>, id: u16) -> Result<()> {
        match id {
            msg_id::PLATFORM_GENERAL_RESPONSE => {
                let ack = self.param.lock().parse.ack;
                debug!(
                    acked = format_args!("{:#06x}", ack.msg_id),
                    result = ack.result,
                    "platform ack"
                );
            }
            msg_id::MULTIMEDIA_UPLOAD_RESPONSE => {
                let ack = self.param.lock().parse.media_ack.clone();
                let _ = self.events.send(ClientEvent::MediaAck(ack));
            }
            msg_id::SET_PARAMETERS => {
                let updated = {
                    let mut param = self.param.lock();
                    let incoming = param.parse.parameters.clone();
                    param.desired.parameters.merge(&incoming);
                    param.desired.parameters.clone()
                };
                if let Some(cb) = self.on_parameters.read().as_ref() {
                    cb(&updated);
                }
                self.ack_success().await?;
            }
            msg_id::QUERY_PARAMETERS => {
                self.send_staged(msg_id::QUERY_PARAMETERS_RESPONSE, |para| {
                    para.stage_ack(GeneralResult::Success as u8);
                    para.desired.query_param_ids.clear();
                })
                .await?;
            }
            msg_id::QUERY_SPECIFIC_PARAMETERS => {
                self.send_staged(msg_id::QUERY_PARAMETERS_RESPONSE, |para| {
                    para.stage_ack(GeneralResult::Success as u8);
                    para.desired.query_param_ids = para.parse.query_param_ids.clone();
                })
                .await?;
            }
            msg_id::QUERY_LOCATION => {
                self.send_staged(msg_id::QUERY_LOCATION_RESPONSE, |para| {
                    para.stage_ack(GeneralResult::Success as u8);
                })
                .await?;
            }
            msg_id::TRACKING_CONTROL => {
                let ctrl = self.param.lock().parse.tracking;
                {
                    let mut tracking = self.tracking.lock();
                    *tracking = if ctrl.interval == 0 {
                        None
                    } else {
                        Some((
                            Duration::from_secs(u64::from(ctrl.interval)),
                            Instant::now() + Duration::from_secs(u64::from(ctrl.duration)),
                        ))
                    };
                }
                info!(
                    interval = ctrl.interval,
                    duration = ctrl.duration,
                    "tracking control applied"
                );
                self.ack_success().await?;
            }
            msg_id::SET_POLYGON_AREA => {
                let area = self.param.lock().parse.polygon_area.clone();
                info!(area_id = area.area_id, vertices = area.vertices.len(), "polygon area set");
                self.polygons.write().update(area);
                if let Some(cb) = self.on_areas.read().as_ref() {
                    cb(&self.polygons.read());
                }
                self.ack_success().await?;
            }
            msg_id::DELETE_POLYGON_AREA => {
                let ids = self.param.lock().parse.delete_area_ids.clone();
                self.polygons.write().remove_ids(&ids);
                if let Some(cb) = self.on_areas.read().as_ref() {
                    cb(&self.polygons.read());
                }
                self.ack_success().await?;
            }
            msg_id::UPGRADE_PACKAGE => {
                self.handle_upgrade_fragment().await?;
            }
            msg_id::FILL_PACKET_REQUEST => {
                let fill = self.param.lock().parse.fill_packet.clone();
                warn!(
                    first_flow = fill.first_packet_flow,
                    missing = fill.packet_ids.len(),
                    "fill-packet request received"
                );
                self.ack_success().await?;
            }
            other if is_response_command(other) => {
                debug!(msg_id = format_args!("{other:#06x}"), "response frame consumed");
            }
            other => {
                // Any unhandled platform request gets a success ack.
                debug!(msg_id = format_args!("{other:#06x}"), "acknowledging unhandled command");
                self.ack_success().await?;
            }
        }
        Ok(())
    }

    /// Acknowledge the last parsed message with success.
    async fn ack_success(&self) -> Result<()> {
        self.send_staged(msg_id::TERMINAL_GENERAL_RESPONSE, |para| {
            para.stage_ack(GeneralResult::Success as u8);
        })
        .await
    }

    /// One 0x8108 frame: collect the fragment (or whole package), ack it,
    /// and deliver once complete.
    async fn handle_upgrade_fragment(self: &Arc<Self>) -> Result<()> {
        let (fragmented, seq, total, target, data) = {
            let param = self.param.lock();
            (
                param.parse.head.attr.fragmented(),
                param.parse.head.packet_seq,
                param.parse.head.total_packets,
                param.parse.upgrade.target,
                param.parse.upgrade.data.clone(),
            )
        };

        if !fragmented {
            self.ack_success().await?;
            self.deliver_upgrade(target, &data);
            return Ok(());
        }

        *self.state.write() = ClientState::Upgrading;
        {
            let mut buf = self.upgrade_buf.lock();
            if seq == 1 {
                *buf = Some(Reassembly::new(total, data.len()));
            }
            match buf.as_mut() {
                Some(assembly) => assembly.insert(seq, &data)?,
                None => {
                    warn!(seq, "upgrade fragment before the first, dropped");
                    return Ok(());
                }
            }
        }
        self.ack_success().await?;

        let complete = self
            .upgrade_buf
            .lock()
            .as_ref()
            .map(Reassembly::is_complete)
            .unwrap_or(false);
        if complete {
            let assembly = self.upgrade_buf.lock().take().expect("checked above");
            let package = assembly.assemble()?;
            info!(bytes = package.len(), "upgrade package reassembled");
            self.deliver_upgrade(target, &package);
            *self.state.write() = ClientState::Active;
        }
        Ok(())
    }

    fn deliver_upgrade(self: &Arc<Self>, target: u8, data: &[u8]) {
        if let Some(cb) = self.on_upgrade.read().as_ref() {
            cb(target, data);
        }
        // Report success in the background; the caller can override with
        // report_upgrade_result.
        let inner = Arc::clone(self);
        let target_copy = target;
        tokio::spawn(async move {
            {
                let mut param = inner.param.lock();
                param.desired.upgrade.target = target_copy;
                param.desired.upgrade.result = 0;
            }
            if let Err(e) = inner.send_message(msg_id::UPGRADE_RESULT).await {
                warn!(error = %e, "upgrade result report failed");
            }
        });
    }

    async fn upload_multimedia_inner(
        &self,
        media_id: u32,
        media_type: u8,
        media_format: u8,
        event: u8,
        channel_id: u8,
        data: &[u8],
    ) -> Result<()> {
        // Fixed body overhead: id(4) + type/format/event/channel(4) +
        // location block(28).
        let overhead = 36;
        let max_payload = MAX_BODY_SIZE - overhead;
        let location = {
            let param = self.param.lock();
            crate::packager::encode_location_body(
                &param.desired.location,
                &crate::location::ExtensionMap::new(),
            )?
        };

        fn stage_media(
            desired: &mut MessageContent,
            ids: (u32, u8, u8, u8, u8),
            location: Vec<u8>,
            payload: Vec<u8>,
        ) {
            desired.media.media_id = ids.0;
            desired.media.media_type = ids.1;
            desired.media.media_format = ids.2;
            desired.media.event = ids.3;
            desired.media.channel_id = ids.4;
            desired.media.location = location;
            desired.media.data = payload;
        }
        let ids = (media_id, media_type, media_format, event, channel_id);

        let mut events = self.events.subscribe();

        if data.len() <= max_payload {
            let location_copy = location.clone();
            let payload = data.to_vec();
            self.send_staged(msg_id::MULTIMEDIA_UPLOAD, move |para| {
                stage_media(&mut para.desired, ids, location_copy, payload);
            })
            .await?;
        } else {
            let chunks = split(data, max_payload);
            let total = fragment_count(data.len(), max_payload);
            for (idx, chunk) in chunks.iter().enumerate() {
                let seq = (idx + 1) as u16;
                let location_copy = location.clone();
                let payload = chunk.to_vec();
                self.send_staged(msg_id::MULTIMEDIA_UPLOAD, move |para| {
                    stage_media(&mut para.desired, ids, location_copy, payload);
                    para.desired.head.attr.set_fragmented(true);
                    para.desired.head.total_packets = total;
                    para.desired.head.packet_seq = seq;
                })
                .await?;
            }
        }

        // Await the platform's 0x8800, re-sending requested fragments.
        let deadline = self.config.response_timeout;
        for _attempt in 0..3 {
            let ack = timeout(deadline, async {
                loop {
                    match events.recv().await {
                        Ok(ClientEvent::MediaAck(ack)) if ack.media_id == media_id => {
                            return Some(ack)
                        }
                        Ok(_) => continue,
                        Err(_) => return None,
                    }
                }
            })
            .await
            .map_err(|_| Error::from(TransportError::Timeout))?
            .ok_or_else(|| Error::from(TransportError::Closed))?;

            if ack.reload_packet_ids.is_empty() {
                info!(media_id, "multimedia upload acknowledged");
                return Ok(());
            }

            warn!(media_id, missing = ack.reload_packet_ids.len(), "re-sending fragments");
            let chunks = split(data, max_payload);
            let total = fragment_count(data.len(), max_payload);
            for seq in ack.reload_packet_ids {
                let Some(chunk) = chunks.get((seq - 1) as usize) else {
                    continue;
                };
                let location_copy = location.clone();
                let payload = chunk.to_vec();
                self.send_staged(msg_id::MULTIMEDIA_UPLOAD, move |para| {
                    stage_media(&mut para.desired, ids, location_copy, payload);
                    para.desired.head.attr.set_fragmented(true);
                    para.desired.head.total_packets = total;
                    para.desired.head.packet_seq = seq;
                })
                .await?;
            }
        }

        Err(ProtocolError::AckFailed {
            msg_id: msg_id::MULTIMEDIA_UPLOAD,
            result: GeneralResult::Failure as u8,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_is_disconnected() {
        let client = TerminalClient::new(ClientConfig::default());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(!client.is_running());
    }

    #[test]
    fn registry_mutation_allowed_before_run() {
        let client = TerminalClient::new(ClientConfig::default());
        let encoder: EncodeFn = Arc::new(|_| Ok(vec![1]));
        assert!(client.append_encoder(0x0F10, encoder).unwrap());
    }

    #[test]
    fn alarm_setter_marks_immediate_report() {
        let client = TerminalClient::new(ClientConfig::default());
        client.set_alarm_bits(AlarmBits::OVERSPEED);
        assert_eq!(client.alarm_bits(), AlarmBits::OVERSPEED);
        assert_eq!(
            client.inner.report_flags.load(Ordering::SeqCst) & report_flag::ALARM_OCCURRED,
            report_flag::ALARM_OCCURRED
        );
    }

    #[test]
    fn heartbeat_interval_follows_parameter() {
        let client = TerminalClient::new(ClientConfig::default());
        assert_eq!(client.heartbeat_interval(), None);
        client.set_heartbeat_interval(15);
        assert_eq!(client.heartbeat_interval(), Some(Duration::from_secs(15)));
    }
}

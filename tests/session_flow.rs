//! End-to-end session tests over in-memory pipes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, timeout};

use jt808::client::{ClientState, TerminalClient};
use jt808::config::{ClientConfig, ServerConfig};
use jt808::packager::{package_frame, Packager};
use jt808::parser::{parse_frame, Parser};
use jt808::protocol::{msg_id, FrameBuffer, ProtocolParameter};
use jt808::server::PlatformServer;
use jt808::transport::{MemoryTransport, Transport};
use jt808::types::{FlowNumber, GeneralResult, PlateColor, RegisterResult};

const PHONE: &str = "13523339527";

fn client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.phone = PHONE.to_string();
    config.register.province_id = 12;
    config.register.city_id = 34;
    config.register.manufacturer_id = "MFG01".into();
    config.register.terminal_model = "MODELABC".into();
    config.register.terminal_id = "T001".into();
    config.register.plate_color = 2;
    config.register.plate_number = "\u{9c81}A12345".into();
    config.response_timeout = Duration::from_secs(2);
    config
}

/// Hand-rolled platform end of a pipe, for byte-level assertions.
struct ScriptedPlatform {
    transport: Arc<MemoryTransport>,
    packager: Packager,
    parser: Parser,
    para: ProtocolParameter,
    frames: FrameBuffer,
}

impl ScriptedPlatform {
    fn new(transport: Arc<MemoryTransport>) -> Self {
        let mut para = ProtocolParameter::new();
        para.desired.head.flow_num = FlowNumber(1);
        Self {
            transport,
            packager: Packager::with_defaults(),
            parser: Parser::with_defaults(),
            para,
            frames: FrameBuffer::new(),
        }
    }

    async fn recv_msg(&mut self) -> u16 {
        loop {
            if let Some(frame) = self.frames.next_frame().unwrap() {
                return parse_frame(&self.parser, &frame, &mut self.para).unwrap();
            }
            let mut chunk = [0u8; 4096];
            let n = self
                .transport
                .recv(&mut chunk, Duration::from_secs(2))
                .await
                .unwrap();
            self.frames.extend(&chunk[..n]);
        }
    }

    /// Try to receive anything within the window; `None` on silence.
    async fn recv_any(&mut self, window: Duration) -> Option<Vec<u8>> {
        if let Some(frame) = self.frames.next_frame().unwrap() {
            return Some(frame);
        }
        let mut chunk = [0u8; 4096];
        match self.transport.recv(&mut chunk, window).await {
            Ok(n) => {
                self.frames.extend(&chunk[..n]);
                self.frames.next_frame().unwrap()
            }
            Err(_) => None,
        }
    }

    async fn send_msg(&mut self, id: u16, stage: impl FnOnce(&mut ProtocolParameter)) {
        self.para.desired.head.msg_id = id;
        self.para.desired.head.phone = self.para.parse.head.phone.clone();
        stage(&mut self.para);
        let frame = package_frame(&self.packager, &self.para).unwrap();
        self.transport.send(&frame).await.unwrap();
        self.para.desired.head.flow_num = self.para.desired.head.flow_num.next();
    }

    async fn send_raw(&self, bytes: &[u8]) {
        self.transport.send(bytes).await.unwrap();
    }
}

/// Register + authenticate against a scripted platform, asserting the
/// exact flow numbers and the auth-code echo.
#[tokio::test]
async fn register_and_authenticate_flows() {
    let (client_end, platform_end) = MemoryTransport::pair();
    let client = TerminalClient::new(client_config());
    client.attach_transport(Arc::new(client_end));

    let mut platform = ScriptedPlatform::new(Arc::new(platform_end));
    let platform_task = tokio::spawn(async move {
        // Register.
        let id = platform.recv_msg().await;
        assert_eq!(id, msg_id::TERMINAL_REGISTER);
        assert_eq!(platform.para.parse.head.flow_num, FlowNumber(1));
        assert_eq!(platform.para.parse.head.phone.as_str(), PHONE);
        let info = &platform.para.parse.register_info;
        assert_eq!(info.province_id, 12);
        assert_eq!(info.city_id, 34);
        assert_eq!(info.manufacturer_id, b"MFG01");
        assert_eq!(info.terminal_model, b"MODELABC");
        assert_eq!(info.terminal_id, b"T001");
        assert_eq!(info.plate_color, PlateColor::Yellow);
        assert_eq!(info.plate_number, "\u{9c81}A12345");

        platform.para.desired.auth_code = b"7788".to_vec();
        platform
            .send_msg(msg_id::REGISTER_RESPONSE, |para| {
                para.stage_ack(RegisterResult::Success as u8);
            })
            .await;

        // Authenticate.
        let id = platform.recv_msg().await;
        assert_eq!(id, msg_id::TERMINAL_AUTH);
        assert_eq!(platform.para.parse.head.flow_num, FlowNumber(2));
        assert_eq!(platform.para.parse.auth_code, b"7788");

        platform
            .send_msg(msg_id::PLATFORM_GENERAL_RESPONSE, |para| {
                para.stage_ack(GeneralResult::Success as u8);
            })
            .await;
        platform
    });

    client.authenticate().await.unwrap();
    assert_eq!(client.state(), ClientState::Active);
    platform_task.await.unwrap();
}

/// A frame with an interior unescaped sentinel or a tampered checksum
/// never disturbs the session; the checksum case is a silent drop.
#[tokio::test]
async fn malformed_and_tampered_frames_leave_session_active() {
    let (client_end, platform_end) = MemoryTransport::pair();
    let client = TerminalClient::new(client_config());
    client.attach_transport(Arc::new(client_end));

    let mut platform = ScriptedPlatform::new(Arc::new(platform_end));
    let handshake = tokio::spawn(async move {
        assert_eq!(platform.recv_msg().await, msg_id::TERMINAL_REGISTER);
        platform.para.desired.auth_code = b"7788".to_vec();
        platform
            .send_msg(msg_id::REGISTER_RESPONSE, |para| {
                para.stage_ack(RegisterResult::Success as u8);
            })
            .await;
        assert_eq!(platform.recv_msg().await, msg_id::TERMINAL_AUTH);
        platform
            .send_msg(msg_id::PLATFORM_GENERAL_RESPONSE, |para| {
                para.stage_ack(GeneralResult::Success as u8);
            })
            .await;
        platform
    });
    client.authenticate().await.unwrap();
    let mut platform = handshake.await.unwrap();
    client.run().unwrap();

    // Build a known-good 0x8202 frame, then corrupt it two ways.
    platform.para.desired.tracking.interval = 5;
    platform.para.desired.tracking.duration = 60;
    platform.para.desired.head.msg_id = msg_id::TRACKING_CONTROL;
    let good = package_frame(&platform.packager, &platform.para).unwrap();

    // Unescaped interior sentinel: the codec resynchronizes and drops.
    let mut bad_escape = good.clone();
    bad_escape.insert(4, 0x7E);
    platform.send_raw(&bad_escape).await;

    // Tampered payload byte: the checksum fails and the drop is silent,
    // so nothing must come back. (The interleaved sentinel above may
    // produce one MessageHasWrong answer; drain first.)
    sleep(Duration::from_millis(200)).await;
    while platform.recv_any(Duration::from_millis(100)).await.is_some() {}

    let mut tampered = good.clone();
    let idx = tampered.len() - 3; // last payload byte before checksum
    tampered[idx] ^= 0xFF;
    platform.send_raw(&tampered).await;

    let answer = platform.recv_any(Duration::from_millis(300)).await;
    assert!(answer.is_none(), "checksum failure must be a silent drop");
    assert_eq!(client.state(), ClientState::Active);

    // The session still works: the intact frame is applied and acked.
    platform
        .send_msg(msg_id::TRACKING_CONTROL, |para| {
            para.desired.tracking.interval = 5;
            para.desired.tracking.duration = 60;
        })
        .await;
    let id = platform.recv_msg().await;
    assert_eq!(id, msg_id::TERMINAL_GENERAL_RESPONSE);
    assert_eq!(platform.para.parse.ack.msg_id, msg_id::TRACKING_CONTROL);
    assert_eq!(platform.para.parse.ack.result, GeneralResult::Success as u8);

    client.stop().await;
}

/// Full stack: real client against real server, including the parameter
/// query round trip.
#[tokio::test]
async fn client_against_real_server() {
    let server = PlatformServer::new(ServerConfig::default());
    let reported = Arc::new(Mutex::new(Vec::<(String, usize)>::new()));
    let reported_clone = Arc::clone(&reported);
    server.on_parameters_reported(Box::new(move |phone, params| {
        reported_clone.lock().push((phone.to_string(), params.len()));
    }));

    let (client_end, server_end) = MemoryTransport::pair();
    server.serve_transport(Arc::new(server_end));

    let client = TerminalClient::new(client_config());
    client.set_heartbeat_interval(60);
    client.update_location_units(31.824636, 117.2, 40.0, 60.0, 90.0, "200714123045");
    client.attach_transport(Arc::new(client_end));
    client.authenticate().await.unwrap();
    assert_eq!(client.state(), ClientState::Active);
    client.run().unwrap();

    // Session registered under the phone number.
    timeout(Duration::from_secs(2), async {
        while server.session(PHONE).is_none() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // Heartbeat and location report land without errors.
    client.heartbeat_now().await.unwrap();
    client.report_location_now().await.unwrap();

    // Parameter query: the terminal replies with its table.
    server.query_all_parameters(PHONE).await.unwrap();
    timeout(Duration::from_secs(2), async {
        while reported.lock().is_empty() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    let (phone, count) = reported.lock()[0].clone();
    assert_eq!(phone, PHONE);
    assert_eq!(count, 1); // the heartbeat interval parameter

    client.stop().await;
    server.stop().await;
}

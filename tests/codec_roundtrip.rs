//! Frame and body codec round-trip tests.

use jt808::location::{extension_id, LocationBasic, StatusBits};
use jt808::packager::{package_frame, Packager};
use jt808::params::{self, param_id};
use jt808::parser::{parse_frame, Parser};
use jt808::protocol::{escape, msg_id, unescape, ProtocolParameter};
use jt808::types::{FlowNumber, PhoneNumber, PlateColor, RegisterInfo};

fn fresh_param() -> ProtocolParameter {
    let mut para = ProtocolParameter::new();
    para.desired.head.phone = PhoneNumber::new("13523339527").unwrap();
    para.desired.head.flow_num = FlowNumber(1);
    para
}

fn roundtrip(para: &mut ProtocolParameter, id: u16) {
    para.desired.head.msg_id = id;
    let frame = package_frame(&Packager::with_defaults(), para).unwrap();
    let parsed = parse_frame(&Parser::with_defaults(), &frame, para).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn heartbeat_golden_frame() {
    let mut para = ProtocolParameter::new();
    para.desired.head.phone = PhoneNumber::new("1").unwrap();
    para.desired.head.flow_num = FlowNumber(1);
    para.desired.head.msg_id = msg_id::TERMINAL_HEARTBEAT;
    let frame = package_frame(&Packager::with_defaults(), &para).unwrap();
    assert_eq!(hex::encode(&frame), "7e000200000000000000010001027e");
}

#[test]
fn escape_involution_over_all_bytes() {
    let mut raw = vec![0x7E];
    raw.extend((0u8..=255).cycle().take(1024));
    raw.push(0x7E);
    let escaped = escape(&raw).unwrap();
    assert_eq!(unescape(&escaped).unwrap(), raw);
}

#[test]
fn checksum_detects_any_single_byte_flip() {
    let mut para = fresh_param();
    para.desired.head.msg_id = msg_id::TERMINAL_AUTH;
    para.desired.auth_code = b"7788".to_vec();
    let frame = package_frame(&Packager::with_defaults(), &para).unwrap();
    let raw = unescape(&frame).unwrap();

    // Flip every byte between the sentinels except the checksum itself.
    for i in 1..raw.len() - 2 {
        let mut tampered = raw.clone();
        tampered[i] ^= 0x10;
        let reframed = escape(&tampered).unwrap();
        let mut out = ProtocolParameter::new();
        let err = parse_frame(&Parser::with_defaults(), &reframed, &mut out);
        assert!(err.is_err(), "flip at {i} went undetected");
    }
}

#[test]
fn location_report_fixture() {
    // alarm=0, positioning on, 31.824636 N 117.2 E, 40 m, 60 km/h,
    // bearing 90, mileage item 0x00000578.
    let mut para = fresh_param();
    let mut location =
        LocationBasic::from_units(31.824636, 117.2, 40.0, 60.0, 90.0, "200714123045");
    let mut status = StatusBits::new(0);
    status.set(StatusBits::POSITIONED);
    location.status = status;
    para.desired.location = location;
    para.desired
        .extensions
        .insert(extension_id::MILEAGE, vec![0x00, 0x00, 0x05, 0x78]);

    roundtrip(&mut para, msg_id::LOCATION_REPORT);

    let loc = &para.parse.location;
    assert_eq!(loc.alarm.raw(), 0);
    assert!(loc.status.positioned());
    assert_eq!(loc.latitude, 31_824_636);
    assert_eq!(loc.longitude, 117_200_000);
    assert_eq!(loc.altitude, 40);
    assert_eq!(loc.speed, 600);
    assert_eq!(loc.bearing, 90);
    assert_eq!(loc.time, "200714123045");
    assert_eq!(
        para.parse.extensions.get(extension_id::MILEAGE),
        Some(&[0x00, 0x00, 0x05, 0x78][..])
    );
}

#[test]
fn register_fixture() {
    let mut para = fresh_param();
    para.desired.register_info = RegisterInfo {
        province_id: 12,
        city_id: 34,
        manufacturer_id: b"MFG01".to_vec(),
        terminal_model: b"MODELABC".to_vec(),
        terminal_id: b"T001".to_vec(),
        plate_color: PlateColor::Yellow,
        plate_number: "\u{9c81}A12345".to_string(),
    };
    roundtrip(&mut para, msg_id::TERMINAL_REGISTER);
    assert_eq!(para.parse.register_info, para.desired.register_info);
}

#[test]
fn ntrip_cors_parameter_scenario() {
    // The platform configures seven Ntrip CORS items; the terminal
    // reproduces them; a specific query for two IDs yields exactly those
    // two, in query order.
    let packager = Packager::with_defaults();
    let parser = Parser::with_defaults();

    let mut platform = fresh_param();
    let mut terminal = fresh_param();

    params::set_ntrip_cors(
        &mut platform.desired.parameters,
        "192.168.3.111",
        8002,
        "user01",
        "123456",
        "RTCM23_GPS",
        10,
        1,
    );

    // 0x8103 set -> terminal.
    platform.desired.head.msg_id = msg_id::SET_PARAMETERS;
    let frame = package_frame(&packager, &platform).unwrap();
    parse_frame(&parser, &frame, &mut terminal).unwrap();
    assert_eq!(terminal.parse.parameters.len(), 7);
    terminal.desired.parameters = terminal.parse.parameters.clone();

    let cors = params::get_ntrip_cors(&terminal.desired.parameters).unwrap();
    assert_eq!(cors.ip, "192.168.3.111");
    assert_eq!(cors.port, 8002);
    assert_eq!(cors.user, "user01");
    assert_eq!(cors.password, "123456");
    assert_eq!(cors.mount_point, "RTCM23_GPS");
    assert_eq!(cors.gga_interval, 10);
    assert_eq!(cors.startup, 1);

    // 0x8106 query {IP, PORT} -> terminal; 0x0104 reply preserves order.
    platform.desired.query_param_ids =
        vec![param_id::NTRIP_CORS_IP, param_id::NTRIP_CORS_PORT];
    platform.desired.head.msg_id = msg_id::QUERY_SPECIFIC_PARAMETERS;
    let frame = package_frame(&packager, &platform).unwrap();
    parse_frame(&parser, &frame, &mut terminal).unwrap();
    assert_eq!(
        terminal.parse.query_param_ids,
        vec![param_id::NTRIP_CORS_IP, param_id::NTRIP_CORS_PORT]
    );

    terminal.desired.query_param_ids = terminal.parse.query_param_ids.clone();
    terminal.stage_ack(0);
    terminal.desired.head.msg_id = msg_id::QUERY_PARAMETERS_RESPONSE;
    let frame = package_frame(&packager, &terminal).unwrap();

    // Check the raw body: exactly two items, IP first.
    let raw = unescape(&frame).unwrap();
    let body = &raw[13..raw.len() - 2];
    assert_eq!(body[2], 2); // item count after the ack flow number
    let first_id = u32::from_be_bytes([body[3], body[4], body[5], body[6]]);
    assert_eq!(first_id, param_id::NTRIP_CORS_IP);

    parse_frame(&parser, &frame, &mut platform).unwrap();
    assert_eq!(platform.parse.parameters.len(), 2);
    assert_eq!(
        platform
            .parse
            .parameters
            .get::<String>(param_id::NTRIP_CORS_IP)
            .unwrap()
            .unwrap(),
        "192.168.3.111"
    );
    assert_eq!(
        platform
            .parse
            .parameters
            .get::<u16>(param_id::NTRIP_CORS_PORT)
            .unwrap()
            .unwrap(),
        8002
    );
}

#[test]
fn every_supported_id_round_trips_defaults() {
    // Messages whose default-constructed bodies are legal on both sides.
    let ids = [
        msg_id::TERMINAL_GENERAL_RESPONSE,
        msg_id::PLATFORM_GENERAL_RESPONSE,
        msg_id::TERMINAL_HEARTBEAT,
        msg_id::TERMINAL_LOGOUT,
        msg_id::FILL_PACKET_REQUEST,
        msg_id::TERMINAL_AUTH,
        msg_id::SET_PARAMETERS,
        msg_id::QUERY_PARAMETERS,
        msg_id::QUERY_SPECIFIC_PARAMETERS,
        msg_id::QUERY_PARAMETERS_RESPONSE,
        msg_id::UPGRADE_RESULT,
        msg_id::QUERY_LOCATION,
        msg_id::TRACKING_CONTROL,
        msg_id::DELETE_POLYGON_AREA,
        msg_id::MULTIMEDIA_UPLOAD_RESPONSE,
        msg_id::BATCH_LOCATION_REPORT,
        msg_id::VERSION_INFO,
        msg_id::DRIVING_LICENCE_DATA,
    ];
    for id in ids {
        let mut para = fresh_param();
        para.desired.location.time = "200714123045".into();
        para.desired.can_data.receive_time = "1230450000".into();
        roundtrip(&mut para, id);
    }
}

#[test]
fn fragmented_head_round_trips() {
    let mut para = fresh_param();
    para.desired.head.attr.set_fragmented(true);
    para.desired.head.total_packets = 6;
    para.desired.head.packet_seq = 3;
    para.desired.upgrade.manufacturer_id = b"MFG01".to_vec();
    para.desired.upgrade.version = "V2.1".into();
    para.desired.upgrade.total_len = 3000;
    para.desired.upgrade.data = vec![0xAB; 500];

    roundtrip(&mut para, msg_id::UPGRADE_PACKAGE);

    assert!(para.parse.head.attr.fragmented());
    assert_eq!(para.parse.head.total_packets, 6);
    assert_eq!(para.parse.head.packet_seq, 3);
    assert_eq!(para.parse.upgrade.version, "V2.1");
    assert_eq!(para.parse.upgrade.total_len, 3000);
    assert_eq!(para.parse.upgrade.data.len(), 500);
}

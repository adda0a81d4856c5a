//! Fragmented transfer tests: upgrade push and multimedia upload.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, timeout};

use jt808::client::{ClientState, TerminalClient};
use jt808::config::{ClientConfig, ServerConfig};
use jt808::protocol::fragment::fragment_count;
use jt808::server::PlatformServer;
use jt808::transport::MemoryTransport;

const PHONE: &str = "13523339527";

fn client_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.phone = PHONE.to_string();
    config.register.manufacturer_id = "MFG01".into();
    config.register.terminal_model = "MODELABC".into();
    config.register.terminal_id = "T001".into();
    config.response_timeout = Duration::from_secs(2);
    config
}

async fn connected_pair() -> (PlatformServer, TerminalClient) {
    let server = PlatformServer::new(ServerConfig::default());
    let (client_end, server_end) = MemoryTransport::pair();
    server.serve_transport(Arc::new(server_end));

    let client = TerminalClient::new(client_config());
    client.update_location_units(31.824636, 117.2, 40.0, 60.0, 90.0, "200714123045");
    client.attach_transport(Arc::new(client_end));
    client.authenticate().await.unwrap();
    client.run().unwrap();

    timeout(Duration::from_secs(2), async {
        while server.session(PHONE).is_none() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    (server, client)
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// A 3,000-byte package at 500 bytes per fragment travels as 6 acked
/// fragments and reassembles byte-for-byte.
#[tokio::test]
async fn upgrade_push_reassembles() {
    let (server, client) = connected_pair().await;

    let received = Arc::new(Mutex::new(None::<(u8, Vec<u8>)>));
    let received_clone = Arc::clone(&received);
    client.on_upgrade(Box::new(move |target, data| {
        *received_clone.lock() = Some((target, data.to_vec()));
    }));

    let package = patterned(3000);
    assert_eq!(fragment_count(package.len(), 500), 6);

    server
        .push_upgrade(PHONE, 0, b"MFG01".to_vec(), "V2.1", &package, Some(500))
        .await
        .unwrap();

    timeout(Duration::from_secs(3), async {
        while received.lock().is_none() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let (target, data) = received.lock().take().unwrap();
    assert_eq!(target, 0);
    assert_eq!(data, package);
    assert_eq!(client.state(), ClientState::Active);

    client.stop().await;
    server.stop().await;
}

/// A small package still fits one unfragmented frame.
#[tokio::test]
async fn upgrade_push_single_frame() {
    let (server, client) = connected_pair().await;

    let received = Arc::new(Mutex::new(None::<Vec<u8>>));
    let received_clone = Arc::clone(&received);
    client.on_upgrade(Box::new(move |_, data| {
        *received_clone.lock() = Some(data.to_vec());
    }));

    let package = patterned(200);
    server
        .push_upgrade(PHONE, 0, b"MFG01".to_vec(), "V1.0", &package, None)
        .await
        .unwrap();

    timeout(Duration::from_secs(2), async {
        while received.lock().is_none() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(received.lock().take().unwrap(), package);

    client.stop().await;
    server.stop().await;
}

/// A multimedia payload above the single-frame budget fragments, the
/// platform reassembles it, and the terminal gets its 0x8800.
#[tokio::test]
async fn multimedia_upload_reassembles() {
    let (server, client) = connected_pair().await;

    let received = Arc::new(Mutex::new(None::<(String, u32, Vec<u8>)>));
    let received_clone = Arc::clone(&received);
    server.on_multimedia_uploaded(Box::new(move |phone, media| {
        *received_clone.lock() = Some((phone.to_string(), media.media_id, media.data.clone()));
    }));

    let payload = patterned(2500);
    client
        .upload_multimedia(77, 0, 0, 2, 1, &payload)
        .await
        .unwrap();

    let (phone, media_id, data) = received.lock().take().unwrap();
    assert_eq!(phone, PHONE);
    assert_eq!(media_id, 77);
    assert_eq!(data, payload);

    client.stop().await;
    server.stop().await;
}

/// A small multimedia payload goes out unfragmented.
#[tokio::test]
async fn multimedia_upload_single_frame() {
    let (server, client) = connected_pair().await;

    let received = Arc::new(Mutex::new(None::<Vec<u8>>));
    let received_clone = Arc::clone(&received);
    server.on_multimedia_uploaded(Box::new(move |_, media| {
        *received_clone.lock() = Some(media.data.clone());
    }));

    let payload = patterned(300);
    client
        .upload_multimedia(78, 0, 0, 2, 1, &payload)
        .await
        .unwrap();

    assert_eq!(received.lock().take().unwrap(), payload);

    client.stop().await;
    server.stop().await;
}

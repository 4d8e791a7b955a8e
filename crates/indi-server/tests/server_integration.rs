//! End-to-end test over loopback TCP.
//!
//! ```text
//!   ServerConnection (indi-client)  ──►  IndiServer  ──►  fake focuser driver
//! ```
//!
//! The fake driver answers every `getProperties` with its definition and
//! every `newNumberVector` with a matching `setNumberVector`.

use std::sync::Arc;
use std::time::Duration;

use indi_client::infrastructure::network::{ClientConnectionConfig, ServerConnection};
use indi_core::{DesiredValue, IndiMessage, MessageFramer, PropertyState};
use indi_server::application::route_messages::PartyKind;
use indi_server::infrastructure::network::IndiServer;
use indi_server::infrastructure::storage::config::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const FOCUSER_DEF: &str = r#"<defNumberVector device="Focuser" name="ABS_POS" state="Idle" perm="rw"><defNumber name="POS" format="%.0f" min="0" max="100000" step="1">500</defNumber></defNumberVector>"#;

/// Serves one server connection as a minimal focuser driver.
async fn fake_focuser(listener: TcpListener) {
    let Ok((socket, _)) = listener.accept().await else {
        return;
    };
    let (mut reader, mut writer) = socket.into_split();
    let mut framer = MessageFramer::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for message in framer.push(&buf[..n]) {
            let reply = match message {
                IndiMessage::GetProperties(_) => FOCUSER_DEF.to_string(),
                IndiMessage::NewVector(new) => format!(
                    r#"<setNumberVector device="Focuser" name="ABS_POS" state="Ok"><oneNumber name="POS">{}</oneNumber></setNumberVector>"#,
                    new.elements[0].value
                ),
                _ => continue,
            };
            if writer.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Polls `condition` every 20 ms for up to two seconds.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_client_moves_focuser_through_server() {
    // Arrange: driver, server with the driver loaded, and a client
    let driver_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let driver_port = driver_listener.local_addr().unwrap().port();
    tokio::spawn(fake_focuser(driver_listener));

    let server = Arc::new(IndiServer::new(ServerConfig::default()));
    server
        .load_network_driver("127.0.0.1", driver_port)
        .await
        .unwrap();
    let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_port = client_listener.local_addr().unwrap().port();
    let runner = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with_listener(client_listener).await }
    });

    let connection = ServerConnection::connect(ClientConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: server_port,
    })
    .await
    .unwrap();
    let engine = connection.engine();

    // Act: discover
    engine.read().unwrap().ask_for_devices(None, None).unwrap();
    let defined = eventually(|| engine.read().unwrap().property("Focuser", "ABS_POS").is_some()).await;

    // Assert
    assert!(defined, "definition must be relayed to the client");
    let kinds: Vec<PartyKind> = server.engine().snapshot().iter().map(|p| p.kind()).collect();
    assert!(kinds.contains(&PartyKind::Device));
    assert!(kinds.contains(&PartyKind::Client));

    // Act: move
    {
        let mut engine = engine.write().unwrap();
        engine
            .stage("Focuser", "ABS_POS", "POS", DesiredValue::Number(600.0))
            .unwrap();
        assert!(engine.send_changes("Focuser", "ABS_POS").unwrap());
    }
    let moved = eventually(|| {
        let engine = engine.read().unwrap();
        let property = engine.property("Focuser", "ABS_POS").unwrap();
        property.state() == PropertyState::Ok
            && property.element("POS").unwrap().value_string() == "600"
    })
    .await;

    // Assert
    assert!(moved, "the driver's reply must reach the client");

    // Shutdown: unloading the driver tells the client the device is gone
    server.unload_driver(&format!("127.0.0.1:{driver_port}")).await.unwrap();
    let removed = eventually(|| engine.read().unwrap().device("Focuser").is_none()).await;
    assert!(removed, "driver removal must delete the device on the client");

    connection.disconnect();
    server.stop();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_client_without_subscription_receives_nothing() {
    // Arrange
    let driver_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let driver_port = driver_listener.local_addr().unwrap().port();
    tokio::spawn(fake_focuser(driver_listener));
    let server = Arc::new(IndiServer::new(ServerConfig::default()));
    let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_port = client_listener.local_addr().unwrap().port();
    let runner = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run_with_listener(client_listener).await }
    });

    // Act: the client connects first, then the driver is loaded
    let connection = ServerConnection::connect(ClientConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: server_port,
    })
    .await
    .unwrap();
    server
        .load_network_driver("127.0.0.1", driver_port)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert: the driver's answer to the server's own getProperties is not
    // relayed to a client that never asked
    assert!(connection.engine().read().unwrap().devices().is_empty());

    connection.disconnect();
    server.stop();
    runner.await.unwrap().unwrap();
}

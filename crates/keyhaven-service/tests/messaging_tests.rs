//! Messaging-surface tests over a real local socket: handshake, request
//! envelopes, and the {success, error} mapping.

#![cfg(unix)]

use std::sync::Arc;
use tokio::sync::Mutex;

use keyhaven_core::account::UserInfo;
use keyhaven_core::ipc::{IpcServer, VaultRequest, VaultResponse};
use keyhaven_core::ipc_client::send_request;
use keyhaven_core::settings::VaultSettings;

use keyhaven_service::dispatch::ServiceHandler;
use keyhaven_service::identity::StaticIdentity;
use keyhaven_service::persistence::MemoryBlobStore;
use keyhaven_service::service_state::ServiceState;

fn user() -> UserInfo {
    UserInfo {
        email: "a@b.com".to_string(),
        id: "user-1".to_string(),
    }
}

fn spawn_server(secret: Vec<u8>) -> std::path::PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("keyhaven-test.ipc");
    let state = Arc::new(Mutex::new(ServiceState::new(
        Box::new(MemoryBlobStore::default()),
        Box::new(StaticIdentity::new(user())),
        VaultSettings::default(),
    )));
    let handler = Arc::new(ServiceHandler::new(state));
    let server = Arc::new(IpcServer::new(secret, socket.clone()));
    tokio::spawn(async move {
        let _ = server.start(handler).await;
        drop(dir); // keep the tempdir alive for the server's lifetime
    });
    socket
}

async fn wait_for_socket(path: &std::path::Path) {
    for _ in 0..50 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("socket never appeared at {}", path.display());
}

#[tokio::test]
async fn handshake_and_ping() {
    let secret = vec![7u8; 32];
    let socket = spawn_server(secret.clone());
    wait_for_socket(&socket).await;

    let envelope = send_request(socket, &secret, VaultRequest::Ping)
        .await
        .unwrap();
    assert!(envelope.success);
    assert!(matches!(envelope.response, Some(VaultResponse::Pong)));
}

#[tokio::test]
async fn wrong_shared_secret_is_refused() {
    let socket = spawn_server(vec![7u8; 32]);
    wait_for_socket(&socket).await;

    let result = send_request(socket, &[9u8; 32], VaultRequest::Ping).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn handler_errors_map_to_failure_envelopes() {
    let secret = vec![7u8; 32];
    let socket = spawn_server(secret.clone());
    wait_for_socket(&socket).await;

    // No session: a credential read fails, but as a clean envelope with the
    // collapsed auth message, not a dropped connection, not a raw error.
    let envelope = send_request(socket, &secret, VaultRequest::GetCredentials)
        .await
        .unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.error.as_deref(), Some("invalid master secret"));
    assert!(envelope.response.is_none());
}

//! Client side of the messaging surface: connect, authenticate, send one
//! request, return the response envelope.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{Result, VaultError};
use crate::ipc::{
    AuthOk, ClientAuth, ClientHello, IpcEnvelope, RequestEnvelope, ResponseEnvelope,
    ServerChallenge, VaultRequest, IPC_PROTOCOL_VERSION,
};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

fn compute_proof(secret: &[u8], server_nonce: &str, client_nonce: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| VaultError::Storage(format!("mac init: {e}")))?;
    mac.update(server_nonce.as_bytes());
    mac.update(client_nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub async fn send_request(
    socket_path: std::path::PathBuf,
    secret: &[u8],
    request: VaultRequest,
) -> Result<ResponseEnvelope> {
    #[cfg(unix)]
    let stream = UnixStream::connect(socket_path).await?;

    #[cfg(windows)]
    let stream = ClientOptions::new()
        .open(socket_path)
        .map_err(|e| VaultError::Storage(format!("ipc connect: {e}")))?;

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let hello = IpcEnvelope::ClientHello(ClientHello {
        protocol_version: IPC_PROTOCOL_VERSION,
        client_id: "ui".to_string(),
    });
    write_line(&mut writer, &hello).await?;

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let ServerChallenge {
        session_id,
        server_nonce,
    } = match parse(&line)? {
        IpcEnvelope::ServerChallenge(c) => c,
        IpcEnvelope::Error { message } => return Err(VaultError::Storage(message)),
        _ => return Err(VaultError::Format("expected ServerChallenge".to_string())),
    };

    let mut nonce_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let client_nonce = hex::encode(nonce_bytes);
    let proof = compute_proof(secret, &server_nonce, &client_nonce)?;

    let auth = IpcEnvelope::ClientAuth(ClientAuth {
        session_id: session_id.clone(),
        client_nonce,
        proof,
    });
    write_line(&mut writer, &auth).await?;

    line.clear();
    reader.read_line(&mut line).await?;
    let AuthOk { session_id } = match parse(&line)? {
        IpcEnvelope::AuthOk(ok) => ok,
        IpcEnvelope::Error { message } => return Err(VaultError::Storage(message)),
        _ => return Err(VaultError::Format("expected AuthOk".to_string())),
    };

    let request_envelope = IpcEnvelope::Request(RequestEnvelope {
        session_id,
        nonce: 1,
        request,
    });
    write_line(&mut writer, &request_envelope).await?;

    line.clear();
    reader.read_line(&mut line).await?;
    match parse(&line)? {
        IpcEnvelope::Response(envelope) => Ok(envelope),
        IpcEnvelope::Error { message } => Err(VaultError::Storage(message)),
        _ => Err(VaultError::Format("unexpected response".to_string())),
    }
}

fn parse(line: &str) -> Result<IpcEnvelope> {
    serde_json::from_str(line.trim_end()).map_err(|e| VaultError::Format(format!("parse: {e}")))
}

async fn write_line<W>(writer: &mut W, envelope: &IpcEnvelope) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let line =
        serde_json::to_string(envelope).map_err(|e| VaultError::Format(format!("encode: {e}")))?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

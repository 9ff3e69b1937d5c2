//! Local messaging surface between the vault service and its UI clients.
//!
//! Line-delimited JSON over a unix socket (named pipe on Windows). A client
//! authenticates with an HMAC-SHA256 challenge proof keyed by the
//! per-install shared secret, then exchanges request/response envelopes.
//! Handler failures never cross the boundary as raw errors; every response
//! carries `{ success, error }`.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

use crate::account::SessionView;
use crate::credential::Credential;
use crate::error::{Result, VaultError};
use crate::settings::VaultSettings;

pub const IPC_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerChallenge {
    pub session_id: String,
    pub server_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuth {
    pub session_id: String,
    pub client_nonce: String,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOk {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcEnvelope {
    ClientHello(ClientHello),
    ServerChallenge(ServerChallenge),
    ClientAuth(ClientAuth),
    AuthOk(AuthOk),
    Error { message: String },
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub request: VaultRequest,
}

/// Every request resolves to this shape; errors are strings, never typed
/// internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<VaultResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum VaultRequest {
    Ping,
    GetStatus,
    SignUp {
        master_secret: String,
    },
    Login {
        master_secret: String,
    },
    Logout,
    GetSession,
    GetCredentials,
    UnlockCredentials {
        master_secret: String,
    },
    SaveCredential {
        url: String,
        username: String,
        password: String,
        master_secret: String,
    },
    UpdateCredential {
        credential: Credential,
        master_secret: String,
    },
    DeleteCredential {
        id: String,
        master_secret: String,
    },
    RevealPassword {
        id: String,
        master_secret: Option<String>,
    },
    HidePassword {
        id: String,
    },
    CancelVerification,
    SearchCredentials {
        query: String,
        master_secret: Option<String>,
    },
    GetSettings,
    UpdateSettings {
        settings: VaultSettings,
    },
    GenerateMnemonic,
    GeneratePassword {
        length: usize,
        symbols: bool,
    },
    ExportVault {
        master_secret: String,
        mnemonic: String,
    },
    ImportVault {
        payload: String,
        mnemonic: String,
        master_secret: String,
    },
    /// Wipe the vault entirely. Requires the current master secret.
    ResetVault {
        master_secret: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", content = "data")]
pub enum VaultResponse {
    Pong,
    Status {
        vault_exists: bool,
        logged_in: bool,
        locked_out: bool,
    },
    SessionCreated {
        session: SessionView,
    },
    LoggedOut,
    Session {
        session: Option<SessionView>,
    },
    /// Masked entries from the cache. `needs_secret` distinguishes "no
    /// credentials" from "stale cache, re-verify to load".
    Credentials {
        entries: Vec<Credential>,
        needs_secret: bool,
    },
    CredentialsUnlocked {
        entries: Vec<Credential>,
    },
    CredentialSaved {
        credential: Credential,
    },
    CredentialUpdated {
        credential: Credential,
    },
    CredentialDeleted {
        id: String,
    },
    Password {
        id: String,
        password: String,
        hide_after_secs: u64,
    },
    PasswordHidden {
        id: String,
    },
    VerificationRequired {
        attempts_remaining: u32,
    },
    VerificationCancelled,
    SearchResults {
        entries: Vec<Credential>,
    },
    Settings {
        settings: VaultSettings,
    },
    SettingsUpdated,
    Mnemonic {
        words: Vec<String>,
    },
    GeneratedPassword {
        password: String,
    },
    Exported {
        payload: String,
        word_count: usize,
    },
    Imported {
        count: usize,
    },
    VaultReset,
}

#[derive(Debug, Clone)]
pub struct ConnState {
    pub last_nonce: u64,
}

pub struct IpcAuthContext {
    shared_secret: Vec<u8>,
    sessions: Arc<Mutex<HashMap<String, ConnState>>>,
}

impl IpcAuthContext {
    pub fn new(shared_secret: Vec<u8>) -> Self {
        Self {
            shared_secret,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn compute_proof(&self, server_nonce: &str, client_nonce: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.shared_secret)
            .map_err(|e| VaultError::Storage(format!("mac init: {e}")))?;
        mac.update(server_nonce.as_bytes());
        mac.update(client_nonce.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub async fn register_session(&self, session_id: String) {
        let mut guard = self.sessions.lock().await;
        guard.insert(session_id, ConnState { last_nonce: 0 });
    }

    pub async fn verify_and_update_nonce(&self, session_id: &str, nonce: u64) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| VaultError::Storage("unknown connection".to_string()))?;
        if nonce <= session.last_nonce {
            return Err(VaultError::Storage(
                "replay detected: nonce not increasing".to_string(),
            ));
        }
        session.last_nonce = nonce;
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait VaultHandler {
    async fn handle(&self, request: VaultRequest) -> Result<VaultResponse>;
}

pub struct IpcServer {
    auth: Arc<IpcAuthContext>,
    socket_path: std::path::PathBuf,
}

impl IpcServer {
    pub fn new(auth_secret: Vec<u8>, socket_path: std::path::PathBuf) -> Self {
        Self {
            auth: Arc::new(IpcAuthContext::new(auth_secret)),
            socket_path,
        }
    }

    #[cfg(unix)]
    pub async fn start(self: Arc<Self>, handler: Arc<dyn VaultHandler + Send + Sync>) -> Result<()> {
        use tokio::net::UnixListener;
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        loop {
            let (stream, _addr) = listener.accept().await?;
            let auth = self.auth.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, auth, handler).await {
                    warn!("ipc connection error: {e}");
                }
            });
        }
    }

    #[cfg(windows)]
    pub async fn start(self: Arc<Self>, handler: Arc<dyn VaultHandler + Send + Sync>) -> Result<()> {
        use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
        loop {
            let server: NamedPipeServer = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&self.socket_path)?;
            server.connect().await?;
            let auth = self.auth.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(server, auth, handler).await {
                    warn!("ipc connection error: {e}");
                }
            });
        }
    }
}

async fn write_envelope<W>(writer: &mut W, envelope: &IpcEnvelope) -> Result<()>
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

async fn handle_connection<S>(
    stream: S,
    auth: Arc<IpcAuthContext>,
    handler: Arc<dyn VaultHandler + Send + Sync>,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    // Expect ClientHello
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(VaultError::Format("empty hello".to_string()));
    }
    let envelope: IpcEnvelope = serde_json::from_str(line.trim_end())
        .map_err(|e| VaultError::Format(format!("parse hello: {e}")))?;
    let hello = match envelope {
        IpcEnvelope::ClientHello(h) => h,
        _ => return Err(VaultError::Format("expected ClientHello".to_string())),
    };
    if hello.protocol_version != IPC_PROTOCOL_VERSION {
        write_envelope(
            &mut writer,
            &IpcEnvelope::Error {
                message: "protocol version mismatch".to_string(),
            },
        )
        .await?;
        return Err(VaultError::Format("protocol version mismatch".to_string()));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut server_nonce_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut server_nonce_bytes);
    let server_nonce = hex::encode(server_nonce_bytes);

    write_envelope(
        &mut writer,
        &IpcEnvelope::ServerChallenge(ServerChallenge {
            session_id: session_id.clone(),
            server_nonce: server_nonce.clone(),
        }),
    )
    .await?;

    line.clear();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(VaultError::Format("missing client auth".to_string()));
    }
    let envelope: IpcEnvelope = serde_json::from_str(line.trim_end())
        .map_err(|e| VaultError::Format(format!("parse auth: {e}")))?;
    let auth_msg = match envelope {
        IpcEnvelope::ClientAuth(m) => m,
        _ => return Err(VaultError::Format("expected ClientAuth".to_string())),
    };
    if auth_msg.session_id != session_id {
        return Err(VaultError::Format("session id mismatch".to_string()));
    }
    let expected = auth.compute_proof(&server_nonce, &auth_msg.client_nonce)?;
    if expected != auth_msg.proof {
        return Err(VaultError::Auth);
    }

    auth.register_session(session_id.clone()).await;
    write_envelope(
        &mut writer,
        &IpcEnvelope::AuthOk(AuthOk {
            session_id: session_id.clone(),
        }),
    )
    .await?;

    // Request loop. Handler errors become {success:false, error}; they
    // never terminate the connection and never leak internal detail.
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let envelope: IpcEnvelope = serde_json::from_str(line.trim_end())
            .map_err(|e| VaultError::Format(format!("parse request: {e}")))?;
        let req_env = match envelope {
            IpcEnvelope::Request(r) => r,
            _ => return Err(VaultError::Format("expected Request envelope".to_string())),
        };
        if req_env.session_id != session_id {
            return Err(VaultError::Format("connection mismatch".to_string()));
        }
        auth.verify_and_update_nonce(&session_id, req_env.nonce)
            .await?;
        let response_env = match handler.handle(req_env.request).await {
            Ok(response) => ResponseEnvelope {
                session_id: session_id.clone(),
                nonce: req_env.nonce,
                success: true,
                error: None,
                response: Some(response),
            },
            Err(err) => ResponseEnvelope {
                session_id: session_id.clone(),
                nonce: req_env.nonce,
                success: false,
                error: Some(err.public_message()),
                response: None,
            },
        };
        write_envelope(&mut writer, &IpcEnvelope::Response(response_env)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn proof_changes_with_nonce() {
        let ctx = IpcAuthContext::new(vec![1, 2, 3, 4]);
        let p1 = ctx.compute_proof("abc", "def").unwrap();
        let p2 = ctx.compute_proof("abc", "xyz").unwrap();
        assert_ne!(p1, p2);
    }

    #[tokio::test]
    async fn nonce_replay_rejected() {
        let ctx = IpcAuthContext::new(vec![1, 2, 3, 4]);
        ctx.register_session("c1".to_string()).await;
        ctx.verify_and_update_nonce("c1", 1).await.unwrap();
        assert!(ctx.verify_and_update_nonce("c1", 1).await.is_err());
    }

    #[test]
    fn request_envelope_wire_shape() {
        let req = IpcEnvelope::Request(RequestEnvelope {
            session_id: "c1".to_string(),
            nonce: 1,
            request: VaultRequest::RevealPassword {
                id: "cred-1".to_string(),
                master_secret: None,
            },
        });
        let wire = serde_json::to_string(&req).unwrap();
        assert!(wire.contains("\"op\":\"RevealPassword\""));
        let back: IpcEnvelope = serde_json::from_str(&wire).unwrap();
        assert!(matches!(
            back,
            IpcEnvelope::Request(RequestEnvelope {
                request: VaultRequest::RevealPassword { .. },
                ..
            })
        ));
    }

    #[test]
    fn failure_envelope_omits_payload() {
        let envelope = ResponseEnvelope {
            session_id: "c1".to_string(),
            nonce: 7,
            success: false,
            error: Some("invalid master secret".to_string()),
            response: None,
        };
        let wire = serde_json::to_string(&IpcEnvelope::Response(envelope)).unwrap();
        assert!(wire.contains("\"success\":false"));
        assert!(!wire.contains("\"response\""));
    }
}

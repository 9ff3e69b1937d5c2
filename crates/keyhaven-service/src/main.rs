use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use keyhaven_core::paths::{data_dir, ipc_socket_path};
use keyhaven_core::secure_storage;
use keyhaven_core::settings::VaultSettings;

use keyhaven_service::dispatch::ServiceHandler;
use keyhaven_service::identity::{IdentityProvider, LocalIdentity};
use keyhaven_service::mediator::CredentialMediator;
use keyhaven_service::persistence::{BlobStore, FileBlobStore};
use keyhaven_service::service_state::ServiceState;
use keyhaven_service::session::SessionEvent;

use keyhaven_core::account::Profile;
use keyhaven_core::ipc::IpcServer;

const DEFAULT_LOCAL_EMAIL: &str = "local@keyhaven";

#[derive(Parser, Debug)]
#[command(author, version, about = "Keyhaven vault service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new encrypted vault
    Init {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Account email for the local identity
        #[arg(long)]
        email: Option<String>,
    },
    /// Run the vault service
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { data_dir, email } => init_command(data_dir, email).await,
        Commands::Run { data_dir } => run_command(data_dir).await,
    }
}

fn prompt_secret_twice(prompt: &str) -> Result<String> {
    let first = rpassword::prompt_password(format!("{prompt}: "))?;
    if first.is_empty() {
        return Err(anyhow!("master secret must not be empty"));
    }
    let second = rpassword::prompt_password("Repeat: ")?;
    if first != second {
        return Err(anyhow!("secrets do not match"));
    }
    Ok(first)
}

async fn init_command(data_dir_override: Option<PathBuf>, email: Option<String>) -> Result<()> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => data_dir()?,
    };
    std::fs::create_dir_all(&data)?;
    let store = FileBlobStore::new(data.clone());
    if store.load_blob().await?.is_some() {
        return Err(anyhow!("vault already exists in {}", data.display()));
    }

    let secret = prompt_secret_twice("Create master secret")?;
    let email = email.unwrap_or_else(|| DEFAULT_LOCAL_EMAIL.to_string());
    let identity = LocalIdentity::new(email);
    let token = identity.get_token(true).await?;
    let user = identity.validate_token(&token).await?;

    let settings = VaultSettings::default();
    let profile = Profile {
        user: user.clone(),
        settings: settings.clone(),
        created_at: Utc::now(),
    };
    let mut mediator = CredentialMediator::new(Box::new(store), &settings);
    mediator
        .initialize_vault(&secret, &profile, Utc::now())
        .await?;

    // Fresh IPC shared secret for UI clients, kept in the OS keychain.
    let mut ipc_secret = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut ipc_secret);
    secure_storage::store_ipc_secret(&ipc_secret)?;

    println!("Vault created in {}", data.display());
    println!("Account: {} ({})", user.email, user.id);
    Ok(())
}

async fn run_command(data_dir_override: Option<PathBuf>) -> Result<()> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => data_dir()?,
    };
    std::fs::create_dir_all(&data)?;
    let store = FileBlobStore::new(data.clone());
    if store.load_blob().await?.is_none() {
        return Err(anyhow!("no vault in {}; run init first", data.display()));
    }

    let profile = store.load_profile().await?;
    let settings = profile
        .as_ref()
        .map(|p| p.settings.clone())
        .unwrap_or_default();
    let email = profile
        .as_ref()
        .map(|p| p.user.email.clone())
        .unwrap_or_else(|| DEFAULT_LOCAL_EMAIL.to_string());
    let identity = LocalIdentity::new(email);

    let state = Arc::new(Mutex::new(ServiceState::new(
        Box::new(store),
        Box::new(identity),
        settings,
    )));

    // Session events surface as service log lines.
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();
    state.lock().await.session.set_events(event_tx);
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::Created { session_id } => info!("session created: {session_id}"),
                SessionEvent::TimedOut { session_id } => info!("session timed out: {session_id}"),
                SessionEvent::LoggedOut {
                    session_id,
                    revoked,
                } => info!("session ended: {session_id} (token revoked: {revoked})"),
            }
        }
    });

    let ipc_secret = match secure_storage::get_ipc_secret() {
        Ok(secret) => secret,
        Err(_) => {
            let mut fresh = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut fresh);
            secure_storage::store_ipc_secret(&fresh)?;
            fresh.to_vec()
        }
    };
    let socket_path = ipc_socket_path()?;
    let handler = Arc::new(ServiceHandler::new(state.clone()));
    let server = Arc::new(IpcServer::new(ipc_secret, socket_path.clone()));
    let server_task = tokio::spawn(async move { server.start(handler).await });

    // Sweep: session idle timeout, reveal auto-hide, cache TTL demotion.
    let sweep_state = state.clone();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            let mut state = sweep_state.lock().await;
            let now = Utc::now();
            if state.session.handle_timeout(now) {
                state.mediator.clear_cache();
                state.gateway.reset(now);
            }
            let hidden = state.gateway.sweep(now);
            if !hidden.is_empty() {
                debug!("auto-hid {} revealed password(s)", hidden.len());
            }
            state.mediator.tick(now);
        }
    });

    info!("service listening on {}", socket_path.display());
    signal::ctrl_c().await?;
    info!("service stopping");
    server_task.abort();
    sweep_task.abort();
    event_task.abort();
    Ok(())
}

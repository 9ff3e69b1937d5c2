use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use keyhaven_core::credential::Credential;
use keyhaven_core::ipc::{VaultRequest, VaultResponse};
use keyhaven_core::ipc_client::send_request;
use keyhaven_core::paths::ipc_socket_path;
use keyhaven_core::secure_storage::get_ipc_secret;

#[derive(Parser)]
#[command(name = "keyhaven", about = "CLI for the Keyhaven vault service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service status
    Status,
    /// Log in with the master secret
    Login,
    /// End the session
    Logout,
    /// Show the current session
    Session,
    /// List credentials (masked, from the cache)
    List,
    /// Decrypt and list credentials
    Unlock,
    /// Save a new credential
    Add {
        url: String,
        username: String,
        /// Generate the password instead of prompting for it
        #[arg(long)]
        generate: bool,
        #[arg(long, default_value = "20")]
        length: usize,
    },
    /// Update a credential's url, username or password
    Update {
        id: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        username: Option<String>,
    },
    /// Delete a credential
    Delete { id: String },
    /// Reveal one password
    Reveal { id: String },
    /// Re-mask a revealed password
    Hide { id: String },
    /// Search by url or username
    Search {
        query: String,
        /// Decrypt and search the full vault instead of the cache
        #[arg(long)]
        unlock: bool,
    },
    /// Generate a password without storing it
    GenPassword {
        #[arg(long, default_value = "20")]
        length: usize,
        #[arg(long)]
        symbols: bool,
    },
    /// Export the vault under a fresh recovery phrase
    Export {
        /// Output file for the export payload
        out: PathBuf,
    },
    /// Import a vault export file
    Import { file: PathBuf },
    /// Wipe the vault entirely
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Status => {
            let response = send(VaultRequest::GetStatus).await?;
            if let VaultResponse::Status {
                vault_exists,
                logged_in,
                locked_out,
            } = response
            {
                println!("vault: {}", if vault_exists { "present" } else { "absent" });
                println!("session: {}", if logged_in { "active" } else { "none" });
                println!("lockout: {}", if locked_out { "active" } else { "none" });
            }
            Ok(())
        }
        Commands::Login => {
            let secret = prompt_secret()?;
            let response = send(VaultRequest::Login {
                master_secret: secret,
            })
            .await?;
            if let VaultResponse::SessionCreated { session } = response {
                println!("logged in as {} until {}", session.user.email, session.expires_at);
            }
            Ok(())
        }
        Commands::Logout => {
            send(VaultRequest::Logout).await?;
            println!("logged out");
            Ok(())
        }
        Commands::Session => {
            let response = send(VaultRequest::GetSession).await?;
            match response {
                VaultResponse::Session { session: Some(s) } => {
                    println!("session {} for {}", s.session_id, s.user.email);
                    println!("last activity {}, expires {}", s.last_activity, s.expires_at);
                }
                _ => println!("no active session"),
            }
            Ok(())
        }
        Commands::List => {
            let response = send(VaultRequest::GetCredentials).await?;
            if let VaultResponse::Credentials {
                entries,
                needs_secret,
            } = response
            {
                print_credentials(&entries);
                if needs_secret {
                    println!("(cache stale; run `keyhaven unlock` to load)");
                }
            }
            Ok(())
        }
        Commands::Unlock => {
            let secret = prompt_secret()?;
            let response = send(VaultRequest::UnlockCredentials {
                master_secret: secret,
            })
            .await?;
            match response {
                VaultResponse::CredentialsUnlocked { entries } => print_credentials(&entries),
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::Add {
            url,
            username,
            generate,
            length,
        } => {
            let password = if generate {
                match send(VaultRequest::GeneratePassword {
                    length,
                    symbols: true,
                })
                .await?
                {
                    VaultResponse::GeneratedPassword { password } => password,
                    _ => bail!("unexpected response"),
                }
            } else {
                rpassword::prompt_password("Password for the new credential: ")?
            };
            let secret = prompt_secret()?;
            let response = send(VaultRequest::SaveCredential {
                url,
                username,
                password,
                master_secret: secret,
            })
            .await?;
            match response {
                VaultResponse::CredentialSaved { credential } => {
                    println!("saved {} ({})", credential.url, credential.id)
                }
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::Update { id, url, username } => {
            let secret = prompt_secret()?;
            let entries = match send(VaultRequest::UnlockCredentials {
                master_secret: secret.clone(),
            })
            .await?
            {
                VaultResponse::CredentialsUnlocked { entries } => entries,
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    bail!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => bail!("unexpected response"),
            };
            let mut credential = entries
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| anyhow!("no credential with id {id}"))?;
            if let Some(url) = url {
                credential.url = url;
            }
            if let Some(username) = username {
                credential.username = username;
            }
            let password = rpassword::prompt_password("New password (empty keeps current): ")?;
            if !password.is_empty() {
                credential.password = password;
            }
            let response = send(VaultRequest::UpdateCredential {
                credential,
                master_secret: secret,
            })
            .await?;
            if let VaultResponse::CredentialUpdated { credential } = response {
                println!("updated {} ({})", credential.url, credential.id);
            }
            Ok(())
        }
        Commands::Delete { id } => {
            let secret = prompt_secret()?;
            let response = send(VaultRequest::DeleteCredential {
                id,
                master_secret: secret,
            })
            .await?;
            match response {
                VaultResponse::CredentialDeleted { id } => println!("deleted {id}"),
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::Reveal { id } => {
            // Try the grace window first; fall back to a secret prompt.
            let response = send(VaultRequest::RevealPassword {
                id: id.clone(),
                master_secret: None,
            })
            .await?;
            match response {
                VaultResponse::Password {
                    password,
                    hide_after_secs,
                    ..
                } => {
                    println!("{password}");
                    println!("(auto-hides in {hide_after_secs}s)");
                    return Ok(());
                }
                VaultResponse::VerificationRequired { .. } => {}
                _ => bail!("unexpected response"),
            }
            let secret = prompt_secret()?;
            let response = send(VaultRequest::RevealPassword {
                id,
                master_secret: Some(secret),
            })
            .await?;
            match response {
                VaultResponse::Password {
                    password,
                    hide_after_secs,
                    ..
                } => {
                    println!("{password}");
                    println!("(auto-hides in {hide_after_secs}s)");
                }
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::Hide { id } => {
            send(VaultRequest::HidePassword { id }).await?;
            println!("hidden");
            Ok(())
        }
        Commands::Search { query, unlock } => {
            let master_secret = if unlock { Some(prompt_secret()?) } else { None };
            let response = send(VaultRequest::SearchCredentials {
                query,
                master_secret,
            })
            .await?;
            match response {
                VaultResponse::SearchResults { entries } => print_credentials(&entries),
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::GenPassword { length, symbols } => {
            if let VaultResponse::GeneratedPassword { password } =
                send(VaultRequest::GeneratePassword { length, symbols }).await?
            {
                println!("{password}");
            }
            Ok(())
        }
        Commands::Export { out } => {
            let words = match send(VaultRequest::GenerateMnemonic).await? {
                VaultResponse::Mnemonic { words } => words,
                _ => bail!("unexpected response"),
            };
            println!("Recovery phrase (write it down; required for import):");
            println!("  {}", words.join(" "));
            let secret = prompt_secret()?;
            let response = send(VaultRequest::ExportVault {
                master_secret: secret,
                mnemonic: words.join(" "),
            })
            .await?;
            match response {
                VaultResponse::Exported { payload, .. } => {
                    std::fs::write(&out, payload)?;
                    println!("export written to {}", out.display());
                }
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::Import { file } => {
            let payload = std::fs::read_to_string(&file)?;
            let mnemonic = prompt_line("Recovery phrase: ")?;
            let secret = prompt_secret()?;
            let response = send(VaultRequest::ImportVault {
                payload,
                mnemonic,
                master_secret: secret,
            })
            .await?;
            match response {
                VaultResponse::Imported { count } => println!("imported {count} credential(s)"),
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
        Commands::Reset => {
            println!("This wipes every stored credential.");
            let secret = prompt_secret()?;
            let response = send(VaultRequest::ResetVault {
                master_secret: secret,
            })
            .await?;
            match response {
                VaultResponse::VaultReset => println!("vault wiped"),
                VaultResponse::VerificationRequired { attempts_remaining } => {
                    println!("wrong secret: {attempts_remaining} attempt(s) remaining")
                }
                _ => {}
            }
            Ok(())
        }
    }
}

async fn send(request: VaultRequest) -> Result<VaultResponse> {
    let secret = get_ipc_secret()
        .map_err(|e| anyhow!("ipc secret unavailable ({e}); is the service initialized?"))?;
    let socket = ipc_socket_path()?;
    let envelope = send_request(socket, &secret, request).await?;
    if !envelope.success {
        bail!(envelope
            .error
            .unwrap_or_else(|| "request failed".to_string()));
    }
    envelope.response.ok_or_else(|| anyhow!("empty response"))
}

fn prompt_secret() -> Result<String> {
    Ok(rpassword::prompt_password("Master secret: ")?)
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_credentials(entries: &[Credential]) {
    if entries.is_empty() {
        println!("(no credentials)");
        return;
    }
    for credential in entries {
        println!(
            "{}  {}  {}  {}",
            credential.id, credential.url, credential.username, credential.password
        );
    }
}

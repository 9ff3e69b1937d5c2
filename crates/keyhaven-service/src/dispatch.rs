//! Request dispatch: one match arm per operation, activity bump on every
//! authenticated call, step-up verification in front of the sensitive ones.
//! Errors are translated to the `{success, error}` envelope one layer up,
//! in the IPC server.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{info, warn};

use keyhaven_core::account::Profile;
use keyhaven_core::crypto::{self, MasterVerifier};
use keyhaven_core::error::{Result, VaultError};
use keyhaven_core::ipc::{VaultHandler, VaultRequest, VaultResponse};
use keyhaven_core::mnemonic::{self, MnemonicPhrase};

use crate::gateway::{AccessDecision, FailureOutcome};
use crate::service_state::ServiceState;

pub struct ServiceHandler {
    state: Arc<Mutex<ServiceState>>,
}

impl ServiceHandler {
    pub fn new(state: Arc<Mutex<ServiceState>>) -> Self {
        Self { state }
    }
}

fn join_err(e: task::JoinError) -> VaultError {
    VaultError::Storage(format!("crypto worker: {e}"))
}

async fn hash_secret(secret: String) -> Result<MasterVerifier> {
    task::spawn_blocking(move || MasterVerifier::from_secret(&secret))
        .await
        .map_err(join_err)?
}

async fn verify_against(verifier: MasterVerifier, candidate: String) -> Result<bool> {
    task::spawn_blocking(move || verifier.verify(&candidate))
        .await
        .map_err(join_err)
}

fn require_active(state: &ServiceState, now: DateTime<Utc>) -> Result<()> {
    if state.session.is_active(now) {
        Ok(())
    } else {
        Err(VaultError::Auth)
    }
}

/// Step-up verification for an operation carrying the master secret.
///
/// `Ok(None)`: verified, proceed. `Ok(Some(_))`: wrong secret with
/// attempts left, return the retry prompt. `Err(Lockout)`: budget
/// exhausted; the cache and all revealed plaintext are purged.
async fn step_up(
    state: &mut ServiceState,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<Option<VaultResponse>> {
    state.gateway.begin_verification(now)?;
    let verifier = state.session.verifier().ok_or(VaultError::Auth)?;
    if verify_against(verifier, secret.to_string()).await? {
        state.gateway.record_success(now);
        return Ok(None);
    }
    match state.gateway.record_failure(now) {
        FailureOutcome::LockedOut { retry_after_secs } => {
            state.mediator.clear_cache();
            warn!("step-up verification locked out for {retry_after_secs}s");
            Err(VaultError::Lockout { retry_after_secs })
        }
        FailureOutcome::Retry { attempts_remaining } => {
            Ok(Some(VaultResponse::VerificationRequired { attempts_remaining }))
        }
    }
}

#[async_trait::async_trait]
impl VaultHandler for ServiceHandler {
    async fn handle(&self, request: VaultRequest) -> Result<VaultResponse> {
        // One lock for the whole request: mutating cycles never interleave.
        let mut state = self.state.lock().await;
        let now = Utc::now();
        // Settle an elapsed idle deadline before dispatching, so expiry is
        // honored even between sweep ticks.
        if state.session.handle_timeout(now) {
            state.mediator.clear_cache();
            state.gateway.reset(now);
        }
        match request {
            VaultRequest::Ping => Ok(VaultResponse::Pong),

            VaultRequest::GetStatus => {
                let vault_exists = state.mediator.vault_exists().await?;
                Ok(VaultResponse::Status {
                    vault_exists,
                    logged_in: state.session.is_active(now),
                    locked_out: state.gateway.is_locked(now),
                })
            }

            VaultRequest::SignUp { master_secret } => {
                if state.mediator.vault_exists().await? {
                    return Err(VaultError::Storage("vault already exists".to_string()));
                }
                let token = state.identity.get_token(true).await?;
                let user = state.identity.validate_token(&token).await?;
                let verifier = hash_secret(master_secret.clone()).await?;
                let profile = Profile {
                    user: user.clone(),
                    settings: state.settings.clone(),
                    created_at: now,
                };
                state
                    .mediator
                    .initialize_vault(&master_secret, &profile, now)
                    .await?;
                let session = state.session.create_session(token, user, verifier, now)?;
                info!("vault created for {}", session.user.email);
                Ok(VaultResponse::SessionCreated { session })
            }

            VaultRequest::Login { master_secret } => {
                if state.session.is_active(now) {
                    let st = &mut *state;
                    st.session.logout(st.identity.as_ref()).await;
                    st.mediator.clear_cache();
                    st.gateway.reset(now);
                }
                let token = state.identity.get_token(true).await?;
                let user = state.identity.validate_token(&token).await?;
                // Decrypting the stored blob is the proof of the secret.
                state.mediator.unlock(&master_secret, now).await?;
                let verifier = hash_secret(master_secret).await?;
                let session = state.session.create_session(token, user, verifier, now)?;
                Ok(VaultResponse::SessionCreated { session })
            }

            VaultRequest::Logout => {
                let st = &mut *state;
                st.session.logout(st.identity.as_ref()).await;
                st.mediator.clear_cache();
                st.gateway.reset(now);
                Ok(VaultResponse::LoggedOut)
            }

            VaultRequest::GetSession => Ok(VaultResponse::Session {
                session: state.session.view(now),
            }),

            VaultRequest::GetCredentials => {
                require_active(&state, now)?;
                state.session.update_activity(now);
                let (entries, needs_secret) = state.mediator.cached(now);
                Ok(VaultResponse::Credentials {
                    entries,
                    needs_secret,
                })
            }

            VaultRequest::UnlockCredentials { master_secret } => {
                require_active(&state, now)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                state.session.update_activity(now);
                let entries = state.mediator.unlock(&master_secret, now).await?;
                Ok(VaultResponse::CredentialsUnlocked { entries })
            }

            VaultRequest::SaveCredential {
                url,
                username,
                password,
                master_secret,
            } => {
                require_active(&state, now)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                state.session.update_activity(now);
                let credential = state
                    .mediator
                    .save(&url, &username, &password, &master_secret, now)
                    .await?;
                Ok(VaultResponse::CredentialSaved {
                    credential: credential.masked(),
                })
            }

            VaultRequest::UpdateCredential {
                credential,
                master_secret,
            } => {
                require_active(&state, now)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                state.session.update_activity(now);
                let stored = state
                    .mediator
                    .update(credential, &master_secret, now)
                    .await?;
                Ok(VaultResponse::CredentialUpdated {
                    credential: stored.masked(),
                })
            }

            VaultRequest::DeleteCredential { id, master_secret } => {
                require_active(&state, now)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                state.session.update_activity(now);
                state.mediator.delete(&id, &master_secret, now).await?;
                state.gateway.hide(&id);
                Ok(VaultResponse::CredentialDeleted { id })
            }

            VaultRequest::RevealPassword { id, master_secret } => {
                require_active(&state, now)?;
                match master_secret {
                    None => match state.gateway.begin_action(now) {
                        AccessDecision::Locked { retry_after_secs } => {
                            Err(VaultError::Lockout { retry_after_secs })
                        }
                        AccessDecision::Allowed => {
                            match state.mediator.cached_password(&id, now)? {
                                Some(password) => {
                                    state.session.update_activity(now);
                                    state.gateway.reveal(&id, now);
                                    Ok(VaultResponse::Password {
                                        id,
                                        password,
                                        hide_after_secs: state.gateway.reveal_ttl_secs(),
                                    })
                                }
                                // Grace window open but the cache went
                                // stale; nothing to decrypt with.
                                None => Ok(VaultResponse::VerificationRequired {
                                    attempts_remaining: state.gateway.attempts_remaining(),
                                }),
                            }
                        }
                        AccessDecision::NeedsSecret { attempts_remaining } => {
                            Ok(VaultResponse::VerificationRequired { attempts_remaining })
                        }
                    },
                    Some(secret) => {
                        if let Some(retry) = step_up(&mut state, &secret, now).await? {
                            return Ok(retry);
                        }
                        state.session.update_activity(now);
                        let password = state.mediator.password_of(&id, &secret, now).await?;
                        state.gateway.reveal(&id, now);
                        Ok(VaultResponse::Password {
                            id,
                            password,
                            hide_after_secs: state.gateway.reveal_ttl_secs(),
                        })
                    }
                }
            }

            VaultRequest::HidePassword { id } => {
                state.gateway.hide(&id);
                Ok(VaultResponse::PasswordHidden { id })
            }

            VaultRequest::CancelVerification => {
                state.gateway.cancel();
                Ok(VaultResponse::VerificationCancelled)
            }

            VaultRequest::SearchCredentials {
                query,
                master_secret,
            } => {
                require_active(&state, now)?;
                state.session.update_activity(now);
                match master_secret {
                    None => {
                        let (entries, _) = state.mediator.search_cached(&query, now);
                        Ok(VaultResponse::SearchResults { entries })
                    }
                    Some(secret) => {
                        if let Some(retry) = step_up(&mut state, &secret, now).await? {
                            return Ok(retry);
                        }
                        let entries = state
                            .mediator
                            .search_unlocked(&query, &secret, now)
                            .await?;
                        Ok(VaultResponse::SearchResults { entries })
                    }
                }
            }

            VaultRequest::GetSettings => Ok(VaultResponse::Settings {
                settings: state.settings.clone(),
            }),

            VaultRequest::UpdateSettings { settings } => {
                require_active(&state, now)?;
                state.session.update_activity(now);
                state.apply_settings(settings.clone());
                if let Some(mut profile) = state.mediator.load_profile().await? {
                    profile.settings = settings;
                    state.mediator.save_profile(&profile).await?;
                }
                Ok(VaultResponse::SettingsUpdated)
            }

            VaultRequest::GenerateMnemonic => Ok(VaultResponse::Mnemonic {
                words: mnemonic::generate_mnemonic().words().to_vec(),
            }),

            VaultRequest::GeneratePassword { length, symbols } => {
                Ok(VaultResponse::GeneratedPassword {
                    password: crypto::generate_password(length, symbols),
                })
            }

            VaultRequest::ExportVault {
                master_secret,
                mnemonic,
            } => {
                require_active(&state, now)?;
                let phrase = MnemonicPhrase::parse(&mnemonic)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                state.session.update_activity(now);
                let payload = state.mediator.export(&master_secret, &phrase, now).await?;
                Ok(VaultResponse::Exported {
                    payload,
                    word_count: phrase.words().len(),
                })
            }

            VaultRequest::ImportVault {
                payload,
                mnemonic,
                master_secret,
            } => {
                require_active(&state, now)?;
                let phrase = MnemonicPhrase::parse(&mnemonic)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                state.session.update_activity(now);
                let count = state
                    .mediator
                    .import(&payload, &phrase, &master_secret, now)
                    .await?;
                info!("vault import replaced collection with {count} entries");
                Ok(VaultResponse::Imported { count })
            }

            VaultRequest::ResetVault { master_secret } => {
                require_active(&state, now)?;
                if let Some(retry) = step_up(&mut state, &master_secret, now).await? {
                    return Ok(retry);
                }
                // Re-prove the secret against the blob itself before wiping.
                state.mediator.unlock(&master_secret, now).await?;
                state.mediator.reset().await?;
                let st = &mut *state;
                st.session.logout(st.identity.as_ref()).await;
                st.gateway.reset(now);
                warn!("vault reset: all credentials wiped");
                Ok(VaultResponse::VaultReset)
            }
        }
    }
}

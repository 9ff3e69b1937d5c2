//! End-to-end flows through the request dispatcher.
//!
//! Covers:
//!  1. Sign up → empty vault → save → secret-gated read
//!  2. Export under a recovery phrase → wipe → import → identical set
//!  3. Masked reads and the needs-secret flag
//!  4. Attempt-limited lockout, fourth submission rejected outright
//!  5. Reveal inside the step-up grace window
//!  6. Session gating of credential reads

use std::sync::Arc;
use tokio::sync::Mutex;

use keyhaven_core::account::UserInfo;
use keyhaven_core::credential::PASSWORD_MASK;
use keyhaven_core::error::VaultError;
use keyhaven_core::ipc::{VaultHandler, VaultRequest, VaultResponse};
use keyhaven_core::settings::VaultSettings;

use keyhaven_service::dispatch::ServiceHandler;
use keyhaven_service::identity::StaticIdentity;
use keyhaven_service::persistence::MemoryBlobStore;
use keyhaven_service::service_state::ServiceState;

const SECRET: &str = "Sup3rSecret!";

fn user() -> UserInfo {
    UserInfo {
        email: "a@b.com".to_string(),
        id: "user-1".to_string(),
    }
}

fn handler() -> ServiceHandler {
    let state = Arc::new(Mutex::new(ServiceState::new(
        Box::new(MemoryBlobStore::default()),
        Box::new(StaticIdentity::new(user())),
        VaultSettings::default(),
    )));
    ServiceHandler::new(state)
}

async fn sign_up(handler: &ServiceHandler) {
    let response = handler
        .handle(VaultRequest::SignUp {
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(response, VaultResponse::SessionCreated { .. }));
}

async fn save(handler: &ServiceHandler, url: &str, username: &str, password: &str) -> String {
    match handler
        .handle(VaultRequest::SaveCredential {
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap()
    {
        VaultResponse::CredentialSaved { credential } => credential.id,
        other => panic!("unexpected response: {other:?}"),
    }
}

async fn unlock(handler: &ServiceHandler) -> Vec<keyhaven_core::credential::Credential> {
    match handler
        .handle(VaultRequest::UnlockCredentials {
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap()
    {
        VaultResponse::CredentialsUnlocked { entries } => entries,
        other => panic!("unexpected response: {other:?}"),
    }
}

// ── Scenario 1: sign up, save, read back ────────────────────────────────────

#[tokio::test]
async fn signup_save_and_read_back() {
    let handler = handler();
    sign_up(&handler).await;

    let entries = unlock(&handler).await;
    assert!(entries.is_empty());

    save(&handler, "example.com", "a@b.com", "p1").await;

    let entries = unlock(&handler).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, "example.com");
    assert_eq!(entries[0].username, "a@b.com");
    assert_eq!(entries[0].password, "p1");
}

// ── Scenario 2: export, wipe, import ────────────────────────────────────────

#[tokio::test]
async fn export_wipe_import_restores_everything() {
    let handler = handler();
    sign_up(&handler).await;
    save(&handler, "example.com", "a@b.com", "p1").await;
    save(&handler, "other.org", "c@d.com", "p2").await;
    let before = unlock(&handler).await;

    let words = match handler.handle(VaultRequest::GenerateMnemonic).await.unwrap() {
        VaultResponse::Mnemonic { words } => words,
        other => panic!("unexpected response: {other:?}"),
    };
    assert_eq!(words.len(), 16);
    let mnemonic = words.join(" ");

    let payload = match handler
        .handle(VaultRequest::ExportVault {
            master_secret: SECRET.to_string(),
            mnemonic: mnemonic.clone(),
        })
        .await
        .unwrap()
    {
        VaultResponse::Exported { payload, .. } => payload,
        other => panic!("unexpected response: {other:?}"),
    };

    let response = handler
        .handle(VaultRequest::ResetVault {
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(response, VaultResponse::VaultReset));

    // Reset ended the session and removed the vault; start over and import.
    sign_up(&handler).await;
    let count = match handler
        .handle(VaultRequest::ImportVault {
            payload,
            mnemonic,
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap()
    {
        VaultResponse::Imported { count } => count,
        other => panic!("unexpected response: {other:?}"),
    };
    assert_eq!(count, 2);

    let after = unlock(&handler).await;
    assert_eq!(before, after);
}

// ── Scenario 3: masked reads ────────────────────────────────────────────────

#[tokio::test]
async fn cached_reads_are_masked() {
    let handler = handler();
    sign_up(&handler).await;
    save(&handler, "example.com", "a@b.com", "p1").await;

    match handler.handle(VaultRequest::GetCredentials).await.unwrap() {
        VaultResponse::Credentials {
            entries,
            needs_secret,
        } => {
            assert!(!needs_secret);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].password, PASSWORD_MASK);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    match handler
        .handle(VaultRequest::SearchCredentials {
            query: "EXAMPLE".to_string(),
            master_secret: None,
        })
        .await
        .unwrap()
    {
        VaultResponse::SearchResults { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].password, PASSWORD_MASK);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

// ── Scenario 4: lockout ─────────────────────────────────────────────────────

#[tokio::test]
async fn three_failures_lock_out_and_fourth_is_rejected() {
    let handler = handler();
    sign_up(&handler).await;
    save(&handler, "example.com", "a@b.com", "p1").await;

    for expected_remaining in [2u32, 1] {
        match handler
            .handle(VaultRequest::UnlockCredentials {
                master_secret: "wrong".to_string(),
            })
            .await
            .unwrap()
        {
            VaultResponse::VerificationRequired { attempts_remaining } => {
                assert_eq!(attempts_remaining, expected_remaining)
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    let err = handler
        .handle(VaultRequest::UnlockCredentials {
            master_secret: "wrong".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Lockout { .. }));

    // Fourth submission, even with the correct secret, is rejected while
    // the lockout window is open, without any verification attempt.
    let err = handler
        .handle(VaultRequest::UnlockCredentials {
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Lockout { .. }));

    // Lockout purges the plaintext cache.
    match handler.handle(VaultRequest::GetCredentials).await.unwrap() {
        VaultResponse::Credentials {
            entries,
            needs_secret,
        } => {
            assert!(entries.is_empty());
            assert!(needs_secret);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

// ── Scenario 5: reveal inside the grace window ──────────────────────────────

#[tokio::test]
async fn reveal_without_prompt_inside_grace_window() {
    let handler = handler();
    sign_up(&handler).await;
    let id = save(&handler, "example.com", "a@b.com", "p1").await;

    // The save verified the secret, so the grace window is open and the
    // cache is fresh: no new prompt needed.
    match handler
        .handle(VaultRequest::RevealPassword {
            id: id.clone(),
            master_secret: None,
        })
        .await
        .unwrap()
    {
        VaultResponse::Password {
            password,
            hide_after_secs,
            ..
        } => {
            assert_eq!(password, "p1");
            assert_eq!(hide_after_secs, 30);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    match handler
        .handle(VaultRequest::RevealPassword {
            id: "missing".to_string(),
            master_secret: None,
        })
        .await
    {
        Err(VaultError::NotFound(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    let response = handler
        .handle(VaultRequest::HidePassword { id })
        .await
        .unwrap();
    assert!(matches!(response, VaultResponse::PasswordHidden { .. }));
}

// ── Scenario 6: session gating ──────────────────────────────────────────────

#[tokio::test]
async fn credential_reads_require_a_session() {
    let handler = handler();
    let err = handler
        .handle(VaultRequest::GetCredentials)
        .await
        .unwrap_err();
    assert!(err.is_auth_equivalent());

    sign_up(&handler).await;
    handler.handle(VaultRequest::Logout).await.unwrap();
    let err = handler
        .handle(VaultRequest::UnlockCredentials {
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.is_auth_equivalent());
}

// ── Cancellation never consumes an attempt ──────────────────────────────────

#[tokio::test]
async fn cancel_does_not_count_as_failure() {
    let handler = handler();
    sign_up(&handler).await;
    save(&handler, "example.com", "a@b.com", "p1").await;

    match handler
        .handle(VaultRequest::UnlockCredentials {
            master_secret: "wrong".to_string(),
        })
        .await
        .unwrap()
    {
        VaultResponse::VerificationRequired { attempts_remaining } => {
            assert_eq!(attempts_remaining, 2)
        }
        other => panic!("unexpected response: {other:?}"),
    }

    handler
        .handle(VaultRequest::CancelVerification)
        .await
        .unwrap();

    // Next failure still reports from the prior count: cancel neither
    // consumed nor restored an attempt.
    match handler
        .handle(VaultRequest::UnlockCredentials {
            master_secret: "wrong".to_string(),
        })
        .await
        .unwrap()
    {
        VaultResponse::VerificationRequired { attempts_remaining } => {
            assert_eq!(attempts_remaining, 1)
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

// ── Update and delete run the full re-encryption cycle ──────────────────────

#[tokio::test]
async fn update_and_delete_roundtrip() {
    let handler = handler();
    sign_up(&handler).await;
    let id = save(&handler, "example.com", "a@b.com", "p1").await;

    let mut credential = unlock(&handler).await.remove(0);
    credential.password = "p2".to_string();
    match handler
        .handle(VaultRequest::UpdateCredential {
            credential,
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap()
    {
        VaultResponse::CredentialUpdated { credential } => {
            assert_eq!(credential.id, id);
            assert_eq!(credential.password, PASSWORD_MASK);
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(unlock(&handler).await[0].password, "p2");

    handler
        .handle(VaultRequest::DeleteCredential {
            id: id.clone(),
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap();
    assert!(unlock(&handler).await.is_empty());

    let err = handler
        .handle(VaultRequest::DeleteCredential {
            id,
            master_secret: SECRET.to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));
}

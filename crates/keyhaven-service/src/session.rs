//! Login session lifecycle: a single record with a sliding idle window.
//!
//! The record holds the identity token and the master-secret verifier;
//! neither ever leaves this module; external callers get the redacted
//! `SessionView`. The idle window slides on every authenticated operation
//! and is checked against wall-clock time passed in by the caller, so the
//! machine is deterministic under test.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;
use zeroize::Zeroizing;

use keyhaven_core::account::{SessionView, UserInfo};
use keyhaven_core::crypto::MasterVerifier;
use keyhaven_core::error::{Result, VaultError};

use crate::identity::IdentityProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    LoggedOut,
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { session_id: String },
    TimedOut { session_id: String },
    LoggedOut { session_id: String, revoked: bool },
}

pub struct SessionRecord {
    pub session_id: String,
    pub user: UserInfo,
    token: Zeroizing<String>,
    verifier: MasterVerifier,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Non-null record with an unexpired deadline. Absent deadline never
    /// happens by construction; absent record is handled by the manager
    /// (fail closed).
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct SessionManager {
    phase: SessionPhase,
    record: Option<SessionRecord>,
    idle: Duration,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl SessionManager {
    pub fn new(idle_secs: u64) -> Self {
        Self {
            phase: SessionPhase::LoggedOut,
            record: None,
            idle: Duration::seconds(idle_secs as i64),
            events: None,
        }
    }

    pub fn set_events(&mut self, events: UnboundedSender<SessionEvent>) {
        self.events = Some(events);
    }

    pub fn set_idle_secs(&mut self, idle_secs: u64) {
        self.idle = Duration::seconds(idle_secs as i64);
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Only callable from `LoggedOut`.
    pub fn create_session(
        &mut self,
        token: String,
        user: UserInfo,
        verifier: MasterVerifier,
        now: DateTime<Utc>,
    ) -> Result<SessionView> {
        if self.phase != SessionPhase::LoggedOut {
            return Err(VaultError::Storage("session already active".to_string()));
        }
        let record = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            user,
            token: Zeroizing::new(token),
            verifier,
            created_at: now,
            last_activity: now,
            expires_at: now + self.idle,
        };
        let view = redact(&record);
        self.emit(SessionEvent::Created {
            session_id: record.session_id.clone(),
        });
        self.record = Some(record);
        self.phase = SessionPhase::Active;
        Ok(view)
    }

    /// Slide the idle window. No-op outside `Active`.
    pub fn update_activity(&mut self, now: DateTime<Utc>) {
        if self.phase != SessionPhase::Active {
            return;
        }
        if let Some(record) = self.record.as_mut() {
            record.last_activity = now;
            record.expires_at = now + self.idle;
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.phase == SessionPhase::Active
            && self.record.as_ref().map(|r| r.is_valid(now)).unwrap_or(false)
    }

    /// Constant-time check of a candidate secret against the session
    /// verifier. No session means no match.
    pub fn validate_master_secret(&self, candidate: &str) -> bool {
        self.record
            .as_ref()
            .map(|r| r.verifier.verify(candidate))
            .unwrap_or(false)
    }

    /// Clone of the verifier for off-thread comparison.
    pub fn verifier(&self) -> Option<MasterVerifier> {
        self.record.as_ref().map(|r| r.verifier.clone())
    }

    /// Expire the session if the idle deadline has passed. Returns true if
    /// a timeout fired; the record is cleared and the phase settles back to
    /// `LoggedOut` after passing through `Expired`.
    pub fn handle_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        let expired = self
            .record
            .as_ref()
            .map(|r| !r.is_valid(now))
            .unwrap_or(true);
        if !expired {
            return false;
        }
        let session_id = self
            .record
            .take()
            .map(|r| r.session_id)
            .unwrap_or_default();
        self.phase = SessionPhase::Expired;
        self.emit(SessionEvent::TimedOut { session_id });
        self.phase = SessionPhase::LoggedOut;
        true
    }

    /// End the session. Token revocation failure is logged and ignored;
    /// the local session always ends.
    pub async fn logout(&mut self, identity: &dyn IdentityProvider) {
        let mut revoked = false;
        if let Some(record) = self.record.as_ref() {
            match identity.revoke_token(&record.token).await {
                Ok(()) => revoked = true,
                Err(e) => warn!("token revocation failed, ending local session anyway: {e}"),
            }
        }
        if let Some(record) = self.record.take() {
            self.emit(SessionEvent::LoggedOut {
                session_id: record.session_id,
                revoked,
            });
        }
        self.phase = SessionPhase::LoggedOut;
    }

    /// Redacted projection, or None when not `Active`.
    pub fn view(&self, now: DateTime<Utc>) -> Option<SessionView> {
        if !self.is_active(now) {
            return None;
        }
        self.record.as_ref().map(redact)
    }
}

fn redact(record: &SessionRecord) -> SessionView {
    SessionView {
        session_id: record.session_id.clone(),
        user: record.user.clone(),
        created_at: record.created_at,
        last_activity: record.last_activity,
        expires_at: record.expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;

    fn user() -> UserInfo {
        UserInfo {
            email: "a@b.com".to_string(),
            id: "user-1".to_string(),
        }
    }

    fn manager_with_session(now: DateTime<Utc>) -> SessionManager {
        let mut manager = SessionManager::new(60);
        let verifier = MasterVerifier::from_secret("pw").unwrap();
        manager
            .create_session("tok".to_string(), user(), verifier, now)
            .unwrap();
        manager
    }

    #[test]
    fn create_only_from_logged_out() {
        let now = Utc::now();
        let mut manager = manager_with_session(now);
        let verifier = MasterVerifier::from_secret("pw").unwrap();
        assert!(manager
            .create_session("tok2".to_string(), user(), verifier, now)
            .is_err());
    }

    #[test]
    fn activity_slides_the_window() {
        let now = Utc::now();
        let mut manager = manager_with_session(now);
        let later = now + Duration::seconds(45);
        manager.update_activity(later);
        // Would have expired at now+60 without the bump.
        assert!(manager.is_active(now + Duration::seconds(90)));
        assert!(!manager.is_active(later + Duration::seconds(61)));
    }

    #[test]
    fn timeout_clears_the_record() {
        let now = Utc::now();
        let mut manager = manager_with_session(now);
        assert!(!manager.handle_timeout(now + Duration::seconds(30)));
        assert!(manager.handle_timeout(now + Duration::seconds(61)));
        assert_eq!(manager.phase(), SessionPhase::LoggedOut);
        assert!(manager.view(now + Duration::seconds(61)).is_none());
    }

    #[test]
    fn view_is_redacted_and_validation_is_local() {
        let now = Utc::now();
        let manager = manager_with_session(now);
        let view = manager.view(now).unwrap();
        assert_eq!(view.user.email, "a@b.com");
        assert!(manager.validate_master_secret("pw"));
        assert!(!manager.validate_master_secret("nope"));
    }

    #[tokio::test]
    async fn logout_survives_revocation_failure() {
        let now = Utc::now();
        let mut manager = manager_with_session(now);
        let identity = StaticIdentity::failing_revoke(user());
        manager.logout(&identity).await;
        assert_eq!(manager.phase(), SessionPhase::LoggedOut);
        assert!(!manager.is_active(now));
    }
}

//! Step-up verification gate in front of every sensitive read.
//!
//! Three failed secret checks lock the gate for the penalty window; a
//! success opens a grace window during which no new prompt is required.
//! Revealed passwords carry their own 30-second auto-hide deadline,
//! independent of the grace window. All deadlines are explicit instants
//! checked against a caller-supplied clock, never timer callbacks.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use keyhaven_core::error::{Result, VaultError};
use keyhaven_core::settings::VaultSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    AwaitingInput,
    Verifying,
    Granted { until: DateTime<Utc> },
    LockedOut { until: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Grace window still open; proceed without prompting.
    Allowed,
    /// Prompt the user for the master secret.
    NeedsSecret { attempts_remaining: u32 },
    /// Locked; reject before any verification call.
    Locked { retry_after_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    Retry { attempts_remaining: u32 },
    LockedOut { retry_after_secs: u64 },
}

pub struct VerificationGateway {
    state: GatewayState,
    failed_attempts: u32,
    max_attempts: u32,
    grace: Duration,
    penalty: Duration,
    reveal_ttl: Duration,
    /// Credential id → auto-hide deadline.
    revealed: HashMap<String, DateTime<Utc>>,
}

impl VerificationGateway {
    pub fn new(settings: &VaultSettings) -> Self {
        Self {
            state: GatewayState::Idle,
            failed_attempts: 0,
            max_attempts: settings.max_verify_attempts,
            grace: Duration::seconds(settings.verification_grace_secs as i64),
            penalty: Duration::seconds(settings.lockout_secs as i64),
            reveal_ttl: Duration::seconds(settings.reveal_hide_secs as i64),
            revealed: HashMap::new(),
        }
    }

    pub fn apply_settings(&mut self, settings: &VaultSettings) {
        self.max_attempts = settings.max_verify_attempts;
        self.grace = Duration::seconds(settings.verification_grace_secs as i64);
        self.penalty = Duration::seconds(settings.lockout_secs as i64);
        self.reveal_ttl = Duration::seconds(settings.reveal_hide_secs as i64);
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.failed_attempts)
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, GatewayState::LockedOut { until } if now < until)
    }

    /// Entry point for a sensitive action.
    pub fn begin_action(&mut self, now: DateTime<Utc>) -> AccessDecision {
        match self.state {
            GatewayState::LockedOut { until } if now < until => AccessDecision::Locked {
                retry_after_secs: remaining_secs(until, now),
            },
            GatewayState::Granted { until } if now < until => AccessDecision::Allowed,
            _ => {
                // An elapsed lockout restores a fresh attempt budget.
                if matches!(self.state, GatewayState::LockedOut { .. }) {
                    self.failed_attempts = 0;
                }
                self.state = GatewayState::AwaitingInput;
                AccessDecision::NeedsSecret {
                    attempts_remaining: self.attempts_remaining(),
                }
            }
        }
    }

    /// A secret was submitted: move to `Verifying`. Rejected while locked,
    /// without any verification call.
    pub fn begin_verification(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let GatewayState::LockedOut { until } = self.state {
            if now < until {
                return Err(VaultError::Lockout {
                    retry_after_secs: remaining_secs(until, now),
                });
            }
            self.failed_attempts = 0;
        }
        self.state = GatewayState::Verifying;
        Ok(())
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.failed_attempts = 0;
        self.state = GatewayState::Granted {
            until: now + self.grace,
        };
    }

    /// A failed check. Hitting the attempt budget locks the gate,
    /// invalidates any grace window and purges every revealed plaintext.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> FailureOutcome {
        self.failed_attempts += 1;
        if self.failed_attempts >= self.max_attempts {
            let until = now + self.penalty;
            self.state = GatewayState::LockedOut { until };
            self.revealed.clear();
            FailureOutcome::LockedOut {
                retry_after_secs: remaining_secs(until, now),
            }
        } else {
            self.state = GatewayState::AwaitingInput;
            FailureOutcome::Retry {
                attempts_remaining: self.attempts_remaining(),
            }
        }
    }

    /// Closing the prompt without submitting: denied, back to `Idle`, no
    /// attempt counted.
    pub fn cancel(&mut self) {
        if matches!(
            self.state,
            GatewayState::AwaitingInput | GatewayState::Verifying
        ) {
            self.state = GatewayState::Idle;
        }
    }

    pub fn reveal(&mut self, id: &str, now: DateTime<Utc>) {
        self.revealed
            .insert(id.to_string(), now + self.reveal_ttl);
    }

    pub fn hide(&mut self, id: &str) {
        self.revealed.remove(id);
    }

    pub fn is_visible(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.revealed
            .get(id)
            .map(|deadline| now < *deadline)
            .unwrap_or(false)
    }

    pub fn reveal_ttl_secs(&self) -> u64 {
        self.reveal_ttl.num_seconds().max(0) as u64
    }

    /// Expire elapsed auto-hide deadlines; returns the ids that just hid.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .revealed
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.revealed.remove(id);
        }
        expired
    }

    pub fn force_clear_reveals(&mut self) {
        self.revealed.clear();
    }

    /// Logout teardown. An unexpired lockout survives so that logging out
    /// and back in does not refill the attempt budget.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.revealed.clear();
        if !self.is_locked(now) {
            self.state = GatewayState::Idle;
            self.failed_attempts = 0;
        }
    }
}

fn remaining_secs(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (until - now).num_seconds().max(1) as u64
}

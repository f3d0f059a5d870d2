//! Per-number ledger of issued one-time codes.

use crate::phone::hash_secret;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Superseded codes kept per number for supersession detection.
const MAX_LEDGER_ENTRIES: usize = 16;

/// Lifecycle state of an issued code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodeState {
    /// Issued and awaiting submission
    Active,
    /// Submitted correctly (terminal)
    Consumed,
    /// Expiry passed before a correct submission (terminal)
    Expired,
    /// A newer code was issued for the same number (terminal)
    Superseded,
    /// Too many mismatched submissions (terminal)
    Locked,
}

/// A single issued code. Only the hash of the value is retained.
#[derive(Debug, Clone)]
pub(crate) struct IssuedCode {
    pub id: Uuid,
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub state: CodeState,
}

impl IssuedCode {
    pub fn new(code: &str, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code_hash: hash_secret(code),
            issued_at,
            expires_at,
            failed_attempts: 0,
            state: CodeState::Active,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn matches_hash(&self, submitted_hash: &str) -> bool {
        self.code_hash == submitted_hash
    }
}

/// Every code issued to one number, oldest first.
#[derive(Debug, Default)]
pub(crate) struct CodeLedger {
    codes: Vec<IssuedCode>,
}

impl CodeLedger {
    /// The single active code, if any.
    pub fn active_mut(&mut self) -> Option<&mut IssuedCode> {
        self.codes
            .iter_mut()
            .rev()
            .find(|c| c.state == CodeState::Active)
    }

    pub fn latest(&self) -> Option<&IssuedCode> {
        self.codes.last()
    }

    /// Install a new active code, superseding any prior active one.
    ///
    /// Returns the id of the superseded code.
    pub fn install(&mut self, code: IssuedCode) -> Option<Uuid> {
        let superseded = self.active_mut().map(|prev| {
            prev.state = CodeState::Superseded;
            prev.id
        });

        self.codes.push(code);
        if self.codes.len() > MAX_LEDGER_ENTRIES {
            let excess = self.codes.len() - MAX_LEDGER_ENTRIES;
            self.codes.drain(..excess);
        }

        superseded
    }

    /// Drop a code that was never delivered.
    pub fn withdraw(&mut self, id: Uuid) -> bool {
        let before = self.codes.len();
        self.codes.retain(|c| !(c.id == id && c.state == CodeState::Active));
        self.codes.len() != before
    }

    pub fn matches_superseded(&self, submitted_hash: &str) -> bool {
        self.codes
            .iter()
            .any(|c| c.state == CodeState::Superseded && c.matches_hash(submitted_hash))
    }

    pub fn has_active_at(&self, now: DateTime<Utc>) -> bool {
        self.codes
            .iter()
            .any(|c| c.state == CodeState::Active && !c.is_expired_at(now))
    }

    /// Whether nothing in the ledger can still be used and the newest entry
    /// stopped mattering before `cutoff`.
    pub fn is_stale(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> bool {
        if self.has_active_at(now) {
            return false;
        }
        self.codes
            .last()
            .map(|c| c.expires_at < cutoff)
            .unwrap_or(true)
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

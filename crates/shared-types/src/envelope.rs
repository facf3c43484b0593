//! # `CommandEnvelope`
//!
//! Wrapper carried from the API/CLI boundary into the dispatcher.
//!
//! - **Versioning**: every envelope has a `version` field, checked before
//!   dispatch.
//! - **Correlation**: `correlation_id` is echoed in the result and in every
//!   log line for the command, so callers can retry and match.
//! - **Freshness**: envelopes older than [`CommandEnvelope::MAX_AGE`] are
//!   rejected, so a retry loop cannot replay a stale request forever.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::commands::Command;
use crate::errors::KernelError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Protocol version for forward compatibility.
    pub version: u16,

    /// Echoed in the result. Reuse it when retrying the same request.
    pub correlation_id: Uuid,

    /// Unix timestamp (seconds) at which the command was issued.
    pub issued_at: u64,

    pub command: Command,
}

impl CommandEnvelope {
    pub const CURRENT_VERSION: u16 = 1;

    /// Maximum age for an envelope (seconds).
    pub const MAX_AGE: u64 = 300;

    /// Maximum allowed clock skew for future timestamps (seconds).
    pub const MAX_FUTURE_SKEW: u64 = 10;

    /// Wrap a command with a fresh correlation id.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            correlation_id: Uuid::new_v4(),
            issued_at: unix_now(),
            command,
        }
    }

    /// Keep the caller's id across retries.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Envelope checks: version and freshness window.
    pub fn verify(&self, now: u64) -> Result<(), KernelError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(KernelError::invalid(format!(
                "unsupported envelope version {} (supported {})",
                self.version,
                Self::CURRENT_VERSION
            )));
        }
        if self.issued_at > now.saturating_add(Self::MAX_FUTURE_SKEW)
            || now.saturating_sub(self.issued_at) > Self::MAX_AGE
        {
            return Err(KernelError::invalid(format!(
                "envelope timestamp {} outside window (now {now})",
                self.issued_at
            )));
        }
        Ok(())
    }
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelope_verifies() {
        let env = CommandEnvelope::new(Command::Lock);
        assert!(env.verify(unix_now()).is_ok());
    }

    #[test]
    fn test_stale_envelope_rejected() {
        let mut env = CommandEnvelope::new(Command::Lock);
        env.issued_at = 1_000;
        assert!(env.verify(1_000 + CommandEnvelope::MAX_AGE + 1).is_err());
        assert!(env.verify(1_000 + CommandEnvelope::MAX_AGE).is_ok());
    }

    #[test]
    fn test_future_envelope_rejected() {
        let mut env = CommandEnvelope::new(Command::Lock);
        env.issued_at = 2_000;
        assert!(env.verify(2_000 - CommandEnvelope::MAX_FUTURE_SKEW - 1).is_err());
    }

    #[test]
    fn test_version_checked() {
        let mut env = CommandEnvelope::new(Command::Lock);
        env.version = 9;
        assert!(env.verify(env.issued_at).is_err());
    }

    #[test]
    fn test_retry_keeps_correlation_id() {
        let id = Uuid::new_v4();
        let env = CommandEnvelope::new(Command::AcknowledgeRecovery).with_correlation_id(id);
        assert_eq!(env.correlation_id, id);
    }
}

//! Inhibit arbiter - tracks leases that suspend policy actions.
//!
//! While any lease exists, client soft-block requests are held back and
//! RF keys do not toggle devices. Releasing the last lease resumes policy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rfk_core::InhibitCookie;

use super::commands::{RegistryError, SessionId};

/// One inhibit lease.
#[derive(Debug, Clone)]
pub struct Lease {
    pub cookie: InhibitCookie,
    pub session: SessionId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Result of releasing leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other leases remain.
    StillInhibited,
    /// The last lease is gone; policy may resume.
    Resumed,
}

/// Lease bookkeeping. Owned by the registry actor.
#[derive(Debug)]
pub struct InhibitArbiter {
    leases: HashMap<InhibitCookie, Lease>,
    next_cookie: u64,
}

impl Default for InhibitArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl InhibitArbiter {
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
            next_cookie: 1,
        }
    }

    /// Grants a new lease. Cookies start at 1 and are never reused.
    pub fn inhibit(&mut self, session: SessionId, reason: impl Into<String>) -> InhibitCookie {
        let cookie = InhibitCookie::new(self.next_cookie);
        self.next_cookie = self.next_cookie.saturating_add(1);

        self.leases.insert(
            cookie,
            Lease {
                cookie,
                session,
                reason: reason.into(),
                created_at: Utc::now(),
            },
        );
        cookie
    }

    /// Releases a lease held by `session`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::LeaseNotFound` if no lease has this cookie
    /// - `RegistryError::Unauthorized` if another session holds it
    pub fn uninhibit(
        &mut self,
        session: SessionId,
        cookie: InhibitCookie,
    ) -> Result<Release, RegistryError> {
        let owner = self
            .leases
            .get(&cookie)
            .map(|lease| lease.session)
            .ok_or(RegistryError::LeaseNotFound(cookie))?;

        if owner != session {
            return Err(RegistryError::Unauthorized { cookie, session });
        }

        self.leases.remove(&cookie);
        Ok(self.release_state())
    }

    /// Drops every lease held by `session`.
    ///
    /// Returns the released leases and `Some` release state when at least
    /// one was dropped.
    pub fn release_session(&mut self, session: SessionId) -> (Vec<Lease>, Option<Release>) {
        let cookies: Vec<InhibitCookie> = self
            .leases
            .values()
            .filter(|lease| lease.session == session)
            .map(|lease| lease.cookie)
            .collect();

        if cookies.is_empty() {
            return (Vec::new(), None);
        }

        let mut released: Vec<Lease> = cookies
            .iter()
            .filter_map(|cookie| self.leases.remove(cookie))
            .collect();
        released.sort_by_key(|lease| lease.cookie);

        (released, Some(self.release_state()))
    }

    pub fn is_inhibited(&self) -> bool {
        !self.leases.is_empty()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    pub fn lease(&self, cookie: InhibitCookie) -> Option<&Lease> {
        self.leases.get(&cookie)
    }

    fn release_state(&self) -> Release {
        if self.leases.is_empty() {
            Release::Resumed
        } else {
            Release::StillInhibited
        }
    }
}

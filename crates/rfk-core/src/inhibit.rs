//! Inhibit lease identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle for an inhibit lease.
///
/// Cookies are issued by the daemon, start at 1 and are never reused
/// during the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InhibitCookie(u64);

impl InhibitCookie {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InhibitCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for InhibitCookie {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

use serde::Serialize;

use crate::state::SessionCounts;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Wizards currently registered.
    pub wizards: usize,
    /// Matches currently registered.
    pub matches: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(counts: SessionCounts) -> Self {
        Self::with_status("ok", counts)
    }

    /// Create a health response indicating the storage backend is unreachable.
    pub fn degraded(counts: SessionCounts) -> Self {
        Self::with_status("degraded", counts)
    }

    fn with_status(status: &str, counts: SessionCounts) -> Self {
        Self {
            status: status.to_owned(),
            wizards: counts.wizards,
            matches: counts.matches,
        }
    }
}

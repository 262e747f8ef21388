// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for a booking run.

/// All errors that can terminate (or redirect) a booking run.
#[derive(thiserror::Error, Debug)]
pub enum ClaimError {
    /// Malformed time-of-day or label input. Raised before any side effect.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An awaited signal or value never arrived within its budget.
    #[error("Timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    /// The entity was already claimed by someone else for the window.
    #[error("Seat {entity} already taken (HTTP {status}): {excerpt}")]
    Contention {
        entity: String,
        status: u16,
        excerpt: String,
    },

    /// Any other non-success response from the acquisition endpoint.
    #[error("Booking API failed: HTTP {status} :: {excerpt}")]
    Acquisition { status: u16, excerpt: String },

    /// No catalog entry matches the requested label.
    #[error("Could not resolve seat \"{label}\" from map data. Found {catalog_size} entities.")]
    Resolution { label: String, catalog_size: usize },

    /// Every candidate was tried and none could be booked.
    #[error("All {attempted} candidates exhausted; last error: {last}")]
    Exhausted {
        attempted: usize,
        last: Box<ClaimError>,
    },

    /// The acquisition request needs a user id that was never harvested.
    #[error("No user identity captured; cannot build booking request")]
    MissingIdentity,

    /// The interactive session driver failed.
    #[error("Session error: {0}")]
    Session(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClaimError {
    /// Whether the orchestrator may move on to the next candidate.
    pub fn is_candidate_local(&self) -> bool {
        matches!(self, ClaimError::Contention { .. } | ClaimError::Resolution { .. })
    }
}

/// Convenience result type.
pub type ClaimResult<T> = Result<T, ClaimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_local_classification() {
        let contention = ClaimError::Contention {
            entity: "6-171".to_string(),
            status: 500,
            excerpt: "already booked".to_string(),
        };
        assert!(contention.is_candidate_local());

        let resolution = ClaimError::Resolution {
            label: "999".to_string(),
            catalog_size: 2,
        };
        assert!(resolution.is_candidate_local());

        let other = ClaimError::Acquisition {
            status: 401,
            excerpt: "unauthorized".to_string(),
        };
        assert!(!other.is_candidate_local());
        assert!(!ClaimError::MissingIdentity.is_candidate_local());
    }

    #[test]
    fn test_resolution_message_names_label_and_size() {
        let err = ClaimError::Resolution {
            label: "999".to_string(),
            catalog_size: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("\"999\""));
        assert!(msg.contains("42 entities"));
    }
}

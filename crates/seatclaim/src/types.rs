// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data types shared by every stage of a booking run.

use crate::trigger::TimeOfDay;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bookable resource instance (a seat) as advertised by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque platform identifier. Uniqueness is by id.
    pub id: i64,
    /// Human label, e.g. `"6-171"`.
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl Entity {
    pub fn new(id: i64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id={})", self.display_name, self.id)
    }
}

/// Identity of the acting user, harvested from the profile response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A candidate request for a seat, fully specified before the run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Primary label, usually a bare seat number such as `"171"`.
    pub label: String,
    /// Explicit entity id; skips label matching when set.
    pub entity_id: Option<i64>,
    /// Explicit display name, e.g. `"6-171"`.
    pub display_name: Option<String>,
    /// Alternative labels in priority order, tried on contention.
    pub fallback_labels: Vec<String>,
}

impl ResourceDescriptor {
    /// A descriptor carrying only a label.
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_entity_id(mut self, id: i64) -> Self {
        self.entity_id = Some(id);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_fallbacks<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Expand into the prioritized candidate list.
    ///
    /// The first candidate is this descriptor (explicit id and display name
    /// included); each fallback label becomes a bare-label candidate.
    /// Blank fallback labels are skipped.
    pub fn candidates(&self) -> Vec<ResourceDescriptor> {
        let mut out = Vec::with_capacity(1 + self.fallback_labels.len());
        out.push(ResourceDescriptor {
            fallback_labels: Vec::new(),
            ..self.clone()
        });
        for label in &self.fallback_labels {
            let label = label.trim();
            if !label.is_empty() {
                out.push(ResourceDescriptor::label(label));
            }
        }
        out
    }
}

/// The concrete date and time range being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionWindow {
    /// Calendar date in the remote platform's local calendar.
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl AcquisitionWindow {
    pub fn new(date: NaiveDate, start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { date, start, end }
    }

    /// UTC midnight of `date`, in epoch milliseconds.
    ///
    /// The platform encodes a local calendar date as the UTC midnight of
    /// the same Y/M/D, not as the local midnight instant.
    pub fn date_start_ms(&self) -> i64 {
        self.date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default()
    }

    pub fn start_ms(&self) -> i64 {
        self.date_start_ms() + i64::from(self.start.minutes()) * 60_000
    }

    pub fn end_ms(&self) -> i64 {
        self.date_start_ms() + i64::from(self.end.minutes()) * 60_000
    }
}

/// Classified result of one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Booked. Carries the raw response body for audit.
    Success { status: u16, body: String },
    /// The seat was concurrently claimed by another actor.
    ContentionFailure { status: u16, excerpt: String },
    /// Anything else that did not book.
    OtherFailure { status: u16, excerpt: String },
}

impl AttemptOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            AttemptOutcome::Success { .. } => OutcomeKind::Success,
            AttemptOutcome::ContentionFailure { .. } => OutcomeKind::Contention,
            AttemptOutcome::OtherFailure { .. } => OutcomeKind::Other,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            AttemptOutcome::Success { status, .. }
            | AttemptOutcome::ContentionFailure { status, .. }
            | AttemptOutcome::OtherFailure { status, .. } => *status,
        }
    }
}

/// Serializable tag for an attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Contention,
    Other,
    Unresolved,
}

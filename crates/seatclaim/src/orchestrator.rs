// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Orchestrator: sequences one booking run.
//!
//! ```text
//! EstablishingSession → AwaitingTrigger → SelectingWindow
//!     → ResolvingAndBooking(0) → ResolvingAndBooking(1) → … → Done | Failed
//! ```
//!
//! Candidates are tried strictly one after another. Only a contention
//! failure or an unresolvable label moves on to the next candidate; every
//! other error ends the run.

use crate::error::{ClaimError, ClaimResult};
use crate::executor::Acquirer;
use crate::harvester::Harvester;
use crate::resolver::{needs_catalog, resolve, DEFAULT_LABEL_PREFIX};
use crate::trigger::{self, TimeOfDay, DEFAULT_POLL_INTERVAL};
use crate::types::{AcquisitionWindow, AttemptOutcome, Entity, OutcomeKind, ResourceDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The interactive session the run rides on.
///
/// Implementations drive an external UI. While they do, the session's
/// traffic must be flowing into the [`Harvester`] the orchestrator holds.
#[async_trait]
pub trait SessionDriver: Send {
    /// Log in and navigate until the session is ready for date selection.
    async fn prepare(&mut self) -> ClaimResult<()>;

    /// Select `date` and the desired times, returning the window actually chosen.
    async fn select_window(&mut self, date: NaiveDate) -> ClaimResult<AcquisitionWindow>;
}

/// The platform's home timezone (Singapore, no DST).
pub const DEFAULT_REMOTE_OFFSET_SECS: i32 = 8 * 3600;

/// When to proceed from session setup to booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Book as soon as the session is ready.
    Immediate,
    /// Wait for the next occurrence of this remote-local time of day,
    /// computed once the session is ready.
    At(TimeOfDay),
    /// Wait for this exact instant.
    AtInstant(DateTime<Utc>),
}

impl TriggerMode {
    /// Pin an [`At`](TriggerMode::At) trigger to its next occurrence after
    /// `now`, so a slow session setup cannot push it to the following day.
    pub fn pinned(self, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        match self {
            Self::At(tod) => Self::AtInstant(trigger::next_trigger_instant(now, tod, offset)),
            other => other,
        }
    }

    /// The instant this trigger fires if evaluated at `now`.
    pub fn fires_at(self, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        match self.pinned(now, offset) {
            Self::AtInstant(at) => Some(at),
            _ => None,
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub trigger: TriggerMode,
    /// The platform's fixed UTC offset.
    pub remote_offset: FixedOffset,
    /// Book this many days after the remote-local date at trigger time.
    pub days_ahead: u32,
    pub poll_interval: Duration,
    pub identity_timeout: Duration,
    pub catalog_timeout: Duration,
    pub label_prefix: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::Immediate,
            remote_offset: FixedOffset::east_opt(DEFAULT_REMOTE_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            days_ahead: 14,
            poll_interval: DEFAULT_POLL_INTERVAL,
            identity_timeout: Duration::from_secs(30),
            catalog_timeout: Duration::from_secs(30),
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
        }
    }
}

/// Where the run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    EstablishingSession,
    AwaitingTrigger,
    SelectingWindow,
    ResolvingAndBooking { candidate: usize },
    Done,
    Failed,
}

/// One candidate's attempt, kept for the terminal report and audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// Position in the candidate list.
    pub candidate: usize,
    pub label: String,
    /// `None` when the label could not be resolved.
    pub entity: Option<Entity>,
    pub outcome: OutcomeKind,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    /// Failure excerpt or resolution error text.
    pub detail: Option<String>,
}

/// A successful booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    /// The candidate label that was booked.
    pub label: String,
    pub entity: Entity,
    pub window: AcquisitionWindow,
    /// Raw response body, for audit.
    pub response_body: String,
    /// Number of submissions made, this one included.
    pub submissions: usize,
}

/// Drives a [`SessionDriver`] and an [`Acquirer`] through one run.
pub struct Orchestrator<D, A> {
    driver: D,
    acquirer: A,
    harvester: Arc<Harvester>,
    descriptor: ResourceDescriptor,
    settings: RunSettings,
    state: RunState,
    history: Vec<RunState>,
    attempts: Vec<AttemptRecord>,
}

impl<D: SessionDriver, A: Acquirer> Orchestrator<D, A> {
    pub fn new(
        driver: D,
        acquirer: A,
        harvester: Arc<Harvester>,
        descriptor: ResourceDescriptor,
        settings: RunSettings,
    ) -> Self {
        Self {
            driver,
            acquirer,
            harvester,
            descriptor,
            settings,
            state: RunState::EstablishingSession,
            history: Vec::new(),
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    fn enter(&mut self, state: RunState) {
        info!(from = ?self.state, to = ?state, "run state");
        self.state = state;
        self.history.push(state);
    }

    /// Execute the run to a terminal state.
    pub async fn run(&mut self) -> ClaimResult<Booking> {
        let result = self.run_inner().await;
        match &result {
            Ok(booking) => {
                self.enter(RunState::Done);
                info!(
                    label = %booking.label,
                    entity = %booking.entity,
                    submissions = booking.submissions,
                    "booking completed"
                );
            }
            Err(e) => {
                self.enter(RunState::Failed);
                warn!(error = %e, attempts = self.attempts.len(), "booking run failed");
            }
        }
        result
    }

    async fn run_inner(&mut self) -> ClaimResult<Booking> {
        self.enter(RunState::EstablishingSession);
        self.driver.prepare().await?;

        self.enter(RunState::AwaitingTrigger);
        match self.settings.trigger {
            TriggerMode::Immediate => {}
            TriggerMode::At(tod) => {
                trigger::wait_for_time(tod, self.settings.remote_offset, self.settings.poll_interval)
                    .await;
            }
            TriggerMode::AtInstant(at) => {
                info!(
                    target = %at.with_timezone(&self.settings.remote_offset),
                    "waiting for trigger time"
                );
                trigger::wait_until_instant(at, self.settings.poll_interval).await;
                info!(target = %at, "trigger time reached");
            }
        }

        self.enter(RunState::SelectingWindow);
        let date = trigger::target_date(
            Utc::now(),
            self.settings.remote_offset,
            self.settings.days_ahead,
        );
        info!(date = %date, days_ahead = self.settings.days_ahead, "target booking date");
        let window = self.driver.select_window(date).await?;

        let user = self
            .harvester
            .await_identity(self.settings.identity_timeout)
            .await?;
        info!(user_id = %user, "resolved user id");

        let candidates = self.descriptor.candidates();
        let mut last_error: Option<ClaimError> = None;
        let mut submissions = 0;

        for (i, candidate) in candidates.iter().enumerate() {
            self.enter(RunState::ResolvingAndBooking { candidate: i });

            let entity = match self.resolve_candidate(candidate).await {
                Ok(entity) => entity,
                Err(e) if e.is_candidate_local() => {
                    warn!(label = %candidate.label, error = %e, "skipping unresolvable candidate");
                    self.attempts.push(AttemptRecord {
                        candidate: i,
                        label: candidate.label.clone(),
                        entity: None,
                        outcome: OutcomeKind::Unresolved,
                        status: None,
                        elapsed_ms: 0,
                        detail: Some(e.to_string()),
                    });
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            info!(label = %candidate.label, entity = %entity, "resolved seat");

            // Snapshot per attempt: the context may keep growing between attempts.
            let context = self.harvester.context();
            let started = Instant::now();
            let outcome = self.acquirer.submit(&context, &window, &entity).await?;
            submissions += 1;

            let detail = match &outcome {
                AttemptOutcome::Success { .. } => None,
                AttemptOutcome::ContentionFailure { excerpt, .. }
                | AttemptOutcome::OtherFailure { excerpt, .. } => Some(excerpt.clone()),
            };
            self.attempts.push(AttemptRecord {
                candidate: i,
                label: candidate.label.clone(),
                entity: Some(entity.clone()),
                outcome: outcome.kind(),
                status: Some(outcome.status()),
                elapsed_ms: started.elapsed().as_millis() as u64,
                detail,
            });

            match outcome {
                AttemptOutcome::Success { body, .. } => {
                    return Ok(Booking {
                        label: candidate.label.clone(),
                        entity,
                        window,
                        response_body: body,
                        submissions,
                    });
                }
                AttemptOutcome::ContentionFailure { status, excerpt } => {
                    warn!(entity = %entity, status, "seat already taken");
                    last_error = Some(ClaimError::Contention {
                        entity: entity.display_name.clone(),
                        status,
                        excerpt,
                    });
                }
                AttemptOutcome::OtherFailure { status, excerpt } => {
                    return Err(ClaimError::Acquisition { status, excerpt });
                }
            }
        }

        let last = last_error.unwrap_or_else(|| ClaimError::Resolution {
            label: self.descriptor.label.clone(),
            catalog_size: self.harvester.catalog().len(),
        });
        Err(ClaimError::Exhausted {
            attempted: candidates.len(),
            last: Box::new(last),
        })
    }

    async fn resolve_candidate(&self, candidate: &ResourceDescriptor) -> ClaimResult<Entity> {
        let catalog = if needs_catalog(candidate) {
            self.harvester
                .await_catalog(self.settings.catalog_timeout)
                .await?
        } else {
            self.harvester.catalog()
        };
        resolve(&catalog, candidate, &self.settings.label_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_pinned_trigger_uses_next_occurrence() {
        let sgt = FixedOffset::east_opt(DEFAULT_REMOTE_OFFSET_SECS).unwrap();
        // 23:59:30 SGT on the 10th.
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 15, 59, 30).unwrap();
        let midnight = TriggerMode::At(TimeOfDay::parse("12:00 AM").unwrap());

        let pinned = midnight.pinned(now, sgt);
        let expected = Utc.with_ymd_and_hms(2026, 5, 10, 16, 0, 0).unwrap();
        assert_eq!(pinned, TriggerMode::AtInstant(expected));
        assert_eq!(midnight.fires_at(now, sgt), Some(expected));
        // Pinning is stable once done.
        assert_eq!(pinned.pinned(now + chrono::Duration::hours(2), sgt), pinned);
        assert_eq!(TriggerMode::Immediate.fires_at(now, sgt), None);
    }
}

// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Seatclaim: timed acquisition of contended desk reservations.
//!
//! A run rides on an interactive session driven elsewhere. While that
//! session runs, the [`harvester::Harvester`] passively collects the auth
//! headers, user id and seat catalog from its traffic. At the trigger time
//! the [`orchestrator::Orchestrator`] resolves each candidate seat against
//! the catalog and replays the booking call directly, falling back through
//! the candidate list when a seat turns out to be taken.

pub mod catalog;
pub mod error;
pub mod events;
pub mod executor;
pub mod harvester;
pub mod orchestrator;
pub mod resolver;
pub mod trigger;
pub mod types;

pub use catalog::Catalog;
pub use error::{ClaimError, ClaimResult};
pub use events::{EventBus, NetworkEvent, ResourceKind};
pub use executor::{Acquirer, BookingPolicy, ContentionPolicy, HttpAcquirer};
pub use harvester::{HarvestFilters, Harvester, SessionContext};
pub use orchestrator::{
    AttemptRecord, Booking, Orchestrator, RunSettings, RunState, SessionDriver, TriggerMode,
};
pub use trigger::TimeOfDay;
pub use types::{AcquisitionWindow, AttemptOutcome, Entity, OutcomeKind, ResourceDescriptor, UserId};

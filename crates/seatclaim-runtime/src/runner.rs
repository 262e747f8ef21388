// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wires config, browser, harvester and orchestrator into one bounded run.

use crate::audit::AttemptLogger;
use crate::browser::driver::{ChromiumDriver, DriverConfig};
use crate::browser::{network, BrowserSession, LaunchOptions};
use crate::config::RunConfig;
use anyhow::Result;
use chrono::Utc;
use seatclaim::{
    AttemptRecord, Booking, ClaimResult, EventBus, HarvestFilters, Harvester, HttpAcquirer,
    Orchestrator, RunState,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-request timeout for the booking call.
pub const BOOKING_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything worth reporting about a finished run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// Always `Done` or `Failed`.
    pub final_state: RunState,
    /// Where the run was when the wall-clock ceiling cut it off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted_state: Option<RunState>,
    pub booking: Option<Booking>,
    pub error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.booking.is_some()
    }
}

/// Terminal fields of a report.
#[derive(Debug, PartialEq)]
struct Settled {
    final_state: RunState,
    interrupted_state: Option<RunState>,
    booking: Option<Booking>,
    error: Option<String>,
}

/// Map the orchestrator's result onto report fields. `None` means the
/// ceiling expired while the run was in `state`.
fn settle(outcome: Option<ClaimResult<Booking>>, state: RunState, ceiling: Duration) -> Settled {
    match outcome {
        Some(Ok(booking)) => Settled {
            final_state: RunState::Done,
            interrupted_state: None,
            booking: Some(booking),
            error: None,
        },
        Some(Err(e)) => Settled {
            final_state: RunState::Failed,
            interrupted_state: None,
            booking: None,
            error: Some(e.to_string()),
        },
        None => Settled {
            final_state: RunState::Failed,
            interrupted_state: Some(state),
            booking: None,
            error: Some(format!(
                "Run exceeded {}s wall-clock limit in state {state:?}",
                ceiling.as_secs()
            )),
        },
    }
}

/// Execute one booking run under the configured wall-clock ceiling.
///
/// The ceiling covers session setup and booking; any wait for the trigger
/// is added on top. Setup failures (browser launch, capture wiring) are
/// returned as errors. Everything after that ends up in the report.
pub async fn run_booking(config: &RunConfig) -> Result<RunReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started = Utc::now();
    let settings = config.run_settings_at(started);
    let ceiling = config.run_ceiling(started);
    info!(
        run_id = %run_id,
        seat = %config.descriptor.label,
        fallbacks = ?config.descriptor.fallback_labels,
        days_ahead = config.days_ahead,
        trigger = ?settings.trigger,
        ceiling_secs = ceiling.as_secs(),
        start = %config.start,
        end = %config.end,
        "starting booking run"
    );

    let filters = HarvestFilters::default();
    let watch = vec![filters.identity_path.clone(), filters.catalog_path.clone()];
    let bus = EventBus::default();
    let harvester = Arc::new(Harvester::new(filters));
    let harvest_task = harvester.attach(bus.subscribe());

    let session = BrowserSession::launch(&LaunchOptions {
        chromium_path: config.chromium_path.clone(),
        headful: config.headful,
    })
    .await?;
    if config.block_assets {
        network::block_assets(session.page()).await?;
        info!("asset blocking enabled");
    }
    let capture = network::start_capture(session.page(), bus.sender(), watch).await?;

    let driver = ChromiumDriver::new(
        session.page().clone(),
        Arc::clone(&harvester),
        DriverConfig::new(
            config.login_url(),
            config.credentials.username.clone(),
            config.credentials.password.clone(),
            config.start,
            config.end,
            config.base_url.clone(),
        ),
    );
    let acquirer = HttpAcquirer::new(
        config.booking_policy(),
        config.contention_policy(),
        BOOKING_REQUEST_TIMEOUT,
    )?;
    let mut orchestrator = Orchestrator::new(
        driver,
        acquirer,
        Arc::clone(&harvester),
        config.descriptor.clone(),
        settings,
    );

    let outcome = tokio::time::timeout(ceiling, orchestrator.run()).await.ok();
    if outcome.is_none() {
        warn!(secs = ceiling.as_secs(), state = ?orchestrator.state(), "run timed out");
    }
    let settled = settle(outcome, orchestrator.state(), ceiling);

    let report = RunReport {
        run_id,
        final_state: settled.final_state,
        interrupted_state: settled.interrupted_state,
        booking: settled.booking,
        error: settled.error,
        attempts: orchestrator.attempts().to_vec(),
    };
    drop(orchestrator);

    capture.stop();
    harvest_task.abort();
    if let Err(e) = session.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }

    if let Err(e) = write_audit(&report) {
        warn!(error = %e, "failed to write attempt log");
    }
    Ok(report)
}

fn write_audit(report: &RunReport) -> Result<()> {
    let mut logger = AttemptLogger::default_logger()?;
    for attempt in &report.attempts {
        logger.log_attempt(&report.run_id, attempt)?;
    }
    let submissions = report.attempts.iter().filter(|a| a.status.is_some()).count();
    let result = match (&report.booking, &report.error) {
        (Some(b), _) => Ok(b),
        (None, Some(e)) => Err(e.as_str()),
        (None, None) => Err("run ended without a result"),
    };
    logger.log_run(&report.run_id, result, submissions)
}

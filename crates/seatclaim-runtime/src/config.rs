// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run configuration: environment variables, overridden by CLI flags.
//!
//! ## Credentials
//!
//! The password is loaded from (in order of priority):
//! 1. `SMARTEN_PASS_FILE` env → reads the password from the file path
//! 2. `SMARTEN_PASS` env → uses the value directly
//!
//! The file form keeps the secret out of the process environment.
//!
//! Time labels and the UTC offset are parsed here, so malformed input fails
//! before a browser is ever launched.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use seatclaim::executor::{BookingPolicy, ContentionPolicy, DEFAULT_CONTENTION_PHRASES};
use seatclaim::orchestrator::DEFAULT_REMOTE_OFFSET_SECS;
use seatclaim::resolver::DEFAULT_LABEL_PREFIX;
use seatclaim::trigger::{parse_offset, DEFAULT_POLL_INTERVAL};
use seatclaim::{ResourceDescriptor, RunSettings, TimeOfDay, TriggerMode};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://juliusbaer.smartenspaces.com";
pub const DEFAULT_SEAT: &str = "171";
pub const DEFAULT_START: &str = "09:45 AM";
pub const DEFAULT_END: &str = "11:59 PM";
pub const DEFAULT_DAYS_AHEAD: u32 = 14;
pub const DEFAULT_TRIGGER: &str = "12:00 AM";
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(180);

/// Login credentials. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Values given on the command line. `None` falls through to the environment.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// Seat label to book, e.g. "171" [env: SEAT_NUMBER]
    #[arg(long)]
    pub seat: Option<String>,
    /// Explicit seat entity id (skips label matching) [env: SEAT_ENTITY_ID]
    #[arg(long)]
    pub seat_id: Option<i64>,
    /// Explicit seat display name, e.g. "6-171" [env: SEAT_DISPLAY_NAME]
    #[arg(long)]
    pub seat_name: Option<String>,
    /// Fallback seat label, tried in order on contention. Repeatable. [env: SEAT_FALLBACKS]
    #[arg(long = "fallback")]
    pub fallbacks: Vec<String>,
    /// Start time label, e.g. "09:45 AM" [env: START_TIME_LABEL]
    #[arg(long)]
    pub start: Option<String>,
    /// End time label, e.g. "11:59 PM" [env: END_TIME_LABEL]
    #[arg(long)]
    pub end: Option<String>,
    /// Book this many days after today (remote calendar) [env: DAYS_AHEAD]
    #[arg(long)]
    pub days_ahead: Option<u32>,
    /// Wait for the trigger time before booking [env: WAIT_FOR_TRIGGER]
    #[arg(long)]
    pub wait: bool,
    /// Trigger time of day in the remote timezone [env: TRIGGER_TIME]
    #[arg(long)]
    pub trigger_time: Option<String>,
    /// Remote platform UTC offset, e.g. "+08:00" [env: REMOTE_UTC_OFFSET]
    #[arg(long)]
    pub utc_offset: Option<String>,
    /// Building id [env: BUILDING_ID]
    #[arg(long)]
    pub building_id: Option<i64>,
    /// Zone id [env: ZONE_ID]
    #[arg(long)]
    pub zone_id: Option<i64>,
    /// Tenant base URL [env: SEATCLAIM_BASE_URL]
    #[arg(long)]
    pub base_url: Option<String>,
    /// Block images, fonts and trackers in the browser [env: BLOCK_ASSETS]
    #[arg(long)]
    pub block_assets: bool,
    /// Show the browser window [env: HEADFUL]
    #[arg(long)]
    pub headful: bool,
    /// Wall-clock ceiling in seconds, not counting the wait for the trigger [env: SEATCLAIM_RUN_TIMEOUT]
    #[arg(long)]
    pub run_timeout: Option<u64>,
    /// Response phrase marking a seat as already taken. Repeatable; replaces the defaults.
    #[arg(long = "contention-phrase")]
    pub contention_phrases: Vec<String>,
    /// Treat a 5xx with a generic booking-failed message as an ordinary failure [env: SERVER_ERROR_CONTENTION=0]
    #[arg(long)]
    pub no_server_error_contention: bool,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub credentials: Credentials,
    pub base_url: String,
    pub descriptor: ResourceDescriptor,
    pub building_id: i64,
    pub building_name: String,
    pub zone_id: i64,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub days_ahead: u32,
    pub trigger: TriggerMode,
    pub remote_offset: FixedOffset,
    pub block_assets: bool,
    pub headful: bool,
    pub chromium_path: Option<PathBuf>,
    /// Ceiling for setup plus booking. The trigger wait is added on top.
    pub run_timeout: Duration,
    pub contention_phrases: Vec<String>,
    /// Count a 5xx with a generic failure message as contention.
    pub server_error_contention: bool,
}

fn env_flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_num<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    non_empty(value)
        .map(|v| v.parse::<T>().with_context(|| format!("{name} must be a number, got '{v}'")))
        .transpose()
}

fn load_password<F>(env: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = non_empty(env("SMARTEN_PASS_FILE")) {
        let raw = std::fs::read_to_string(&path).with_context(|| {
            format!("Cannot read password file at '{path}'. Check that it exists and is readable.")
        })?;
        let password = raw.trim_end_matches(['\r', '\n']).to_string();
        if password.is_empty() {
            bail!("Password file '{path}' is empty.");
        }
        return Ok(password);
    }
    if let Some(password) = env("SMARTEN_PASS").filter(|p| !p.is_empty()) {
        return Ok(password);
    }
    bail!("Missing SMARTEN_PASS / SMARTEN_PASS_FILE")
}

impl RunConfig {
    /// Load from the process environment, then apply `overrides`.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        Self::load_with(overrides, |name| std::env::var(name).ok())
    }

    /// Load using `env` as the variable lookup.
    pub fn load_with<F>(overrides: &Overrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = non_empty(env("SMARTEN_USER")).context("Missing SMARTEN_USER")?;
        let password = load_password(&env)?;

        let label = overrides
            .seat
            .clone()
            .or_else(|| non_empty(env("SEAT_NUMBER")))
            .unwrap_or_else(|| DEFAULT_SEAT.to_string());
        let entity_id = match overrides.seat_id {
            Some(id) => Some(id),
            None => parse_num::<i64>("SEAT_ENTITY_ID", env("SEAT_ENTITY_ID"))?,
        };
        let display_name = overrides
            .seat_name
            .clone()
            .or_else(|| non_empty(env("SEAT_DISPLAY_NAME")));
        let fallbacks: Vec<String> = if overrides.fallbacks.is_empty() {
            non_empty(env("SEAT_FALLBACKS"))
                .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or_default()
        } else {
            overrides.fallbacks.clone()
        };

        let mut descriptor = ResourceDescriptor::label(label).with_fallbacks(fallbacks);
        descriptor.entity_id = entity_id;
        descriptor.display_name = display_name;

        let start_label = overrides
            .start
            .clone()
            .or_else(|| non_empty(env("START_TIME_LABEL")))
            .unwrap_or_else(|| DEFAULT_START.to_string());
        let end_label = overrides
            .end
            .clone()
            .or_else(|| non_empty(env("END_TIME_LABEL")))
            .unwrap_or_else(|| DEFAULT_END.to_string());
        let start = TimeOfDay::parse(&start_label)?;
        let end = TimeOfDay::parse(&end_label)?;
        if end <= start {
            bail!("End time {end_label} must be after start time {start_label}");
        }

        let days_ahead = match overrides.days_ahead {
            Some(d) => d,
            None => parse_num::<u32>("DAYS_AHEAD", env("DAYS_AHEAD"))?.unwrap_or(DEFAULT_DAYS_AHEAD),
        };

        let wait = overrides.wait || env_flag(env("WAIT_FOR_TRIGGER"));
        let trigger_label = overrides
            .trigger_time
            .clone()
            .or_else(|| non_empty(env("TRIGGER_TIME")))
            .unwrap_or_else(|| DEFAULT_TRIGGER.to_string());
        // Parsed even when not waiting, so a typo never goes unnoticed.
        let trigger_time = TimeOfDay::parse(&trigger_label)?;
        let trigger = if wait {
            TriggerMode::At(trigger_time)
        } else {
            TriggerMode::Immediate
        };

        let remote_offset = match overrides
            .utc_offset
            .clone()
            .or_else(|| non_empty(env("REMOTE_UTC_OFFSET")))
        {
            Some(s) => parse_offset(&s)?,
            None => FixedOffset::east_opt(DEFAULT_REMOTE_OFFSET_SECS)
                .context("default UTC offset out of range")?,
        };

        let base_url = overrides
            .base_url
            .clone()
            .or_else(|| non_empty(env("SEATCLAIM_BASE_URL")))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            bail!("Base URL must start with http:// or https://, got '{base_url}'");
        }

        let defaults = BookingPolicy::for_tenant(&base_url);
        let building_id = match overrides.building_id {
            Some(id) => id,
            None => parse_num::<i64>("BUILDING_ID", env("BUILDING_ID"))?.unwrap_or(defaults.building_id),
        };
        let zone_id = match overrides.zone_id {
            Some(id) => id,
            None => parse_num::<i64>("ZONE_ID", env("ZONE_ID"))?.unwrap_or(defaults.zone_id),
        };
        let building_name =
            non_empty(env("BUILDING_NAME")).unwrap_or_else(|| defaults.building_name.clone());

        let run_timeout = match overrides.run_timeout {
            Some(secs) => Duration::from_secs(secs),
            None => parse_num::<u64>("SEATCLAIM_RUN_TIMEOUT", env("SEATCLAIM_RUN_TIMEOUT"))?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RUN_TIMEOUT),
        };
        if run_timeout.is_zero() {
            bail!("Run timeout must be at least one second");
        }

        let contention_phrases = if overrides.contention_phrases.is_empty() {
            DEFAULT_CONTENTION_PHRASES.iter().map(|s| s.to_string()).collect()
        } else {
            overrides.contention_phrases.clone()
        };

        Ok(Self {
            credentials: Credentials { username, password },
            base_url: base_url.trim_end_matches('/').to_string(),
            descriptor,
            building_id,
            building_name,
            zone_id,
            start,
            end,
            days_ahead,
            trigger,
            remote_offset,
            block_assets: overrides.block_assets || env_flag(env("BLOCK_ASSETS")),
            headful: overrides.headful || env_flag(env("HEADFUL")),
            chromium_path: non_empty(env("SEATCLAIM_CHROMIUM_PATH")).map(PathBuf::from),
            run_timeout,
            contention_phrases,
            server_error_contention: !overrides.no_server_error_contention
                && non_empty(env("SERVER_ERROR_CONTENTION"))
                    .map(|v| env_flag(Some(v)))
                    .unwrap_or(true),
        })
    }

    pub fn login_url(&self) -> String {
        format!("{}/spacemanagementV2/#/login", self.base_url)
    }

    pub fn booking_policy(&self) -> BookingPolicy {
        BookingPolicy {
            building_id: self.building_id,
            building_name: self.building_name.clone(),
            zone_id: self.zone_id,
            ..BookingPolicy::for_tenant(&self.base_url)
        }
    }

    pub fn contention_policy(&self) -> ContentionPolicy {
        let policy = ContentionPolicy::new(&self.contention_phrases);
        if self.server_error_contention {
            policy
        } else {
            policy.without_server_error_phrases()
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            trigger: self.trigger,
            remote_offset: self.remote_offset,
            days_ahead: self.days_ahead,
            poll_interval: DEFAULT_POLL_INTERVAL,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            ..RunSettings::default()
        }
    }

    /// [`run_settings`](Self::run_settings) with the trigger pinned to its
    /// next occurrence after `now`.
    pub fn run_settings_at(&self, now: DateTime<Utc>) -> RunSettings {
        RunSettings {
            trigger: self.trigger.pinned(now, self.remote_offset),
            ..self.run_settings()
        }
    }

    /// Wall-clock ceiling for a run starting at `now`: the time left until
    /// the trigger plus `run_timeout`.
    pub fn run_ceiling(&self, now: DateTime<Utc>) -> Duration {
        let until_trigger = self
            .trigger
            .fires_at(now, self.remote_offset)
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or(Duration::ZERO);
        until_trigger + self.run_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn base_env() -> Vec<(&'static str, &'static str)> {
        vec![("SMARTEN_USER", "me@example.com"), ("SMARTEN_PASS", "hunter2")]
    }

    #[test]
    fn test_defaults() {
        let cfg = RunConfig::load_with(&Overrides::default(), env_of(&base_env())).unwrap();
        assert_eq!(cfg.descriptor.label, "171");
        assert!(cfg.descriptor.fallback_labels.is_empty());
        assert_eq!(cfg.start.hhmm(), "0945");
        assert_eq!(cfg.end.hhmm(), "2359");
        assert_eq!(cfg.days_ahead, 14);
        assert_eq!(cfg.trigger, TriggerMode::Immediate);
        assert_eq!(cfg.remote_offset.local_minus_utc(), 8 * 3600);
        assert_eq!(cfg.building_id, 10);
        assert_eq!(cfg.zone_id, 14);
        assert_eq!(cfg.login_url(), format!("{DEFAULT_BASE_URL}/spacemanagementV2/#/login"));
        assert!(!format!("{:?}", cfg.credentials).contains("hunter2"));
    }

    #[test]
    fn test_env_values() {
        let mut env = base_env();
        env.extend([
            ("SEAT_NUMBER", "305"),
            ("SEAT_ENTITY_ID", "4242"),
            ("SEAT_FALLBACKS", "200, 201 ,"),
            ("DAYS_AHEAD", "7"),
            ("WAIT_FOR_TRIGGER", "yes"),
            ("TRIGGER_TIME", "23:59"),
            ("REMOTE_UTC_OFFSET", "+05:30"),
            ("BLOCK_ASSETS", "1"),
        ]);
        let cfg = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap();
        assert_eq!(cfg.descriptor.label, "305");
        assert_eq!(cfg.descriptor.entity_id, Some(4242));
        let labels: Vec<String> = cfg.descriptor.candidates().into_iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["305", "200", "201"]);
        assert_eq!(cfg.days_ahead, 7);
        assert_eq!(cfg.trigger, TriggerMode::At(TimeOfDay::parse("11:59 PM").unwrap()));
        assert_eq!(cfg.remote_offset.local_minus_utc(), 5 * 3600 + 1800);
        assert!(cfg.block_assets);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut env = base_env();
        env.push(("SEAT_NUMBER", "305"));
        env.push(("SEAT_FALLBACKS", "1,2"));
        let overrides = Overrides {
            seat: Some("171".to_string()),
            fallbacks: vec!["200".to_string()],
            contention_phrases: vec!["failed to create booking".to_string()],
            ..Overrides::default()
        };
        let cfg = RunConfig::load_with(&overrides, env_of(&env)).unwrap();
        assert_eq!(cfg.descriptor.label, "171");
        assert_eq!(cfg.descriptor.fallback_labels, vec!["200"]);
        assert_eq!(cfg.contention_policy().phrases(), &["failed to create booking".to_string()]);
    }

    #[test]
    fn test_run_ceiling_excludes_trigger_wait() {
        let mut env = base_env();
        env.extend([("WAIT_FOR_TRIGGER", "1"), ("TRIGGER_TIME", "12:00 AM")]);
        let cfg = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap();
        assert_eq!(cfg.run_timeout, DEFAULT_RUN_TIMEOUT);

        // 23:00 SGT: an hour before the trigger.
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 15, 0, 0).unwrap();
        assert_eq!(cfg.run_ceiling(now), Duration::from_secs(3600) + DEFAULT_RUN_TIMEOUT);
        let midnight = Utc.with_ymd_and_hms(2026, 5, 10, 16, 0, 0).unwrap();
        assert_eq!(cfg.run_settings_at(now).trigger, TriggerMode::AtInstant(midnight));

        let immediate = RunConfig::load_with(&Overrides::default(), env_of(&base_env())).unwrap();
        assert_eq!(immediate.run_ceiling(now), DEFAULT_RUN_TIMEOUT);
        assert_eq!(immediate.run_settings_at(now).trigger, TriggerMode::Immediate);
    }

    #[test]
    fn test_run_timeout_from_env_and_flag() {
        let mut env = base_env();
        env.push(("SEATCLAIM_RUN_TIMEOUT", "600"));
        let cfg = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap();
        assert_eq!(cfg.run_timeout, Duration::from_secs(600));

        let overrides = Overrides {
            run_timeout: Some(90),
            ..Overrides::default()
        };
        let cfg = RunConfig::load_with(&overrides, env_of(&env)).unwrap();
        assert_eq!(cfg.run_timeout, Duration::from_secs(90));

        let mut env = base_env();
        env.push(("SEATCLAIM_RUN_TIMEOUT", "0"));
        assert!(RunConfig::load_with(&Overrides::default(), env_of(&env)).is_err());
    }

    #[test]
    fn test_server_error_contention_toggle() {
        let on = RunConfig::load_with(&Overrides::default(), env_of(&base_env())).unwrap();
        assert!(on.server_error_contention);
        assert!(!on.contention_policy().server_error_phrases().is_empty());

        let mut env = base_env();
        env.push(("SERVER_ERROR_CONTENTION", "0"));
        let off = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap();
        assert!(off.contention_policy().server_error_phrases().is_empty());

        let overrides = Overrides {
            no_server_error_contention: true,
            ..Overrides::default()
        };
        let off = RunConfig::load_with(&overrides, env_of(&base_env())).unwrap();
        assert!(!off.server_error_contention);
    }

    #[test]
    fn test_bad_time_label_fails_fast() {
        let mut env = base_env();
        env.push(("START_TIME_LABEL", "quarter to ten"));
        let err = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap_err();
        assert!(format!("{err:#}").contains("Bad time label"));
    }

    #[test]
    fn test_end_before_start_rejected() {
        let overrides = Overrides {
            start: Some("10:00 PM".to_string()),
            end: Some("09:00 AM".to_string()),
            ..Overrides::default()
        };
        assert!(RunConfig::load_with(&overrides, env_of(&base_env())).is_err());
    }

    #[test]
    fn test_missing_credentials() {
        let err = RunConfig::load_with(&Overrides::default(), env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("SMARTEN_USER"));
        let err = RunConfig::load_with(
            &Overrides::default(),
            env_of(&[("SMARTEN_USER", "me@example.com")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SMARTEN_PASS"));
    }

    #[test]
    fn test_password_file_takes_priority() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pass.txt");
        std::fs::write(&path, "from-file\n").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let env = [
            ("SMARTEN_USER", "me@example.com"),
            ("SMARTEN_PASS", "from-env"),
            ("SMARTEN_PASS_FILE", path_str.as_str()),
        ];
        let cfg = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap();
        assert_eq!(cfg.credentials.password, "from-file");
    }

    #[test]
    fn test_bad_number_reports_variable() {
        let mut env = base_env();
        env.push(("ZONE_ID", "fourteen"));
        let err = RunConfig::load_with(&Overrides::default(), env_of(&env)).unwrap_err();
        assert!(err.to_string().contains("ZONE_ID"));
    }

    #[test]
    fn test_booking_policy_carries_building_and_zone() {
        let overrides = Overrides {
            building_id: Some(3),
            zone_id: Some(9),
            base_url: Some("https://tenant.example.com/".to_string()),
            ..Overrides::default()
        };
        let cfg = RunConfig::load_with(&overrides, env_of(&base_env())).unwrap();
        let policy = cfg.booking_policy();
        assert_eq!(policy.building_id, 3);
        assert_eq!(policy.zone_id, 9);
        assert_eq!(policy.origin, "https://tenant.example.com");
    }
}

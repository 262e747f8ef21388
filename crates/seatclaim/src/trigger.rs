// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Time trigger: fire at an exact wall-clock time in the remote timezone.
//!
//! Booking windows on the platform open at a fixed local time (typically
//! midnight), so the run parks itself until that instant in the platform's
//! fixed UTC offset, polling in bounded sleeps so clock adjustments never
//! leave it oversleeping by more than one poll interval.

use crate::error::{ClaimError, ClaimResult};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound on a single sleep while waiting for the trigger.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default sleep between clock checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const MINUTES_PER_DAY: u16 = 24 * 60;

/// A time of day with minute precision, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeOfDay(u16);

fn twelve_hour_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d{1,2}):(\d{2})\s*(AM|PM)$").expect("static regex"))
}

fn twenty_four_hour_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("static regex"))
}

fn offset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([+-])(\d{2}):?(\d{2})$").expect("static regex"))
}

impl TimeOfDay {
    /// Build from minutes since midnight.
    pub fn from_minutes(minutes: u16) -> ClaimResult<Self> {
        if minutes >= MINUTES_PER_DAY {
            return Err(ClaimError::Parse(format!(
                "minute offset {minutes} is outside a day"
            )));
        }
        Ok(Self(minutes))
    }

    /// Build from a 24-hour clock reading.
    pub fn from_hm(hour: u16, minute: u16) -> ClaimResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(ClaimError::Parse(format!("bad time {hour:02}:{minute:02}")));
        }
        Ok(Self(hour * 60 + minute))
    }

    /// Parse `"09:45 AM"`-style labels or 24-hour `"21:30"`.
    ///
    /// Surrounding and repeated inner whitespace is ignored; the meridiem is
    /// case-insensitive.
    pub fn parse(label: &str) -> ClaimResult<Self> {
        let s = label.split_whitespace().collect::<Vec<_>>().join(" ");
        let bad = || ClaimError::Parse(format!("Bad time label: \"{label}\""));

        if let Some(caps) = twelve_hour_re().captures(&s) {
            let hh: u16 = caps[1].parse().map_err(|_| bad())?;
            let mm: u16 = caps[2].parse().map_err(|_| bad())?;
            if !(1..=12).contains(&hh) || mm > 59 {
                return Err(bad());
            }
            let pm = caps[3].eq_ignore_ascii_case("PM");
            let hour = match (hh, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, false) => h,
                (h, true) => h + 12,
            };
            return Self::from_hm(hour, mm).map_err(|_| bad());
        }

        if let Some(caps) = twenty_four_hour_re().captures(&s) {
            let hh: u16 = caps[1].parse().map_err(|_| bad())?;
            let mm: u16 = caps[2].parse().map_err(|_| bad())?;
            return Self::from_hm(hh, mm).map_err(|_| bad());
        }

        Err(bad())
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Compact `HHmm` form used by the recurring-time request fields.
    pub fn hhmm(self) -> String {
        format!("{:02}{:02}", self.hour(), self.minute())
    }

    /// The label as the platform's time dropdown renders it (`"09:45 AM"`).
    pub fn to_label(self) -> String {
        let (h12, meridiem) = match self.hour() {
            0 => (12, "AM"),
            h @ 1..=11 => (h, "AM"),
            12 => (12, "PM"),
            h => (h - 12, "PM"),
        };
        format!("{h12:02}:{:02} {meridiem}", self.minute())
    }

    pub fn as_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour()), u32::from(self.minute()), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Parse a fixed UTC offset: `"+08:00"`, `"-0530"`, `"Z"` or `"UTC"`.
pub fn parse_offset(s: &str) -> ClaimResult<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| ClaimError::Parse(s.to_string()));
    }
    let bad = || ClaimError::Parse(format!("Bad UTC offset: \"{s}\""));
    let caps = offset_re().captures(s).ok_or_else(bad)?;
    let hours: i32 = caps[2].parse().map_err(|_| bad())?;
    let minutes: i32 = caps[3].parse().map_err(|_| bad())?;
    if minutes > 59 {
        return Err(bad());
    }
    let secs = (hours * 60 + minutes) * 60;
    let secs = if &caps[1] == "-" { -secs } else { secs };
    FixedOffset::east_opt(secs).ok_or_else(bad)
}

/// Today's calendar date as seen by the remote platform.
pub fn remote_today(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// The remote-calendar date `days_ahead` days after today.
pub fn target_date(now: DateTime<Utc>, offset: FixedOffset, days_ahead: u32) -> NaiveDate {
    let today = remote_today(now, offset);
    today
        .checked_add_days(Days::new(u64::from(days_ahead)))
        .unwrap_or(today)
}

/// The next instant strictly after `now` whose wall-clock reading in
/// `offset` equals `time_of_day`: today if still ahead, otherwise tomorrow.
pub fn next_trigger_instant(
    now: DateTime<Utc>,
    time_of_day: TimeOfDay,
    offset: FixedOffset,
) -> DateTime<Utc> {
    let today = remote_today(now, offset);
    let at = |date: NaiveDate| -> DateTime<Utc> {
        let local = date.and_time(time_of_day.as_naive_time());
        // A fixed offset maps every local time to exactly one instant.
        offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| local.and_utc())
    };

    let candidate = at(today);
    if candidate > now {
        return candidate;
    }
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    at(tomorrow)
}

/// Parse `time_of_day`, then park until its next occurrence in `offset`.
///
/// A malformed label fails before any waiting begins.
pub async fn wait_until(
    time_of_day: &str,
    offset: FixedOffset,
    poll: Duration,
) -> ClaimResult<DateTime<Utc>> {
    wait_until_with(time_of_day, offset, poll, Utc::now).await
}

/// [`wait_until`] reading the wall clock from `clock`.
pub async fn wait_until_with<C>(
    time_of_day: &str,
    offset: FixedOffset,
    poll: Duration,
    clock: C,
) -> ClaimResult<DateTime<Utc>>
where
    C: Fn() -> DateTime<Utc>,
{
    let tod = TimeOfDay::parse(time_of_day)?;
    Ok(wait_for_time_with(tod, offset, poll, clock).await)
}

/// Park until the next occurrence of `time_of_day` in `offset`.
pub async fn wait_for_time(
    time_of_day: TimeOfDay,
    offset: FixedOffset,
    poll: Duration,
) -> DateTime<Utc> {
    wait_for_time_with(time_of_day, offset, poll, Utc::now).await
}

async fn wait_for_time_with<C>(
    time_of_day: TimeOfDay,
    offset: FixedOffset,
    poll: Duration,
    clock: C,
) -> DateTime<Utc>
where
    C: Fn() -> DateTime<Utc>,
{
    let target = next_trigger_instant(clock(), time_of_day, offset);
    info!(
        target = %target.with_timezone(&offset),
        wait_secs = (target - clock()).num_seconds(),
        "waiting for trigger time"
    );
    wait_until_instant_with(target, poll, &clock).await;
    info!(target = %target, "trigger time reached");
    target
}

/// Sleep in steps of at most `poll` (clamped to [`MAX_POLL_INTERVAL`])
/// until the wall clock reaches `target`. Returns immediately for past
/// instants.
pub async fn wait_until_instant(target: DateTime<Utc>, poll: Duration) {
    wait_until_instant_with(target, poll, &Utc::now).await
}

async fn wait_until_instant_with<C>(target: DateTime<Utc>, poll: Duration, clock: &C)
where
    C: Fn() -> DateTime<Utc>,
{
    let poll = poll.clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);
    loop {
        let now = clock();
        if now >= target {
            return;
        }
        let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
        let step = remaining.min(poll);
        debug!(remaining_ms = remaining.as_millis() as u64, "trigger pending");
        tokio::time::sleep(step).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn sgt() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_parse_twelve_hour_labels() {
        assert_eq!(TimeOfDay::parse("09:45 AM").unwrap().minutes(), 585);
        assert_eq!(TimeOfDay::parse("11:59 PM").unwrap().minutes(), 1439);
        assert_eq!(TimeOfDay::parse("12:00 AM").unwrap().minutes(), 0);
        assert_eq!(TimeOfDay::parse("12:30 pm").unwrap().minutes(), 750);
        assert_eq!(TimeOfDay::parse("  9:05   am ").unwrap().minutes(), 545);
        assert_eq!(TimeOfDay::parse("9:05PM").unwrap().minutes(), 1265);
    }

    #[test]
    fn test_parse_twenty_four_hour() {
        assert_eq!(TimeOfDay::parse("00:00").unwrap().minutes(), 0);
        assert_eq!(TimeOfDay::parse("21:30").unwrap().minutes(), 1290);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "noon", "25:00", "13:00 PM", "00:10 AM", "9:60", "09:45 XM"] {
            let err = TimeOfDay::parse(bad).unwrap_err();
            assert!(matches!(err, ClaimError::Parse(_)), "{bad} -> {err}");
        }
    }

    #[test]
    fn test_hhmm_and_label() {
        let t = TimeOfDay::parse("09:45 AM").unwrap();
        assert_eq!(t.hhmm(), "0945");
        assert_eq!(t.to_label(), "09:45 AM");
        let t = TimeOfDay::parse("23:59").unwrap();
        assert_eq!(t.hhmm(), "2359");
        assert_eq!(t.to_label(), "11:59 PM");
        assert_eq!(TimeOfDay::from_minutes(0).unwrap().to_label(), "12:00 AM");
        assert!(TimeOfDay::from_minutes(1440).is_err());
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("8").is_err());
        assert!(parse_offset("+08:75").is_err());
    }

    #[test]
    fn test_next_trigger_today_when_still_ahead() {
        // 2026-05-10 10:00 SGT
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 2, 0, 0).unwrap();
        let tod = TimeOfDay::parse("23:30").unwrap();
        let next = next_trigger_instant(now, tod, sgt());
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 5, 10, 15, 30, 0).unwrap());
    }

    #[test]
    fn test_next_trigger_rolls_to_tomorrow_when_passed() {
        // 2026-05-10 10:00 SGT; 09:00 SGT already passed today.
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 2, 0, 0).unwrap();
        let tod = TimeOfDay::parse("09:00 AM").unwrap();
        let next = next_trigger_instant(now, tod, sgt());
        assert!(next > now);
        let local = next.with_timezone(&sgt());
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2026, 5, 11).unwrap());
        assert_eq!((local.hour(), local.minute()), (9, 0));
    }

    #[test]
    fn test_next_trigger_exactly_now_is_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 5, 9, 16, 0, 0).unwrap(); // 00:00 SGT
        let tod = TimeOfDay::parse("12:00 AM").unwrap();
        let next = next_trigger_instant(now, tod, sgt());
        assert_eq!(next - now, chrono::Duration::days(1));
    }

    #[test]
    fn test_remote_calendar_differs_from_utc() {
        // 20:00 UTC on the 10th is already the 11th in SGT.
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 20, 0, 0).unwrap();
        assert_eq!(remote_today(now, sgt()), NaiveDate::from_ymd_opt(2026, 5, 11).unwrap());
        assert_eq!(target_date(now, sgt(), 14), NaiveDate::from_ymd_opt(2026, 5, 25).unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_instant_bounds() {
        let poll = Duration::from_millis(50);
        let target = Utc::now() + chrono::Duration::milliseconds(300);
        wait_until_instant(target, poll).await;
        let done = Utc::now();
        assert!(done >= target, "returned before target");
        let late = (done - target).to_std().unwrap();
        assert!(late < poll + Duration::from_millis(150), "late by {late:?}");
    }

    #[tokio::test]
    async fn test_wait_until_instant_past_returns_immediately() {
        let started = std::time::Instant::now();
        wait_until_instant(Utc::now() - chrono::Duration::seconds(5), DEFAULT_POLL_INTERVAL).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    /// Wall clock that starts at `base` and advances with tokio's (paused) clock.
    fn paused_clock(base: DateTime<Utc>) -> impl Fn() -> DateTime<Utc> {
        let start = tokio::time::Instant::now();
        move || base + chrono::Duration::from_std(start.elapsed()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_returns_at_next_occurrence() {
        // 22:59:30 SGT, thirty seconds before the trigger.
        let base = Utc.with_ymd_and_hms(2026, 5, 10, 14, 59, 30).unwrap();
        let clock = paused_clock(base);
        let poll = Duration::from_millis(250);

        let fired = wait_until_with("11:00 PM", sgt(), poll, &clock).await.unwrap();

        assert_eq!(fired, Utc.with_ymd_and_hms(2026, 5, 10, 15, 0, 0).unwrap());
        let now = clock();
        assert!(now >= fired, "returned before target");
        assert!((now - fired).to_std().unwrap() <= poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_rolls_over_midnight() {
        // 23:59:58 SGT waiting for 12:00 AM lands on the next remote day.
        let base = Utc.with_ymd_and_hms(2026, 5, 10, 15, 59, 58).unwrap();
        let clock = paused_clock(base);
        let fired = wait_until_with("12:00 AM", sgt(), DEFAULT_POLL_INTERVAL, &clock)
            .await
            .unwrap();
        assert_eq!(
            fired.with_timezone(&sgt()).date_naive(),
            NaiveDate::from_ymd_opt(2026, 5, 11).unwrap()
        );
        assert!(clock() >= fired);
    }

    #[tokio::test]
    async fn test_wait_until_fails_fast_on_bad_label() {
        let started = std::time::Instant::now();
        let err = wait_until("half past nine", sgt(), DEFAULT_POLL_INTERVAL)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::Parse(_)));
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}

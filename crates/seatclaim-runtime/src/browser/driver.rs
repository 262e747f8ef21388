// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`SessionDriver`] for the Smarten booking UI.
//!
//! UI steps are small in-page scripts polled until they report success.
//! The Angular Material widgets re-render constantly, so element handles
//! are never held across steps.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use chromiumoxide::page::Page;
use seatclaim::{AcquisitionWindow, ClaimError, ClaimResult, Harvester, SessionDriver, TimeOfDay};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(200);
const SETTLE: Duration = Duration::from_millis(150);
const MAX_MONTH_STEPS: usize = 24;
const MAX_OPTIONS: usize = 200;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub login_url: String,
    pub username: String,
    pub password: String,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    /// Tenant base URL; cookies for its host are copied into the session context.
    pub base_url: String,
    /// Budget for a page to show a landmark element.
    pub load_timeout: Duration,
    /// Budget for a single click or fill.
    pub step_timeout: Duration,
}

impl DriverConfig {
    pub fn new(
        login_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        start: TimeOfDay,
        end: TimeOfDay,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            login_url: login_url.into(),
            username: username.into(),
            password: password.into(),
            start,
            end,
            base_url: base_url.into(),
            load_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// JS string literal for `s`.
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

const VISIBLE_FN: &str = "const vis = el => { const r = el.getBoundingClientRect(); \
     return r.width > 0 && r.height > 0 && getComputedStyle(el).visibility !== 'hidden'; };";
const NORM_FN: &str = "const norm = s => (s || '').replace(/\\s+/g, ' ').trim().toLowerCase();";

pub fn visible_script(selector: &str) -> String {
    format!(
        "(() => {{ {VISIBLE_FN} return Array.from(document.querySelectorAll({sel})).some(vis); }})()",
        sel = js_str(selector)
    )
}

pub fn click_selector_script(selector: &str) -> String {
    format!(
        "(() => {{ {VISIBLE_FN} const el = Array.from(document.querySelectorAll({sel})).find(vis); \
         if (!el) return false; el.click(); return true; }})()",
        sel = js_str(selector)
    )
}

/// JS statements binding `el` to the first visible element under
/// `selector` whose text or aria-label equals `text`, case-insensitively.
fn find_by_text(selector: &str, text: &str) -> String {
    format!(
        "{VISIBLE_FN} {NORM_FN} const want = norm({text}); \
         const el = Array.from(document.querySelectorAll({sel})).filter(vis) \
           .find(e => norm(e.innerText) === want || norm(e.getAttribute('aria-label')) === want);",
        sel = js_str(selector),
        text = js_str(text)
    )
}

pub fn text_visible_script(selector: &str, text: &str) -> String {
    format!("(() => {{ {} return !!el; }})()", find_by_text(selector, text))
}

pub fn click_by_text_script(selector: &str, text: &str) -> String {
    format!(
        "(() => {{ {} if (!el) return false; el.click(); return true; }})()",
        find_by_text(selector, text)
    )
}

/// Focus and clear an input so typing replaces its value.
pub fn clear_input_script(selector: &str) -> String {
    format!(
        "(() => {{ {VISIBLE_FN} const el = Array.from(document.querySelectorAll({sel})).find(vis); \
         if (!el) return false; el.focus(); el.value = ''; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true; }})()",
        sel = js_str(selector)
    )
}

/// The calendar's "Month YYYY" heading, or an empty string.
pub const MONTH_LABEL_SCRIPT: &str = "(() => { \
    const re = /^(January|February|March|April|May|June|July|August|September|October|November|December)\\s+\\d{4}$/; \
    for (const el of document.querySelectorAll('body *')) { \
      if (el.children.length > 0) continue; \
      const t = (el.innerText || '').replace(/\\s+/g, ' ').trim(); \
      if (t.length <= 30 && re.test(t)) return t; \
    } \
    return ''; })()";

/// Click the calendar's next (or previous) month button.
pub fn calendar_step_script(forward: bool) -> String {
    let (icon, aria, arrow) = if forward {
        ("navigate_next", "next", ">")
    } else {
        ("navigate_before", "prev", "<")
    };
    format!(
        "(() => {{ {VISIBLE_FN} const btns = Array.from(document.querySelectorAll('button')).filter(vis); \
         const el = btns.find(b => (b.innerText || '').includes({icon})) \
           || btns.find(b => (b.getAttribute('aria-label') || '').toLowerCase().includes({aria})) \
           || btns.find(b => (b.innerText || '').trim() === {arrow}); \
         if (!el) return false; el.click(); return true; }})()",
        icon = js_str(icon),
        aria = js_str(aria),
        arrow = js_str(arrow)
    )
}

/// Click the first visible `div` whose whole text is the day number.
pub fn click_day_script(day: u32) -> String {
    format!(
        "(() => {{ {VISIBLE_FN} const want = {day}; \
         const el = Array.from(document.querySelectorAll('div')).filter(vis) \
           .find(d => (d.innerText || '').trim() === want); \
         if (!el) return false; el.click(); return true; }})()",
        day = js_str(&day.to_string())
    )
}

/// Pick a `mat-option` from the open overlay: exact text first, then containment.
pub fn pick_option_script(label: &str) -> String {
    format!(
        "(() => {{ {NORM_FN} const want = norm({label}); \
         const opts = Array.from(document.querySelectorAll('.cdk-overlay-container mat-option')).slice(0, {MAX_OPTIONS}); \
         const texts = opts.map(o => norm(o.innerText)); \
         let i = texts.findIndex(t => t && t === want); \
         if (i < 0) i = texts.findIndex(t => t && t.includes(want)); \
         if (i >= 0) {{ opts[i].click(); }} \
         document.body.dispatchEvent(new KeyboardEvent('keydown', {{ key: 'Escape', bubbles: true }})); \
         return {{ count: opts.length, found: i >= 0, sample: opts.slice(0, 40).map(o => (o.innerText || '').trim()) }}; }})()",
        label = js_str(label)
    )
}

#[derive(Debug, Deserialize)]
struct OptionPick {
    count: usize,
    found: bool,
    sample: Vec<String>,
}

/// Which way to page the calendar: `None` when already showing `target`'s month.
pub fn month_step(current: Option<&str>, target: NaiveDate) -> Option<bool> {
    let Some(label) = current else {
        return Some(true);
    };
    let shown = NaiveDate::parse_from_str(&format!("1 {}", label.trim()), "%d %B %Y").ok();
    let wanted = NaiveDate::from_ymd_opt(target.year(), target.month(), 1);
    match (shown, wanted) {
        (Some(s), Some(w)) if s == w => None,
        (Some(s), Some(w)) => Some(s < w),
        _ => Some(true),
    }
}

/// `Cookie` header value from name/value pairs.
pub fn cookie_header<'a, I>(cookies: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    cookies
        .into_iter()
        .map(|(n, v)| format!("{n}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Whether a cookie set for `domain` is sent to `host`.
pub fn cookie_applies(domain: &str, host: &str) -> bool {
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Drives the booking UI in a Chromium page.
pub struct ChromiumDriver {
    page: Page,
    harvester: Arc<Harvester>,
    config: DriverConfig,
}

impl ChromiumDriver {
    pub fn new(page: Page, harvester: Arc<Harvester>, config: DriverConfig) -> Self {
        Self {
            page,
            harvester,
            config,
        }
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    /// Poll `script` until it evaluates to `true`.
    async fn poll_true(&self, what: &str, script: &str, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.eval::<bool>(script).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => debug!(what, error = %e, "check failed; retrying"),
            }
            if started.elapsed() >= timeout {
                bail!("timed out after {}ms waiting for {what}", timeout.as_millis());
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn wait_visible(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.poll_true(selector, &visible_script(selector), timeout).await
    }

    async fn click_text(&self, selector: &str, text: &str) -> Result<()> {
        info!(target_text = text, "click");
        self.poll_true(
            &format!("{selector} \"{text}\""),
            &click_by_text_script(selector, text),
            self.config.step_timeout,
        )
        .await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.poll_true(selector, &clear_input_script(selector), self.config.step_timeout)
            .await?;
        self.page
            .find_element(selector)
            .await
            .with_context(|| format!("input {selector} not found"))?
            .click()
            .await?
            .type_str(value)
            .await?;
        Ok(())
    }

    async fn login_and_open_booking(&mut self) -> Result<()> {
        let email = "input[placeholder='Eg. email@domain.com'], input[type='email']";
        let password = "input[placeholder='Enter Password'], input[type='password']";
        let button = "button, [role='button'], input[type='submit']";
        let link = "a, [role='link']";

        info!(url = %self.config.login_url, "opening login page");
        self.page
            .goto(self.config.login_url.as_str())
            .await
            .context("navigation to login page failed")?;

        self.wait_visible(email, self.config.load_timeout).await?;
        self.fill(email, &self.config.username).await?;
        self.click_text(button, "Proceed").await?;

        self.wait_visible(password, self.config.load_timeout).await?;
        self.fill(password, &self.config.password).await?;
        // Terms checkbox only shows for some accounts.
        let terms = self
            .eval::<bool>(&click_selector_script(".mat-checkbox-inner-container"))
            .await;
        optional_step("terms checkbox", terms);
        self.click_text(button, "Login").await?;

        info!("waiting for post-login UI");
        self.poll_true(
            "Booking link",
            &text_visible_script(link, "Booking"),
            self.config.load_timeout,
        )
        .await?;
        self.click_text(link, "Booking").await?;
        self.click_text(button, "Book Now").await?;

        self.wait_visible(".cursor-pointer.iconSize", self.config.load_timeout)
            .await?;
        info!("session ready for date selection");
        Ok(())
    }

    async fn pick_date(&mut self, date: NaiveDate) -> Result<()> {
        let icon = ".cursor-pointer.iconSize";
        self.poll_true(icon, &click_selector_script(icon), self.config.step_timeout)
            .await?;
        tokio::time::sleep(SETTLE).await;

        let wanted = date.format("%B %Y").to_string();
        let mut arrived = false;
        for _ in 0..MAX_MONTH_STEPS {
            let current: String = self.eval(MONTH_LABEL_SCRIPT).await?;
            debug!(current = %current, target = %wanted, "calendar month");
            let shown = (!current.is_empty()).then_some(current.as_str());
            let Some(forward) = month_step(shown, date) else {
                arrived = true;
                break;
            };
            if !self.eval::<bool>(&calendar_step_script(forward)).await? {
                bail!("Could not find calendar next/prev buttons.");
            }
            tokio::time::sleep(SETTLE).await;
        }
        if !arrived {
            bail!("Failed to navigate calendar to \"{wanted}\".");
        }

        info!(day = date.day(), "selecting day");
        self.poll_true(
            &format!("day {}", date.day()),
            &click_day_script(date.day()),
            self.config.step_timeout,
        )
        .await
    }

    async fn pick_time(&self, field: &str, tod: TimeOfDay) -> Result<()> {
        let trigger = format!("#{field} .mat-select-trigger");
        self.poll_true(&trigger, &click_selector_script(&trigger), self.config.load_timeout)
            .await?;
        tokio::time::sleep(SETTLE).await;
        self.wait_visible(".cdk-overlay-container mat-option", Duration::from_secs(8))
            .await?;

        let label = tod.to_label();
        let pick: OptionPick = self.eval(&pick_option_script(&label)).await?;
        if !pick.found {
            bail!(
                "Time option \"{label}\" not found among {} options. First options: {:?}",
                pick.count,
                pick.sample
            );
        }
        debug!(field, label = %label, "time selected");
        Ok(())
    }

    async fn choose_window(&mut self, date: NaiveDate) -> Result<AcquisitionWindow> {
        self.pick_date(date).await?;
        self.click_text("button, [role='button']", "Next").await?;

        self.pick_time("startTime", self.config.start).await?;

        if self.eval::<bool>(&visible_script("#endTime .mat-select-trigger")).await? {
            if let Err(e) = self.pick_time("endTime", self.config.end).await {
                warn!(error = %e, "end time selection failed; continuing");
            }
        } else {
            debug!("no end time field");
        }

        if self
            .eval::<bool>(&click_by_text_script("button", "Proceed"))
            .await?
        {
            debug!("clicked Proceed");
        }

        self.sync_cookies().await?;
        Ok(AcquisitionWindow::new(date, self.config.start, self.config.end))
    }

    /// Copy the page's cookies for the tenant host into the harvested context.
    async fn sync_cookies(&self) -> Result<()> {
        let host = url::Url::parse(&self.config.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let cookies = self.page.get_cookies().await.context("failed to read cookies")?;
        let header = cookie_header(
            cookies
                .iter()
                .filter(|c| cookie_applies(&c.domain, &host))
                .map(|c| (c.name.as_str(), c.value.as_str())),
        );
        if header.is_empty() {
            debug!(host = %host, "no cookies for tenant host");
            return Ok(());
        }
        self.harvester.merge_headers([("cookie", header.as_str())]);
        debug!(host = %host, "session cookies copied");
        Ok(())
    }
}

/// Result of a step that may have nothing to act on. Errors are logged
/// and swallowed; returns whether the step acted.
fn optional_step(what: &str, result: Result<bool>) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            debug!(what, "optional step not present");
            false
        }
        Err(e) => {
            warn!(what, error = %e, "optional step failed; continuing");
            false
        }
    }
}

fn session_error(e: anyhow::Error) -> ClaimError {
    ClaimError::Session(format!("{e:#}"))
}

#[async_trait]
impl SessionDriver for ChromiumDriver {
    async fn prepare(&mut self) -> ClaimResult<()> {
        self.login_and_open_booking().await.map_err(session_error)
    }

    async fn select_window(&mut self, date: NaiveDate) -> ClaimResult<AcquisitionWindow> {
        self.choose_window(date).await.map_err(session_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_step() {
        assert_eq!(month_step(Some("March 2026"), d(2026, 3, 16)), None);
        assert_eq!(month_step(Some(" March 2026 "), d(2026, 3, 1)), None);
        assert_eq!(month_step(Some("February 2026"), d(2026, 3, 16)), Some(true));
        assert_eq!(month_step(Some("January 2027"), d(2026, 12, 31)), Some(false));
        assert_eq!(month_step(None, d(2026, 3, 16)), Some(true));
        assert_eq!(month_step(Some("garbage"), d(2026, 3, 16)), Some(true));
    }

    #[test]
    fn test_js_strings_are_escaped() {
        let script = click_by_text_script("button", "O'Neil \"quoted\"");
        assert!(script.contains(r#""O'Neil \"quoted\"""#));
        assert!(pick_option_script("09:45 AM").contains("\"09:45 AM\""));
        assert!(click_day_script(7).contains("const want = \"7\""));
    }

    #[test]
    fn test_optional_step_never_fails_the_flow() {
        assert!(optional_step("terms checkbox", Ok(true)));
        assert!(!optional_step("terms checkbox", Ok(false)));
        let err = anyhow::anyhow!("JS execution failed: context destroyed");
        assert!(!optional_step("terms checkbox", Err(err)));
    }

    #[test]
    fn test_calendar_step_direction() {
        assert!(calendar_step_script(true).contains("navigate_next"));
        assert!(calendar_step_script(false).contains("navigate_before"));
    }

    #[test]
    fn test_cookie_header_and_domain_match() {
        assert_eq!(
            cookie_header([("JSESSIONID", "abc"), ("lang", "en")]),
            "JSESSIONID=abc; lang=en"
        );
        assert_eq!(cookie_header(std::iter::empty()), "");
        assert!(cookie_applies(".smartenspaces.com", "juliusbaer.smartenspaces.com"));
        assert!(cookie_applies("juliusbaer.smartenspaces.com", "juliusbaer.smartenspaces.com"));
        assert!(!cookie_applies("evil.com", "juliusbaer.smartenspaces.com"));
        assert!(!cookie_applies("spaces.com", "juliusbaer.smartenspaces.com"));
    }
}

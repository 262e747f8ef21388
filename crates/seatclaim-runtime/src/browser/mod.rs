// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chromium session hosting the booking UI.

pub mod driver;
pub mod network;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Find the Chromium binary path.
///
/// `explicit` comes from `SEATCLAIM_CHROMIUM_PATH` and wins when it exists.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // ~/.seatclaim/chromium/
    if let Some(home) = dirs::home_dir() {
        let base = home.join(".seatclaim/chromium");
        let candidates = if cfg!(target_os = "macos") {
            vec![
                base.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                base.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                base.join("chrome"),
            ]
        } else {
            vec![base.join("chrome-linux64/chrome"), base.join("chrome")]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub chromium_path: Option<PathBuf>,
    pub headful: bool,
}

/// A launched browser with one page.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(opts: &LaunchOptions) -> Result<Self> {
        let chrome_path = find_chromium(opts.chromium_path.as_deref()).context(
            "Chromium not found. Install Chrome or set SEATCLAIM_CHROMIUM_PATH.",
        )?;
        info!(path = %chrome_path.display(), headful = opts.headful, "launching browser");

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(1366, 900)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        builder = if opts.headful {
            builder.with_head()
        } else {
            builder.arg("--headless=new")
        };
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn close(mut self) -> Result<()> {
        let result = self.browser.close().await;
        self.handler.abort();
        result.context("failed to close browser")?;
        Ok(())
    }
}

// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use seatclaim_runtime::audit::default_log_path;
use seatclaim_runtime::browser::find_chromium;
use seatclaim_runtime::config::{Overrides, RunConfig};
use seatclaim_runtime::runner::{run_booking, RunReport};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "seatclaim",
    about = "Seatclaim: claim a contended desk the moment booking opens",
    version,
    after_help = "Credentials come from SMARTEN_USER and SMARTEN_PASS (or SMARTEN_PASS_FILE).\nRun 'seatclaim' with no command to book with the environment's settings."
)]
struct Cli {
    /// Print the run report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, wait for the trigger and book the seat
    Run(Overrides),
    /// Check configuration and browser availability
    Doctor(Overrides),
    /// Generate shell completions
    Completions {
        /// Shell to generate for (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,seatclaim={level},seatclaim_runtime={level}"))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("  Error: failed to serialize report: {e}"),
        }
        return;
    }

    for a in &report.attempts {
        let entity = a
            .entity
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unresolved".to_string());
        let status = a.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        eprintln!(
            "  [{}] seat {:<8} {:<24} {:?} (HTTP {status}, {}ms)",
            a.candidate, a.label, entity, a.outcome, a.elapsed_ms
        );
    }
    match (&report.booking, &report.error) {
        (Some(b), _) => {
            eprintln!(
                "  Booked seat {} ({}) on {} {}-{}",
                b.label, b.entity, b.window.date, b.window.start, b.window.end
            );
            eprintln!("  Response: {}", b.response_body);
        }
        (None, Some(e)) => eprintln!("  Booking failed: {e}"),
        (None, None) => eprintln!("  Booking failed"),
    }
    if let Some(state) = &report.interrupted_state {
        eprintln!("  Interrupted in {state:?}");
    }
    eprintln!("  Run id: {}", report.run_id);
}

fn doctor(overrides: &Overrides) -> Result<()> {
    let mut problems = 0;

    let config = match RunConfig::load(overrides) {
        Ok(c) => {
            eprintln!("  Config         ok (seat {}, {} fallbacks)", c.descriptor.label, c.descriptor.fallback_labels.len());
            eprintln!("  Tenant         {}", c.base_url);
            eprintln!("  Window         {} - {}, {} days ahead", c.start.to_label(), c.end.to_label(), c.days_ahead);
            eprintln!("  Trigger        {:?} (UTC{})", c.trigger, c.remote_offset);
            eprintln!("  Run ceiling    {}s after now", c.run_ceiling(chrono::Utc::now()).as_secs());
            Some(c)
        }
        Err(e) => {
            problems += 1;
            eprintln!("  Config         FAILED: {e:#}");
            None
        }
    };

    let explicit: Option<PathBuf> = config
        .as_ref()
        .and_then(|c| c.chromium_path.clone())
        .or_else(|| std::env::var("SEATCLAIM_CHROMIUM_PATH").ok().map(PathBuf::from));
    match find_chromium(explicit.as_deref()) {
        Some(path) => eprintln!("  Chromium       {}", path.display()),
        None => {
            problems += 1;
            eprintln!("  Chromium       NOT FOUND (set SEATCLAIM_CHROMIUM_PATH)");
        }
    }
    eprintln!("  Attempt log    {}", default_log_path().display());

    if problems > 0 {
        bail!("{problems} problem(s) found");
    }
    Ok(())
}

/// Returns whether a seat was booked; the report has already been printed.
async fn run(overrides: Overrides, json: bool) -> Result<bool> {
    let config = RunConfig::load(&overrides)?;
    let report = run_booking(&config).await?;
    print_report(&report, json);
    Ok(report.succeeded())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let json = cli.json;
    let result = match cli.command {
        None => run(Overrides::default(), json).await,
        Some(Commands::Run(overrides)) => run(overrides, json).await,
        Some(Commands::Doctor(overrides)) => doctor(&overrides).map(|()| true),
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "seatclaim", &mut std::io::stdout());
            Ok(true)
        }
    };

    // 0 = booked, 1 = anything else
    if let Err(e) = &result {
        if json {
            println!(
                "{}",
                serde_json::json!({ "error": true, "message": format!("{e:#}") })
            );
        } else {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }
    if let Ok(false) = result {
        std::process::exit(1);
    }
    Ok(())
}

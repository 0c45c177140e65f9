//! # Vocab Card
//!
//! Daily learning-card service. Picks one undelivered entry from the active
//! collection every morning, renders it into a card image and pushes it to
//! every registered destination.
//!
//! ## Usage
//!
//! ```sh
//! vocab_card                      # run the scheduler
//! vocab_card preview abandon      # render one card
//! vocab_card register my-group    # receive the daily card
//! ```
//!
//! ## Architecture
//!
//! 1. **Settings**: YAML file, defaults when missing
//! 2. **Registry**: built-in collections bound to their handler variants
//! 3. **Service**: active collection, progress, renderer, rasterizer, transport
//! 4. **Scheduler**: generate at 07:30, push at 08:00 (UTC+8 by default)
//! 5. **Control**: `serve` takes the other subcommands over loopback HTTP;
//!    without a listening server they run in this process

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use vocab_card::cli::{Cli, Command};
use vocab_card::collections::CollectionRegistry;
use vocab_card::config::AppConfig;
use vocab_card::control::{self, ControlClient};
use vocab_card::delivery::{DeliveryTransport, DryRunTransport, WebhookTransport};
use vocab_card::render::{BackgroundPolicy, ChromiumRasterizer, TemplateDirRenderer};
use vocab_card::scheduler::{Clock, DailyScheduler, SystemClock};
use vocab_card::service::{CardService, CommandOutcome, ServiceParts};
use vocab_card::utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("vocab_card starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(config = %args.config.display(), dry_run = args.dry_run, command = ?args.command, "Parsed CLI arguments");

    let config = AppConfig::load(&args.config).await?;
    let offset = config.offset()?;
    let command = args.command.clone().unwrap_or(Command::Serve);

    // A running server owns the scheduler's locks and live settings
    if command != Command::Serve && !args.local && !args.dry_run {
        if let Some(addr) = &config.control_addr {
            if let Some(outcome) = ControlClient::new(addr)?.send(&command).await? {
                return finish(&outcome, start_time);
            }
            debug!(addr = %addr, "No running server; handling the command locally");
        }
    }

    // Early check: progress and card directories must be writable
    for dir in [&config.data_dir, &config.artifacts_dir] {
        let path = dir.to_string_lossy();
        if let Err(e) = ensure_writable_dir(&path).await {
            error!(
                path = %path,
                error = %e,
                "Directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    let registry = CollectionRegistry::with_defaults(&config.collections_dir).await;

    let transport: Arc<dyn DeliveryTransport> = match (&config.webhook_url, args.dry_run) {
        (Some(url), false) => {
            info!(endpoint = %url, "Delivering through webhook");
            Arc::new(WebhookTransport::new(url.clone())?)
        }
        (Some(_), true) => {
            info!("Dry run requested; deliveries are only logged");
            Arc::new(DryRunTransport)
        }
        (None, _) => {
            warn!("No webhook_url configured; deliveries are only logged");
            Arc::new(DryRunTransport)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));
    let parts = ServiceParts {
        renderer: Arc::new(TemplateDirRenderer::new(&config.templates_dir)),
        rasterizer: Arc::new(ChromiumRasterizer::new(config.chromium_binary.clone())),
        transport,
        backgrounds: BackgroundPolicy::from_config(&config).await,
        clock: clock.clone(),
    };
    let service = Arc::new(CardService::start(config, args.config.clone(), registry, parts).await?);

    if command == Command::Serve {
        serve(service, clock).await?;
        info!(
            elapsed_s = start_time.elapsed().as_secs(),
            "vocab_card shut down"
        );
        return Ok(());
    }

    let outcome = control::dispatch(&service, command).await;
    finish(&outcome, start_time)
}

/// Print the outcome; a failed command exits non-zero.
fn finish(outcome: &CommandOutcome, start_time: std::time::Instant) -> Result<(), Box<dyn Error>> {
    report(outcome);
    info!(
        ok = outcome.ok,
        elapsed_ms = start_time.elapsed().as_millis(),
        "Command finished"
    );
    if !outcome.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Run the scheduler and the control endpoint until Ctrl-C, then let the
/// current phase and in-flight commands finish.
#[instrument(level = "info", skip_all)]
async fn serve(service: Arc<CardService>, clock: Arc<dyn Clock>) -> Result<(), Box<dyn Error>> {
    let cancel = CancellationToken::new();

    let control_addr = service.config_snapshot().await.control_addr;
    let control = match control_addr {
        Some(addr) => {
            let listener = control::bind(&addr).await.map_err(|e| {
                error!(addr = %addr, error = %e, "Cannot bind control endpoint (is another serve running?)");
                e
            })?;
            let task = control::serve_control(listener, service.clone(), cancel.clone());
            Some(tokio::spawn(task))
        }
        None => {
            warn!("control_addr disabled; commands from other processes run on their own");
            None
        }
    };

    let scheduler = DailyScheduler::new(service.clone(), service.scheduler_state(), clock, cancel.clone());
    let handle = tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested; waiting for the scheduler to stop");
    cancel.cancel();
    handle.await?;
    if let Some(control) = control {
        control.await??;
    }
    Ok(())
}

fn report(outcome: &CommandOutcome) {
    if outcome.ok {
        println!("{outcome}");
    } else {
        eprintln!("{outcome}");
    }
}

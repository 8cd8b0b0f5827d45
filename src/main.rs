//! Ritadel - terminal console for AI-driven financial analysis runs
//!
//! Walks a run configuration through the wizard gate, submits it to the
//! analysis service, renders per-analyst progress, tails the backend log
//! stream and writes the result as a report.
//!
//! Exit codes:
//!   0 - Result produced by the analysis service
//!   1 - Runtime or validation error
//!   2 - Service failed; the neutral fallback result was written
//!   130 - Cancelled with Ctrl-C

use anyhow::{Context, Result};
use ritadel_console::analysis::{
    HttpAnalysisService, RunStatus, ServiceConfig, SubmissionCoordinator,
};
use ritadel_console::cli::Args;
use ritadel_console::config::{Config, CONFIG_FILE_NAME};
use ritadel_console::console::{follow_log_feed, format_log_line, summary_lines, ProgressView};
use ritadel_console::models::{LogEvent, RunFlags};
use ritadel_console::stream::{LogStreamClient, WsTransport};
use ritadel_console::validation::{RunDraft, ValidationError, Wizard};
use ritadel_console::{catalog, report};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Listing calls should not wait as long as an analysis run.
const LISTING_TIMEOUT_SECS: u64 = 10;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Ritadel console v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .ritadel.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to set the API URL, default model, analysts and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch to listing, log tailing or a full run. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    if args.is_listing() {
        return handle_listing(&args, &config).await;
    }

    let logs = if config.console.follow_logs {
        Some(start_log_stream(&config)?)
    } else {
        None
    };

    if args.logs_only {
        return match logs {
            Some((client, feed)) => tail_logs(client, feed, args.reconnect).await,
            None => Ok(0),
        };
    }

    run_analysis(&args, &config, logs).await
}

/// Run one analysis from draft to report.
async fn run_analysis(
    args: &Args,
    config: &Config,
    logs: Option<(LogStreamClient, broadcast::Receiver<LogEvent>)>,
) -> Result<i32> {
    let draft = build_draft(args, config);

    if let Err(e) = walk_wizard(&draft) {
        eprintln!("❌ {} (field: {})", e, e.field());
        return Ok(1);
    }

    if let Some(ref model) = draft.model {
        if !catalog::is_known_model(model.trim()) {
            warn!("Model '{}' is not in the built-in catalog; sending it anyway", model);
        }
    }

    let service = HttpAnalysisService::new(config.service_config())?;
    let coordinator = SubmissionCoordinator::new(Arc::new(service), config.coordinator_config());

    let started = Instant::now();
    let mut handle = coordinator.submit(&draft)?;
    let request = coordinator
        .current_request()
        .context("Run disappeared right after it was started")?;

    println!(
        "🚀 {}: analyzing {} with {} analyst(s) using {}",
        handle.id(),
        request.subjects().join(", "),
        request.agent_ids().len(),
        request.model_id()
    );

    let view = if args.quiet {
        ProgressView::hidden(request.agent_ids(), request.subjects())
    } else {
        ProgressView::new(request.agent_ids(), request.subjects())
    };
    view.set_status("Waiting for analysis service...");

    let (log_client, mut feed) = match logs {
        Some((client, feed)) => (Some(client), Some(feed)),
        None => (None, None),
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(config.console.refresh_ms.max(50)));
    let mut warned = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            outcome = handle.wait() => break outcome,
            _ = ticker.tick() => {
                if let Some(snapshot) = coordinator.snapshot() {
                    view.render(&snapshot, coordinator.overall_progress());
                }
                if let (false, RunStatus::Degraded { error }) = (warned, handle.status()) {
                    view.println(&format!("⚠️  {}. Falling back to a neutral result.", error));
                    view.set_status("Service failed, preparing fallback...");
                    warned = true;
                }
            }
            event = next_log(&mut feed) => {
                if let Some(event) = event {
                    view.println(&format_log_line(&event));
                }
            }
            _ = &mut ctrl_c => {
                coordinator.cancel_run();
                view.println("⛔ Cancelled.");
                return Ok(130);
            }
        }
    };

    if let Some(client) = log_client {
        client.disconnect();
    }

    let Some(outcome) = outcome else {
        println!("⛔ Run was cancelled before it finished.");
        return Ok(130);
    };

    if let Some(snapshot) = coordinator.snapshot() {
        view.finish(&snapshot, coordinator.overall_progress());
    }

    let report = report::build_report(&request, &outcome, started.elapsed().as_secs_f64());
    let path = PathBuf::from(&config.console.output);
    report::write_report(&report, config.console.format, &path)?;

    println!("\n📊 Signals as of {}:", outcome.result.as_of_date);
    for line in summary_lines(&outcome.result) {
        println!("{}", line);
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!("\n✅ Report saved to: {}", path.display());

    if outcome.is_fallback() {
        eprintln!("\n⚠️  The analysis service did not respond; the report holds the fallback result (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Assemble the draft from CLI arguments over config defaults.
fn build_draft(args: &Args, config: &Config) -> RunDraft {
    RunDraft {
        tickers: args.tickers.clone().unwrap_or_default(),
        start_date: args.start_date.clone().unwrap_or_default(),
        end_date: args.end_date.clone().unwrap_or_default(),
        model: config.run.model.clone(),
        analysts: config.run.analysts.clone(),
        initial_cash: config.run.initial_cash,
        flags: RunFlags {
            is_crypto: config.run.is_crypto,
            show_reasoning: config.run.show_reasoning,
            run_round_table: config.run.run_round_table,
        },
    }
}

/// Advance through every wizard step, stopping at the first one that fails.
fn walk_wizard(draft: &RunDraft) -> std::result::Result<(), ValidationError> {
    let mut wizard = Wizard::default();
    loop {
        let step = wizard.step();
        let next = wizard.advance(draft)?;
        debug!("Wizard step '{}' passed", step.label());
        if next.is_none() {
            return Ok(());
        }
    }
}

/// Create the log client, subscribe, then connect.
fn start_log_stream(config: &Config) -> Result<(LogStreamClient, broadcast::Receiver<LogEvent>)> {
    let url = config.resolved_log_stream_url()?;
    let client = LogStreamClient::new(url, Arc::new(WsTransport), config.log_capacity());
    let feed = client.subscribe();
    client.connect();
    Ok((client, feed))
}

/// Next log event, or never if there is no feed.
async fn next_log(feed: &mut Option<broadcast::Receiver<LogEvent>>) -> Option<LogEvent> {
    let Some(rx) = feed.as_mut() else {
        return std::future::pending::<Option<LogEvent>>().await;
    };

    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Console fell behind, skipped {} log line(s)", skipped);
            }
            Err(RecvError::Closed) => {
                *feed = None;
                return None;
            }
        }
    }
}

/// Handle --logs-only: print log lines until the stream closes or Ctrl-C.
///
/// With `--reconnect N` a closed stream is reopened up to N times.
async fn tail_logs(
    client: LogStreamClient,
    mut feed: broadcast::Receiver<LogEvent>,
    reconnects: u32,
) -> Result<i32> {
    println!("📜 Tailing {} (Ctrl-C to stop)", client.url());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut remaining = reconnects;
    let mut errors = 0;

    loop {
        tokio::select! {
            seen = follow_log_feed(&client, &mut feed, |event| println!("{}", format_log_line(event))) => {
                errors += seen;
                if remaining == 0 {
                    break;
                }
                remaining -= 1;
                client.reconnect();
            }
            _ = &mut ctrl_c => {
                client.disconnect();
                return Ok(130);
            }
        }
    }

    let buffered = client.events();
    info!(
        "Log stream ended: {} event(s) buffered, {} evicted, {} reconnect(s) used",
        buffered.len(),
        client.evicted(),
        reconnects - remaining
    );

    Ok(if errors > 0 { 1 } else { 0 })
}

/// Handle --list-models / --list-analysts, preferring the service's lists.
async fn handle_listing(args: &Args, config: &Config) -> Result<i32> {
    let service = HttpAnalysisService::new(ServiceConfig {
        timeout_seconds: LISTING_TIMEOUT_SECS,
        ..config.service_config()
    })?;

    if args.list_models {
        let models = match service.fetch_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => catalog::builtin_models(),
            Err(e) => {
                warn!("Using built-in model list: {}", e);
                catalog::builtin_models()
            }
        };

        println!("🤖 Models:");
        for model in &models {
            println!("   {:<32} {}", model.value, model.label);
        }
    }

    if args.list_analysts {
        let analysts = match service.fetch_analysts().await {
            Ok(analysts) if !analysts.is_empty() => analysts,
            Ok(_) => catalog::builtin_analysts(),
            Err(e) => {
                warn!("Using built-in analyst list: {}", e);
                catalog::builtin_analysts()
            }
        };

        println!("🧑‍💼 Analysts:");
        for analyst in &analysts {
            println!("   {:<26} {:<22} {}", analyst.value, analyst.label, analyst.description);
        }
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

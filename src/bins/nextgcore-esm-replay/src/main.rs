//! NextGCore ESM Replay
//!
//! Drives the ESM procedure engine through a scripted scenario and reports
//! whether every step behaved as expected.

use anyhow::{Context, Result};
use clap::Parser;

use ogs_esm::{EsmConfig, EsmContext, SubscriberId};

pub mod scenario;

use scenario::{LogSink, Scenario};

/// NextGCore ESM Replay - ESM procedure scenario runner
#[derive(Parser, Debug)]
#[command(name = "nextgcore-esm-replay")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replays ESM procedure scenarios")]
struct Args {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Scenario file path
    #[arg(short, long)]
    scenario: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// IMSI of the replayed subscriber
    #[arg(short, long, default_value = "001010123456789")]
    imsi: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    log::info!("NextGCore ESM replay v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            log::info!("Configuration: {}", path);
            EsmConfig::from_file(path).with_context(|| format!("Failed to load {}", path))?
        }
        None => EsmConfig::default(),
    };
    let scenario = Scenario::from_file(&args.scenario)?;
    log::info!("Scenario: {} ({} steps)", args.scenario, scenario.steps.len());

    let context = EsmContext::new(config).context("Invalid ESM configuration")?;
    let subscriber = SubscriberId::new(args.imsi);
    context.session_add(&subscriber)?;

    let mut sink = LogSink::default();
    let report = scenario::replay(&context, &subscriber, &scenario, &mut sink)?;

    if let Some(session) = context.session_find(&subscriber) {
        let session = session
            .lock()
            .map_err(|_| anyhow::anyhow!("Session lock poisoned"))?;
        for pdn in session.pdns().iter() {
            log::info!(
                "[{}] {} '{}' {} default {:?}",
                subscriber,
                pdn.cid,
                pdn.apn,
                pdn.state,
                pdn.default_ebi
            );
        }
        for bearer in session.bearers().iter() {
            log::info!(
                "[{}] {} of {} QCI {} {}",
                subscriber,
                bearer.ebi,
                bearer.pdn_cid,
                bearer.qci,
                bearer.state
            );
        }
        log::info!(
            "[{}] {} procedure(s) in flight, merged cause {:?}",
            subscriber,
            session.procedures().len(),
            session.merged_cause()
        );
    }
    context.session_remove(&subscriber)?;

    log::info!(
        "{} step(s) passed, {} mismatched, {} message(s) sent",
        report.passed,
        report.mismatched.len(),
        sink.sent
    );
    if !report.is_success() {
        anyhow::bail!("Mismatched steps: {:?}", report.mismatched);
    }
    Ok(())
}

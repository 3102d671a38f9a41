//! CLI entry point for chanfetch.

use std::io::{self, IsTerminal, Read};

use anyhow::{Result, bail};
use chanfetch_core::{
    JobOutcome, Orchestrator, RunControl, RunEvent, SessionContext, Target, parse_target,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Read input: from positional args or stdin
    let inputs: Vec<String> = if !args.urls.is_empty() {
        args.urls.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    } else {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: chanfetch https://boards.4chan.org/g/thread/12345678");
        return Ok(());
    };

    let targets = parse_targets(&inputs);
    if targets.is_empty() {
        info!("No valid board URLs found in input");
        return Ok(());
    }
    info!(targets = targets.len(), "Parsed input");

    let settings = args.settings();
    let ctx = SessionContext::open(&settings).await?;
    let orchestrator = Orchestrator::new(ctx, settings)?;

    let control = RunControl::new();
    {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight chunks");
                control.cancel();
            }
        });
    }

    let (events, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report(rx));
    let summaries = orchestrator.process_all(&targets, &control, Some(events)).await;
    if let Err(e) = reporter.await {
        warn!(error = %e, "event reporter stopped");
    }
    orchestrator.close().await;

    let downloaded: usize = summaries.iter().map(|s| s.downloaded).sum();
    let skipped: usize = summaries.iter().map(|s| s.skipped).sum();
    let failed: usize = summaries.iter().map(|s| s.failed).sum();
    info!(
        targets = summaries.len(),
        downloaded, skipped, failed, "Archive run complete"
    );

    let unclean = summaries.iter().filter(|s| !s.is_clean()).count();
    if control.is_cancelled() {
        bail!("run interrupted");
    }
    if unclean > 0 {
        bail!("{unclean} of {} targets finished with errors", summaries.len());
    }
    Ok(())
}

fn parse_targets(inputs: &[String]) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();
    for input in inputs {
        match parse_target(input) {
            Ok(target) if targets.contains(&target) => {
                debug!(%target, "Skipped duplicate target");
            }
            Ok(target) => targets.push(target),
            Err(e) => warn!(input = %input, error = %e, "Skipped unrecognized input"),
        }
    }
    targets
}

async fn report(mut rx: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::Progress {
                target,
                index,
                total,
                filename,
            } => debug!(%target, "[{}/{}] {}", index + 1, total, filename),
            RunEvent::Outcome {
                target, outcome, ..
            } => match outcome {
                JobOutcome::Completed { path, .. } => {
                    info!(%target, path = %path.display(), "saved");
                }
                JobOutcome::SkippedDuplicate { existing } => {
                    info!(%target, existing = %existing.display(), "duplicate skipped");
                }
                JobOutcome::Failed(failure) => warn!(%target, %failure, "download failed"),
            },
            RunEvent::Summary(summary) => info!("{summary}"),
        }
    }
}

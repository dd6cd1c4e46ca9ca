//! CLI entry point for the vidqueue tool.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use vidqueue_core::{
    DestinationConfig, FetchEngine, HttpFetchEngine, ProgressPhase, QueueStore, RunState,
    WorkerController, WorkerEvent, YtDlpEngine, links,
};

mod cli;

use cli::{Args, EngineArg};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
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
    info!("vidqueue starting");

    if args.urls.is_empty() {
        info!("No input provided. Pass one or more media links as arguments.");
        info!("Example: vidqueue 'https://youtu.be/abc' --dest ~/Downloads");
        return Ok(());
    }

    let engine: Arc<dyn FetchEngine> = match args.engine {
        EngineArg::Ytdlp => {
            let mut engine = YtDlpEngine::new().with_program(&args.ytdlp_path);
            if let Some(ffmpeg) = &args.ffmpeg_path {
                engine = engine.with_ffmpeg(ffmpeg);
            }
            Arc::new(engine)
        }
        EngineArg::Http => Arc::new(HttpFetchEngine::new()),
    };

    let queue = Arc::new(QueueStore::new());
    let controller = WorkerController::new(Arc::clone(&queue), engine);
    let mut events = controller.subscribe();

    let mut accepted = 0usize;
    for url in &args.urls {
        if links::is_supported_link(url) || links::is_direct_file_link(url) {
            controller.enqueue(url).await;
            accepted += 1;
        } else {
            warn!(url = %url, "link is not supported; skipped");
        }
    }
    if accepted == 0 {
        anyhow::bail!("none of the provided links are supported");
    }

    let config = DestinationConfig::new(&args.dest).with_mode(args.mode.into());
    controller
        .start(config)
        .map_err(|error| anyhow::anyhow!("cannot start downloads: {error}"))?;

    // Ctrl-C cancels the in-flight download cooperatively; the worker cleans
    // up its partial output before reporting the terminal state.
    let cancel_controller = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_controller.cancel();
        }
    });

    let progress = build_progress_bar(args.quiet);
    let terminal = render_events(&mut events, &progress).await;
    progress.finish_and_clear();

    match terminal {
        RunState::Completed => {
            info!("All done");
            Ok(())
        }
        RunState::Cancelled => {
            warn!("Cancelled");
            Ok(())
        }
        RunState::Paused => {
            warn!("Paused; run again to resume the queue");
            Ok(())
        }
        RunState::Error(message) => Err(anyhow::anyhow!(message)),
        other => {
            debug!(state = %other, "run ended");
            Ok(())
        }
    }
}

fn build_progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Renders worker events until the run ends, returning the terminal state.
async fn render_events(
    events: &mut broadcast::Receiver<WorkerEvent>,
    progress: &ProgressBar,
) -> RunState {
    loop {
        match events.recv().await {
            Ok(WorkerEvent::ItemStarted {
                title,
                kind,
                remaining,
            }) => {
                progress.set_position(0);
                progress.set_message(format!("{title} [{kind}] ({remaining} remaining)"));
            }
            Ok(WorkerEvent::Progress(update)) => {
                if update.phase == ProgressPhase::Finished {
                    progress.set_position(100);
                } else {
                    progress.set_position((update.fraction * 100.0) as u64);
                }
                let mut labels = Vec::new();
                if let Some(speed) = update.speed_label {
                    labels.push(speed);
                }
                if let Some(eta) = update.eta_label {
                    labels.push(format!("ETA {eta}"));
                }
                if !labels.is_empty() {
                    progress.set_message(labels.join(" | "));
                }
            }
            Ok(WorkerEvent::ItemFinished { title }) => {
                progress.println(format!("Finished: {title}"));
            }
            Ok(WorkerEvent::RunEnded { state }) => return state,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "progress events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return RunState::Idle,
        }
    }
}

//! Progress contract between a running fetch and its observers.
//!
//! The worker fans events out over a broadcast channel; presentation layers
//! subscribe and render. The core never references widget state: it emits
//! plain data (fraction, preformatted speed/ETA labels, titles, remaining
//! counts, terminal states) and nothing else.

use tokio::sync::broadcast;

use crate::queue::ItemKind;
use crate::worker::RunState;

/// Transfer phase reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Bytes are moving.
    Downloading,
    /// The current item's transfer is complete.
    Finished,
}

/// One fine-grained progress sample for the in-flight item.
///
/// Samples are idempotent overwrites: a late or repeated sample replaces the
/// previous rendering rather than being an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Current transfer phase.
    pub phase: ProgressPhase,
    /// Completed fraction, clamped into `[0.0, 1.0]`.
    pub fraction: f64,
    /// Preformatted transfer rate, e.g. `1.25 MB/s`.
    pub speed_label: Option<String>,
    /// Preformatted time remaining, e.g. `3:05`.
    pub eta_label: Option<String>,
}

/// Events emitted by the worker for presentation layers.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A queue item is about to be fetched.
    ItemStarted {
        /// Display title, falling back to the raw URL when metadata failed.
        title: String,
        /// Single file or expanded collection.
        kind: ItemKind,
        /// Pending item count, the started item included.
        remaining: usize,
    },
    /// Fine-grained progress for the in-flight item.
    Progress(ProgressUpdate),
    /// The head item finished successfully and was popped.
    ItemFinished {
        /// Display title of the finished item.
        title: String,
    },
    /// The run loop ended; `state` carries the terminal run state.
    RunEnded {
        /// Terminal state, including the message for `RunState::Error`.
        state: RunState,
    },
}

/// Sink for structured progress events.
///
/// The sole channel between a running fetch and the rest of the system. Raw
/// engine values are normalized here: fractions are clamped into `[0, 1]`
/// regardless of what the engine reported.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: broadcast::Sender<WorkerEvent>,
}

impl ProgressReporter {
    /// Creates a reporter emitting into the given channel.
    #[must_use]
    pub fn new(tx: broadcast::Sender<WorkerEvent>) -> Self {
        Self { tx }
    }

    /// Emits a downloading sample from raw engine measurements.
    pub fn downloading(&self, fraction: f64, speed_bps: Option<f64>, eta_secs: Option<u64>) {
        self.emit(ProgressUpdate {
            phase: ProgressPhase::Downloading,
            fraction,
            speed_label: speed_bps.map(format_speed),
            eta_label: eta_secs.map(format_clock),
        });
    }

    /// Emits the terminal sample for the current item.
    pub fn finished(&self) {
        self.emit(ProgressUpdate {
            phase: ProgressPhase::Finished,
            fraction: 1.0,
            speed_label: None,
            eta_label: Some(format_clock(0)),
        });
    }

    /// Emits an already-built update, clamping the fraction.
    ///
    /// A missing subscriber is not an error: events are fire-and-forget.
    pub fn emit(&self, mut update: ProgressUpdate) {
        update.fraction = clamp_fraction(update.fraction);
        let _ = self.tx.send(WorkerEvent::Progress(update));
    }
}

/// Clamps a raw engine-reported fraction into `[0.0, 1.0]`.
///
/// Engines may re-report or overshoot; consumers always observe a valid
/// fraction. NaN degrades to zero.
#[must_use]
pub fn clamp_fraction(raw: f64) -> f64 {
    if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) }
}

/// Formats a transfer rate for the status line.
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;

    if bytes_per_sec > MIB {
        format!("{:.2} MB/s", bytes_per_sec / MIB)
    } else if bytes_per_sec > KIB {
        format!("{:.2} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{bytes_per_sec:.0} B/s")
    }
}

/// Formats seconds as `h:mm:ss`, or `m:ss` under an hour.
#[must_use]
pub fn format_clock(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_fraction_bounds_raw_values() {
        assert_eq!(clamp_fraction(1.07), 1.0);
        assert_eq!(clamp_fraction(-0.01), 0.0);
        assert_eq!(clamp_fraction(0.42), 0.42);
        assert_eq!(clamp_fraction(f64::NAN), 0.0);
    }

    #[test]
    fn test_format_speed_thresholds() {
        assert_eq!(format_speed(512.0), "512 B/s");
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
        assert_eq!(format_speed(3.5 * 1024.0 * 1024.0), "3.50 MB/s");
    }

    #[test]
    fn test_format_clock_styles() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(125), "2:05");
        assert_eq!(format_clock(3661), "1:01:01");
    }

    #[tokio::test]
    async fn test_reporter_clamps_raw_engine_fractions() {
        let (tx, mut rx) = broadcast::channel(8);
        let reporter = ProgressReporter::new(tx);

        reporter.downloading(1.07, None, None);
        reporter.downloading(-0.01, Some(2048.0), Some(65));

        let WorkerEvent::Progress(first) = rx.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        assert_eq!(first.fraction, 1.0);

        let WorkerEvent::Progress(second) = rx.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        assert_eq!(second.fraction, 0.0);
        assert_eq!(second.speed_label.as_deref(), Some("2.00 KB/s"));
        assert_eq!(second.eta_label.as_deref(), Some("1:05"));
    }

    #[tokio::test]
    async fn test_finished_sample_is_complete() {
        let (tx, mut rx) = broadcast::channel(8);
        let reporter = ProgressReporter::new(tx);

        reporter.finished();

        let WorkerEvent::Progress(update) = rx.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        assert_eq!(update.phase, ProgressPhase::Finished);
        assert_eq!(update.fraction, 1.0);
        assert_eq!(update.eta_label.as_deref(), Some("0:00"));
    }

    #[test]
    fn test_emit_without_subscriber_does_not_panic() {
        let (tx, _) = broadcast::channel(8);
        let reporter = ProgressReporter::new(tx);
        reporter.downloading(0.5, None, None);
    }
}

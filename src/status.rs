//! Status pipeline.
//!
//! A bounded, one-way stream of progress lines written by the orchestrator
//! and drained by a single observer, plus a one-shot completion signal.
//!
//! The completion signal is ordered after every line of the run by
//! construction: [`CompletionSignal::fire`] takes the run's [`StatusSink`]
//! by value and drops it before sending the outcome, and the receiver only
//! yields the outcome once the line channel is closed and empty.

use chrono::{DateTime, Local};
use log::debug;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

use crate::control::ErrorKind;
use crate::orchestrator::RunOutcome;

/// Default number of buffered lines before the producer waits on the observer
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Error,
}

/// One progress line
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub level: StatusLevel,
    pub message: String,
    /// Machine-readable tag, set on error lines
    pub kind: Option<ErrorKind>,
    pub at: DateTime<Local>,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.level, self.kind) {
            (StatusLevel::Error, Some(kind)) => write!(f, "error[{}]: {}", kind, self.message),
            (StatusLevel::Error, None) => write!(f, "error: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Writing end of the pipeline.
///
/// Not `Clone`: the receiver reports completion only once the line channel
/// closes, and [`CompletionSignal::fire`] closes it by dropping this sink.
#[derive(Debug)]
pub struct StatusSink {
    tx: mpsc::Sender<StatusLine>,
}

impl StatusSink {
    pub async fn info(&self, message: impl Into<String>) {
        self.emit(StatusLevel::Info, message.into(), None).await;
    }

    pub async fn success(&self, message: impl Into<String>) {
        self.emit(StatusLevel::Success, message.into(), None).await;
    }

    /// Reports a failure as `<context>: <err>`, tagged with `kind`
    pub async fn error(&self, kind: ErrorKind, context: impl fmt::Display, err: impl fmt::Display) {
        self.emit(StatusLevel::Error, format!("{}: {}", context, err), Some(kind))
            .await;
    }

    async fn emit(&self, level: StatusLevel, message: String, kind: Option<ErrorKind>) {
        debug!(target: "lndev::status", "{:?} {}", level, message);
        let line = StatusLine {
            level,
            message,
            kind,
            at: Local::now(),
        };
        if self.tx.send(line).await.is_err() {
            debug!(target: "lndev::status", "observer has gone away, line dropped");
        }
    }
}

/// One-shot completion indicator for a run
#[derive(Debug)]
pub struct CompletionSignal {
    tx: oneshot::Sender<RunOutcome>,
}

impl CompletionSignal {
    /// Closes the run's sink and publishes its outcome.
    ///
    /// Consuming both halves guarantees the signal fires once and that no
    /// line from `sink` can follow it.
    pub fn fire(self, sink: StatusSink, outcome: RunOutcome) {
        drop(sink);
        if self.tx.send(outcome).is_err() {
            debug!(target: "lndev::status", "observer has gone away, completion dropped");
        }
    }
}

/// What the observer sees, in order
#[derive(Debug)]
pub enum StatusUpdate {
    Line(StatusLine),
    /// Emitted once, after the last line
    Complete(RunOutcome),
}

/// Reading end of the pipeline, owned by the single observer
#[derive(Debug)]
pub struct StatusReceiver {
    lines: mpsc::Receiver<StatusLine>,
    done: Option<oneshot::Receiver<RunOutcome>>,
}

impl StatusReceiver {
    /// Next update, or `None` once the completion has been delivered.
    ///
    /// Also returns `None` if the producer went away without firing.
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        if let Some(line) = self.lines.recv().await {
            return Some(StatusUpdate::Line(line));
        }
        let done = self.done.take()?;
        done.await.ok().map(StatusUpdate::Complete)
    }

    /// Collects every remaining line and the outcome
    pub async fn drain(mut self) -> (Vec<StatusLine>, Option<RunOutcome>) {
        let mut lines = Vec::new();
        let mut outcome = None;
        while let Some(update) = self.recv().await {
            match update {
                StatusUpdate::Line(line) => lines.push(line),
                StatusUpdate::Complete(o) => outcome = Some(o),
            }
        }
        (lines, outcome)
    }
}

/// Creates a pipeline buffering at most `capacity` lines
pub fn pipeline(capacity: usize) -> (StatusSink, CompletionSignal, StatusReceiver) {
    let (tx, lines) = mpsc::channel(capacity.max(1));
    let (done_tx, done) = oneshot::channel();
    (
        StatusSink { tx },
        CompletionSignal { tx: done_tx },
        StatusReceiver {
            lines,
            done: Some(done),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Stage;

    #[tokio::test]
    async fn test_completion_after_all_lines_in_order() {
        let (sink, done, rx) = pipeline(2);

        let producer = tokio::spawn(async move {
            for i in 0..10 {
                sink.info(format!("line {}", i)).await;
            }
            sink.error(ErrorKind::ChannelOpen, "Alice -> Bob", "insufficient funds")
                .await;
            done.fire(sink, RunOutcome::empty(Stage::Complete));
        });

        let (lines, outcome) = rx.drain().await;
        producer.await.unwrap();

        assert_eq!(lines.len(), 11);
        for (i, line) in lines.iter().take(10).enumerate() {
            assert_eq!(line.message, format!("line {}", i));
            assert_eq!(line.level, StatusLevel::Info);
        }
        assert_eq!(lines[10].kind, Some(ErrorKind::ChannelOpen));
        assert_eq!(
            lines[10].to_string(),
            "error[channel-open]: Alice -> Bob: insufficient funds"
        );
        assert_eq!(outcome.unwrap().stage, Stage::Complete);
    }

    #[tokio::test]
    async fn test_completion_observable_while_producer_lives_on() {
        let (sink, done, rx) = pipeline(4);
        let (_hold, parked) = oneshot::channel::<()>();

        let producer = tokio::spawn(async move {
            sink.info("launching").await;
            done.fire(sink, RunOutcome::empty(Stage::Failed));
            // The task outlives the run; nothing it still owns can hold the stream open
            let _ = parked.await;
        });

        let (lines, outcome) = tokio::time::timeout(std::time::Duration::from_secs(5), rx.drain())
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(outcome.unwrap().stage, Stage::Failed);
        producer.abort();
    }

    #[tokio::test]
    async fn test_completion_is_delivered_once() {
        let (sink, done, mut rx) = pipeline(4);
        sink.success("done").await;
        done.fire(sink, RunOutcome::empty(Stage::Complete));

        assert!(matches!(rx.recv().await, Some(StatusUpdate::Line(_))));
        assert!(matches!(rx.recv().await, Some(StatusUpdate::Complete(_))));
        assert!(rx.recv().await.is_none());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_dropped_without_firing() {
        let (sink, done, rx) = pipeline(4);
        sink.info("partial").await;
        drop(sink);
        drop(done);

        let (lines, outcome) = rx.drain().await;
        assert_eq!(lines.len(), 1);
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_sink_survives_closed_observer() {
        let (sink, done, rx) = pipeline(1);
        drop(rx);
        sink.info("nobody listening").await;
        done.fire(sink, RunOutcome::empty(Stage::Failed));
    }
}

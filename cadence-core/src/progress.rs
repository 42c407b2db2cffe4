//! Progress reporting
//!
//! Reporters are fire-and-forget: nothing they do can fail an operation.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives progress ticks from copy and replay
pub trait ProgressReporter: Send + Sync {
    /// A run of `total` items is starting
    fn start(&self, label: &str, total: usize);

    /// One item is done
    fn tick(&self);

    /// The run ended (successfully or not)
    fn finish(&self);
}

/// Discards all progress
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&self, _label: &str, _total: usize) {}
    fn tick(&self) {}
    fn finish(&self) {}
}

/// Logs a line every `every` ticks and at the end
#[derive(Debug)]
pub struct LogProgress {
    every: usize,
    total: AtomicUsize,
    done: AtomicUsize,
    label: std::sync::Mutex<String>,
}

impl LogProgress {
    /// Log every `every` ticks; 0 logs only start and finish
    pub fn new(every: usize) -> Self {
        Self {
            every,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            label: std::sync::Mutex::new(String::new()),
        }
    }

    fn label(&self) -> String {
        self.label.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for LogProgress {
    fn start(&self, label: &str, total: usize) {
        if let Ok(mut current) = self.label.lock() {
            *current = label.to_string();
        }
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        tracing::info!(collection = %label, total, "Starting");
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        if self.every > 0 && done % self.every == 0 && done < total {
            let percent = done * 100 / total.max(1);
            tracing::info!(collection = %self.label(), done, total, percent, "Progress");
        }
    }

    fn finish(&self) {
        tracing::info!(
            collection = %self.label(),
            done = self.done.load(Ordering::SeqCst),
            total = self.total.load(Ordering::SeqCst),
            "Finished"
        );
    }
}

/// Counts ticks; useful for tests and summaries
#[derive(Debug, Default)]
pub struct CountingProgress {
    started: AtomicUsize,
    ticks: AtomicUsize,
    finished: AtomicUsize,
}

impl CountingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks received so far
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Runs started
    pub fn starts(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Runs finished
    pub fn finishes(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for CountingProgress {
    fn start(&self, _label: &str, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

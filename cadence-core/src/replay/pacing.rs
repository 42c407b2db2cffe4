//! Cadence reconstruction
//!
//! The wait before each event is the gap between its original recording
//! time and the previous event's original recording time. Gaps are taken
//! from the source records only, never from rewritten copies.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::event::TelemetryEvent;

/// Tracks the previous recording time during a replay
#[derive(Debug, Default, Clone)]
pub struct Pacer {
    last_recording: Option<DateTime<Utc>>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before emitting an event recorded at `recording_time`.
    ///
    /// Zero for the first event. Out-of-order input yields zero rather than
    /// a negative wait.
    pub fn gap_before(&self, recording_time: DateTime<Utc>) -> Duration {
        match self.last_recording {
            None => Duration::ZERO,
            Some(last) => (recording_time - last).to_std().unwrap_or(Duration::ZERO),
        }
    }

    /// Record that the event at `recording_time` has been reached
    pub fn advance(&mut self, recording_time: DateTime<Utc>) {
        self.last_recording = Some(recording_time);
    }

    /// The full wait schedule for an ordered sequence
    pub fn schedule(events: &[TelemetryEvent]) -> Vec<Duration> {
        let mut pacer = Pacer::new();
        events
            .iter()
            .map(|event| {
                let gap = pacer.gap_before(event.recording_time);
                pacer.advance(event.recording_time);
                gap
            })
            .collect()
    }
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration passed
    Elapsed,
    /// The cancellation token fired first
    Cancelled,
}

/// Sleep for `duration` unless `cancel` fires first. A zero duration does
/// not sleep but still reports a pending cancellation.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
    if cancel.is_cancelled() {
        return WaitOutcome::Cancelled;
    }
    if duration.is_zero() {
        return WaitOutcome::Elapsed;
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_first_wait_is_zero() {
        let pacer = Pacer::new();
        assert_eq!(pacer.gap_before(ms(1_000)), Duration::ZERO);
    }

    #[test]
    fn test_schedule_uses_recording_gaps() {
        let events = vec![
            TelemetryEvent::new(ms(1_000), ms(900)),
            TelemetryEvent::new(ms(4_000), ms(3_500)),
            TelemetryEvent::new(ms(4_000), ms(3_900)),
            TelemetryEvent::new(ms(4_250), ms(100)),
        ];

        let schedule = Pacer::schedule(&events);
        assert_eq!(
            schedule,
            vec![
                Duration::ZERO,
                Duration::from_millis(3_000),
                Duration::ZERO,
                Duration::from_millis(250),
            ]
        );
    }

    #[test]
    fn test_backwards_recording_time_waits_zero() {
        let mut pacer = Pacer::new();
        pacer.advance(ms(5_000));
        assert_eq!(pacer.gap_before(ms(4_000)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_elapses() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let outcome = pause(Duration::from_secs(3), &cancel).await;

        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = pause(Duration::from_secs(3_600), &cancel).await;

        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_pause_reports_pending_cancel() {
        let cancel = CancellationToken::new();
        assert_eq!(pause(Duration::ZERO, &cancel).await, WaitOutcome::Elapsed);
        cancel.cancel();
        assert_eq!(pause(Duration::ZERO, &cancel).await, WaitOutcome::Cancelled);
    }
}

//! Timestamp rewriting
//!
//! A replayed event keeps its original reporting lag but is anchored to the
//! current wall clock: `measurement' = now - (recording - measurement)`.

use crate::clock::Clock;
use crate::event::{Identity, TelemetryEvent};

/// Build the copy of `original` that is written during replay.
///
/// The source record is never modified. The lag is read from it before any
/// field of the copy changes, and `now` is read from `clock` last.
pub fn rewrite_for_replay(original: &TelemetryEvent, identity: &Identity, clock: &dyn Clock) -> TelemetryEvent {
    let mut replayed = original.clone();

    // replay never synthesizes this signal
    replayed.event_start = None;
    replayed.identity = Some(identity.clone());

    let lag = original.lag();
    let now = clock.now();
    replayed.measurement_time = now - lag;

    replayed
}

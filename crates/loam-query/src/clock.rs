//! Process-wide monotonic timestamp generator.
//!
//! Timestamps are `(seconds, ordinal)` pairs. The ordinal restarts at 1 each
//! time the wall-clock second advances and otherwise increments, so two calls
//! never return the same value and later calls always compare greater.

use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bson::Timestamp;

struct State {
    seconds: u32,
    ordinal: u32,
    frozen: Option<u32>,
}

static CLOCK: Mutex<State> = Mutex::new(State {
    seconds: 0,
    ordinal: 0,
    frozen: None,
});

/// Generate the next timestamp.
pub fn now() -> Timestamp {
    let mut state = CLOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let seconds = state.frozen.unwrap_or_else(wall_seconds);

    if seconds > state.seconds {
        state.seconds = seconds;
        state.ordinal = 1;
    } else if state.ordinal == u32::MAX {
        state.seconds += 1;
        state.ordinal = 1;
    } else {
        state.ordinal += 1;
    }

    Timestamp {
        time: state.seconds,
        increment: state.ordinal,
    }
}

/// Freeze the seconds component. Subsequent timestamps only tick the ordinal.
pub fn freeze(seconds: u32) {
    let mut state = CLOCK.lock().unwrap_or_else(PoisonError::into_inner);
    state.frozen = Some(seconds);
}

/// Return to wall-clock time and forget the last issued timestamp.
pub fn reset() {
    let mut state = CLOCK.lock().unwrap_or_else(PoisonError::into_inner);
    state.seconds = 0;
    state.ordinal = 0;
    state.frozen = None;
}

fn wall_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let mut last = now();
        for _ in 0..1000 {
            let next = now();
            assert!((next.time, next.increment) > (last.time, last.increment));
            last = next;
        }
    }
}

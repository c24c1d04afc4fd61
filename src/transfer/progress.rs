//! Serialized byte-progress accounting for streaming transfers.

use std::sync::Mutex;

/// Observer invoked with `(transferred, total)` as a transfer advances.
pub type ProgressObserver<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

struct CounterState {
    seen: u64,
    finished: bool,
}

/// Cumulative byte counter shared between the caller and the transfer's
/// internal streaming context. Updates are serialized through a mutex so an
/// observer never sees interleaved partial state, and the final report is
/// idempotent: once finished, repeated calls are dropped.
pub struct ProgressCounter<'a> {
    total: u64,
    state: Mutex<CounterState>,
    observer: Option<ProgressObserver<'a>>,
}

impl<'a> ProgressCounter<'a> {
    pub fn new(total: u64, observer: Option<ProgressObserver<'a>>) -> Self {
        Self {
            total,
            state: Mutex::new(CounterState {
                seen: 0,
                finished: false,
            }),
            observer,
        }
    }

    /// Records the cumulative byte count. Regressions are ignored; reaching
    /// the total marks the counter finished.
    pub fn advance_to(&self, cumulative: u64) {
        let mut state = self.state.lock().unwrap();
        if state.finished || cumulative <= state.seen {
            return;
        }
        state.seen = cumulative;
        if self.total > 0 && state.seen >= self.total {
            state.finished = true;
        }
        let seen = state.seen;
        drop(state);

        if let Some(observer) = self.observer {
            observer(seen, self.total);
        }
    }

    /// Forces the final report. Safe to call after `advance_to` already
    /// reached the total.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        if state.finished && state.seen >= self.total {
            return;
        }
        state.seen = self.total;
        state.finished = true;
        drop(state);

        if let Some(observer) = self.observer {
            observer(self.total, self.total);
        }
    }

    pub fn transferred(&self) -> u64 {
        self.state.lock().unwrap().seen
    }
}

//! Deadline queue for presentation timers owned by a session.

use crate::types::RowId;
use std::time::Instant;

/// What a timer does when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Drop the highlight of a prepended row.
    ClearHighlight(RowId),
    /// Hide the toast with this sequence number.
    ClearToast(u64),
}

#[derive(Debug)]
struct Timer {
    at: Instant,
    seq: u64,
    kind: TimerKind,
}

/// Pending timers, fired in deadline order (ties in scheduling order).
#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: Vec<Timer>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Timer { at, seq, kind });
    }

    /// Drop every pending timer matching `pred`.
    pub fn cancel_where<F>(&mut self, pred: F)
    where
        F: Fn(&TimerKind) -> bool,
    {
        self.timers.retain(|t| !pred(&t.kind));
    }

    /// Remove and return every timer due at `now`.
    pub fn due(&mut self, now: Instant) -> Vec<TimerKind> {
        let (mut fired, pending): (Vec<Timer>, Vec<Timer>) =
            self.timers.drain(..).partition(|t| t.at <= now);
        self.timers = pending;
        fired.sort_by_key(|t| (t.at, t.seq));
        fired.into_iter().map(|t| t.kind).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.at).min()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

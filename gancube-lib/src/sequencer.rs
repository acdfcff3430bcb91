//! Move-sequence reconstruction over the cube's circular mod-256 serial.
//!
//! Notifications are lossy and can arrive out of order. Moves whose serial
//! is the immediate successor of the cursor are emitted at once; anything
//! else is parked in a bounded FIFO and a single history request is issued
//! to fill the gap. Eviction drains the FIFO head for as long as it stays
//! in sequence.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::message::CubeMove;

/// Pending-move buffer capacity; the oldest element is dropped on overflow.
pub const BUFFER_CAPACITY: usize = 100;

/// Idle time after which the watchdog asks for recent history.
pub const WATCHDOG_IDLE: Duration = Duration::from_secs(5);

/// How many moves the watchdog requests at a time.
pub const WATCHDOG_HISTORY_COUNT: u8 = 10;

/// A request for the cube to replay part of its move history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    pub start_serial: u8,
    pub count: u8,
}

/// Result of feeding one move into the sequencer.
#[derive(Debug, Default)]
pub struct SequencerOutput {
    /// Moves now in order, ready for dispatch.
    pub emitted: Vec<CubeMove>,
    /// At most one gap-recovery request.
    pub request: Option<HistoryRequest>,
}

/// Check whether a circular mod-256 serial lies in the range (start, end).
/// The range is open on both sides unless closed explicitly.
pub fn serial_in_range(start: u8, end: u8, serial: u8, closed_start: bool, closed_end: bool) -> bool {
    if closed_start && serial == start {
        return true;
    }
    if closed_end && serial == end {
        return true;
    }
    if start <= end {
        serial > start && serial < end
    } else {
        serial > start || serial < end
    }
}

pub struct MoveSequencer {
    /// Serial of the last move accepted and emitted, if any.
    cursor: Option<u8>,
    last_accept: Option<Instant>,
    last_watchdog: Option<Instant>,
    pending: VecDeque<CubeMove>,
    /// Expected serial a history request is already outstanding for.
    requested_for: Option<u8>,
}

impl Default for MoveSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveSequencer {
    pub fn new() -> Self {
        Self {
            cursor: None,
            last_accept: None,
            last_watchdog: None,
            pending: VecDeque::with_capacity(BUFFER_CAPACITY),
            requested_for: None,
        }
    }

    /// Seed the cursor from a facelets frame before any move was accepted.
    /// The facelets serial names the last move already applied to the
    /// reported state.
    pub fn sync_cursor(&mut self, serial: u8) {
        if self.cursor.is_none() {
            self.cursor = Some(serial);
            self.last_accept = Some(Instant::now());
        }
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Feed one freshly decoded move.
    pub fn push(&mut self, mv: CubeMove) -> SequencerOutput {
        let mut out = SequencerOutput::default();

        let Some(cursor) = self.cursor else {
            // First move of the session establishes the cursor.
            self.accept(&mv);
            out.emitted.push(mv);
            return out;
        };

        let expected = cursor.wrapping_add(1);
        if mv.serial == expected {
            self.accept(&mv);
            out.emitted.push(mv);
        } else {
            debug!(
                serial = mv.serial,
                expected, "out-of-order move buffered"
            );
            if self.pending.len() == BUFFER_CAPACITY {
                self.pending.pop_front();
            }
            self.pending.push_back(mv);
        }

        self.evict(&mut out);
        out
    }

    fn accept(&mut self, mv: &CubeMove) {
        self.cursor = Some(mv.serial);
        self.last_accept = Some(Instant::now());
        if self.requested_for == Some(mv.serial) {
            self.requested_for = None;
        }
    }

    /// Pop and emit from the FIFO head while it matches the expected next
    /// serial; at the first gap, issue one history request for the gap and
    /// stop.
    fn evict(&mut self, out: &mut SequencerOutput) {
        while let Some(head_serial) = self.pending.front().map(|m| m.serial) {
            let cursor = self.cursor.unwrap_or(head_serial.wrapping_sub(1));
            let expected = cursor.wrapping_add(1);
            if head_serial == expected {
                if let Some(mv) = self.pending.pop_front() {
                    self.accept(&mv);
                    out.emitted.push(mv);
                }
                continue;
            }
            if serial_in_range(cursor, head_serial, expected, false, false)
                && self.requested_for != Some(expected)
            {
                let count = head_serial.wrapping_sub(expected);
                debug!(start = expected, count, "requesting move history for gap");
                out.request = Some(HistoryRequest {
                    start_serial: expected,
                    count,
                });
                self.requested_for = Some(expected);
            }
            break;
        }
    }

    /// Ask for recent history when no move has been accepted for a while;
    /// fires at most once per idle window.
    pub fn watchdog(&mut self, now: Instant) -> Option<HistoryRequest> {
        let cursor = self.cursor?;
        let last_accept = self.last_accept?;
        if now.duration_since(last_accept) <= WATCHDOG_IDLE {
            return None;
        }
        if let Some(last) = self.last_watchdog {
            if now.duration_since(last) <= WATCHDOG_IDLE {
                return None;
            }
        }
        self.last_watchdog = Some(now);
        Some(HistoryRequest {
            start_serial: cursor.wrapping_add(1),
            count: WATCHDOG_HISTORY_COUNT,
        })
    }
}

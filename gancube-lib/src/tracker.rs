//! Detection of the moment the cube becomes solved.
//!
//! The tracker watches facelets reports and fires when a report shows a
//! solved cube and the previous accepted report did not; re-firing needs
//! an intervening non-solved report. A short guard window after connecting
//! swallows the solved state the cube may report before the user has
//! touched it, so a cube that was left solved on the desk does not count
//! as a fresh solve.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::message::{CubeMove, Direction, Face};

/// Default suppression window after connecting.
pub const DEFAULT_GUARD_WINDOW: Duration = Duration::from_millis(500);

/// How many recent moves the fallback heuristic looks at.
const HEURISTIC_DEPTH: usize = 4;

pub struct SolvedTracker {
    /// Solved flag from the most recent accepted facelets report.
    last_solved: Option<bool>,
    connected_at: Option<Instant>,
    guard_window: Duration,
    /// Opt-in fallback for cubes that never deliver facelets frames.
    move_heuristic: bool,
    seen_facelets: bool,
    recent: VecDeque<(Face, Direction)>,
}

impl SolvedTracker {
    pub fn new(guard_window: Duration, move_heuristic: bool) -> Self {
        Self {
            last_solved: None,
            connected_at: None,
            guard_window,
            move_heuristic,
            seen_facelets: false,
            recent: VecDeque::with_capacity(HEURISTIC_DEPTH),
        }
    }

    /// Start a fresh observation session.
    pub fn on_connected(&mut self) {
        self.on_connected_at(Instant::now());
    }

    fn on_connected_at(&mut self, now: Instant) {
        self.connected_at = Some(now);
        self.last_solved = None;
        self.seen_facelets = false;
        self.recent.clear();
    }

    /// Forget everything observed so far, as after a state reset command.
    pub fn reset(&mut self) {
        self.last_solved = None;
        self.recent.clear();
    }

    /// Feed the solved flag of a facelets report. Returns true when the
    /// cube is solved and the previous accepted report was not already
    /// solved. A cube whose first accepted report is solved fires right
    /// away; a solve finished while the session was still connecting is
    /// therefore not lost.
    ///
    /// During the guard window the report is dropped entirely so the
    /// solve can still fire later; an active alarm bypasses the guard,
    /// since the user is demonstrably awake and handling the cube.
    pub fn observe_facelets(&mut self, solved: bool, alarm_active: bool) -> bool {
        self.observe_facelets_at(Instant::now(), solved, alarm_active)
    }

    fn observe_facelets_at(&mut self, now: Instant, solved: bool, alarm_active: bool) -> bool {
        self.seen_facelets = true;
        if !alarm_active && self.in_guard_window(now) {
            debug!(solved, "facelets report suppressed by connect guard");
            return false;
        }
        let fired = solved && self.last_solved != Some(true);
        self.last_solved = Some(solved);
        fired
    }

    fn in_guard_window(&self, now: Instant) -> bool {
        match self.connected_at {
            Some(at) => now.duration_since(at) < self.guard_window,
            None => false,
        }
    }

    /// Fallback solve detection from the move stream alone. Only consulted
    /// when the heuristic is enabled and no facelets frame has ever arrived
    /// in this session. Returns true when the last two moves undo each
    /// other on the same face, or the last four moves are identical (a
    /// full-turn return), both common "I'm done" gestures.
    pub fn observe_move(&mut self, mv: &CubeMove) -> bool {
        if !self.move_heuristic || self.seen_facelets {
            return false;
        }
        if self.recent.len() == HEURISTIC_DEPTH {
            self.recent.pop_front();
        }
        self.recent.push_back((mv.face, mv.direction));

        let undo_pair = match (self.recent.len().checked_sub(2), self.recent.back()) {
            (Some(prev), Some(last)) => {
                let prev = self.recent[prev];
                prev.0 == last.0 && prev.1 != last.1
            }
            _ => false,
        };
        let quad = self.recent.len() == HEURISTIC_DEPTH
            && self.recent.iter().all(|m| *m == self.recent[0]);

        if undo_pair || quad {
            debug!(face = %mv.face, "move heuristic signalled solve");
            self.recent.clear();
            return true;
        }
        false
    }
}

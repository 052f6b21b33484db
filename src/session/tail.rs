//! Follow-mode state machine and the session cursor.
//!
//! ```text
//! Scanning --scan complete--> Tailing (can_tail) | Idle
//! Idle <--set_tail / scroll away--> Tailing
//! any --close--> Closed
//! ```
//!
//! Transitions return the events they cause; the caller publishes them after
//! releasing the controller's lock.

use crate::error::{LogtailError, Result};
use crate::session::events::SessionEvent;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TailState {
    Scanning,
    Idle,
    Tailing,
    Closed,
}

impl fmt::Display for TailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TailState::Scanning => "scanning",
            TailState::Idle => "idle",
            TailState::Tailing => "tailing",
            TailState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The cursor as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerState {
    pub current_line: Option<u64>,
    pub tail_enabled: bool,
}

#[derive(Debug)]
pub struct TailController {
    state: TailState,
    can_tail: bool,
    /// Follow preference applied when scanning completes
    follow_after_scan: bool,
    current_line: Option<u64>,
    /// Lines appended while not following
    pending: u64,
}

impl TailController {
    pub fn new(can_tail: bool) -> Self {
        Self {
            state: TailState::Scanning,
            can_tail,
            follow_after_scan: can_tail,
            current_line: None,
            pending: 0,
        }
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    pub fn pointer(&self) -> PointerState {
        PointerState {
            current_line: self.current_line,
            tail_enabled: self.state == TailState::Tailing,
        }
    }

    /// Lines appended since following was last active
    pub fn pending_lines(&self) -> u64 {
        self.pending
    }

    /// Leave `Scanning` once the merged index holds `total` lines
    pub fn on_scan_complete(&mut self, total: u64) -> Vec<SessionEvent> {
        if self.state != TailState::Scanning {
            return Vec::new();
        }
        let mut events = Vec::new();
        if self.can_tail && self.follow_after_scan {
            self.state = TailState::Tailing;
            self.move_to_end(total, &mut events);
        } else {
            self.state = TailState::Idle;
        }
        events.push(SessionEvent::TailChanged { state: self.state });
        events
    }

    /// Explicit follow request.
    ///
    /// Enabling fails with `TailUnavailable` on a session that cannot tail.
    /// While scanning the request is remembered and applied on completion.
    pub fn set_tail(&mut self, enable: bool, total: u64) -> Result<Vec<SessionEvent>> {
        if self.state == TailState::Closed {
            return Err(LogtailError::SessionClosed);
        }
        if enable && !self.can_tail {
            return Err(LogtailError::TailUnavailable);
        }

        let mut events = Vec::new();
        match (self.state, enable) {
            (TailState::Scanning, _) => self.follow_after_scan = enable,
            (TailState::Idle, true) => {
                self.state = TailState::Tailing;
                self.pending = 0;
                self.move_to_end(total, &mut events);
                events.push(SessionEvent::TailChanged { state: self.state });
            }
            (TailState::Tailing, false) => {
                self.state = TailState::Idle;
                events.push(SessionEvent::TailChanged { state: self.state });
            }
            _ => {}
        }
        Ok(events)
    }

    /// `count` new lines were appended, bringing the index to `total`
    pub fn on_pending(&mut self, count: u64, total: u64) -> Vec<SessionEvent> {
        if count == 0 {
            return Vec::new();
        }
        match self.state {
            TailState::Tailing => {
                let mut events = vec![SessionEvent::PendingLines { count }];
                self.move_to_end(total, &mut events);
                events
            }
            TailState::Idle | TailState::Scanning => {
                self.pending += count;
                Vec::new()
            }
            TailState::Closed => Vec::new(),
        }
    }

    /// Place the cursor on `line`. Moving off the last line pauses following.
    pub fn goto(&mut self, line: u64, total: u64) -> Result<Vec<SessionEvent>> {
        if self.state == TailState::Closed {
            return Err(LogtailError::SessionClosed);
        }
        if line >= total {
            return Err(LogtailError::LineOutOfRange { line, len: total });
        }

        let mut events = Vec::new();
        if self.current_line != Some(line) {
            self.current_line = Some(line);
            events.push(SessionEvent::CursorMoved { line: Some(line) });
        }
        if self.state == TailState::Tailing && line + 1 != total {
            self.state = TailState::Idle;
            events.push(SessionEvent::TailChanged { state: self.state });
        }
        Ok(events)
    }

    pub fn clear_pointer(&mut self) -> Vec<SessionEvent> {
        if self.current_line.take().is_some() {
            vec![SessionEvent::CursorMoved { line: None }]
        } else {
            Vec::new()
        }
    }

    /// Keep the cursor inside an index that shrank to `total` lines
    pub fn clamp(&mut self, total: u64) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match self.current_line {
            Some(line) if line >= total => {
                self.current_line = total.checked_sub(1);
                events.push(SessionEvent::CursorMoved {
                    line: self.current_line,
                });
            }
            _ => {}
        }
        events
    }

    pub fn close(&mut self) -> Vec<SessionEvent> {
        if self.state == TailState::Closed {
            return Vec::new();
        }
        self.state = TailState::Closed;
        vec![SessionEvent::TailChanged { state: self.state }]
    }

    fn move_to_end(&mut self, total: u64, events: &mut Vec<SessionEvent>) {
        let last = total.checked_sub(1);
        if last.is_some() && self.current_line != last {
            self.current_line = last;
            events.push(SessionEvent::CursorMoved { line: last });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_complete_follows_when_allowed() {
        let mut tail = TailController::new(true);
        let events = tail.on_scan_complete(10);
        assert_eq!(tail.state(), TailState::Tailing);
        assert_eq!(
            events,
            vec![
                SessionEvent::CursorMoved { line: Some(9) },
                SessionEvent::TailChanged {
                    state: TailState::Tailing
                },
            ]
        );
        assert!(tail.pointer().tail_enabled);
    }

    #[test]
    fn test_scan_complete_without_tailing() {
        let mut tail = TailController::new(false);
        tail.on_scan_complete(10);
        assert_eq!(tail.state(), TailState::Idle);
        assert_eq!(tail.pointer().current_line, None);
    }

    #[test]
    fn test_tailing_tracks_new_lines() {
        let mut tail = TailController::new(true);
        tail.on_scan_complete(10);

        let events = tail.on_pending(5, 15);
        assert_eq!(
            events,
            vec![
                SessionEvent::PendingLines { count: 5 },
                SessionEvent::CursorMoved { line: Some(14) },
            ]
        );
        assert_eq!(tail.pointer().current_line, Some(14));
    }

    #[test]
    fn test_idle_accumulates_pending() {
        let mut tail = TailController::new(true);
        tail.on_scan_complete(10);
        tail.set_tail(false, 10).unwrap();

        assert!(tail.on_pending(3, 13).is_empty());
        assert!(tail.on_pending(2, 15).is_empty());
        assert_eq!(tail.pending_lines(), 5);
        assert_eq!(tail.pointer().current_line, Some(9));

        let events = tail.set_tail(true, 15).unwrap();
        assert_eq!(tail.pending_lines(), 0);
        assert_eq!(tail.pointer().current_line, Some(14));
        assert!(events.contains(&SessionEvent::TailChanged {
            state: TailState::Tailing
        }));
    }

    #[test]
    fn test_set_tail_rejected_without_capability() {
        let mut tail = TailController::new(false);
        tail.on_scan_complete(3);
        assert!(matches!(
            tail.set_tail(true, 3),
            Err(LogtailError::TailUnavailable)
        ));
        assert_eq!(tail.state(), TailState::Idle);
        // Disabling is always fine
        assert!(tail.set_tail(false, 3).unwrap().is_empty());
    }

    #[test]
    fn test_preference_during_scan() {
        let mut tail = TailController::new(true);
        assert!(tail.set_tail(false, 0).unwrap().is_empty());
        assert_eq!(tail.state(), TailState::Scanning);
        tail.on_scan_complete(4);
        assert_eq!(tail.state(), TailState::Idle);
    }

    #[test]
    fn test_scrolling_away_pauses() {
        let mut tail = TailController::new(true);
        tail.on_scan_complete(10);

        let events = tail.goto(3, 10).unwrap();
        assert_eq!(tail.state(), TailState::Idle);
        assert_eq!(
            events,
            vec![
                SessionEvent::CursorMoved { line: Some(3) },
                SessionEvent::TailChanged {
                    state: TailState::Idle
                },
            ]
        );
        assert!(matches!(
            tail.goto(10, 10),
            Err(LogtailError::LineOutOfRange { line: 10, len: 10 })
        ));
    }

    #[test]
    fn test_goto_last_line_keeps_tailing() {
        let mut tail = TailController::new(true);
        tail.on_scan_complete(10);
        assert!(tail.goto(9, 10).unwrap().is_empty());
        assert_eq!(tail.state(), TailState::Tailing);
    }

    #[test]
    fn test_clamp_and_clear() {
        let mut tail = TailController::new(false);
        tail.on_scan_complete(10);
        tail.goto(8, 10).unwrap();

        assert_eq!(
            tail.clamp(4),
            vec![SessionEvent::CursorMoved { line: Some(3) }]
        );
        assert!(tail.clamp(4).is_empty());
        assert_eq!(
            tail.clear_pointer(),
            vec![SessionEvent::CursorMoved { line: None }]
        );
        assert!(tail.clear_pointer().is_empty());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut tail = TailController::new(true);
        tail.on_scan_complete(1);
        assert_eq!(tail.close().len(), 1);
        assert!(tail.close().is_empty());
        assert!(matches!(
            tail.set_tail(true, 1),
            Err(LogtailError::SessionClosed)
        ));
        assert!(matches!(tail.goto(0, 1), Err(LogtailError::SessionClosed)));
        assert!(tail.on_pending(1, 2).is_empty());
    }
}

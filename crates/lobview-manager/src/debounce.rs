//! Publish debounce gate.
//!
//! Small explicit state machine instead of ad hoc flags, so the coalescing
//! and cancellation properties stay checkable: the first update publishes
//! immediately and opens a window; any number of updates inside the window
//! owe exactly one follow-up publish at window close; at most one follow-up
//! is ever pending.

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No window open; the next update publishes immediately.
    Idle,
    /// Window open, nothing owed.
    Open,
    /// Window open and one follow-up publish owed at close.
    OpenPending,
}

/// What the caller should do with the update that just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Publish now and arm the window timer.
    PublishNow,
    /// Coalesced into the pending follow-up; no new timer.
    Deferred,
}

#[derive(Debug)]
pub struct DebounceGate {
    state: State,
}

impl Default for DebounceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceGate {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// An update arrived.
    pub fn on_update(&mut self) -> Decision {
        match self.state {
            State::Idle => {
                self.state = State::Open;
                Decision::PublishNow
            }
            State::Open => {
                self.state = State::OpenPending;
                Decision::Deferred
            }
            State::OpenPending => Decision::Deferred,
        }
    }

    /// The window timer fired. Returns true when the owed follow-up should
    /// be published now (which re-opens the window); false means the gate
    /// went idle and the timer should be disarmed.
    pub fn on_window_closed(&mut self) -> bool {
        match self.state {
            State::Idle => false,
            State::Open => {
                self.state = State::Idle;
                false
            }
            State::OpenPending => {
                self.state = State::Open;
                true
            }
        }
    }

    /// Whether a window timer should currently be armed.
    pub fn window_armed(&self) -> bool {
        self.state != State::Idle
    }

    /// Drop any window and pending follow-up.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }
}

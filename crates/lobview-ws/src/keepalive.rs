//! Client-initiated keepalive tracking.
//!
//! Some exchanges drop sessions unless the client pings on a fixed cadence
//! below their cutoff, regardless of how busy the stream is. Pings are
//! therefore scheduled off the previous ping, never off inbound traffic;
//! inbound traffic only counts as evidence the peer is alive when deciding
//! whether an unanswered ping means the connection is dead. The session
//! loop owns one `Keepalive` exclusively, so the state here is plain
//! mutable data, no locking.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    started: Instant,
    last_ping: Option<Instant>,
    last_activity: Instant,
    waiting_for_pong: bool,
}

impl Keepalive {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            timeout,
            started: now,
            last_ping: None,
            last_activity: now,
            waiting_for_pong: false,
        }
    }

    /// Reset on (re)connection.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.started = now;
        self.last_ping = None;
        self.last_activity = now;
        self.waiting_for_pong = false;
    }

    /// Record that a ping was sent.
    pub fn record_ping(&mut self) {
        self.last_ping = Some(Instant::now());
        self.waiting_for_pong = true;
    }

    /// Record that a pong was received.
    pub fn record_pong(&mut self) {
        self.waiting_for_pong = false;
    }

    /// Record any inbound traffic; proof of life for [`Self::is_timed_out`].
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether the ping we sent went unanswered past the timeout, with no
    /// other traffic heard since either.
    pub fn is_timed_out(&self) -> bool {
        if !self.waiting_for_pong {
            return false;
        }
        match self.last_ping {
            Some(ping_at) => ping_at.elapsed() > self.timeout && self.last_activity <= ping_at,
            None => false,
        }
    }

    /// Whether a ping is due: one full interval since the previous ping (or
    /// since the session started). Inbound traffic never defers this; the
    /// server's idle cutoff runs on its own clock.
    pub fn should_ping(&self) -> bool {
        self.last_ping.unwrap_or(self.started).elapsed() >= self.interval
    }

    /// How long the session loop should sleep between keepalive checks.
    pub fn check_period(&self) -> Duration {
        self.interval.min(self.timeout) / 2
    }
}

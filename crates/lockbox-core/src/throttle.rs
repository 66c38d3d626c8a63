use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    /// Settled failures.
    count: u32,
    /// Attempts admitted by `try_begin` and not yet settled.
    in_flight: u32,
    last_failure: Option<DateTime<Utc>>,
}

impl FailureRecord {
    fn empty() -> Self {
        Self {
            count: 0,
            in_flight: 0,
            last_failure: None,
        }
    }

    fn charged(&self) -> u32 {
        self.count.saturating_add(self.in_flight)
    }

    fn is_idle(&self) -> bool {
        self.count == 0 && self.in_flight == 0
    }
}

/// Counts consecutive failed decryptions per access session.
///
/// A session is locked out once its counter reaches `max_attempts`; the
/// counter is cleared by a successful attempt, by `reset`, by `end_session`,
/// or, when a cooldown is configured, once the cooldown has elapsed since the
/// last failure.
///
/// Attempts go through [`AccessThrottle::try_begin`], which checks the budget
/// and reserves a slot under one lock, so concurrent requests from the same
/// session cannot test more passwords than the budget allows.
///
/// Idle sessions are dropped as soon as their counters reach zero. Without a
/// cooldown, a session that only ever fails stays until `end_session`; with
/// one, [`AccessThrottle::prune`] drops it once cooled down.
#[derive(Debug)]
pub struct AccessThrottle {
    max_attempts: u32,
    cooldown: Option<Duration>,
    sessions: Mutex<HashMap<String, FailureRecord>>,
}

impl AccessThrottle {
    pub fn new(max_attempts: u32, cooldown: Option<Duration>) -> Self {
        Self {
            max_attempts,
            cooldown,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Admit one attempt for `session`, or return the charged count when the
    /// budget is spent. Settled failures and attempts still in flight both
    /// count against the budget.
    pub fn try_begin(&self, session: &str, now: DateTime<Utc>) -> Result<Attempt<'_>, u32> {
        let mut sessions = self.lock();
        let record = sessions
            .entry(session.to_string())
            .or_insert_with(FailureRecord::empty);
        self.apply_cooldown(record, now);

        let charged = record.charged();
        if charged >= self.max_attempts {
            if record.is_idle() {
                sessions.remove(session);
            }
            return Err(charged);
        }
        record.in_flight += 1;

        Ok(Attempt {
            throttle: self,
            session: session.to_string(),
            settled: false,
        })
    }

    /// Record one failed attempt outside `try_begin` and return the session's
    /// new count.
    pub fn record_failure(&self, session: &str, now: DateTime<Utc>) -> u32 {
        let mut sessions = self.lock();
        let record = sessions
            .entry(session.to_string())
            .or_insert_with(FailureRecord::empty);
        self.apply_cooldown(record, now);
        record.count = record.count.saturating_add(1);
        record.last_failure = Some(now);
        record.count
    }

    /// Clear settled failures. Attempts still in flight keep their slot.
    pub fn reset(&self, session: &str) {
        let mut sessions = self.lock();
        if let Some(record) = sessions.get_mut(session) {
            record.count = 0;
            record.last_failure = None;
            if record.is_idle() {
                sessions.remove(session);
            }
        }
    }

    /// Forget a session entirely, e.g. when the caller's session expires.
    pub fn end_session(&self, session: &str) {
        self.lock().remove(session);
    }

    /// Settled failures for a session.
    pub fn attempts(&self, session: &str, now: DateTime<Utc>) -> u32 {
        let mut sessions = self.lock();
        let Some(record) = sessions.get_mut(session) else {
            return 0;
        };
        self.apply_cooldown(record, now);
        let count = record.count;
        if record.is_idle() {
            sessions.remove(session);
        }
        count
    }

    pub fn is_locked_out(&self, session: &str, now: DateTime<Utc>) -> bool {
        self.attempts(session, now) >= self.max_attempts
    }

    /// Drop every session whose failures have cooled down. Returns how many
    /// were removed. A no-op without a cooldown.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, record| {
            self.apply_cooldown(record, now);
            !record.is_idle()
        });
        before - sessions.len()
    }

    /// Number of sessions currently tracked.
    pub fn tracked_sessions(&self) -> usize {
        self.lock().len()
    }

    /// Returns the settled count after applying `outcome`.
    fn settle(&self, session: &str, outcome: Outcome) -> u32 {
        let mut sessions = self.lock();
        let Some(record) = sessions.get_mut(session) else {
            // Ended while the attempt was running.
            return 0;
        };
        record.in_flight = record.in_flight.saturating_sub(1);
        match outcome {
            Outcome::Failed(now) => {
                record.count = record.count.saturating_add(1);
                record.last_failure = Some(now);
            }
            Outcome::Succeeded => {
                record.count = 0;
                record.last_failure = None;
            }
            Outcome::Abandoned => {}
        }
        let count = record.count;
        if record.is_idle() {
            sessions.remove(session);
        }
        count
    }

    fn apply_cooldown(&self, record: &mut FailureRecord, now: DateTime<Utc>) {
        let cooled = match (self.cooldown, record.last_failure) {
            (Some(cooldown), Some(last)) => now - last >= cooldown,
            _ => false,
        };
        if cooled {
            record.count = 0;
            record.last_failure = None;
        }
    }

    // Counters stay consistent across a panic, so a poisoned lock is reused.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, FailureRecord>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Failed(DateTime<Utc>),
    Succeeded,
    Abandoned,
}

/// One admitted attempt. Settle it with [`Attempt::fail`] or
/// [`Attempt::succeed`]; dropping it unsettled releases the slot without
/// charging the session (the attempt never tested a password).
#[derive(Debug)]
#[must_use = "an unsettled attempt is released without charging the session"]
pub struct Attempt<'a> {
    throttle: &'a AccessThrottle,
    session: String,
    settled: bool,
}

impl Attempt<'_> {
    /// Charge the failure and return the session's settled count.
    pub fn fail(mut self, now: DateTime<Utc>) -> u32 {
        self.settled = true;
        self.throttle.settle(&self.session, Outcome::Failed(now))
    }

    /// Clear the session's counter.
    pub fn succeed(mut self) {
        self.settled = true;
        self.throttle.settle(&self.session, Outcome::Succeeded);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.throttle.settle(&self.session, Outcome::Abandoned);
        }
    }
}

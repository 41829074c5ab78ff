//! Temporary lockdown after hostile input.
//!
//! The machine has two states, `Normal` and `Locked`, and cycles between them:
//!
//! ```text
//! Normal --trigger(now)--> Locked{until = now + duration}
//! Locked --poll(now >= until)--> Normal
//! ```
//!
//! The end time is absolute wall-clock time fixed at the trigger. Further
//! triggers while locked never extend it, and re-evaluating after a restart
//! uses the stored end time.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Key under which the lockdown state is persisted in session storage.
pub const LOCKDOWN_STORAGE_KEY: &str = "campus_market.lockdown";

/// Default lockdown duration.
pub const DEFAULT_LOCKDOWN_DURATION: TimeDelta = TimeDelta::minutes(5);

/// Default message shown while locked.
pub const DEFAULT_LOCKDOWN_MESSAGE: &str =
    "Suspicious input detected. Editing is disabled for a few minutes.";

/// Persisted lockdown record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockdownState {
    pub active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_timestamp: DateTime<Utc>,
    pub message: String,
}

impl LockdownState {
    /// Create an active lockdown ending `duration` after `now`.
    ///
    /// The end time is truncated to whole milliseconds, the precision it is
    /// stored with.
    #[must_use]
    pub fn trigger(now: DateTime<Utc>, duration: TimeDelta, message: impl Into<String>) -> Self {
        Self {
            active: true,
            end_timestamp: (now + duration).trunc_subsecs(3),
            message: message.into(),
        }
    }

    /// Whether this record still locks at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.end_timestamp
    }

    /// Time left until release, or `None` once elapsed.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.is_active_at(now).then(|| self.end_timestamp - now)
    }
}

/// Returns `true` if `state` locks the editor at `now`.
#[must_use]
pub fn is_lockdown_active(state: Option<&LockdownState>, now: DateTime<Utc>) -> bool {
    state.is_some_and(|s| s.is_active_at(now))
}

/// Observable lockdown phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockdownPhase {
    Normal,
    Locked { until: DateTime<Utc> },
}

/// State change produced by [`Lockdown`]; callers persist or clear storage
/// accordingly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `Normal -> Locked`; the new state must be persisted.
    Locked(LockdownState),
    /// `Locked -> Normal`; the persisted state must be cleared.
    Released,
}

/// Lockdown state machine.
#[derive(Debug, Clone)]
pub struct Lockdown {
    state: Option<LockdownState>,
    duration: TimeDelta,
}

impl Lockdown {
    /// Create a machine in the `Normal` state.
    #[must_use]
    pub const fn new(duration: TimeDelta) -> Self {
        Self {
            state: None,
            duration,
        }
    }

    /// Rebuild the machine from persisted state.
    ///
    /// Returns [`Transition::Released`] when the stored lockdown has already
    /// elapsed (or is inactive) so the caller can clear storage.
    pub fn restore(
        &mut self,
        stored: Option<LockdownState>,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        match stored {
            Some(state) if state.is_active_at(now) => {
                self.state = Some(state);
                None
            }
            Some(_) => {
                self.state = None;
                Some(Transition::Released)
            }
            None => {
                self.state = None;
                None
            }
        }
    }

    /// Enter `Locked`.
    ///
    /// Returns `None` if already locked; the existing end time is kept.
    pub fn trigger(&mut self, now: DateTime<Utc>, message: impl Into<String>) -> Option<Transition> {
        if self.is_locked(now) {
            return None;
        }
        let state = LockdownState::trigger(now, self.duration, message);
        self.state = Some(state.clone());
        Some(Transition::Locked(state))
    }

    /// Re-evaluate at `now`, returning [`Transition::Released`] once the end
    /// time has passed.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        match &self.state {
            Some(state) if !state.is_active_at(now) => {
                self.state = None;
                Some(Transition::Released)
            }
            _ => None,
        }
    }

    /// Whether the machine locks at `now`, without changing state.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        is_lockdown_active(self.state.as_ref(), now)
    }

    /// Current phase at `now`.
    #[must_use]
    pub fn phase(&self, now: DateTime<Utc>) -> LockdownPhase {
        match &self.state {
            Some(state) if state.is_active_at(now) => LockdownPhase::Locked {
                until: state.end_timestamp,
            },
            _ => LockdownPhase::Normal,
        }
    }

    /// Time left until release at `now`.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.state.as_ref().and_then(|s| s.remaining(now))
    }

    /// The active record, if any.
    #[must_use]
    pub const fn state(&self) -> Option<&LockdownState> {
        self.state.as_ref()
    }

    /// Configured lockdown duration.
    #[must_use]
    pub const fn duration(&self) -> TimeDelta {
        self.duration
    }
}

impl Default for Lockdown {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKDOWN_DURATION)
    }
}

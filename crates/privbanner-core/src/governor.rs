//! Display-count governance for the private browsing search banner.
//!
//! The banner is shown at most once per session and at most
//! [`MAX_SHOW_COUNT`] times per install. Closing it, or following its link
//! to the search settings, pins the persisted count at the maximum so it
//! never comes back.
//!
//! State is split in two tiers:
//!
//! - **Persisted**: the show count, read through a [`PrefStore`] on every
//!   decision. Other tools may rewrite it between calls.
//! - **Volatile**: the "shown this session" flag, owned here and only
//!   cleared by [`BannerGovernor::reset_session`].
//!
//! ```text
//!   session:  NotShown ──record_shown──▶ Shown ──reset_session──▶ NotShown
//!   count:    0 ─▶ 1 ─▶ … ─▶ MAX   (suppress_permanently jumps to MAX)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::prefs::{PREF_BANNER_SHOWN, PREF_UI_ENABLED, PrefStore};

/// Lifetime cap on how many times the banner is displayed.
pub const MAX_SHOW_COUNT: u32 = 5;

/// Pref keys the governor reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorKeys {
    /// Boolean feature flag (read-only to the governor).
    pub enabled: String,
    /// Integer show count.
    pub shown: String,
}

impl Default for GovernorKeys {
    fn default() -> Self {
        Self {
            enabled: PREF_UI_ENABLED.to_string(),
            shown: PREF_BANNER_SHOWN.to_string(),
        }
    }
}

/// Outcome of a display decision, with the reason when the banner stays hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowDecision {
    Show,
    FeatureDisabled,
    AlreadyShownThisSession,
    CapReached,
}

impl ShowDecision {
    #[must_use]
    pub const fn is_show(self) -> bool {
        matches!(self, Self::Show)
    }
}

/// Snapshot of governor state for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub enabled: bool,
    pub show_count: u32,
    pub max_show_count: u32,
    pub shown_this_session: bool,
    pub suppressed: bool,
    /// Count that was applied in memory but not yet saved.
    pub pending_write: Option<u32>,
    pub decision: ShowDecision,
}

#[derive(Debug, Default)]
struct SessionState {
    shown_this_session: bool,
    /// Last count successfully read or written; used when a read fails.
    last_known_count: u32,
    pending_write: Option<u32>,
}

/// Clamp a raw persisted value into `0..=MAX_SHOW_COUNT`.
#[must_use]
pub fn clamp_show_count(raw: i64) -> u32 {
    raw.clamp(0, i64::from(MAX_SHOW_COUNT)) as u32
}

/// Decides whether the search banner may be shown and tracks its display count.
pub struct BannerGovernor {
    store: Arc<dyn PrefStore>,
    keys: GovernorKeys,
    session: Mutex<SessionState>,
}

impl std::fmt::Debug for BannerGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BannerGovernor")
            .field("keys", &self.keys)
            .field("session", &self.session)
            .finish()
    }
}

impl BannerGovernor {
    /// Create a governor using the default pref keys.
    #[must_use]
    pub fn new(store: Arc<dyn PrefStore>) -> Self {
        Self::with_keys(store, GovernorKeys::default())
    }

    #[must_use]
    pub fn with_keys(store: Arc<dyn PrefStore>, keys: GovernorKeys) -> Self {
        Self {
            store,
            keys,
            session: Mutex::new(SessionState::default()),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, SessionState> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_enabled(&self) -> bool {
        match self.store.get_bool(&self.keys.enabled, false) {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(
                    pref_key = %self.keys.enabled,
                    error = %e,
                    "Failed to read banner feature flag; treating as disabled"
                );
                false
            }
        }
    }

    fn read_count(&self, state: &mut SessionState) -> u32 {
        let persisted = match self.store.get_int(&self.keys.shown, 0) {
            Ok(raw) => {
                let count = clamp_show_count(raw);
                if i64::from(count) != raw {
                    debug!(
                        pref_key = %self.keys.shown,
                        raw,
                        show_count = count,
                        "Clamped out-of-range show count"
                    );
                }
                state.last_known_count = count;
                count
            }
            Err(e) => {
                warn!(
                    pref_key = %self.keys.shown,
                    error = %e,
                    last_known = state.last_known_count,
                    "Failed to read banner show count; using last known value"
                );
                state.last_known_count
            }
        };
        // An unsaved write still counts: the banner was really shown.
        state
            .pending_write
            .map_or(persisted, |pending| persisted.max(pending))
    }

    fn decide(&self, state: &mut SessionState) -> ShowDecision {
        if !self.read_enabled() {
            return ShowDecision::FeatureDisabled;
        }
        if state.shown_this_session {
            return ShowDecision::AlreadyShownThisSession;
        }
        if self.read_count(state) >= MAX_SHOW_COUNT {
            return ShowDecision::CapReached;
        }
        ShowDecision::Show
    }

    fn persist(&self, state: &mut SessionState, count: u32) -> Result<()> {
        state.last_known_count = count;
        match self.store.set_int(&self.keys.shown, i64::from(count)) {
            Ok(()) => {
                state.pending_write = None;
                Ok(())
            }
            Err(source) => {
                state.pending_write = Some(count);
                warn!(
                    pref_key = %self.keys.shown,
                    show_count = count,
                    error = %source,
                    "Failed to persist banner show count; write is pending"
                );
                Err(Error::Persist {
                    key: self.keys.shown.clone(),
                    value: i64::from(count),
                    source,
                })
            }
        }
    }

    fn record_locked(&self, state: &mut SessionState) -> Result<u32> {
        if state.shown_this_session {
            let count = self.read_count(state);
            debug!(show_count = count, "Banner already recorded this session");
            return Ok(count);
        }
        state.shown_this_session = true;

        let count = (self.read_count(state) + 1).min(MAX_SHOW_COUNT);
        self.persist(state, count)?;
        info!(
            show_count = count,
            max_show_count = MAX_SHOW_COUNT,
            "Search banner shown"
        );
        Ok(count)
    }

    /// Decide whether the banner should be shown now, with the reason.
    pub fn decision(&self) -> ShowDecision {
        let mut state = self.lock_session();
        self.decide(&mut state)
    }

    /// Whether the banner should be shown now. No side effects.
    pub fn should_show(&self) -> bool {
        self.decision().is_show()
    }

    /// Record that the banner was displayed.
    ///
    /// Sets the session flag before touching the store, so a failed write
    /// still keeps the banner hidden for the rest of the session. Returns
    /// the new show count. Calling it again in the same session is a no-op.
    pub fn record_shown(&self) -> Result<u32> {
        let mut state = self.lock_session();
        self.record_locked(&mut state)
    }

    /// Check and record in one step.
    ///
    /// Returns `Ok(true)` when the banner should be displayed. An
    /// [`Error::Persist`] also means the banner was granted (the session
    /// flag is set) but the new count is only held in memory.
    pub fn try_show(&self) -> Result<bool> {
        let mut state = self.lock_session();
        let decision = self.decide(&mut state);
        if !decision.is_show() {
            debug!(?decision, "Search banner hidden");
            return Ok(false);
        }
        self.record_locked(&mut state)?;
        Ok(true)
    }

    /// Pin the show count at the maximum so the banner never reappears.
    pub fn suppress_permanently(&self) -> Result<()> {
        let mut state = self.lock_session();
        self.persist(&mut state, MAX_SHOW_COUNT)?;
        info!(
            show_count = MAX_SHOW_COUNT,
            "Search banner suppressed permanently"
        );
        Ok(())
    }

    /// Forget that the banner was shown in this session.
    ///
    /// Simulates a fresh session without a restart; the persisted count is
    /// untouched.
    pub fn reset_session(&self) {
        let mut state = self.lock_session();
        state.shown_this_session = false;
        debug!("Banner session flag reset");
    }

    /// Re-attempt a show-count write that previously failed.
    ///
    /// Succeeds trivially when nothing is pending.
    pub fn retry_persist(&self) -> Result<()> {
        let mut state = self.lock_session();
        let Some(pending) = state.pending_write else {
            return Ok(());
        };
        self.persist(&mut state, pending)?;
        info!(show_count = pending, "Pending banner show count persisted");
        Ok(())
    }

    /// Current show count, clamped to `0..=MAX_SHOW_COUNT`.
    pub fn show_count(&self) -> u32 {
        let mut state = self.lock_session();
        self.read_count(&mut state)
    }

    pub fn is_enabled(&self) -> bool {
        self.read_enabled()
    }

    pub fn shown_this_session(&self) -> bool {
        self.lock_session().shown_this_session
    }

    pub fn status(&self) -> GovernorStatus {
        let mut state = self.lock_session();
        let decision = self.decide(&mut state);
        let show_count = self.read_count(&mut state);
        GovernorStatus {
            enabled: decision != ShowDecision::FeatureDisabled,
            show_count,
            max_show_count: MAX_SHOW_COUNT,
            shown_this_session: state.shown_this_session,
            suppressed: show_count >= MAX_SHOW_COUNT,
            pending_write: state.pending_write,
            decision,
        }
    }
}

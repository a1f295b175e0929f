//! Route guarding
//!
//! Navigation to a protected view is admitted or redirected purely from the
//! session phase.

use crate::routes::Route;
use crate::session::{Phase, Session};
use tokio::sync::watch;

/// Outcome of guarding a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Show a neutral loading placeholder
    Loading,
    /// Send the user elsewhere
    Redirect(Route),
    /// Render the requested view
    Render(Route),
}

/// Decide what to show for `requested` in `phase`.
///
/// While `Initializing` protected views show a placeholder instead of
/// redirecting, so a restored session never flashes the sign-in view.
pub fn guard(phase: Phase, requested: &Route, sign_in: &Route) -> GuardDecision {
    if !requested.requires_auth() {
        return GuardDecision::Render(requested.clone());
    }
    match phase {
        Phase::Initializing => GuardDecision::Loading,
        Phase::Unauthenticated => GuardDecision::Redirect(sign_in.clone()),
        Phase::Authenticated => GuardDecision::Render(requested.clone()),
    }
}

/// Guard bound to a live session.
///
/// Re-evaluates whenever the session phase changes.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: watch::Receiver<Session>,
    sign_in: Route,
    seen: Phase,
}

impl RouteGuard {
    /// Create a guard over a session subscription.
    pub fn new(session: watch::Receiver<Session>, sign_in: Route) -> Self {
        let seen = session.borrow().phase;
        Self {
            session,
            sign_in,
            seen,
        }
    }

    /// Decision for `requested` under the current phase.
    pub fn decide(&self, requested: &Route) -> GuardDecision {
        let phase = self.session.borrow().phase;
        guard(phase, requested, &self.sign_in)
    }

    /// Wait until the phase differs from the last one this guard reported,
    /// then decide again.
    ///
    /// Returns `None` once the session manager has shut down.
    pub async fn next_decision(&mut self, requested: &Route) -> Option<GuardDecision> {
        loop {
            let phase = self.session.borrow_and_update().phase;
            if phase != self.seen {
                self.seen = phase;
                return Some(guard(phase, requested, &self.sign_in));
            }
            self.session.changed().await.ok()?;
        }
    }
}

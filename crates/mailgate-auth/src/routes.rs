//! Client routes and navigation
//!
//! Routes mirror the application's views. The session manager performs its
//! navigation side effects through a [`Navigator`].

use crate::integration::IntegrationKind;
use parking_lot::Mutex;
use std::fmt;

/// A client view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// `/login`
    SignIn,
    /// `/dashboard`
    Dashboard,
    /// `/add-integration`
    AddIntegration,
    /// `/integration/{kind}/{id}`
    Integration { kind: IntegrationKind, id: String },
    /// `/send-email`
    SendEmail,
    /// `/create-event`
    CreateEvent,
}

impl Route {
    /// Parse a path (query string and fragment ignored).
    ///
    /// `/` and unknown paths map to [`Route::SignIn`], like the catch-all
    /// route of the application.
    pub fn parse(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["login"] => Route::SignIn,
            ["dashboard"] => Route::Dashboard,
            ["add-integration"] => Route::AddIntegration,
            ["send-email"] => Route::SendEmail,
            ["create-event"] => Route::CreateEvent,
            ["integration", kind, id] => match IntegrationKind::parse(kind) {
                Some(kind) => Route::Integration {
                    kind,
                    id: (*id).to_string(),
                },
                None => Route::SignIn,
            },
            _ => Route::SignIn,
        }
    }

    /// Path for this route.
    pub fn path(&self) -> String {
        match self {
            Route::SignIn => "/login".to_string(),
            Route::Dashboard => "/dashboard".to_string(),
            Route::AddIntegration => "/add-integration".to_string(),
            Route::Integration { kind, id } => format!("/integration/{}/{}", kind.as_str(), id),
            Route::SendEmail => "/send-email".to_string(),
            Route::CreateEvent => "/create-event".to_string(),
        }
    }

    /// Whether the route is gated by the route guard.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Route::SignIn)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Receives navigation side effects.
pub trait Navigator: Send + Sync {
    /// Navigate to `route`.
    fn navigate(&self, route: &Route);
}

/// Navigator that records every navigation in order.
///
/// Useful for headless hosts and tests.
#[derive(Debug, Default)]
pub struct HistoryNavigator {
    history: Mutex<Vec<Route>>,
}

impl HistoryNavigator {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// All navigations so far.
    pub fn history(&self) -> Vec<Route> {
        self.history.lock().clone()
    }

    /// Most recent navigation.
    pub fn current(&self) -> Option<Route> {
        self.history.lock().last().cloned()
    }

    /// How many times `route` was navigated to.
    pub fn count(&self, route: &Route) -> usize {
        self.history.lock().iter().filter(|r| *r == route).count()
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, route: &Route) {
        self.history.lock().push(route.clone());
    }
}

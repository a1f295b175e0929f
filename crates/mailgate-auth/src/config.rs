//! Session manager configuration.

use crate::routes::Route;

/// Where the session manager sends the user on its own transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Default authenticated view, visited after an explicit login
    pub home_route: Route,

    /// Sign-in view, visited after logout or an invalidated token
    pub sign_in_route: Route,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            home_route: Route::Dashboard,
            sign_in_route: Route::SignIn,
        }
    }
}

impl SessionConfig {
    /// Override the home route.
    pub fn with_home_route(mut self, route: Route) -> Self {
        self.home_route = route;
        self
    }
}

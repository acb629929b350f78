//! Browser-facing HTTP surface.
//!
//! Provides:
//! - Login, logout and registration forms
//! - Student terminal pages and the admin overview
//! - The websocket transport streaming terminal I/O
//! - Static error pages

mod routes;
mod socket;
pub mod templates;

use std::sync::Arc;

use axum::{Router, response::Html, routing::get};
use axum_extra::extract::CookieJar;

use crate::auth::COOKIE_NAME;
use crate::dispatcher::Dispatcher;
use crate::identity::{Identity, TRANSPORT_PREFIX};
use templates::STATIC_PAGES;

/// State shared by all handlers
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Identity carried by the request's `user` cookie, if valid.
    fn identify(&self, jar: &CookieJar) -> Option<Identity> {
        self.dispatcher
            .identify(jar.get(COOKIE_NAME).map(|cookie| cookie.value()))
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", get(routes::root))
        .route("/login", get(routes::login_page).post(routes::login_submit))
        .route("/logout", get(routes::logout))
        .route(
            "/registration",
            get(routes::registration_page).post(routes::registration_submit),
        )
        .route("/students/{name}", get(routes::student_page))
        .route("/students/{name}/", get(routes::student_page))
        .route("/admin", get(routes::admin_page))
        .route(
            &format!("{TRANSPORT_PREFIX}{{name}}"),
            get(socket::terminal_socket),
        );

    for (path, body) in STATIC_PAGES {
        router = router.route(path, get(move || async move { Html(*body) }));
    }

    router.with_state(state)
}

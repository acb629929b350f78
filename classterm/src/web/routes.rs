//! HTTP page handlers.
//!
//! Each handler turns the request into a dispatcher call and renders the
//! resulting [`Outcome`].

use std::sync::Arc;

use askama::Template;
use axum::{
    Form,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::AppState;
use super::templates::{AdminTemplate, LoginTemplate, RegistrationTemplate, TerminalTemplate};
use crate::dispatcher::{Outcome, PageRequest};

/// Login and registration form data.
#[derive(Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    uname: String,
    #[serde(default)]
    psw: String,
    /// Checkbox; present only when ticked
    remember: Option<String>,
}

fn render_template(template: &impl Template) -> Response {
    Html(
        template
            .render()
            .unwrap_or_else(|e| format!("Template error: {e}")),
    )
    .into_response()
}

/// Turn a dispatcher outcome into an HTTP response.
fn respond(state: &AppState, outcome: Outcome) -> Response {
    match outcome {
        Outcome::Redirect(location) => Redirect::to(&location).into_response(),
        Outcome::RedirectWithCookie {
            location,
            set_cookie,
        } => (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, location), (header::SET_COOKIE, set_cookie)],
        )
            .into_response(),
        Outcome::Terminal(session) => render_template(&TerminalTemplate {
            username: session.owner,
            transport_path: session.transport_path,
        }),
        Outcome::Overview(sessions) => {
            let multiplexer = state.dispatcher.directory().multiplexer();
            render_template(&AdminTemplate {
                sessions,
                running: multiplexer.running(),
                capacity: multiplexer.capacity(),
            })
        }
        Outcome::LoginForm => render_template(&LoginTemplate),
        Outcome::RegistrationForm => render_template(&RegistrationTemplate),
        Outcome::Failure(message) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
    }
}

async fn page(state: &AppState, jar: &CookieJar, request: PageRequest) -> Response {
    let identity = state.identify(jar);
    let outcome = state.dispatcher.page(identity.as_ref(), request).await;
    respond(state, outcome)
}

pub(super) async fn root(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    page(&state, &jar, PageRequest::Root).await
}

pub(super) async fn login_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    page(&state, &jar, PageRequest::LoginForm).await
}

pub(super) async fn login_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<CredentialsForm>,
) -> Response {
    let outcome = state
        .dispatcher
        .login(&form.uname, &form.psw, form.remember.is_some())
        .await;
    respond(&state, outcome)
}

pub(super) async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let identity = state.identify(&jar);
    let outcome = state.dispatcher.logout(identity.as_ref());
    respond(&state, outcome)
}

pub(super) async fn registration_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Response {
    page(&state, &jar, PageRequest::RegistrationForm).await
}

pub(super) async fn registration_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<CredentialsForm>,
) -> Response {
    let outcome = state.dispatcher.register(&form.uname, &form.psw).await;
    respond(&state, outcome)
}

pub(super) async fn student_page(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(name): Path<String>,
) -> Response {
    page(&state, &jar, PageRequest::Student(name)).await
}

pub(super) async fn admin_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    page(&state, &jar, PageRequest::Admin).await
}

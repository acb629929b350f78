//! Route dispatcher: resolves a request to a page outcome.
//!
//! Handlers parse the HTTP request into a [`PageRequest`] (or call one of the
//! form entry points), and render whatever [`Outcome`] comes back. Every
//! domain error is recovered here and turned into a redirect.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::auth::AuthGate;
use crate::directory::{SessionDirectory, TerminalSession};
use crate::error::{AuthError, DirectoryError, RegistrationError};
use crate::identity::{ADMIN_USERNAME, Identity};
use crate::policy::{Access, authorize};

pub const LOGIN_PATH: &str = "/login";
pub const WRONG_USERNAME_PAGE: &str = "/wrong_username_auth.html";
pub const WRONG_PASSWORD_PAGE: &str = "/wrong_psw_auth.html";
pub const USER_EXISTS_PAGE: &str = "/registration_user_exists.html";
pub const NO_PASSWORD_PAGE: &str = "/registration_no_password.html";
pub const INVALID_USERNAME_PAGE: &str = "/registration_invalid_username.html";
pub const ACCESS_DENIED_PAGE: &str = "/access_denied.html";
pub const CAPACITY_PAGE: &str = "/terminal_capacity.html";

/// A protected or form page, parsed from the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// `/`
    Root,
    /// `/students/{name}`
    Student(String),
    /// `/admin`
    Admin,
    /// `GET /login`
    LoginForm,
    /// `GET /registration`
    RegistrationForm,
}

/// What the handler should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Redirect(String),
    /// Redirect that also sets or clears the identity cookie
    RedirectWithCookie { location: String, set_cookie: String },
    /// Terminal page bound to a session
    Terminal(TerminalSession),
    /// Admin index of all sessions
    Overview(Vec<TerminalSession>),
    LoginForm,
    RegistrationForm,
    /// Infrastructure failure; reported as a server error
    Failure(String),
}

impl Outcome {
    fn redirect(location: &str) -> Self {
        Outcome::Redirect(location.to_string())
    }
}

impl AuthError {
    /// Recovery for a failed login.
    pub fn outcome(&self) -> Outcome {
        match self {
            AuthError::UnknownUser(_) => Outcome::redirect(WRONG_USERNAME_PAGE),
            AuthError::BadPassword(_) => Outcome::redirect(WRONG_PASSWORD_PAGE),
            AuthError::Store(e) => {
                error!("Login failed on credential store: {e:#}");
                Outcome::Failure("Credential store unavailable".to_string())
            }
        }
    }
}

impl RegistrationError {
    /// Recovery for a failed registration.
    pub fn outcome(&self) -> Outcome {
        match self {
            RegistrationError::UserExists(_) => Outcome::redirect(USER_EXISTS_PAGE),
            RegistrationError::MissingPassword => Outcome::redirect(NO_PASSWORD_PAGE),
            RegistrationError::InvalidUsername(_) => Outcome::redirect(INVALID_USERNAME_PAGE),
            RegistrationError::Store(e) => {
                error!("Registration failed on credential store: {e:#}");
                Outcome::Failure("Credential store unavailable".to_string())
            }
        }
    }
}

impl DirectoryError {
    /// Recovery for a failed terminal request.
    pub fn outcome(&self) -> Outcome {
        match self {
            DirectoryError::CapacityExceeded(_) => Outcome::redirect(CAPACITY_PAGE),
            DirectoryError::AdminHasNoSession | DirectoryError::Spawn(_) => {
                error!("Terminal request failed: {self}");
                Outcome::Failure("Failed to start terminal".to_string())
            }
        }
    }
}

/// Ties the auth gate, access policy and session directory together.
pub struct Dispatcher {
    gate: Arc<AuthGate>,
    directory: Arc<SessionDirectory>,
}

impl Dispatcher {
    pub fn new(gate: Arc<AuthGate>, directory: Arc<SessionDirectory>) -> Self {
        Self { gate, directory }
    }

    pub fn gate(&self) -> &Arc<AuthGate> {
        &self.gate
    }

    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Resolve the identity carried by a `user` cookie value, if any.
    pub fn identify(&self, cookie_value: Option<&str>) -> Option<Identity> {
        cookie_value.and_then(|value| self.gate.resolve_identity(value))
    }

    /// Dispatch a page request.
    pub async fn page(&self, identity: Option<&Identity>, request: PageRequest) -> Outcome {
        match (identity, request) {
            (None, PageRequest::LoginForm) => Outcome::LoginForm,
            (None, PageRequest::RegistrationForm) => Outcome::RegistrationForm,
            (None, _) => Outcome::redirect(LOGIN_PATH),

            (Some(identity), PageRequest::Root)
            | (Some(identity), PageRequest::LoginForm)
            | (Some(identity), PageRequest::RegistrationForm) => {
                Outcome::Redirect(identity.home_path())
            }

            (Some(identity), PageRequest::Student(name)) => {
                self.terminal_page(identity, &name).await
            }
            (Some(identity), PageRequest::Admin) => {
                self.terminal_page(identity, ADMIN_USERNAME).await
            }
        }
    }

    async fn terminal_page(&self, identity: &Identity, target: &str) -> Outcome {
        match authorize(identity, target) {
            Access::SelfAccess => match self.directory.get_or_create(identity).await {
                Ok(session) => Outcome::Terminal(session),
                Err(e) => e.outcome(),
            },
            Access::AdminOverview => Outcome::Overview(self.directory.list_all().await),
            Access::Denied => {
                warn!(
                    username = %identity.username(),
                    target = %target,
                    "Access denied"
                );
                Outcome::redirect(ACCESS_DENIED_PAGE)
            }
        }
    }

    /// Handle a login form submission.
    pub async fn login(&self, username: &str, password: &str, remember: bool) -> Outcome {
        match self.gate.login(username, password, remember).await {
            Ok(cookie) => Outcome::RedirectWithCookie {
                location: Identity::new(cookie.username()).home_path(),
                set_cookie: cookie.set_cookie_header(),
            },
            Err(e) => e.outcome(),
        }
    }

    /// Clear the identity cookie and return to the login form.
    pub fn logout(&self, identity: Option<&Identity>) -> Outcome {
        if let Some(identity) = identity {
            info!(username = %identity.username(), "User logged out");
        }
        Outcome::RedirectWithCookie {
            location: LOGIN_PATH.to_string(),
            set_cookie: self.gate.logout(),
        }
    }

    /// Handle a registration form submission.
    pub async fn register(&self, username: &str, password: &str) -> Outcome {
        match self.gate.register(username, password).await {
            Ok(()) => Outcome::redirect(LOGIN_PATH),
            Err(e) => e.outcome(),
        }
    }
}

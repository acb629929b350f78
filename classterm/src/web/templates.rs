//! Askama templates for the browser UI.

use askama::Template;

use crate::directory::TerminalSession;

/// Login form
#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate;

/// Registration form
#[derive(Template)]
#[template(path = "registration.html")]
pub struct RegistrationTemplate;

/// A student's terminal page
#[derive(Template)]
#[template(path = "termpage.html")]
pub struct TerminalTemplate {
    pub username: String,
    pub transport_path: String,
}

/// Admin overview of every active terminal
#[derive(Template)]
#[template(path = "admin.html")]
pub struct AdminTemplate {
    pub sessions: Vec<TerminalSession>,
    /// Terminals with a live process
    pub running: usize,
    pub capacity: usize,
}

/// Static pages served verbatim: (path, body).
pub const STATIC_PAGES: &[(&str, &str)] = &[
    (
        "/wrong_username_auth.html",
        include_str!("../../templates/static/wrong_username_auth.html"),
    ),
    (
        "/wrong_psw_auth.html",
        include_str!("../../templates/static/wrong_psw_auth.html"),
    ),
    (
        "/registration_user_exists.html",
        include_str!("../../templates/static/registration_user_exists.html"),
    ),
    (
        "/registration_no_password.html",
        include_str!("../../templates/static/registration_no_password.html"),
    ),
    (
        "/registration_invalid_username.html",
        include_str!("../../templates/static/registration_invalid_username.html"),
    ),
    (
        "/access_denied.html",
        include_str!("../../templates/static/access_denied.html"),
    ),
    (
        "/terminal_capacity.html",
        include_str!("../../templates/static/terminal_capacity.html"),
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher;

    #[test]
    fn test_every_error_page_is_served() {
        for path in [
            dispatcher::WRONG_USERNAME_PAGE,
            dispatcher::WRONG_PASSWORD_PAGE,
            dispatcher::USER_EXISTS_PAGE,
            dispatcher::NO_PASSWORD_PAGE,
            dispatcher::INVALID_USERNAME_PAGE,
            dispatcher::ACCESS_DENIED_PAGE,
            dispatcher::CAPACITY_PAGE,
        ] {
            assert!(
                STATIC_PAGES.iter().any(|(p, _)| *p == path),
                "no static page for {path}"
            );
        }
    }

    #[test]
    fn test_login_form_fields() {
        let html = LoginTemplate.render().unwrap();
        assert!(html.contains(r#"name="uname""#));
        assert!(html.contains(r#"name="psw""#));
        assert!(html.contains(r#"name="remember""#));
    }

    #[test]
    fn test_terminal_page_binds_transport_path() {
        let html = TerminalTemplate {
            username: "dave".to_string(),
            transport_path: "/_websocket/students/dave".to_string(),
        }
        .render()
        .unwrap();
        assert!(html.contains(r#"data-path="/_websocket/students/dave""#));
    }

    #[test]
    fn test_admin_page_empty() {
        let html = AdminTemplate {
            sessions: Vec::new(),
            running: 0,
            capacity: 100,
        }
        .render()
        .unwrap();
        assert!(html.contains("No student terminals yet."));
        assert!(html.contains("0 of 100 terminals running"));
    }
}

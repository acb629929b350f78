//! Authenticated identities and the names derived from them.

/// The one username that resolves to the admin role.
pub const ADMIN_USERNAME: &str = "admin";

/// URL prefix of the streaming endpoint for student terminals.
pub const TRANSPORT_PREFIX: &str = "/_websocket/students/";

/// Role of an identity. Derived from the username, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// An authenticated username plus its derived role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    username: String,
    role: Role,
}

impl Identity {
    /// Resolve an identity from a verified username.
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        let role = if username == ADMIN_USERNAME {
            Role::Admin
        } else {
            Role::Student
        };
        Self { username, role }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Landing page for this identity (`/admin` or `/students/{username}`).
    pub fn home_path(&self) -> String {
        match self.role {
            Role::Admin => "/admin".to_string(),
            Role::Student => format!("/students/{}", self.username),
        }
    }
}

/// Check that a username is non-empty and word-only (`[A-Za-z0-9_]+`).
///
/// Terminal names and route captures are derived from usernames, so anything
/// else would produce an unreachable terminal.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Terminal name owned by a username. One-to-one.
pub fn terminal_name_for(username: &str) -> String {
    username.to_string()
}

/// Streaming endpoint path for a terminal name.
pub fn transport_path_for(terminal_name: &str) -> String {
    format!("{TRANSPORT_PREFIX}{terminal_name}")
}

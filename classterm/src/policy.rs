//! Access policy for terminal pages.

use crate::identity::Identity;

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Requester asked for their own terminal.
    SelfAccess,
    /// Requester is the admin; route to the aggregate view.
    AdminOverview,
    /// Requester may not see the target.
    Denied,
}

/// Decide what `requester` gets when asking for `target_username`'s terminal.
///
/// The admin is always sent to the overview, never directly into another
/// identity's terminal. A student only ever reaches their own terminal.
pub fn authorize(requester: &Identity, target_username: &str) -> Access {
    if requester.is_admin() {
        Access::AdminOverview
    } else if requester.username() == target_username {
        Access::SelfAccess
    } else {
        Access::Denied
    }
}

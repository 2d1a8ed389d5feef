//! Authenticated identities attached to sessions.

use std::fmt::Debug;

/// An authenticated identity on a session.
///
/// A principal may optionally expose an alternate name used for
/// user-destination routing; implementations that route by something other
/// than the login name override [`destination_user_name`](Principal::destination_user_name).
pub trait Principal: Send + Sync + Debug {
    /// The principal's name.
    fn name(&self) -> &str;

    /// Alternate name for user-destination routing, when different from
    /// [`name`](Principal::name).
    fn destination_user_name(&self) -> Option<&str> {
        None
    }
}

/// The name a principal is registered under: the destination user name when
/// the capability yields one, else the plain name.
pub fn registry_name(principal: &dyn Principal) -> &str {
    principal.destination_user_name().unwrap_or(principal.name())
}

/// Principal derived from the `login` header of a CONNECT frame, used when
/// the transport did not authenticate the session itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginPrincipal {
    name: String,
}

impl LoginPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Principal for LoginPrincipal {
    fn name(&self) -> &str {
        &self.name
    }
}

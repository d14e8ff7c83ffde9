//! Caller identity passed to user-scoped declarations.

use crate::value::Value;

/// An authenticated or anonymous user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Primary key of the user row; `Null` for anonymous users.
    pub id: Value,
    pub username: String,
    anonymous: bool,
}

impl User {
    pub fn new(id: impl Into<Value>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            anonymous: false,
        }
    }

    /// The anonymous visitor.
    pub fn anonymous() -> Self {
        Self {
            id: Value::Null,
            username: String::new(),
            anonymous: true,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

/// Minimal request carrying the user it was made by, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub user: Option<User>,
}

impl Request {
    pub fn new(user: Option<User>) -> Self {
        Self { user }
    }
}

/// Either a user or a request to take the user from.
#[derive(Debug, Clone, PartialEq)]
pub enum UserArg {
    User(User),
    Request(Request),
}

impl UserArg {
    pub fn user(&self) -> Option<&User> {
        match self {
            UserArg::User(user) => Some(user),
            UserArg::Request(request) => request.user.as_ref(),
        }
    }

    pub fn into_user(self) -> Option<User> {
        match self {
            UserArg::User(user) => Some(user),
            UserArg::Request(request) => request.user,
        }
    }
}

impl From<User> for UserArg {
    fn from(user: User) -> Self {
        UserArg::User(user)
    }
}

impl From<Request> for UserArg {
    fn from(request: Request) -> Self {
        UserArg::Request(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_unwrapped() {
        let alice = User::new(1, "alice");
        let arg = UserArg::from(Request::new(Some(alice.clone())));
        assert_eq!(arg.user(), Some(&alice));
        assert_eq!(UserArg::from(Request::default()).into_user(), None);
    }

    #[test]
    fn anonymous_user() {
        let anon = User::anonymous();
        assert!(anon.is_anonymous());
        assert_eq!(anon.id, Value::Null);
        assert!(!User::new(1, "alice").is_anonymous());
    }
}

//! User-scoped declarations with a configurable no-user behaviour.

use tracing::warn;

use crate::error::{Error, Result};
use crate::flexquery::{Args, Declaration, FilterFn, Filtered, FlexQuery};
use crate::q::Q;
use crate::queryset::QuerySet;
use crate::user::{User, UserArg};

use super::{ensure_bound, nothing, take_user};

/// What a [`UserBasedFlexQuery`] does when called without a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoUserBehavior {
    /// Don't restrict the query set.
    All,
    /// Restrict to the empty query set.
    #[default]
    None,
    /// Call the wrapped function with no user.
    Pass,
    /// Fail with [`Error::MissingUser`].
    Reject,
}

/// Declaration restricting the base query set for a given user.
///
/// Anonymous users are passed to the function unless
/// [`UserBasedFlexQuery::pass_anonymous_user`] is switched off, in which
/// case they are handled like a missing user.
#[derive(Debug, Clone)]
pub struct UserBasedFlexQuery {
    inner: FlexQuery,
    no_user_behavior: NoUserBehavior,
    pass_anonymous_user: bool,
}

impl UserBasedFlexQuery {
    pub fn from_q<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(&QuerySet, Option<&User>, &Args) -> Result<Q> + Send + Sync + 'static,
    {
        Self::from(FlexQuery::from_q(name, model, move |base, args| {
            func(base, args.current_user(), args)
        }))
    }

    pub fn from_queryset<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(QuerySet, Option<&User>, &Args) -> Result<QuerySet> + Send + Sync + 'static,
    {
        Self::from(FlexQuery::from_queryset(name, model, move |base, args| {
            func(base, args.current_user(), args)
        }))
    }

    pub fn no_user_behavior(mut self, behavior: NoUserBehavior) -> Self {
        self.no_user_behavior = behavior;
        self
    }

    pub fn pass_anonymous_user(mut self, enabled: bool) -> Self {
        self.pass_anonymous_user = enabled;
        self
    }
}

impl From<FlexQuery> for UserBasedFlexQuery {
    fn from(inner: FlexQuery) -> Self {
        Self {
            inner,
            no_user_behavior: NoUserBehavior::default(),
            pass_anonymous_user: true,
        }
    }
}

impl Declaration for UserBasedFlexQuery {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn func(&self) -> Option<&FilterFn> {
        self.inner.func()
    }

    fn call_bound(&self, base: &QuerySet, mut args: Args) -> Result<Filtered> {
        ensure_bound(self)?;
        let user = take_user(&mut args)
            .filter(|user| self.pass_anonymous_user || !user.is_anonymous());

        if let Some(user) = user {
            args.user = Some(UserArg::User(user));
            return self.inner.call_bound(base, args);
        }
        match self.no_user_behavior {
            NoUserBehavior::All => {
                warn!(declaration = %self.name(), "no user given, leaving query set unrestricted");
                Ok(Filtered::Q(Q::new()))
            }
            NoUserBehavior::None => Ok(nothing(base)),
            NoUserBehavior::Pass => self.inner.call_bound(base, args),
            NoUserBehavior::Reject => Err(Error::MissingUser {
                name: self.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{ModelDefinition, Schema};
    use crate::user::Request;
    use crate::value::Value;
    use std::sync::Arc;

    fn notes() -> QuerySet {
        Schema::builder()
            .model(ModelDefinition::new("Note", "note").field("owner_id").field("public"))
            .build()
            .unwrap()
            .all("Note")
            .unwrap()
    }

    // Anonymous or absent users only see public notes.
    fn visible() -> UserBasedFlexQuery {
        UserBasedFlexQuery::from_q("visible", "Note", |_, user, _| match user {
            Some(user) if !user.is_anonymous() => {
                Ok(Q::lookup("owner_id", user.id.clone()) | Q::lookup("public", true))
            }
            _ => Ok(Q::lookup("public", true)),
        })
    }

    fn is_nothing(q: &Q) -> bool {
        q.lookups()
            .next()
            .is_some_and(|l| l.key == "pk__in" && matches!(&l.value, Value::Query(qs) if qs.is_none()))
    }

    #[test]
    fn user_is_passed_through() {
        let q = visible()
            .bind(&notes())
            .as_q(Args::new().with_user(Request::new(Some(User::new(3, "bob")))))
            .unwrap();
        assert_eq!(q, Q::lookup("owner_id", 3) | Q::lookup("public", true));
    }

    #[test]
    fn no_user_defaults_to_nothing() {
        let q = visible().bind(&notes()).as_q(Args::new()).unwrap();
        assert!(is_nothing(&q), "{q}");
    }

    #[test]
    fn no_user_all() {
        let decl = visible().no_user_behavior(NoUserBehavior::All);
        assert!(decl.bind(&notes()).as_q(Args::new()).unwrap().is_empty());
    }

    #[test]
    fn no_user_pass() {
        let decl = visible().no_user_behavior(NoUserBehavior::Pass);
        let q = decl.bind(&notes()).as_q(Args::new()).unwrap();
        assert_eq!(q, Q::lookup("public", true));
    }

    #[test]
    fn no_user_reject() {
        let decl = visible().no_user_behavior(NoUserBehavior::Reject);
        let err = decl.bind(&notes()).as_q(Args::new()).unwrap_err();
        assert!(matches!(err, Error::MissingUser { .. }));
    }

    #[test]
    fn anonymous_user_is_passed_by_default() {
        let q = visible()
            .bind(&notes())
            .as_q(Args::new().with_user(User::anonymous()))
            .unwrap();
        assert_eq!(q, Q::lookup("public", true));
    }

    #[test]
    fn anonymous_user_can_count_as_no_user() {
        let decl = visible().pass_anonymous_user(false);
        let q = decl
            .bind(&notes())
            .as_q(Args::new().with_user(User::anonymous()))
            .unwrap();
        assert!(is_nothing(&q), "{q}");
    }
}

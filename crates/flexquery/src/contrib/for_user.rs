//! Declarations that require a user unless told otherwise.

use tracing::warn;

use crate::error::{Error, Result};
use crate::flexquery::{Args, Declaration, FilterFn, Filtered, FlexQuery};
use crate::q::Q;
use crate::queryset::QuerySet;
use crate::user::{User, UserArg};

use super::{ensure_bound, nothing, take_user};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum NoUserPolicy {
    #[default]
    Reject,
    All,
    None,
}

/// Declaration filtering the base query set for a given user.
///
/// Without a user the call fails with [`Error::MissingUser`]. Use
/// [`ForUserFlexQuery::all_if_no_user`] to leave the query set unrestricted
/// instead, or [`ForUserFlexQuery::none_if_no_user`] to match nothing.
#[derive(Debug, Clone)]
pub struct ForUserFlexQuery {
    inner: FlexQuery,
    policy: NoUserPolicy,
}

impl ForUserFlexQuery {
    pub fn from_q<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(&QuerySet, &User, &Args) -> Result<Q> + Send + Sync + 'static,
    {
        let name = name.into();
        let owner = name.clone();
        Self::from(FlexQuery::from_q(name, model, move |base, args| {
            let user = args.current_user().ok_or_else(|| Error::MissingUser {
                name: owner.clone(),
            })?;
            func(base, user, args)
        }))
    }

    pub fn from_queryset<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(QuerySet, &User, &Args) -> Result<QuerySet> + Send + Sync + 'static,
    {
        let name = name.into();
        let owner = name.clone();
        Self::from(FlexQuery::from_queryset(name, model, move |base, args| {
            let user = args.current_user().ok_or_else(|| Error::MissingUser {
                name: owner.clone(),
            })?;
            func(base, user, args)
        }))
    }

    /// Leave the query set unrestricted when no user is given.
    pub fn all_if_no_user(mut self, enabled: bool) -> Self {
        self.policy = if enabled {
            NoUserPolicy::All
        } else {
            NoUserPolicy::Reject
        };
        self
    }

    /// Match no rows when no user is given.
    pub fn none_if_no_user(mut self, enabled: bool) -> Self {
        self.policy = if enabled {
            NoUserPolicy::None
        } else {
            NoUserPolicy::Reject
        };
        self
    }
}

impl From<FlexQuery> for ForUserFlexQuery {
    fn from(inner: FlexQuery) -> Self {
        Self {
            inner,
            policy: NoUserPolicy::default(),
        }
    }
}

impl Declaration for ForUserFlexQuery {
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
        if let Some(user) = take_user(&mut args) {
            args.user = Some(UserArg::User(user));
            return self.inner.call_bound(base, args);
        }
        match self.policy {
            NoUserPolicy::Reject => Err(Error::MissingUser {
                name: self.name().to_string(),
            }),
            NoUserPolicy::All => {
                warn!(declaration = %self.name(), "no user given, leaving query set unrestricted");
                Ok(Filtered::Q(Q::new()))
            }
            NoUserPolicy::None => Ok(nothing(base)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::flexquery::Mode;
    use crate::model::{ModelDefinition, Schema};
    use crate::user::Request;
    use crate::value::Value;
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Schema::builder()
            .model(ModelDefinition::new("Note", "note").field("owner_id"))
            .build()
            .unwrap()
    }

    fn owned() -> ForUserFlexQuery {
        ForUserFlexQuery::from_q("owned", "Note", |_, user, _| {
            Ok(Q::lookup("owner_id", user.id.clone()))
        })
    }

    #[test]
    fn user_is_passed_through() {
        let notes = schema().all("Note").unwrap();
        let decl = owned();
        let q = decl
            .bind(&notes)
            .as_q(Args::new().with_user(User::new(7, "alice")))
            .unwrap();
        assert_eq!(q, Q::lookup("owner_id", 7));
    }

    #[test]
    fn request_is_unwrapped() {
        let notes = schema().all("Note").unwrap();
        let decl = owned();
        let request = Request::new(Some(User::new(7, "alice")));
        let q = decl.bind(&notes).as_q(Args::new().with_user(request)).unwrap();
        assert_eq!(q, Q::lookup("owner_id", 7));
    }

    #[test]
    fn missing_user_is_an_error() {
        let notes = schema().all("Note").unwrap();
        let decl = owned();
        for args in [Args::new(), Args::new().with_user(Request::default())] {
            let err = decl.bind(&notes).call(Mode::Inline, args).unwrap_err();
            assert!(matches!(err, Error::MissingUser { ref name } if name == "owned"));
        }
    }

    #[test]
    fn all_if_no_user_leaves_query_set_unrestricted() {
        let notes = schema().all("Note").unwrap();
        let decl = owned().all_if_no_user(true);
        let result = decl.bind(&notes).call(Mode::Inline, Args::new()).unwrap();
        assert_eq!(result, notes);
    }

    #[test]
    fn none_if_no_user_matches_nothing() {
        let notes = schema().all("Note").unwrap();
        let decl = owned().none_if_no_user(true);
        let q = decl.bind(&notes).as_q(Args::new()).unwrap();
        let lookup = q.lookups().next().unwrap();
        assert_eq!(lookup.key, "pk__in");
        assert!(matches!(&lookup.value, Value::Query(qs) if qs.is_none()));
    }

    #[test]
    fn unbound_fails_before_user_policy() {
        let notes = schema().all("Note").unwrap();
        let decl = ForUserFlexQuery::from(FlexQuery::unbound("pending", "Note")).all_if_no_user(true);
        let err = decl.bind(&notes).as_q(Args::new()).unwrap_err();
        assert!(matches!(err, Error::Unbound { .. }));
    }
}

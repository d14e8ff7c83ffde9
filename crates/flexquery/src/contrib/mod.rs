//! Declarations scoped to the calling user.
//!
//! Both variants accept a [`User`](crate::User) or a
//! [`Request`](crate::Request) through [`Args::user`](crate::Args) and pass
//! the resolved user on to the wrapped function. They differ in what
//! happens when no user is available.

mod for_user;
mod user_based;

pub use for_user::ForUserFlexQuery;
pub use user_based::{NoUserBehavior, UserBasedFlexQuery};

use crate::error::{Error, Result};
use crate::flexquery::{Args, Declaration, Filtered, pk_in};
use crate::queryset::QuerySet;
use crate::user::{User, UserArg};

/// Take the user out of `args`, unwrapping a request.
fn take_user(args: &mut Args) -> Option<User> {
    args.user.take().and_then(UserArg::into_user)
}

/// Fail fast on declarations without a function, whatever the user policy.
fn ensure_bound(declaration: &dyn Declaration) -> Result<()> {
    if declaration.func().is_none() {
        return Err(Error::Unbound {
            name: declaration.name().to_string(),
        });
    }
    Ok(())
}

/// Predicate matching no rows of `base`.
fn nothing(base: &QuerySet) -> Filtered {
    Filtered::Q(pk_in(base.clone().none()))
}

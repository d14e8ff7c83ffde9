//! Reusable filter declarations.
//!
//! A [`FlexQuery`] wraps a function producing a [`Q`] (or a filtered
//! [`QuerySet`]) from a base query set. Binding it to a query set yields a
//! [`Bound`] handle that applies the predicate either inline, letting the
//! compiler emit joins, or as an `IN (SELECT ...)` membership sub-query
//! over the declaration's own model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::PK_ALIAS;
use crate::q::{LOOKUP_SEP, Q};
use crate::queryset::QuerySet;
use crate::user::{User, UserArg};
use crate::value::Value;

/// How a bound declaration applies its predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Filter the current query set directly (joins across relations).
    #[default]
    Inline,
    /// Filter the related model on its own and match by key membership.
    Subquery,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Inline => "inline",
            Mode::Subquery => "subquery",
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inline" | "join" => Ok(Mode::Inline),
            "subquery" | "sub_query" => Ok(Mode::Subquery),
            _ => Err(Error::InvalidMode {
                mode: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call-time arguments relayed to the wrapped function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
    /// Caller identity, consumed by the user-scoped declarations.
    pub user: Option<UserArg>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<UserArg>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keyword.get(key)
    }

    pub fn nth(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// The user carried by these arguments, unwrapping a request.
    pub fn current_user(&self) -> Option<&User> {
        self.user.as_ref().and_then(UserArg::user)
    }
}

/// Function returning a predicate for a base query set.
pub type QFn = dyn Fn(&QuerySet, &Args) -> Result<Q> + Send + Sync;

/// Function returning a filtered copy of a base query set.
pub type QuerySetFn = dyn Fn(QuerySet, &Args) -> Result<QuerySet> + Send + Sync;

/// The function wrapped by a declaration.
#[derive(Clone)]
pub enum FilterFn {
    Q(Arc<QFn>),
    QuerySet(Arc<QuerySetFn>),
}

impl FilterFn {
    pub fn invoke(&self, base: &QuerySet, args: &Args) -> Result<Filtered> {
        match self {
            FilterFn::Q(f) => f(base, args).map(Filtered::Q),
            FilterFn::QuerySet(f) => f(base.all(), args).map(Filtered::QuerySet),
        }
    }
}

impl fmt::Debug for FilterFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterFn::Q(_) => f.write_str("FilterFn::Q(..)"),
            FilterFn::QuerySet(_) => f.write_str("FilterFn::QuerySet(..)"),
        }
    }
}

/// Result of a wrapped function.
#[derive(Debug, Clone, PartialEq)]
pub enum Filtered {
    Q(Q),
    QuerySet(QuerySet),
}

impl Filtered {
    /// Predicate form; a query set becomes `pk__in=<query set>`.
    pub fn into_q(self) -> Q {
        match self {
            Filtered::Q(q) => q,
            Filtered::QuerySet(qs) => pk_in(qs),
        }
    }
}

/// `pk__in=<qs>`, the predicate matching exactly the rows of `qs`.
pub(crate) fn pk_in(qs: QuerySet) -> Q {
    Q::lookup(format!("{PK_ALIAS}{LOOKUP_SEP}in"), qs)
}

/// A named, reusable filtering rule.
///
/// Implementors that only wrap a function need [`Declaration::func`];
/// specialisations override [`Declaration::call_bound`] to rewrite or
/// validate arguments first.
pub trait Declaration: Send + Sync {
    fn name(&self) -> &str;

    /// Model whose query sets the wrapped function filters.
    fn model(&self) -> &str;

    fn func(&self) -> Option<&FilterFn>;

    /// Invoke the wrapped function with `base` and `args`.
    fn call_bound(&self, base: &QuerySet, args: Args) -> Result<Filtered> {
        let func = self.func().ok_or_else(|| Error::Unbound {
            name: self.name().to_string(),
        })?;
        func.invoke(base, &args)
    }

    /// Bind to `target`, whose model must be [`Declaration::model`].
    fn bind(&self, target: &QuerySet) -> Bound<'_>
    where
        Self: Sized,
    {
        Bound::new(self, target.clone(), None)
    }

    /// Bind to `target`, reaching this declaration's model through `via`.
    fn bind_via(&self, target: &QuerySet, via: &str) -> Bound<'_>
    where
        Self: Sized,
    {
        Bound::new(self, target.clone(), Some(via.to_string()))
    }
}

// Shared declarations (`Arc<dyn Declaration>`) bind like concrete ones.
impl<'a> dyn Declaration + 'a {
    pub fn bind(&self, target: &QuerySet) -> Bound<'_> {
        Bound::new(self, target.clone(), None)
    }

    pub fn bind_via(&self, target: &QuerySet, via: &str) -> Bound<'_> {
        Bound::new(self, target.clone(), Some(via.to_string()))
    }
}

/// Declaration wrapping a single function.
#[derive(Clone)]
pub struct FlexQuery {
    name: String,
    model: String,
    func: Option<FilterFn>,
}

impl FlexQuery {
    /// Declaration without a function; calling it fails with [`Error::Unbound`].
    pub fn unbound(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            func: None,
        }
    }

    pub fn from_q<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(&QuerySet, &Args) -> Result<Q> + Send + Sync + 'static,
    {
        Self {
            func: Some(FilterFn::Q(Arc::new(func))),
            ..Self::unbound(name, model)
        }
    }

    pub fn from_queryset<F>(name: impl Into<String>, model: impl Into<String>, func: F) -> Self
    where
        F: Fn(QuerySet, &Args) -> Result<QuerySet> + Send + Sync + 'static,
    {
        Self {
            func: Some(FilterFn::QuerySet(Arc::new(func))),
            ..Self::unbound(name, model)
        }
    }

    /// Declaration returning a fixed predicate.
    pub fn from_static(name: impl Into<String>, model: impl Into<String>, q: Q) -> Self {
        Self::from_q(name, model, move |_, _| Ok(q.clone()))
    }

    /// Set the function of an unbound declaration.
    pub fn with_q<F>(self, func: F) -> Result<Self>
    where
        F: Fn(&QuerySet, &Args) -> Result<Q> + Send + Sync + 'static,
    {
        self.with_func(FilterFn::Q(Arc::new(func)))
    }

    pub fn with_queryset<F>(self, func: F) -> Result<Self>
    where
        F: Fn(QuerySet, &Args) -> Result<QuerySet> + Send + Sync + 'static,
    {
        self.with_func(FilterFn::QuerySet(Arc::new(func)))
    }

    fn with_func(mut self, func: FilterFn) -> Result<Self> {
        if self.func.is_some() {
            return Err(Error::AlreadyBound { name: self.name });
        }
        self.func = Some(func);
        Ok(self)
    }
}

impl Declaration for FlexQuery {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn func(&self) -> Option<&FilterFn> {
        self.func.as_ref()
    }
}

impl fmt::Debug for FlexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexQuery")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("func", &self.func)
            .finish()
    }
}

/// A declaration bound to the query set it filters.
#[derive(Clone)]
pub struct Bound<'d> {
    declaration: &'d dyn Declaration,
    target: QuerySet,
    via: Option<String>,
}

impl<'d> Bound<'d> {
    pub fn new(declaration: &'d dyn Declaration, target: QuerySet, via: Option<String>) -> Self {
        Self {
            declaration,
            target,
            via: via.filter(|path| !path.is_empty()),
        }
    }

    pub fn target(&self) -> &QuerySet {
        &self.target
    }

    pub fn via(&self) -> Option<&str> {
        self.via.as_deref()
    }

    /// Query set handed to the wrapped function.
    ///
    /// Without a traversal path this is a copy of the target; with one it is
    /// the full, unfiltered set of the model the path ends at.
    pub fn base(&self) -> Result<QuerySet> {
        let base = match &self.via {
            None => self.target.all(),
            Some(via) => {
                let schema = self.target.schema_arc();
                let related = schema.resolve_path(self.target.model_name(), via)?;
                QuerySet::new(Arc::clone(schema), &related.name)?
            }
        };
        if base.model_name() != self.declaration.model() {
            return Err(Error::ModelMismatch {
                name: self.declaration.name().to_string(),
                expected: self.declaration.model().to_string(),
                actual: base.model_name().to_string(),
            });
        }
        Ok(base)
    }

    /// Apply the declaration to the target query set.
    pub fn call(&self, mode: Mode, args: Args) -> Result<QuerySet> {
        let base = self.base()?;
        let filtered = self.declaration.call_bound(&base, args)?;
        debug!(
            declaration = %self.declaration.name(),
            mode = %mode,
            via = self.via.as_deref().unwrap_or(""),
            "applying flex query"
        );

        let result = match mode {
            Mode::Inline => match (&self.via, filtered) {
                (None, Filtered::QuerySet(qs)) => qs,
                (None, Filtered::Q(q)) => self.target.clone().filter(q),
                (Some(via), filtered) => self.target.clone().filter(filtered.into_q().prefix(via)),
            },
            Mode::Subquery => {
                let related = match filtered {
                    Filtered::Q(q) => base.filter(q),
                    Filtered::QuerySet(qs) => qs,
                };
                let key = match &self.via {
                    Some(via) => format!("{via}{LOOKUP_SEP}in"),
                    None => format!("{PK_ALIAS}{LOOKUP_SEP}in"),
                };
                self.target.clone().filter(Q::lookup(key, related))
            }
        };
        Ok(result)
    }

    /// Like [`Bound::call`] with the mode given by name.
    pub fn call_str(&self, mode: &str, args: Args) -> Result<QuerySet> {
        let mode: Mode = mode.parse()?;
        self.call(mode, args)
    }

    /// The predicate alone, expressed in the base model's namespace.
    pub fn as_q(&self, args: Args) -> Result<Q> {
        let base = self.base()?;
        Ok(self.declaration.call_bound(&base, args)?.into_q())
    }
}

impl fmt::Display for Bound<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<FlexQuery '{}', bound to {}", self.declaration.name(), self.target)?;
        if let Some(via) = &self.via {
            write!(f, " via '{via}'")?;
        }
        f.write_str(">")
    }
}

impl fmt::Debug for Bound<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("declaration", &self.declaration.name())
            .field("target", &self.target)
            .field("via", &self.via)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{ModelDefinition, Schema};

    fn schema() -> Arc<Schema> {
        Schema::builder()
            .model(ModelDefinition::new("Basket", "basket").field("label"))
            .model(
                ModelDefinition::new("Fruit", "fruit")
                    .field("size")
                    .foreign_key("basket", "Basket", Some("fruits")),
            )
            .build()
            .unwrap()
    }

    fn small() -> FlexQuery {
        FlexQuery::from_static("small", "Fruit", Q::lookup("size__lt", 10))
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("inline".parse::<Mode>().unwrap(), Mode::Inline);
        assert_eq!("join".parse::<Mode>().unwrap(), Mode::Inline);
        assert_eq!("subquery".parse::<Mode>().unwrap(), Mode::Subquery);
        assert_eq!("sub_query".parse::<Mode>().unwrap(), Mode::Subquery);
        let err = "bogus".parse::<Mode>().unwrap_err();
        assert!(matches!(err, Error::InvalidMode { ref mode } if mode == "bogus"));
    }

    #[test]
    fn inline_equals_manual_filter() {
        let fruits = schema().all("Fruit").unwrap();
        let decl = small();
        let result = decl.bind(&fruits).call(Mode::Inline, Args::new()).unwrap();
        assert_eq!(result, fruits.filter(Q::lookup("size__lt", 10)));
    }

    #[test]
    fn inline_via_prefixes_predicate() {
        let baskets = schema().all("Basket").unwrap();
        let decl = small();
        let result = decl
            .bind_via(&baskets, "fruits")
            .call(Mode::Inline, Args::new())
            .unwrap();
        assert_eq!(result, baskets.filter(Q::lookup("fruits__size__lt", 10)));
    }

    #[test]
    fn shared_declarations_bind_like_concrete_ones() {
        let baskets = schema().all("Basket").unwrap();
        let concrete = small();
        let shared: Arc<dyn Declaration> = Arc::new(small());
        let expected = concrete
            .bind_via(&baskets, "fruits")
            .call(Mode::Inline, Args::new())
            .unwrap();
        let result = shared
            .bind_via(&baskets, "fruits")
            .call(Mode::Inline, Args::new())
            .unwrap();
        assert_eq!(result, expected);
        assert_eq!(shared.bind(&baskets).target(), &baskets);
    }

    #[test]
    fn subquery_via_uses_membership() {
        let schema = schema();
        let baskets = schema.all("Basket").unwrap();
        let decl = small();
        let result = decl
            .bind_via(&baskets, "fruits")
            .call(Mode::Subquery, Args::new())
            .unwrap();
        let related = schema.all("Fruit").unwrap().filter(Q::lookup("size__lt", 10));
        assert_eq!(result, baskets.filter(Q::lookup("fruits__in", related)));
    }

    #[test]
    fn subquery_without_via_uses_pk() {
        let fruits = schema().all("Fruit").unwrap();
        let decl = small();
        let result = decl.bind(&fruits).call(Mode::Subquery, Args::new()).unwrap();
        let inner = fruits.clone().filter(Q::lookup("size__lt", 10));
        assert_eq!(result, fruits.filter(Q::lookup("pk__in", inner)));
    }

    #[test]
    fn bogus_mode_fails_before_the_function_runs() {
        let fruits = schema().all("Fruit").unwrap();
        let decl = FlexQuery::from_q("boom", "Fruit", |_, _| panic!("must not be called"));
        let err = decl.bind(&fruits).call_str("bogus", Args::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidMode { .. }));
    }

    #[test]
    fn arguments_are_relayed() {
        let fruits = schema().all("Fruit").unwrap();
        let decl = FlexQuery::from_q("smaller_than", "Fruit", |_, args| {
            let limit = args
                .get("limit")
                .cloned()
                .ok_or_else(|| Error::function("smaller_than", "missing 'limit'"))?;
            Ok(Q::lookup("size__lt", limit))
        });
        let bound = decl.bind(&fruits);
        let q = bound.as_q(Args::new().kwarg("limit", 5)).unwrap();
        assert_eq!(q, Q::lookup("size__lt", 5));

        let err = bound.as_q(Args::new()).unwrap_err();
        assert!(matches!(err, Error::Function { .. }));
    }

    #[test]
    fn queryset_functions_convert_to_pk_membership() {
        let fruits = schema().all("Fruit").unwrap();
        let decl = FlexQuery::from_queryset("small", "Fruit", |base, _| {
            Ok(base.filter(Q::lookup("size__lt", 10)))
        });
        let bound = decl.bind(&fruits);
        let expected_inner = fruits.clone().filter(Q::lookup("size__lt", 10));

        assert_eq!(bound.as_q(Args::new()).unwrap(), Q::lookup("pk__in", expected_inner.clone()));
        assert_eq!(bound.call(Mode::Inline, Args::new()).unwrap(), expected_inner);
    }

    #[test]
    fn unbound_fails_fast() {
        let fruits = schema().all("Fruit").unwrap();
        let decl = FlexQuery::unbound("pending", "Fruit");
        let err = decl.bind(&fruits).call(Mode::Inline, Args::new()).unwrap_err();
        assert!(matches!(err, Error::Unbound { ref name } if name == "pending"));
    }

    #[test]
    fn rebinding_is_rejected() {
        let decl = FlexQuery::unbound("pending", "Fruit")
            .with_q(|_, _| Ok(Q::new()))
            .unwrap();
        let err = decl.with_q(|_, _| Ok(Q::new())).unwrap_err();
        assert!(matches!(err, Error::AlreadyBound { .. }));
    }

    #[test]
    fn model_mismatch_is_rejected() {
        let baskets = schema().all("Basket").unwrap();
        let decl = small();
        let err = decl.bind(&baskets).call(Mode::Inline, Args::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::ModelMismatch { ref expected, ref actual, .. } if expected == "Fruit" && actual == "Basket"
        ));
    }

    #[test]
    fn display_names_declaration_and_target() {
        let baskets = schema().all("Basket").unwrap();
        let decl = small();
        assert_eq!(
            decl.bind_via(&baskets, "fruits").to_string(),
            "<FlexQuery 'small', bound to <QuerySet Basket: (AND: )> via 'fruits'>"
        );
    }
}

//! Reusable query filters for lazily built query sets.
//!
//! Declare a filtering rule once as a [`FlexQuery`] and apply it to any
//! query set that reaches the rule's model, either inline (the predicate is
//! prefixed with the relation path and compiled to joins) or as an
//! `IN (SELECT ...)` membership sub-query over the related model.
//!
//! ```
//! use flexquery::{Args, Declaration, FlexQuery, Mode, ModelDefinition, Q, Schema};
//!
//! let schema = Schema::builder()
//!     .model(ModelDefinition::new("Basket", "basket"))
//!     .model(
//!         ModelDefinition::new("Fruit", "fruit")
//!             .field("size")
//!             .foreign_key("basket", "Basket", Some("fruits")),
//!     )
//!     .build()?;
//!
//! let small = FlexQuery::from_static("small", "Fruit", Q::lookup("size__lt", 10));
//! let baskets = schema.all("Basket")?;
//! let with_small_fruit = small
//!     .bind_via(&baskets, "fruits")
//!     .call(Mode::Subquery, Args::new())?;
//! assert_eq!(with_small_fruit.model_name(), "Basket");
//! # Ok::<(), flexquery::Error>(())
//! ```

mod compiler;
pub mod config;
pub mod contrib;
pub mod error;
pub mod flexquery;
pub mod lookup;
pub mod manager;
pub mod model;
pub mod q;
pub mod queryset;
pub mod schema_file;
pub mod user;
pub mod value;

pub use config::{Backend, Config};
pub use contrib::{ForUserFlexQuery, NoUserBehavior, UserBasedFlexQuery};
pub use error::{Error, Result};
pub use flexquery::{Args, Bound, Declaration, FilterFn, Filtered, FlexQuery, Mode};
pub use manager::Manager;
pub use model::{Model, ModelDefinition, Schema};
pub use q::{Connector, LOOKUP_SEP, Lookup, Node, Q};
pub use queryset::{QuerySet, SortDirection};
pub use schema_file::{DeclarationDefinition, SchemaFile};
pub use user::{Request, User, UserArg};
pub use value::Value;

//! Lazy query sets.
//!
//! A [`QuerySet`] is an immutable description of a `SELECT` over one model:
//! a filter tree plus projection, ordering and paging. Every builder method
//! returns a new query set; nothing touches a database. Compile with
//! [`QuerySet::statement`] or render with [`QuerySet::to_sql`].

use std::fmt;
use std::sync::Arc;

use sea_query::SelectStatement;
use tracing::trace;

use crate::compiler;
use crate::config::Backend;
use crate::error::Result;
use crate::model::{Model, Schema};
use crate::q::Q;

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Immutable, composable query over one model.
#[derive(Debug, Clone)]
pub struct QuerySet {
    schema: Arc<Schema>,
    model: String,
    filter: Q,
    empty: bool,
    selected: Option<String>,
    distinct: bool,
    ordering: Vec<(String, SortDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QuerySet {
    /// Unfiltered query set over `model`.
    pub fn new(schema: Arc<Schema>, model: &str) -> Result<Self> {
        schema.model(model)?;
        Ok(Self {
            schema,
            model: model.to_string(),
            filter: Q::new(),
            empty: false,
            selected: None,
            distinct: false,
            ordering: Vec::new(),
            limit: None,
            offset: None,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Shared handle to the schema, for building sibling query sets.
    pub fn schema_arc(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn model(&self) -> Result<&Model> {
        self.schema.model(&self.model)
    }

    /// Accumulated filter tree.
    pub fn query(&self) -> &Q {
        &self.filter
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn ordering(&self) -> &[(String, SortDirection)] {
        &self.ordering
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Whether this query set was emptied with [`QuerySet::none`].
    pub fn is_none(&self) -> bool {
        self.empty
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Copy of this query set.
    pub fn all(&self) -> Self {
        self.clone()
    }

    /// Query set over the same model that matches no rows.
    pub fn none(mut self) -> Self {
        self.empty = true;
        self
    }

    /// Keep rows matching `q`.
    pub fn filter(mut self, q: impl Into<Q>) -> Self {
        let q = q.into();
        if !q.is_empty() {
            self.filter = std::mem::take(&mut self.filter) & q;
        }
        self
    }

    /// Drop rows matching `q`.
    pub fn exclude(mut self, q: impl Into<Q>) -> Self {
        let q = q.into();
        if !q.is_empty() {
            self.filter = std::mem::take(&mut self.filter) & !q;
        }
        self
    }

    /// Project a single column, as used by membership sub-queries.
    pub fn values(mut self, field: impl Into<String>) -> Self {
        self.selected = Some(field.into());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Append an ordering term; a leading `-` sorts descending.
    pub fn order_by(mut self, field: &str) -> Self {
        let term = match field.strip_prefix('-') {
            Some(name) => (name.to_string(), SortDirection::Desc),
            None => (field.to_string(), SortDirection::Asc),
        };
        self.ordering.push(term);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn unordered(mut self) -> Self {
        self.ordering.clear();
        self.limit = None;
        self.offset = None;
        self
    }

    /// Compile into a SeaQuery statement.
    pub fn statement(&self) -> Result<SelectStatement> {
        compiler::select(self, false)
    }

    /// Compile a `COUNT` over the same rows.
    pub fn count_statement(&self) -> Result<SelectStatement> {
        compiler::select(self, true)
    }

    /// Render SQL for `backend` with values inlined.
    pub fn to_sql(&self, backend: Backend) -> Result<String> {
        let sql = backend.render(&self.statement()?);
        trace!(model = %self.model, sql = %sql, "compiled query set");
        Ok(sql)
    }

    pub fn count_sql(&self, backend: Backend) -> Result<String> {
        Ok(backend.render(&self.count_statement()?))
    }
}

impl PartialEq for QuerySet {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.schema, &other.schema) || self.schema == other.schema)
            && self.model == other.model
            && self.filter == other.filter
            && self.empty == other.empty
            && self.selected == other.selected
            && self.distinct == other.distinct
            && self.ordering == other.ordering
            && self.limit == other.limit
            && self.offset == other.offset
    }
}

impl fmt::Display for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            write!(f, "<QuerySet {}: none>", self.model)
        } else {
            write!(f, "<QuerySet {}: {}>", self.model, self.filter)
        }
    }
}

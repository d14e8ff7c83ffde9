//! SeaQuery statement generation for query sets.
//!
//! Turns a query set's filter tree into a `SelectStatement`:
//! - lookups crossing relations become joins, one per distinct path
//! - joins reached only through AND branches are `INNER JOIN`; joins used
//!   under OR, NOT or an `isnull` lookup are promoted to `LEFT JOIN`
//! - query set values become `IN (SELECT ...)` membership sub-queries

use std::collections::HashMap;

use sea_query::{
    Alias, Asterisk, Cond, Condition, Expr, Func, LikeExpr, Order, Query,
    SelectStatement, SimpleExpr,
};

use crate::error::{Error, Result};
use crate::lookup::{self, LookupOp, ResolvedLookup, Target};
use crate::model::{Model, Schema};
use crate::q::{Connector, LOOKUP_SEP, Lookup, Node, Q};
use crate::queryset::{QuerySet, SortDirection};
use crate::value::Value;

/// A join collected while compiling lookups.
struct JoinSpec {
    table: String,
    alias: String,
    parent_alias: String,
    local_column: String,
    remote_column: String,
    left: bool,
}

/// Compiles filter trees rooted at one model.
pub(crate) struct Compiler<'s> {
    schema: &'s Schema,
    root: &'s Model,
    joins: Vec<JoinSpec>,
    by_path: HashMap<String, usize>,
}

impl<'s> Compiler<'s> {
    pub(crate) fn new(schema: &'s Schema, root: &'s Model) -> Self {
        Self {
            schema,
            root,
            joins: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Alias of the root table.
    pub(crate) fn root_alias(&self) -> &str {
        &self.root.table
    }

    /// Compile a filter tree. Empty trees yield `None` (no constraint).
    pub(crate) fn compile_q(&mut self, q: &Q, promote: bool) -> Result<Option<Condition>> {
        if q.is_empty() {
            return Ok(None);
        }

        // Disjunctions and negations must keep rows without related rows.
        let promote =
            promote || q.is_negated() || (q.connector() == Connector::Or && q.len() > 1);

        let mut cond = match q.connector() {
            Connector::And => Cond::all(),
            Connector::Or => Cond::any(),
        };
        for child in q.children() {
            match child {
                Node::Q(nested) => {
                    if let Some(nested) = self.compile_q(nested, promote)? {
                        cond = cond.add(nested);
                    }
                }
                Node::Lookup(lookup) => {
                    cond = cond.add(self.compile_lookup(lookup, promote)?);
                }
            }
        }

        Ok(Some(if q.is_negated() { cond.not() } else { cond }))
    }

    /// Resolve a field path to a qualified column, adding joins as needed.
    pub(crate) fn column(&mut self, path: &str) -> Result<(String, String)> {
        let resolved = lookup::resolve(self.schema, self.root, path, false)?;
        if resolved.op != LookupOp::Exact {
            return Err(Error::UnknownLookup {
                key: path.to_string(),
                lookup: resolved.op.to_string(),
            });
        }
        let alias = self.join_hops(&resolved, false);
        let column = match resolved.target {
            Target::Field { field, .. } => field.column.clone(),
            Target::Relation { relation, model, .. } => relation.local_column(model).to_string(),
        };
        Ok((alias, column))
    }

    /// Add every collected join to `query`.
    pub(crate) fn apply_joins(&self, query: &mut SelectStatement) {
        for join in &self.joins {
            let on = Expr::col((Alias::new(&join.parent_alias), Alias::new(&join.local_column)))
                .equals((Alias::new(&join.alias), Alias::new(&join.remote_column)));
            let kind = if join.left {
                sea_query::JoinType::LeftJoin
            } else {
                sea_query::JoinType::InnerJoin
            };
            query.join_as(kind, Alias::new(&join.table), Alias::new(&join.alias), on);
        }
    }

    fn compile_lookup(&mut self, lookup: &Lookup, promote: bool) -> Result<SimpleExpr> {
        let key = lookup.key.as_str();
        let is_query = matches!(lookup.value, Value::Query(_));
        let resolved = lookup::resolve(self.schema, self.root, key, is_query)?;
        let left = promote || resolved.op == LookupOp::IsNull;
        let alias = self.join_hops(&resolved, left);

        match resolved.target {
            Target::Field { field, .. } => {
                let col = Expr::col((Alias::new(&alias), Alias::new(&field.column)));
                match &lookup.value {
                    Value::Query(qs) => membership(key, col, resolved.op, qs, None),
                    value => compare(key, col, resolved.op, value),
                }
            }
            Target::Relation {
                model,
                relation,
                target,
            } => {
                let col = Expr::col((
                    Alias::new(&alias),
                    Alias::new(relation.local_column(model)),
                ));
                match &lookup.value {
                    Value::Query(qs) => {
                        if qs.model_name() != target.name {
                            return Err(Error::invalid_value(
                                key,
                                format!(
                                    "expected a query set over '{}', got one over '{}'",
                                    target.name,
                                    qs.model_name()
                                ),
                            ));
                        }
                        membership(key, col, resolved.op, qs, Some(relation.remote_column(target)))
                    }
                    value => compare(key, col, resolved.op, value),
                }
            }
        }
    }

    // Register joins for every hop and return the alias the target lives in.
    fn join_hops(&mut self, resolved: &ResolvedLookup<'s>, left: bool) -> String {
        let mut parent = self.root.table.clone();
        let mut path = String::new();
        for hop in &resolved.hops {
            if !path.is_empty() {
                path.push_str(LOOKUP_SEP);
            }
            path.push_str(&hop.relation.name);

            let index = match self.by_path.get(&path) {
                Some(&index) => index,
                None => {
                    let alias = if path == self.root.table {
                        format!("{path}_j")
                    } else {
                        path.clone()
                    };
                    self.joins.push(JoinSpec {
                        table: hop.target.table.clone(),
                        alias,
                        parent_alias: parent.clone(),
                        local_column: hop.relation.local_column(hop.source).to_string(),
                        remote_column: hop.relation.remote_column(hop.target).to_string(),
                        left,
                    });
                    self.by_path.insert(path.clone(), self.joins.len() - 1);
                    self.joins.len() - 1
                }
            };
            let join = &mut self.joins[index];
            join.left |= left;
            parent = join.alias.clone();
        }
        parent
    }
}

/// Compile a complete `SELECT` for a query set.
pub(crate) fn select(qs: &QuerySet, count: bool) -> Result<SelectStatement> {
    let schema = qs.schema();
    let model = schema.model(qs.model_name())?;
    let mut compiler = Compiler::new(schema, model);
    let root = compiler.root_alias().to_string();

    let cond = compiler.compile_q(qs.query(), false)?;

    let selected = match qs.selected() {
        Some(path) => Some(compiler.column(path)?),
        None => None,
    };

    let mut ordering = Vec::new();
    if !count {
        for (path, direction) in qs.ordering() {
            let column = compiler.column(path)?;
            let order = match direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            ordering.push((column, order));
        }
    }

    let mut query = Query::select();

    if count {
        if qs.is_distinct() {
            let (alias, column) = selected
                .clone()
                .unwrap_or_else(|| (root.clone(), model.pk.clone()));
            query.expr(Func::count_distinct(Expr::col((
                Alias::new(alias),
                Alias::new(column),
            ))));
        } else {
            query.expr(Expr::col(Asterisk).count());
        }
    } else {
        match &selected {
            Some((alias, column)) => {
                query.column((Alias::new(alias), Alias::new(column)));
            }
            None => {
                query.column((Alias::new(&root), Asterisk));
            }
        }
        if qs.is_distinct() {
            query.distinct();
        }
    }

    query.from(Alias::new(&model.table));
    compiler.apply_joins(&mut query);

    if let Some(cond) = cond {
        query.cond_where(cond);
    }
    if qs.is_none() {
        query.and_where(Expr::cust("1 = 0"));
    }

    for ((alias, column), order) in ordering {
        query.order_by((Alias::new(alias), Alias::new(column)), order);
    }

    if !count {
        if let Some(limit) = qs.limit_value() {
            query.limit(limit);
        }
        if let Some(offset) = qs.offset_value() {
            query.offset(offset);
        }
    }

    Ok(query)
}

/// Compile a membership sub-query selecting a single key column.
///
/// The column is the query set's `values()` projection, then `default_column`,
/// then the primary key. Columns other than the primary key may hold NULL,
/// which turns a negated `IN` into NULL for every row, so those rows are
/// filtered out of the sub-query.
fn subquery(qs: &QuerySet, default_column: Option<&str>) -> Result<SelectStatement> {
    let mut qs = qs.clone();
    if qs.selected().is_none() {
        let column = match default_column {
            Some(column) => column.to_string(),
            None => crate::model::PK_ALIAS.to_string(),
        };
        qs = qs.values(column);
    }
    // Ordering inside IN (...) is meaningless and rejected by some backends.
    let qs = qs.unordered();
    let mut query = select(&qs, false)?;

    let model = qs.model()?;
    if let Some(path) = qs.selected() {
        // Join aliases depend only on the path, so this matches the select above.
        let (alias, column) = Compiler::new(qs.schema(), model).column(path)?;
        if alias != model.table || column != model.pk {
            query.and_where(Expr::col((Alias::new(alias), Alias::new(column))).is_not_null());
        }
    }
    Ok(query)
}

fn membership(
    key: &str,
    col: Expr,
    op: LookupOp,
    qs: &QuerySet,
    default_column: Option<&str>,
) -> Result<SimpleExpr> {
    if op != LookupOp::In {
        return Err(Error::invalid_value(
            key,
            format!("query set values need the 'in' lookup, not '{op}'"),
        ));
    }
    Ok(col.in_subquery(subquery(qs, default_column)?))
}

fn compare(key: &str, col: Expr, op: LookupOp, value: &Value) -> Result<SimpleExpr> {
    let expr = match op {
        LookupOp::Exact => match value {
            Value::Null => col.is_null(),
            value => col.eq(scalar(key, value)?),
        },
        LookupOp::IExact => {
            let text = text(key, value)?;
            Expr::expr(Func::lower(col)).eq(text.to_lowercase())
        }
        LookupOp::Lt => col.lt(scalar(key, value)?),
        LookupOp::Lte => col.lte(scalar(key, value)?),
        LookupOp::Gt => col.gt(scalar(key, value)?),
        LookupOp::Gte => col.gte(scalar(key, value)?),
        LookupOp::In => {
            let Value::List(items) = value else {
                return Err(Error::invalid_value(key, "'in' needs a list or a query set"));
            };
            let items = items
                .iter()
                .map(|item| scalar(key, item))
                .collect::<Result<Vec<_>>>()?;
            col.is_in(items)
        }
        LookupOp::Contains => col.like(like(format!("%{}%", escape_like_wildcards(text(key, value)?)))),
        LookupOp::IContains => Expr::expr(Func::lower(col)).like(like(format!(
            "%{}%",
            escape_like_wildcards(&text(key, value)?.to_lowercase())
        ))),
        LookupOp::StartsWith => col.like(like(format!("{}%", escape_like_wildcards(text(key, value)?)))),
        LookupOp::EndsWith => col.like(like(format!("%{}", escape_like_wildcards(text(key, value)?)))),
        LookupOp::IsNull => match value.as_bool() {
            Some(true) => col.is_null(),
            Some(false) => col.is_not_null(),
            None => return Err(Error::invalid_value(key, "'isnull' needs a boolean")),
        },
        LookupOp::Range => match value {
            Value::List(bounds) if bounds.len() == 2 => {
                col.between(scalar(key, &bounds[0])?, scalar(key, &bounds[1])?)
            }
            _ => return Err(Error::invalid_value(key, "'range' needs a list of two values")),
        },
    };
    Ok(expr)
}

fn scalar(key: &str, value: &Value) -> Result<sea_query::Value> {
    match value {
        Value::Bool(b) => Ok((*b).into()),
        Value::Int(i) => Ok((*i).into()),
        Value::Float(f) => Ok((*f).into()),
        Value::Text(s) => Ok(s.clone().into()),
        Value::Null => Err(Error::invalid_value(key, "NULL only works with exact or isnull")),
        Value::List(_) => Err(Error::invalid_value(key, "lists only work with 'in' or 'range'")),
        Value::Query(_) => Err(Error::invalid_value(key, "query sets only work with 'in'")),
    }
}

fn text<'v>(key: &str, value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| Error::invalid_value(key, format!("expected text, got {value}")))
}

fn like(pattern: String) -> LikeExpr {
    LikeExpr::new(pattern).escape('\\')
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

//! Lookup key resolution.
//!
//! Splits a key such as `fruits__basket__label__icontains` into the
//! relation hops it walks, the field or relation it ends at and the
//! comparison operator. Resolution is schema-aware but knows nothing about
//! SQL; the compiler turns the result into joins and expressions.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::{Field, Model, PK_ALIAS, Relation, RelationKind, Schema};
use crate::q::LOOKUP_SEP;

/// Comparison operator at the end of a lookup key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LookupOp {
    #[default]
    Exact,
    IExact,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    IsNull,
    Range,
}

impl LookupOp {
    pub const ALL: [LookupOp; 13] = [
        LookupOp::Exact,
        LookupOp::IExact,
        LookupOp::Lt,
        LookupOp::Lte,
        LookupOp::Gt,
        LookupOp::Gte,
        LookupOp::In,
        LookupOp::Contains,
        LookupOp::IContains,
        LookupOp::StartsWith,
        LookupOp::EndsWith,
        LookupOp::IsNull,
        LookupOp::Range,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LookupOp::Exact => "exact",
            LookupOp::IExact => "iexact",
            LookupOp::Lt => "lt",
            LookupOp::Lte => "lte",
            LookupOp::Gt => "gt",
            LookupOp::Gte => "gte",
            LookupOp::In => "in",
            LookupOp::Contains => "contains",
            LookupOp::IContains => "icontains",
            LookupOp::StartsWith => "startswith",
            LookupOp::EndsWith => "endswith",
            LookupOp::IsNull => "isnull",
            LookupOp::Range => "range",
        }
    }
}

impl FromStr for LookupOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LookupOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for LookupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relation traversed on the way to the lookup target.
#[derive(Debug, Clone, Copy)]
pub struct Hop<'s> {
    pub source: &'s Model,
    pub relation: &'s Relation,
    pub target: &'s Model,
}

/// What a lookup key ends at.
#[derive(Debug, Clone, Copy)]
pub enum Target<'s> {
    /// A plain column.
    Field { model: &'s Model, field: &'s Field },
    /// A relation compared by key (`basket=3`, `fruits__in=<query set>`).
    Relation {
        model: &'s Model,
        relation: &'s Relation,
        target: &'s Model,
    },
}

/// A fully resolved lookup key.
#[derive(Debug, Clone)]
pub struct ResolvedLookup<'s> {
    /// Relations walked before reaching the target, outermost first.
    pub hops: Vec<Hop<'s>>,
    pub target: Target<'s>,
    pub op: LookupOp,
}

/// Resolve `key` starting at `root`.
///
/// A relation at the end of the key is returned as [`Target::Relation`]
/// so membership sub-queries can compare keys without a join. Reverse
/// relations compared to plain values are walked one step further to the
/// target's primary key unless `keep_relation` is set.
pub fn resolve<'s>(
    schema: &'s Schema,
    root: &'s Model,
    key: &str,
    keep_relation: bool,
) -> Result<ResolvedLookup<'s>> {
    let segments: Vec<&str> = key.split(LOOKUP_SEP).collect();
    let mut hops = Vec::new();
    let mut current = root;
    let mut index = 0;

    while index < segments.len() {
        let segment = segments[index];
        let rest = &segments[index + 1..];

        if segment != PK_ALIAS
            && let Some(relation) = current.relation(segment)
        {
            let target = schema.model(&relation.target)?;
            let continues = rest
                .first()
                .is_some_and(|next| *next == PK_ALIAS || target.field(next).is_some() || target.relation(next).is_some());

            if continues {
                hops.push(Hop {
                    source: current,
                    relation,
                    target,
                });
                current = target;
                index += 1;
                continue;
            }

            let op = parse_op(key, rest)?;
            if relation.kind == RelationKind::Reverse && !keep_relation {
                hops.push(Hop {
                    source: current,
                    relation,
                    target,
                });
                let field = target
                    .field(PK_ALIAS)
                    .ok_or_else(|| Error::unknown_field(&target.name, PK_ALIAS, &target.choices()))?;
                return Ok(ResolvedLookup {
                    hops,
                    target: Target::Field {
                        model: target,
                        field,
                    },
                    op,
                });
            }
            return Ok(ResolvedLookup {
                hops,
                target: Target::Relation {
                    model: current,
                    relation,
                    target,
                },
                op,
            });
        }

        if let Some(field) = current.field(segment) {
            let op = parse_op(key, rest)?;
            return Ok(ResolvedLookup {
                hops,
                target: Target::Field {
                    model: current,
                    field,
                },
                op,
            });
        }

        return Err(Error::unknown_field(
            &current.name,
            segment,
            &current.choices(),
        ));
    }

    Err(Error::UnknownLookup {
        key: key.to_string(),
        lookup: String::new(),
    })
}

fn parse_op(key: &str, rest: &[&str]) -> Result<LookupOp> {
    match rest {
        [] => Ok(LookupOp::Exact),
        [op] => op.parse().map_err(|()| Error::UnknownLookup {
            key: key.to_string(),
            lookup: (*op).to_string(),
        }),
        _ => Err(Error::UnknownLookup {
            key: key.to_string(),
            lookup: rest.join(LOOKUP_SEP),
        }),
    }
}

//! Filter expression trees.
//!
//! A [`Q`] is a boolean tree of `lookup key -> value` comparisons combined
//! with AND / OR and optionally negated. Trees are immutable in effect:
//! composition and [`Q::prefix`] return new trees and never touch their
//! operands.
//!
//! Lookup keys are paths separated by [`LOOKUP_SEP`], for example
//! `fruits__size__lt`: relation `fruits`, field `size`, operator `lt`.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Separator between lookup key segments.
pub const LOOKUP_SEP: &str = "__";

/// Logical connective joining the children of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connector::And => f.write_str("AND"),
            Connector::Or => f.write_str("OR"),
        }
    }
}

/// A single `key = value` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    /// Lookup path, e.g. `basket__label__icontains`.
    pub key: String,
    /// Right-hand side of the comparison.
    pub value: Value,
}

impl Lookup {
    /// Create a lookup.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', {})", self.key, self.value)
    }
}

/// Child of a [`Q`] node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// Leaf comparison.
    Lookup(Lookup),
    /// Nested expression.
    Q(Q),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Q(q) => write!(f, "{q}"),
            Node::Lookup(lookup) => write!(f, "{lookup}"),
        }
    }
}

/// Boolean filter expression.
///
/// An empty `Q` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Q {
    #[serde(default)]
    children: Vec<Node>,
    #[serde(default)]
    connector: Connector,
    #[serde(default)]
    negated: bool,
}

impl Q {
    /// Create an empty expression (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an expression holding a single lookup.
    pub fn lookup(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            children: vec![Node::Lookup(Lookup::new(key, value))],
            ..Self::default()
        }
    }

    /// Create an AND expression from keyword-style lookups.
    ///
    /// Keys are sorted so the resulting tree does not depend on the order
    /// the caller listed them in.
    pub fn from_lookups<I, K, V>(lookups: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut children: Vec<Lookup> = lookups
            .into_iter()
            .map(|(key, value)| Lookup::new(key, value))
            .collect();
        children.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            children: children.into_iter().map(Node::Lookup).collect(),
            ..Self::default()
        }
    }

    /// Build a node from raw parts, without any squashing.
    pub fn from_parts(children: Vec<Node>, connector: Connector, negated: bool) -> Self {
        Self {
            children,
            connector,
            negated,
        }
    }

    /// AND together any number of expressions.
    pub fn all(exprs: impl IntoIterator<Item = Q>) -> Self {
        exprs.into_iter().fold(Self::new(), |acc, q| acc & q)
    }

    /// OR together any number of expressions.
    pub fn any(exprs: impl IntoIterator<Item = Q>) -> Self {
        exprs.into_iter().fold(Self::new(), |acc, q| acc | q)
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn connector(&self) -> Connector {
        self.connector
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// True when the expression has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Iterate over every leaf lookup, depth first.
    pub fn lookups(&self) -> Lookups<'_> {
        Lookups {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Combine with another expression under `conn`.
    ///
    /// An empty operand yields a copy of the other one.
    pub fn combine(self, other: Q, conn: Connector) -> Q {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let mut obj = Q {
            children: Vec::with_capacity(2),
            connector: conn,
            negated: false,
        };
        obj.add(self, conn);
        obj.add(other, conn);
        obj
    }

    /// Return a copy with negation toggled.
    pub fn negate(mut self) -> Q {
        self.negated = !self.negated;
        self
    }

    // Squash `data` into this node when that keeps the meaning unchanged.
    fn add(&mut self, data: Q, conn: Connector) {
        if self.connector != conn {
            let previous = std::mem::take(self);
            self.connector = conn;
            self.children = vec![Node::Q(previous), Node::Q(data)];
        } else if !data.negated && (data.connector == conn || data.children.len() == 1) {
            self.children.extend(data.children);
        } else {
            self.children.push(Node::Q(data));
        }
    }

    /// Copy the tree, prepending `prefix` to every lookup key.
    ///
    /// `prefix` may span several relations (`tree__fruit`). Connectors,
    /// negation, nesting and values are preserved; nested query set values
    /// keep their own keys since they are evaluated in their own model.
    pub fn prefix(&self, prefix: &str) -> Q {
        if prefix.is_empty() {
            return self.clone();
        }
        Q {
            children: self
                .children
                .iter()
                .map(|child| match child {
                    Node::Q(q) => Node::Q(q.prefix(prefix)),
                    Node::Lookup(lookup) => Node::Lookup(Lookup {
                        key: format!("{prefix}{LOOKUP_SEP}{}", lookup.key),
                        value: lookup.value.clone(),
                    }),
                })
                .collect(),
            connector: self.connector,
            negated: self.negated,
        }
    }
}

impl fmt::Display for Q {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "(NOT ({}: ", self.connector)?;
        } else {
            write!(f, "({}: ", self.connector)?;
        }
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{child}")?;
        }
        if self.negated {
            f.write_str("))")
        } else {
            f.write_str(")")
        }
    }
}

impl From<Lookup> for Q {
    fn from(lookup: Lookup) -> Self {
        Self {
            children: vec![Node::Lookup(lookup)],
            ..Self::default()
        }
    }
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        self.combine(rhs, Connector::And)
    }
}

impl BitAnd for &Q {
    type Output = Q;

    fn bitand(self, rhs: &Q) -> Q {
        self.clone().combine(rhs.clone(), Connector::And)
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        self.combine(rhs, Connector::Or)
    }
}

impl BitOr for &Q {
    type Output = Q;

    fn bitor(self, rhs: &Q) -> Q {
        self.clone().combine(rhs.clone(), Connector::Or)
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        self.negate()
    }
}

impl Not for &Q {
    type Output = Q;

    fn not(self) -> Q {
        self.clone().negate()
    }
}

/// Depth-first iterator over the leaves of a [`Q`].
pub struct Lookups<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Lookups<'a> {
    type Item = &'a Lookup;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Node::Lookup(lookup) => return Some(lookup),
                Node::Q(q) => self.stack.extend(q.children.iter().rev()),
            }
        }
        None
    }
}

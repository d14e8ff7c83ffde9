//! Error types with clear, actionable messages.
//!
//! Every error names the declaration, model or lookup it concerns so a
//! misconfigured filter can be traced back to where it was declared.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while declaring, binding or compiling filters.
#[derive(Debug, Error)]
pub enum Error {
    /// Mode selector is neither `inline` nor `subquery`.
    #[error("invalid flex query mode '{mode}'. Valid modes: inline, subquery")]
    InvalidMode { mode: String },

    /// Declaration was invoked before a filter function was set.
    #[error("flex query '{name}' has no filter function; use from_q or from_queryset")]
    Unbound { name: String },

    /// A filter function was set on a declaration that already has one.
    #[error("flex query '{name}' already has a filter function and cannot be rebound")]
    AlreadyBound { name: String },

    /// A user-scoped declaration was invoked without a usable user.
    #[error("flex query '{name}' requires a user, but none was given")]
    MissingUser { name: String },

    /// Model name not present in the schema.
    #[error("unknown model '{model}'")]
    UnknownModel { model: String },

    /// Lookup segment is neither a field nor a relation of the model.
    #[error("model '{model}' has no field or relation '{field}'. Choices are: {choices}")]
    UnknownField {
        model: String,
        field: String,
        choices: String,
    },

    /// Trailing lookup operator is not supported.
    #[error("unsupported lookup '{lookup}' in '{key}'")]
    UnknownLookup { key: String, lookup: String },

    /// Value does not fit the lookup it is used with.
    #[error("invalid value for '{key}': {details}")]
    InvalidValue { key: String, details: String },

    /// Declaration filters a different model than the one it was bound to.
    #[error("flex query '{name}' filters model '{expected}', but was bound to '{actual}'")]
    ModelMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// No declaration with that name is attached to the manager.
    #[error("manager for '{model}' has no flex query named '{name}'")]
    UnknownDeclaration { model: String, name: String },

    /// Schema definition failed validation.
    #[error("invalid schema: {details}")]
    InvalidSchema { details: String },

    /// Error raised by a wrapped filter function.
    #[error("flex query '{name}' failed: {message}")]
    Function { name: String, message: String },
}

impl Error {
    /// Create an unknown field error listing the available choices.
    pub fn unknown_field(
        model: impl Into<String>,
        field: impl Into<String>,
        choices: &[&str],
    ) -> Self {
        let mut choices = choices.to_vec();
        choices.sort_unstable();
        Self::UnknownField {
            model: model.into(),
            field: field.into(),
            choices: choices.join(", "),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            details: details.into(),
        }
    }

    /// Create an invalid schema error.
    pub fn invalid_schema(details: impl Into<String>) -> Self {
        Self::InvalidSchema {
            details: details.into(),
        }
    }

    /// Wrap a failure reported by a filter function.
    pub fn function(name: impl Into<String>, message: impl ToString) -> Self {
        Self::Function {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_mode_lists_valid_options() {
        let msg = Error::InvalidMode {
            mode: "bogus".to_string(),
        }
        .to_string();
        assert!(msg.contains("bogus"));
        assert!(msg.contains("inline"));
        assert!(msg.contains("subquery"));
    }

    #[test]
    fn unknown_field_sorts_choices() {
        let err = Error::unknown_field("Fruit", "colour", &["size", "basket", "id"]);
        let msg = err.to_string();
        assert!(msg.contains("colour"));
        assert!(msg.contains("basket, id, size"));
    }

    #[test]
    fn unbound_points_at_constructors() {
        let msg = Error::Unbound {
            name: "available".to_string(),
        }
        .to_string();
        assert!(msg.contains("available"));
        assert!(msg.contains("from_q"));
    }
}

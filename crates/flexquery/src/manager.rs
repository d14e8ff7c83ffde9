//! Per-model entry point holding named declarations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::flexquery::{Bound, Declaration};
use crate::model::Schema;
use crate::queryset::QuerySet;

/// Query entry point for one model, with declarations attached by name.
#[derive(Clone)]
pub struct Manager {
    schema: Arc<Schema>,
    model: String,
    declarations: BTreeMap<String, Arc<dyn Declaration>>,
}

impl Manager {
    /// Manager for `model`, which must exist in `schema`.
    pub fn new(schema: Arc<Schema>, model: &str) -> Result<Self> {
        schema.model(model)?;
        Ok(Self {
            schema,
            model: model.to_string(),
            declarations: BTreeMap::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Attach a declaration under its own name, replacing any previous one.
    pub fn with_declaration(self, declaration: impl Declaration + 'static) -> Self {
        self.attach(Arc::new(declaration))
    }

    /// Attach a shared declaration.
    pub fn attach(mut self, declaration: Arc<dyn Declaration>) -> Self {
        debug!(model = %self.model, declaration = %declaration.name(), "attaching flex query");
        self.declarations
            .insert(declaration.name().to_string(), declaration);
        self
    }

    /// Copy every declaration attached to `other`.
    pub fn with_declarations_from(self, other: &Manager) -> Self {
        other
            .declarations()
            .fold(self, |manager, declaration| manager.attach(Arc::clone(declaration)))
    }

    pub fn declarations(&self) -> impl Iterator<Item = &Arc<dyn Declaration>> {
        self.declarations.values()
    }

    /// Full query set over the model.
    pub fn objects(&self) -> Result<QuerySet> {
        QuerySet::new(Arc::clone(&self.schema), &self.model)
    }

    pub fn all(&self) -> Result<QuerySet> {
        self.objects()
    }

    /// Bind the declaration `name` to this model's full query set.
    pub fn flex(&self, name: &str) -> Result<Bound<'_>> {
        Ok(Bound::new(self.declaration(name)?, self.objects()?, None))
    }

    /// Bind the declaration `name`, reaching its model through `via`.
    pub fn flex_via(&self, name: &str, via: &str) -> Result<Bound<'_>> {
        Ok(Bound::new(self.declaration(name)?, self.objects()?, Some(via.to_string())))
    }

    fn declaration(&self, name: &str) -> Result<&dyn Declaration> {
        self.declarations
            .get(name)
            .map(|declaration| declaration.as_ref())
            .ok_or_else(|| Error::UnknownDeclaration {
                model: self.model.clone(),
                name: name.to_string(),
            })
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &self.model)
            .field("declarations", &self.declarations.keys().collect::<Vec<_>>())
            .finish()
    }
}

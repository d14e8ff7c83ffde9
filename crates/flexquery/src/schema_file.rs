//! Parser for schema and declaration files.
//!
//! A schema file lists the models query sets run against and, optionally,
//! named declarations with static lookups:
//! - `[[models]]`: name, table, primary key, fields and foreign keys
//! - `[[declarations]]`: name, model, `filter` and `exclude` lookup maps
//!
//! Files ending in `.json` are read as JSON, everything else as TOML.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::flexquery::FlexQuery;
use crate::manager::Manager;
use crate::model::{ModelDefinition, Schema};
use crate::q::Q;
use crate::value::Value;

/// Contents of a schema file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    pub models: Vec<ModelDefinition>,

    #[serde(default)]
    pub declarations: Vec<DeclarationDefinition>,
}

/// A declaration whose predicate is a fixed set of lookups.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarationDefinition {
    pub name: String,

    /// Model the lookups are relative to.
    pub model: String,

    /// Lookups rows must match.
    #[serde(default)]
    pub filter: BTreeMap<String, Value>,

    /// Lookups rows must not match.
    #[serde(default)]
    pub exclude: BTreeMap<String, Value>,
}

impl DeclarationDefinition {
    pub fn predicate(&self) -> Q {
        Q::from_lookups(self.filter.clone()) & !Q::from_lookups(self.exclude.clone())
    }

    pub fn to_flex_query(&self) -> FlexQuery {
        FlexQuery::from_static(&self.name, &self.model, self.predicate())
    }
}

impl SchemaFile {
    /// Parse a schema file from the given path.
    pub fn parse(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schema file: {}", path.display()))?;

        Self::parse_str(&content, path)
    }

    /// Parse a schema file from a string; `path` selects the format.
    pub fn parse_str(content: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let file: SchemaFile = if is_json {
            serde_json::from_str(content)
                .with_context(|| format!("failed to parse schema JSON at {}", path.display()))?
        } else {
            toml::from_str(content)
                .with_context(|| format!("failed to parse schema TOML at {}", path.display()))?
        };

        file.validate(path)?;
        Ok(file)
    }

    /// Build the model registry.
    pub fn schema(&self) -> crate::Result<Arc<Schema>> {
        Schema::from_definitions(self.models.clone()).map(Arc::new)
    }

    pub fn declaration(&self, name: &str) -> Option<&DeclarationDefinition> {
        self.declarations.iter().find(|d| d.name == name)
    }

    /// One manager per model, each holding the declarations for its model.
    pub fn managers(&self, schema: &Arc<Schema>) -> crate::Result<BTreeMap<String, Manager>> {
        let mut managers = BTreeMap::new();
        for model in schema.models() {
            let manager = self
                .declarations
                .iter()
                .filter(|d| d.model == model.name)
                .fold(Manager::new(Arc::clone(schema), &model.name)?, |manager, d| {
                    manager.with_declaration(d.to_flex_query())
                });
            managers.insert(model.name.clone(), manager);
        }
        Ok(managers)
    }

    /// Validate models and check every declaration compiles.
    fn validate(&self, path: &Path) -> Result<()> {
        let schema = self
            .schema()
            .with_context(|| format!("invalid models in {}", path.display()))?;

        let mut seen = BTreeSet::new();
        for declaration in &self.declarations {
            if declaration.name.is_empty() {
                anyhow::bail!(
                    "declaration for model '{}' in {} has empty 'name' field",
                    declaration.model,
                    path.display()
                );
            }
            if !seen.insert(declaration.name.as_str()) {
                anyhow::bail!(
                    "duplicate declaration '{}' in {}",
                    declaration.name,
                    path.display()
                );
            }
            schema
                .all(&declaration.model)
                .and_then(|qs| qs.filter(declaration.predicate()).statement())
                .with_context(|| {
                    format!(
                        "declaration '{}' in {} does not compile",
                        declaration.name,
                        path.display()
                    )
                })?;
        }

        Ok(())
    }
}

//! Model registry.
//!
//! A [`Schema`] describes the tables query sets run against: each model's
//! table, primary key, plain fields and relations. Forward foreign keys are
//! declared on the owning model; the reverse accessor is derived on the
//! target model from `related_name` (or the lowercased model name).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::q::LOOKUP_SEP;
use crate::queryset::QuerySet;

/// Primary key alias accepted in lookups.
pub const PK_ALIAS: &str = "pk";

/// Plain column on a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Name used in lookups.
    pub name: String,
    /// Database column.
    pub column: String,
}

/// Direction of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Foreign key column lives on this model and points at the target's pk.
    ForeignKey,
    /// Foreign key column lives on the target and points at this model's pk.
    Reverse,
}

/// Named relation from one model to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Name used in lookups.
    pub name: String,
    /// Target model name.
    pub target: String,
    /// Relation direction.
    pub kind: RelationKind,
    /// Foreign key column (on this model for forward keys, on the target
    /// for reverse accessors).
    pub column: String,
}

impl Relation {
    /// Column on the source model that identifies related rows.
    pub fn local_column<'a>(&'a self, source: &'a Model) -> &'a str {
        match self.kind {
            RelationKind::ForeignKey => &self.column,
            RelationKind::Reverse => &source.pk,
        }
    }

    /// Column on the target model matched against [`Relation::local_column`].
    pub fn remote_column<'a>(&'a self, target: &'a Model) -> &'a str {
        match self.kind {
            RelationKind::ForeignKey => &target.pk,
            RelationKind::Reverse => &self.column,
        }
    }
}

/// Table metadata for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub table: String,
    /// Primary key column.
    pub pk: String,
    fields: Vec<Field>,
    relations: Vec<Relation>,
}

impl Model {
    /// Look up a plain field; `pk` resolves to the primary key.
    pub fn field(&self, name: &str) -> Option<&Field> {
        let name = if name == PK_ALIAS { self.pk.as_str() } else { name };
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Every name a lookup segment may use on this model.
    pub fn choices(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        names.extend(self.relations.iter().map(|r| r.name.as_str()));
        names.push(PK_ALIAS);
        names
    }

    fn has_name(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name) || self.relations.iter().any(|r| r.name == name)
    }
}

// ---------------------------------------------------------------------------
// Definitions (serde)
// ---------------------------------------------------------------------------

/// Declarative model description, as read from a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Model name (e.g. "Fruit").
    pub name: String,

    /// Table name (default: lowercased model name).
    pub table: Option<String>,

    /// Primary key column (default: "id").
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Fields besides the primary key.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Declarative field description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name used in lookups.
    pub name: String,

    /// Column name (default: the field name, or `{name}_id` for foreign keys).
    pub column: Option<String>,

    /// Makes this field a foreign key.
    pub foreign_key: Option<ForeignKeyDefinition>,
}

/// Foreign key target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    /// Target model name.
    pub to: String,

    /// Name of the reverse accessor on the target (default: lowercased
    /// source model name).
    pub related_name: Option<String>,
}

impl ModelDefinition {
    /// Start a model definition with the given table.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Some(table.into()),
            primary_key: default_primary_key(),
            fields: Vec::new(),
        }
    }

    /// Override the primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Add a plain field stored in a column of the same name.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDefinition {
            name: name.into(),
            column: None,
            foreign_key: None,
        });
        self
    }

    /// Add a foreign key to `to`, reachable back through `related_name`.
    pub fn foreign_key(
        mut self,
        name: impl Into<String>,
        to: impl Into<String>,
        related_name: Option<&str>,
    ) -> Self {
        self.fields.push(FieldDefinition {
            name: name.into(),
            column: None,
            foreign_key: Some(ForeignKeyDefinition {
                to: to.into(),
                related_name: related_name.map(str::to_string),
            }),
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Registry of models, shared by every query set built from it.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Schema {
    models: BTreeMap<String, Model>,
}

/// Collects model definitions before validating them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    definitions: Vec<ModelDefinition>,
}

impl SchemaBuilder {
    pub fn model(mut self, definition: ModelDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Validate the definitions and build a shared schema.
    pub fn build(self) -> Result<Arc<Schema>> {
        Schema::from_definitions(self.definitions).map(Arc::new)
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Validate model definitions and derive reverse relations.
    pub fn from_definitions(definitions: Vec<ModelDefinition>) -> Result<Self> {
        let mut models = BTreeMap::new();
        let mut reverse = Vec::new();

        for def in definitions {
            validate_name(&def.name, "model name")?;
            if models.contains_key(&def.name) {
                return Err(Error::invalid_schema(format!(
                    "model '{}' is defined twice",
                    def.name
                )));
            }

            let mut model = Model {
                table: def.table.unwrap_or_else(|| def.name.to_lowercase()),
                pk: def.primary_key.clone(),
                name: def.name,
                fields: vec![Field {
                    name: def.primary_key.clone(),
                    column: def.primary_key,
                }],
                relations: Vec::new(),
            };

            for field in def.fields {
                validate_name(&field.name, "field name")?;
                if model.has_name(&field.name) {
                    return Err(Error::invalid_schema(format!(
                        "model '{}': field '{}' is defined twice",
                        model.name, field.name
                    )));
                }

                match field.foreign_key {
                    None => model.fields.push(Field {
                        column: field.column.unwrap_or_else(|| field.name.clone()),
                        name: field.name,
                    }),
                    Some(fk) => {
                        let column = field
                            .column
                            .unwrap_or_else(|| format!("{}_id", field.name));
                        let related_name = fk
                            .related_name
                            .unwrap_or_else(|| model.name.to_lowercase());
                        reverse.push((
                            fk.to.clone(),
                            Relation {
                                name: related_name,
                                target: model.name.clone(),
                                kind: RelationKind::Reverse,
                                column: column.clone(),
                            },
                        ));
                        // The raw column stays addressable, e.g. `basket_id`.
                        if column != field.name && !model.has_name(&column) {
                            model.fields.push(Field {
                                name: column.clone(),
                                column: column.clone(),
                            });
                        }
                        model.relations.push(Relation {
                            name: field.name,
                            target: fk.to,
                            kind: RelationKind::ForeignKey,
                            column,
                        });
                    }
                }
            }

            models.insert(model.name.clone(), model);
        }

        for (target, relation) in reverse {
            let Some(model) = models.get_mut(&target) else {
                return Err(Error::invalid_schema(format!(
                    "model '{}': foreign key points at unknown model '{}'",
                    relation.target, target
                )));
            };
            validate_name(&relation.name, "related name")?;
            if model.has_name(&relation.name) {
                return Err(Error::invalid_schema(format!(
                    "model '{}': reverse accessor '{}' for '{}' clashes with an existing name",
                    model.name, relation.name, relation.target
                )));
            }
            model.relations.push(relation);
        }

        Ok(Self { models })
    }

    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Result<&Model> {
        self.models.get(name).ok_or_else(|| Error::UnknownModel {
            model: name.to_string(),
        })
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    /// Follow a relation path (`tree__fruits`) from `model` and return the
    /// model it ends at.
    pub fn resolve_path(&self, model: &str, path: &str) -> Result<&Model> {
        let mut current = self.model(model)?;
        for segment in path.split(LOOKUP_SEP) {
            let relation = current.relation(segment).ok_or_else(|| {
                Error::unknown_field(&current.name, segment, &current.choices())
            })?;
            current = self.model(&relation.target)?;
        }
        Ok(current)
    }

    /// Full, unfiltered query set over `model`.
    pub fn all(self: &Arc<Self>, model: &str) -> Result<QuerySet> {
        QuerySet::new(Arc::clone(self), model)
    }
}

fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_schema(format!("{what} must not be empty")));
    }
    if name.contains(LOOKUP_SEP) {
        return Err(Error::invalid_schema(format!(
            "{what} '{name}' must not contain '{LOOKUP_SEP}'"
        )));
    }
    if name == PK_ALIAS {
        return Err(Error::invalid_schema(format!(
            "{what} '{PK_ALIAS}' is reserved for the primary key"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn orchard() -> Schema {
        Schema::from_definitions(vec![
            ModelDefinition::new("Basket", "basket").field("label"),
            ModelDefinition::new("Fruit", "fruit")
                .field("size")
                .foreign_key("basket", "Basket", Some("fruits")),
        ])
        .unwrap()
    }

    #[test]
    fn reverse_relation_is_derived() {
        let schema = orchard();
        let basket = schema.model("Basket").unwrap();
        let fruits = basket.relation("fruits").unwrap();
        assert_eq!(fruits.kind, RelationKind::Reverse);
        assert_eq!(fruits.target, "Fruit");
        assert_eq!(fruits.column, "basket_id");
        assert_eq!(fruits.local_column(basket), "id");
    }

    #[test]
    fn foreign_key_column_is_addressable() {
        let schema = orchard();
        let fruit = schema.model("Fruit").unwrap();
        assert_eq!(fruit.field("basket_id").unwrap().column, "basket_id");
        assert_eq!(fruit.relation("basket").unwrap().kind, RelationKind::ForeignKey);
        assert_eq!(fruit.field("pk").unwrap().column, "id");
    }

    #[test]
    fn default_reverse_name_is_lowercased_model() {
        let schema = Schema::from_definitions(vec![
            ModelDefinition::new("Tree", "tree"),
            ModelDefinition::new("Fruit", "fruit").foreign_key("tree", "Tree", None),
        ])
        .unwrap();
        assert!(schema.model("Tree").unwrap().relation("fruit").is_some());
    }

    #[test]
    fn dangling_foreign_key_is_rejected() {
        let err = Schema::from_definitions(vec![
            ModelDefinition::new("Fruit", "fruit").foreign_key("basket", "Basket", None),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
        assert!(err.to_string().contains("Basket"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Schema::from_definitions(vec![
            ModelDefinition::new("Fruit", "fruit").field("size").field("size"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("defined twice"));

        let err = Schema::from_definitions(vec![
            ModelDefinition::new("Fruit", "fruit"),
            ModelDefinition::new("Fruit", "fruit2"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn reserved_and_separator_names_are_rejected() {
        assert!(Schema::from_definitions(vec![ModelDefinition::new("A", "a").field("pk")]).is_err());
        assert!(
            Schema::from_definitions(vec![ModelDefinition::new("A", "a").field("x__y")]).is_err()
        );
    }

    #[test]
    fn reverse_accessor_clash_is_rejected() {
        let err = Schema::from_definitions(vec![
            ModelDefinition::new("Basket", "basket").field("fruits"),
            ModelDefinition::new("Fruit", "fruit").foreign_key("basket", "Basket", Some("fruits")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("clashes"));
    }

    #[test]
    fn resolve_path_walks_relations() {
        let schema = orchard();
        assert_eq!(schema.resolve_path("Basket", "fruits").unwrap().name, "Fruit");
        assert_eq!(
            schema.resolve_path("Fruit", "basket__fruits").unwrap().name,
            "Fruit"
        );
        assert!(matches!(
            schema.resolve_path("Fruit", "size"),
            Err(Error::UnknownField { .. })
        ));
    }
}

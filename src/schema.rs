//! Entity metadata - declarative schemas and relation descriptors
//!
//! There is no runtime reflection here: every entity, column, and relation is
//! declared up front through explicit builders and collected into a
//! [`SchemaRegistry`] that the rest of the ORM resolves names against.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{OrmError, OrmResult};
use crate::query::QueryScope;
use crate::record::Record;

/// How a `many` relation's results are keyed.
#[derive(Clone)]
pub enum IndexBy {
    /// Key each child by the value of one of its columns.
    Column(String),
    /// Key each child by an arbitrary function of the record.
    Keyed(Arc<dyn Fn(&Record) -> String + Send + Sync>),
}

impl fmt::Debug for IndexBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBy::Column(col) => f.debug_tuple("Column").field(col).finish(),
            IndexBy::Keyed(_) => f.write_str("Keyed(<fn>)"),
        }
    }
}

/// Intermediate hop for many-to-many relations.
#[derive(Debug, Clone)]
pub enum Via {
    /// Route through another declared relation on the same entity.
    Relation(String),
    /// Route through a bare pivot table; `link` maps pivot column -> parent column.
    Table { table: String, link: Vec<(String, String)> },
}

/// Declarative specification of a relation: target entity, link column
/// mapping, cardinality, optional pivot hop, and population hints.
///
/// `link` maps a column on the related side to a column on the owning side,
/// e.g. `("customer_id", "id")` for a customer's orders.
#[derive(Clone)]
pub struct RelationDef {
    pub target: String,
    pub multiple: bool,
    pub link: Vec<(String, String)>,
    pub via: Option<Via>,
    pub inverse_of: Option<String>,
    pub index_by: Option<IndexBy>,
    /// Ordering/filter callback applied to the relation query before execution.
    pub scope: Option<QueryScope>,
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("target", &self.target)
            .field("multiple", &self.multiple)
            .field("link", &self.link)
            .field("via", &self.via)
            .field("inverse_of", &self.inverse_of)
            .field("index_by", &self.index_by)
            .field("scope", &self.scope.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RelationDef {
    fn new(target: &str, multiple: bool, link: &[(&str, &str)]) -> Self {
        Self {
            target: target.to_string(),
            multiple,
            link: link
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
            via: None,
            inverse_of: None,
            index_by: None,
            scope: None,
        }
    }

    /// One-to-many: `link` maps related-side column to local column.
    pub fn has_many(target: &str, link: &[(&str, &str)]) -> Self {
        Self::new(target, true, link)
    }

    /// One-to-one: `link` maps related-side column to local column.
    pub fn has_one(target: &str, link: &[(&str, &str)]) -> Self {
        Self::new(target, false, link)
    }

    /// Route through a declared relation on the owning entity; the direct
    /// `link` then maps related-side columns to pivot columns.
    pub fn via(mut self, relation: &str) -> Self {
        self.via = Some(Via::Relation(relation.to_string()));
        self
    }

    /// Route through a bare pivot table; `link` maps pivot column to local column.
    pub fn via_table(mut self, table: &str, link: &[(&str, &str)]) -> Self {
        self.via = Some(Via::Table {
            table: table.to_string(),
            link: link
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        });
        self
    }

    /// Name of the reciprocal relation on the target entity, populated
    /// back-to-front during eager loading to skip the inverse query.
    pub fn inverse_of(mut self, name: &str) -> Self {
        self.inverse_of = Some(name.to_string());
        self
    }

    pub fn index_by(mut self, column: &str) -> Self {
        self.index_by = Some(IndexBy::Column(column.to_string()));
        self
    }

    pub fn index_by_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record) -> String + Send + Sync + 'static,
    {
        self.index_by = Some(IndexBy::Keyed(Arc::new(f)));
        self
    }

    pub fn scope<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut crate::query::Query) + Send + Sync + 'static,
    {
        self.scope = Some(Arc::new(f));
        self
    }
}

/// Metadata for one entity type: table, columns, keys, and declared relations.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub entity: String,
    pub table: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<String>,
    /// Column used for optimistic locking, when declared.
    pub version_column: Option<String>,
    relations: Vec<(String, RelationDef)>,
}

impl EntitySchema {
    pub fn builder(entity: &str, table: &str) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                entity: entity.to_string(),
                table: table.to_string(),
                primary_key: vec!["id".to_string()],
                columns: Vec::new(),
                version_column: None,
                relations: Vec::new(),
            },
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn relation(&self, name: &str) -> OrmResult<&RelationDef> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, def)| def)
            .ok_or_else(|| OrmError::UnknownRelation {
                entity: self.entity.clone(),
                relation: name.to_string(),
            })
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.iter().any(|(n, _)| n == name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().map(|(n, _)| n.as_str())
    }
}

/// Builder for [`EntitySchema`].
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.schema.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.schema.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn version_column(mut self, column: &str) -> Self {
        self.schema.version_column = Some(column.to_string());
        self
    }

    pub fn relation(mut self, name: &str, def: RelationDef) -> Self {
        self.schema.relations.push((name.to_string(), def));
        self
    }

    pub fn build(self) -> EntitySchema {
        self.schema
    }
}

/// Registry of entity schemas, built once and shared read-only.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder { schemas: Vec::new() }
    }

    pub fn get(&self, entity: &str) -> OrmResult<Arc<EntitySchema>> {
        self.entities.get(entity).cloned().ok_or_else(|| {
            OrmError::Configuration(format!("unknown entity '{}'", entity))
        })
    }
}

/// Builder for [`SchemaRegistry`]; `build` cross-validates relation graphs.
pub struct SchemaRegistryBuilder {
    schemas: Vec<EntitySchema>,
}

impl SchemaRegistryBuilder {
    pub fn entity(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn build(self) -> OrmResult<SchemaRegistry> {
        let mut entities: HashMap<String, Arc<EntitySchema>> = HashMap::new();
        for schema in &self.schemas {
            if schema.primary_key.is_empty() {
                return Err(OrmError::Configuration(format!(
                    "entity '{}' declares no primary key",
                    schema.entity
                )));
            }
            if entities
                .insert(schema.entity.clone(), Arc::new(schema.clone()))
                .is_some()
            {
                return Err(OrmError::Configuration(format!(
                    "entity '{}' declared twice",
                    schema.entity
                )));
            }
        }

        // Relation targets and via hops must resolve within the registry.
        for schema in &self.schemas {
            for (name, def) in &schema.relations {
                if def.link.is_empty() {
                    return Err(OrmError::Configuration(format!(
                        "relation '{}.{}' has an empty link mapping",
                        schema.entity, name
                    )));
                }
                if !entities.contains_key(&def.target) {
                    return Err(OrmError::Configuration(format!(
                        "relation '{}.{}' targets unknown entity '{}'",
                        schema.entity, name, def.target
                    )));
                }
                if let Some(Via::Relation(via_name)) = &def.via {
                    if !schema.relations.iter().any(|(n, _)| n == via_name) {
                        return Err(OrmError::UnknownRelation {
                            entity: schema.entity.clone(),
                            relation: via_name.clone(),
                        });
                    }
                }
                if let Some(inverse) = &def.inverse_of {
                    let target = &entities[&def.target];
                    if !target.has_relation(inverse) {
                        return Err(OrmError::Configuration(format!(
                            "relation '{}.{}' declares inverse '{}' missing on '{}'",
                            schema.entity, name, inverse, def.target
                        )));
                    }
                }
            }
        }

        Ok(SchemaRegistry { entities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> EntitySchema {
        EntitySchema::builder("customer", "customers")
            .columns(&["id", "name"])
            .relation("orders", RelationDef::has_many("order", &[("customer_id", "id")]))
            .build()
    }

    fn order() -> EntitySchema {
        EntitySchema::builder("order", "orders")
            .columns(&["id", "customer_id", "total"])
            .relation("customer", RelationDef::has_one("customer", &[("id", "customer_id")]))
            .build()
    }

    #[test]
    fn registry_resolves_entities_and_relations() {
        let registry = SchemaRegistry::builder()
            .entity(customer())
            .entity(order())
            .build()
            .unwrap();

        let schema = registry.get("customer").unwrap();
        let rel = schema.relation("orders").unwrap();
        assert!(rel.multiple);
        assert_eq!(rel.target, "order");
        assert_eq!(rel.link, vec![("customer_id".to_string(), "id".to_string())]);

        assert!(matches!(
            schema.relation("nope"),
            Err(OrmError::UnknownRelation { .. })
        ));
        assert!(registry.get("invoice").is_err());
    }

    #[test]
    fn build_rejects_dangling_relation_target() {
        let dangling = EntitySchema::builder("customer", "customers")
            .columns(&["id"])
            .relation("orders", RelationDef::has_many("order", &[("customer_id", "id")]))
            .build();
        let err = SchemaRegistry::builder().entity(dangling).build().unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }

    #[test]
    fn build_rejects_missing_via_relation() {
        let schema = EntitySchema::builder("order", "orders")
            .columns(&["id"])
            .relation(
                "items",
                RelationDef::has_many("item", &[("id", "item_id")]).via("orderItems"),
            )
            .build();
        let item = EntitySchema::builder("item", "items").columns(&["id"]).build();
        let err = SchemaRegistry::builder()
            .entity(schema)
            .entity(item)
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownRelation { .. }));
    }
}

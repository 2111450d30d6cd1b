//! Schema registry for qodata
//!
//! The registry describes the entity types a service exposes: their typed
//! fields, keys, relationships, and the per-entity policy (access flags,
//! hidden fields, searchable fields, lookup fields and restriction
//! predicates). It is read-only while a plan is being built.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::errors::{ODataError, Result};
use super::value::Value;
use crate::ql::ast::FilterExpression;
use crate::ql::parser::parse_filter;

/// Primitive type of an entity field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int32,
    Int64,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Guid,
    Binary,
}

impl FieldType {
    /// Check whether a value may be stored in (or compared against) a field of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String | FieldType::Binary, Value::String(_)) => true,
            (FieldType::Int32 | FieldType::Int64, Value::Integer(_)) => true,
            (FieldType::Float | FieldType::Decimal, Value::Integer(_) | Value::Float(_)) => true,
            (FieldType::Boolean, Value::Boolean(_)) => true,
            (FieldType::Date, Value::Date(_)) => true,
            (FieldType::DateTime, Value::DateTime(_) | Value::Date(_)) => true,
            (FieldType::Guid, Value::Guid(_)) => true,
            _ => false,
        }
    }

    /// Whether string functions (contains, startswith, ...) apply to this type
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String)
    }
}

/// A typed field of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

/// Which side of a foreign key a relationship is declared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Owning side: this entity holds the foreign key (to-one)
    ForeignKey,
    /// Inverse side: the target entity holds the foreign key (to-many)
    BackReference,
}

/// Number of related records reachable through a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// A navigable relationship from one entity to another.
///
/// Related records satisfy `source.source_field == target.target_field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub kind: RelationshipKind,
    pub source_field: String,
    pub target_field: String,
}

impl Relationship {
    pub fn cardinality(&self) -> Cardinality {
        match self.kind {
            RelationshipKind::ForeignKey => Cardinality::One,
            RelationshipKind::BackReference => Cardinality::Many,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality() == Cardinality::Many
    }
}

/// Per-entity access flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFlags {
    /// Usable as the root of a request path
    #[serde(default = "enabled")]
    pub browsable: bool,
    /// Reachable through navigation or `$expand`
    #[serde(default = "enabled")]
    pub expandable: bool,
    /// Accepts create/update/delete
    #[serde(default)]
    pub modifiable: bool,
}

fn enabled() -> bool {
    true
}

impl Default for AccessFlags {
    fn default() -> Self {
        AccessFlags {
            browsable: true,
            expandable: true,
            modifiable: false,
        }
    }
}

/// Declaration of one entity type and its policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Type name, e.g. `User`
    pub name: String,
    /// Entity set name used in URLs. When unset, `SchemaRegistry::register`
    /// fills in the lowercased type name plus `s`
    #[serde(default)]
    pub set: Option<String>,
    pub fields: Vec<Field>,
    /// Primary key fields, in positional order
    #[serde(default)]
    pub key: Vec<String>,
    /// Fields declared unique
    #[serde(default)]
    pub unique: Vec<String>,
    /// Unique fields the caller allows as alternate lookup keys
    #[serde(default)]
    pub lookup: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub access: AccessFlags,
    /// Predicate always AND-ed to every query on this entity
    #[serde(default, with = "restriction_filter")]
    pub restriction: Option<FilterExpression>,
    #[serde(default)]
    pub hidden: BTreeSet<String>,
    #[serde(default)]
    pub searchable: Vec<String>,
}

impl EntityType {
    /// Create an entity type with no fields and default access flags
    pub fn new<S: Into<String>>(name: S) -> Self {
        EntityType {
            name: name.into(),
            set: None,
            fields: Vec::new(),
            key: Vec::new(),
            unique: Vec::new(),
            lookup: Vec::new(),
            relationships: Vec::new(),
            access: AccessFlags::default(),
            restriction: None,
            hidden: BTreeSet::new(),
            searchable: Vec::new(),
        }
    }

    pub fn with_set<S: Into<String>>(mut self, set: S) -> Self {
        self.set = Some(set.into());
        self
    }

    pub fn with_field<S: Into<String>>(mut self, name: S, kind: FieldType) -> Self {
        self.fields.push(Field { name: name.into(), kind, nullable: false });
        self
    }

    pub fn with_nullable_field<S: Into<String>>(mut self, name: S, kind: FieldType) -> Self {
        self.fields.push(Field { name: name.into(), kind, nullable: true });
        self
    }

    pub fn with_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unique<S: Into<String>>(mut self, field: S) -> Self {
        self.unique.push(field.into());
        self
    }

    /// Allow a unique field to be used as a key predicate, e.g. `users(email='a@b.c')`
    pub fn with_lookup<S: Into<String>>(mut self, field: S) -> Self {
        self.lookup.push(field.into());
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    pub fn with_hidden<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_searchable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a restriction predicate written as a `$filter` expression
    pub fn with_restriction(mut self, filter: &str) -> Result<Self> {
        self.restriction = Some(parse_filter(filter)?);
        Ok(self)
    }

    /// Entity set name used in URLs; the bare type name before registration
    pub fn set_name(&self) -> &str {
        self.set.as_deref().unwrap_or(&self.name)
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn get_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn is_hidden(&self, field: &str) -> bool {
        self.hidden.contains(field)
    }

    pub fn is_unique(&self, field: &str) -> bool {
        self.unique.iter().any(|u| u == field) || (self.key.len() == 1 && self.key[0] == field)
    }

    pub fn is_lookup(&self, field: &str) -> bool {
        self.lookup.iter().any(|l| l == field)
    }

    fn check_field(&self, field: &str) -> Result<()> {
        if self.has_field(field) {
            Ok(())
        } else {
            Err(ODataError::unknown_field(&self.name, field))
        }
    }

    /// Check that every field named by the declaration exists
    fn validate_local(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(ODataError::Config(format!("entity {} declares no fields", self.name)));
        }

        let named = self.key.iter()
            .chain(self.unique.iter())
            .chain(self.lookup.iter())
            .chain(self.hidden.iter())
            .chain(self.searchable.iter());

        for field in named {
            self.check_field(field)?;
        }

        for field in &self.lookup {
            if !self.is_unique(field) {
                return Err(ODataError::Config(format!(
                    "lookup field {}.{} is not declared unique", self.name, field
                )));
            }
        }

        for rel in &self.relationships {
            self.check_field(&rel.source_field)?;
        }

        Ok(())
    }
}

/// Registry of all entity types of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntityType>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Register an entity type, filling in its default set name
    pub fn register(&mut self, mut entity: EntityType) -> Result<()> {
        entity.validate_local()?;

        if entity.set.is_none() {
            entity.set = Some(format!("{}s", entity.name.to_lowercase()));
        }

        if self.entities.contains_key(&entity.name) {
            return Err(ODataError::Config(format!("entity {} registered twice", entity.name)));
        }
        if self.entity_by_set(entity.set_name()).is_some() {
            return Err(ODataError::Config(format!(
                "entity set {} registered twice", entity.set_name()
            )));
        }

        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Builder-style registration
    pub fn with_entity(mut self, entity: EntityType) -> Result<Self> {
        self.register(entity)?;
        Ok(self)
    }

    /// Declare a foreign key `from.local_field -> to.<key>` and, optionally,
    /// the inverse collection on `to` named `backref`
    pub fn foreign_key(
        &mut self,
        from: &str,
        name: &str,
        local_field: &str,
        to: &str,
        backref: Option<&str>,
    ) -> Result<()> {
        let target_key = {
            let target = self.entity(to)
                .ok_or_else(|| ODataError::UnknownEntity(to.to_string()))?;
            match target.key.as_slice() {
                [key] => key.clone(),
                _ => return Err(ODataError::Config(format!(
                    "foreign key {}.{} needs a single-field key on {}", from, name, to
                ))),
            }
        };

        let source = self.entities.get_mut(from)
            .ok_or_else(|| ODataError::UnknownEntity(from.to_string()))?;
        source.check_field(local_field)?;
        source.relationships.push(Relationship {
            name: name.to_string(),
            target: to.to_string(),
            kind: RelationshipKind::ForeignKey,
            source_field: local_field.to_string(),
            target_field: target_key.clone(),
        });

        if let Some(backref) = backref {
            let target = self.entities.get_mut(to)
                .ok_or_else(|| ODataError::UnknownEntity(to.to_string()))?;
            target.relationships.push(Relationship {
                name: backref.to_string(),
                target: from.to_string(),
                kind: RelationshipKind::BackReference,
                source_field: target_key,
                target_field: local_field.to_string(),
            });
        }

        Ok(())
    }

    /// Check cross-entity references (relationship targets and join fields)
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for rel in &entity.relationships {
                let target = self.entity(&rel.target).ok_or_else(|| ODataError::Config(format!(
                    "relationship {}.{} targets unknown entity {}", entity.name, rel.name, rel.target
                )))?;
                target.check_field(&rel.target_field)?;
            }
        }
        Ok(())
    }

    /// Look up an entity type by type name
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    /// Look up an entity type by its entity set name
    pub fn entity_by_set(&self, set: &str) -> Option<&EntityType> {
        self.entities.values().find(|e| e.set_name() == set)
    }

    /// Mutable access for policy changes; never call while plans are being built
    pub fn entity_mut(&mut self, name: &str) -> Result<&mut EntityType> {
        self.entities.get_mut(name)
            .ok_or_else(|| ODataError::UnknownEntity(name.to_string()))
    }

    /// Add a restriction predicate to an entity, AND-ed with any existing one
    pub fn restrict(&mut self, entity: &str, filter: &str) -> Result<()> {
        let parsed = parse_filter(filter)?;
        let entity = self.entity_mut(entity)?;
        entity.restriction = Some(match entity.restriction.take() {
            Some(existing) => FilterExpression::and(existing, parsed),
            None => parsed,
        });
        Ok(())
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }
}

/// Restriction predicates travel as `$filter` text in configuration files
mod restriction_filter {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::ql::ast::FilterExpression;
    use crate::ql::parser::parse_filter;

    pub fn serialize<S: Serializer>(
        value: &Option<FilterExpression>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(expr) => serializer.serialize_some(&expr.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<FilterExpression>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            Some(text) => parse_filter(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

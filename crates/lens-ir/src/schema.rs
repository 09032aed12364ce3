//! Schema graph: entity types, fields and relations
//!
//! The graph is an immutable snapshot produced by an introspector. Every name a
//! query specification mentions is resolved against it by index lookup; nothing
//! downstream ever inspects a live object model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::types::{Cardinality, ScalarKind};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Entity {entity} declares '{name}' more than once")]
    DuplicateMember { entity: String, name: String },

    #[error("Relation {entity}.{relation} points at unknown entity {target}")]
    DanglingRelation {
        entity: String,
        relation: String,
        target: String,
    },

    #[error("Schema serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema provider failed: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("Empty path")]
    EmptyPath,

    #[error("'{segment}' is neither a field nor a relation of {entity}")]
    UnknownSegment { entity: String, segment: String },

    #[error("'{segment}' on {entity} is a field, it cannot be traversed")]
    ThroughScalar { entity: String, segment: String },

    #[error("'{segment}' on {entity} is a relation, a path must end on a field")]
    EndsOnRelation { entity: String, segment: String },
}

/// A scalar column of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ScalarKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            choices: Vec::new(),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }
}

/// A named edge to another entity, resolved weakly by target name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    /// Column on the source entity
    pub local_key: String,
    /// Column on the target entity
    pub remote_key: String,
}

impl RelationSpec {
    pub fn one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            local_key: local_key.into(),
            remote_key: remote_key.into(),
        }
    }

    pub fn many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(name, target, local_key, remote_key)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Scope identifier the entity was introspected from (schema, app label)
    #[serde(default)]
    pub namespace: String,
    /// Storage name when it differs from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationSpec>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            table: None,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationSpec) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn find_relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Dotted traversal path (`customer.country`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Split on '.' without any syntax checks; strict parsing lives in the validator
    pub fn from_dotted(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `len` segments
    pub fn prefix(&self, len: usize) -> FieldPath {
        FieldPath {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }

    pub fn starts_with(&self, other: &FieldPath) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> String {
        path.to_string()
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> FieldPath {
        FieldPath::from_dotted(&path)
    }
}

/// One relation traversal, with everything the compiler needs to join on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationHop {
    pub relation: String,
    pub from_entity: String,
    pub to_entity: String,
    pub to_table: String,
    pub cardinality: Cardinality,
    pub local_key: String,
    pub remote_key: String,
}

/// A path resolved down to its terminal field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub path: FieldPath,
    pub hops: Vec<RelationHop>,
    pub field: FieldSpec,
}

impl ResolvedPath {
    pub fn kind(&self) -> ScalarKind {
        self.field.kind
    }

    /// Index of the first hop that traverses a "many" relation
    pub fn first_fanout(&self) -> Option<usize> {
        self.hops
            .iter()
            .position(|hop| hop.cardinality == Cardinality::Many)
    }

    /// Relation-only prefix covering the first `hops` traversals
    pub fn relation_prefix(&self, hops: usize) -> FieldPath {
        self.path.prefix(hops)
    }
}

/// Serialized form: just the ordered entity list
#[derive(Serialize, Deserialize)]
pub struct SchemaDocument {
    entities: Vec<EntityType>,
}

/// Immutable graph of entity types with name-indexed lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaDocument", into = "SchemaDocument")]
pub struct SchemaGraph {
    entities: Vec<EntityType>,
    index: HashMap<String, usize>,
}

impl SchemaGraph {
    /// Build a graph, checking name uniqueness and relation targets
    pub fn new(entities: Vec<EntityType>) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(entities.len());
        for (slot, entity) in entities.iter().enumerate() {
            if index.insert(entity.name.clone(), slot).is_some() {
                return Err(SchemaError::DuplicateEntity(entity.name.clone()));
            }
        }

        for entity in &entities {
            let mut members = HashSet::new();
            let names = entity
                .fields
                .iter()
                .map(|f| &f.name)
                .chain(entity.relations.iter().map(|r| &r.name));
            for name in names {
                if !members.insert(name.as_str()) {
                    return Err(SchemaError::DuplicateMember {
                        entity: entity.name.clone(),
                        name: name.clone(),
                    });
                }
            }
            for relation in &entity.relations {
                if !index.contains_key(&relation.target) {
                    return Err(SchemaError::DanglingRelation {
                        entity: entity.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
        }

        Ok(Self { entities, index })
    }

    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.index.get(name).map(|&slot| &self.entities[slot])
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Keep only entities whose namespace is listed, dropping relations that
    /// would leave the restricted graph. An empty scope list keeps everything.
    pub fn restrict_to(&self, scopes: &[String]) -> SchemaGraph {
        if scopes.is_empty() {
            return self.clone();
        }
        let kept: HashSet<&str> = self
            .entities
            .iter()
            .filter(|e| scopes.iter().any(|s| s == &e.namespace))
            .map(|e| e.name.as_str())
            .collect();

        let entities: Vec<EntityType> = self
            .entities
            .iter()
            .filter(|e| kept.contains(e.name.as_str()))
            .map(|e| {
                let mut entity = e.clone();
                entity
                    .relations
                    .retain(|r| kept.contains(r.target.as_str()));
                entity
            })
            .collect();

        let index = entities
            .iter()
            .enumerate()
            .map(|(slot, e)| (e.name.clone(), slot))
            .collect();
        SchemaGraph { entities, index }
    }

    /// Walk `path` from `root`, relation segments first, ending on a field
    pub fn resolve_path(&self, root: &str, path: &FieldPath) -> Result<ResolvedPath, ResolveError> {
        let (last, prefix) = path
            .segments()
            .split_last()
            .ok_or(ResolveError::EmptyPath)?;

        let (entity, hops) = self.walk_relations(root, prefix)?;

        if let Some(field) = entity.find_field(last) {
            return Ok(ResolvedPath {
                path: path.clone(),
                hops,
                field: field.clone(),
            });
        }
        if entity.find_relation(last).is_some() {
            return Err(ResolveError::EndsOnRelation {
                entity: entity.name.clone(),
                segment: last.clone(),
            });
        }
        Err(ResolveError::UnknownSegment {
            entity: entity.name.clone(),
            segment: last.clone(),
        })
    }

    /// Resolve a path made only of relations (used by explicit joins)
    pub fn resolve_relations(&self, root: &str, path: &FieldPath) -> Result<Vec<RelationHop>, ResolveError> {
        if path.is_empty() {
            return Err(ResolveError::EmptyPath);
        }
        let (_, hops) = self.walk_relations(root, path.segments())?;
        Ok(hops)
    }

    fn walk_relations(
        &self,
        root: &str,
        segments: &[String],
    ) -> Result<(&EntityType, Vec<RelationHop>), ResolveError> {
        let mut entity = self
            .entity(root)
            .ok_or_else(|| ResolveError::UnknownEntity(root.to_string()))?;
        let mut hops = Vec::with_capacity(segments.len());

        for segment in segments {
            let Some(relation) = entity.find_relation(segment) else {
                if entity.find_field(segment).is_some() {
                    return Err(ResolveError::ThroughScalar {
                        entity: entity.name.clone(),
                        segment: segment.clone(),
                    });
                }
                return Err(ResolveError::UnknownSegment {
                    entity: entity.name.clone(),
                    segment: segment.clone(),
                });
            };
            let target = self
                .entity(&relation.target)
                .ok_or_else(|| ResolveError::UnknownEntity(relation.target.clone()))?;
            hops.push(RelationHop {
                relation: relation.name.clone(),
                from_entity: entity.name.clone(),
                to_entity: target.name.clone(),
                to_table: target.table_name().to_string(),
                cardinality: relation.cardinality,
                local_key: relation.local_key.clone(),
                remote_key: relation.remote_key.clone(),
            });
            entity = target;
        }

        Ok((entity, hops))
    }

    /// SHA-256 of the canonical serialization; used as the schema version
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("schema graph should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl PartialEq for SchemaGraph {
    fn eq(&self, other: &Self) -> bool {
        self.entities == other.entities
    }
}

impl TryFrom<SchemaDocument> for SchemaGraph {
    type Error = SchemaError;

    fn try_from(doc: SchemaDocument) -> Result<Self, Self::Error> {
        SchemaGraph::new(doc.entities)
    }
}

impl From<SchemaGraph> for SchemaDocument {
    fn from(graph: SchemaGraph) -> Self {
        SchemaDocument {
            entities: graph.entities,
        }
    }
}

pub fn serialize_schema(graph: &SchemaGraph) -> Result<String, SchemaError> {
    Ok(serde_json::to_string_pretty(graph)?)
}

pub fn deserialize_schema(text: &str) -> Result<SchemaGraph, SchemaError> {
    Ok(serde_json::from_str(text)?)
}

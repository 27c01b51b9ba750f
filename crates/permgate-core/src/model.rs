// crates/permgate-core/src/model.rs
//
// Relationship data model: object and subject references, relationships,
// filters, consistency requirements, and the opaque tokens the backend
// hands out.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PermgateError;

/// Longest accepted object type or relation name.
const MAX_NAME_LEN: usize = 128;

/// Longest accepted object id.
const MAX_ID_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// A typed object in the relationship graph, e.g. `document:readme`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object type as declared in the backend schema.
    pub object_type: String,
    /// Object identifier, unique within its type.
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Check type and id against the naming rules.
    pub fn validate(&self) -> Result<(), PermgateError> {
        validate_type_name("object_type", &self.object_type)?;
        validate_object_id(&self.object_id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// The subject side of a relationship: an object, optionally narrowed to
/// one of its relations (a subject set such as `group:eng#member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub object: ObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(object: ObjectRef) -> Self {
        Self {
            object,
            relation: None,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn validate(&self) -> Result<(), PermgateError> {
        self.object.validate()?;
        if let Some(relation) = &self.relation {
            validate_relation_name("subject.relation", relation)?;
        }
        Ok(())
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}#{}", self.object, relation),
            None => write!(f, "{}", self.object),
        }
    }
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// A stored fact: `resource` has `relation` to `subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub resource: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl Relationship {
    pub fn new(resource: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            resource,
            relation: relation.into(),
            subject,
        }
    }

    pub fn validate(&self) -> Result<(), PermgateError> {
        self.resource.validate()?;
        validate_relation_name("relation", &self.relation)?;
        self.subject.validate()
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// Selects relationships for read and delete operations.
///
/// `resource_type` is mandatory; every other field narrows the match when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipFilter {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

impl RelationshipFilter {
    pub fn for_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), PermgateError> {
        validate_type_name("filter.resource_type", &self.resource_type)?;
        if let Some(id) = &self.resource_id {
            validate_object_id(id)?;
        }
        if let Some(relation) = &self.relation {
            validate_relation_name("filter.relation", relation)?;
        }
        if let Some(subject_type) = &self.subject_type {
            validate_type_name("filter.subject_type", subject_type)?;
        }
        if let Some(id) = &self.subject_id {
            if self.subject_type.is_none() {
                return Err(PermgateError::InvalidArgument(
                    "filter.subject_id requires filter.subject_type".to_string(),
                ));
            }
            validate_object_id(id)?;
        }
        Ok(())
    }

    /// Whether `rel` is selected by this filter.
    pub fn matches(&self, rel: &Relationship) -> bool {
        rel.resource.object_type == self.resource_type
            && self
                .resource_id
                .as_ref()
                .map_or(true, |id| *id == rel.resource.object_id)
            && self.relation.as_ref().map_or(true, |r| *r == rel.relation)
            && self
                .subject_type
                .as_ref()
                .map_or(true, |t| *t == rel.subject.object.object_type)
            && self
                .subject_id
                .as_ref()
                .map_or(true, |id| *id == rel.subject.object.object_id)
    }
}

/// How `CreateRelationships` treats relationships that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchSemantics {
    /// Fail with `AlreadyExists` if any relationship is present.
    #[default]
    Create,
    /// Upsert: existing relationships are left in place.
    Touch,
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Marker for a point in the backend's history. Reads can request results
/// at least as fresh as a token returned by an earlier write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsistencyToken(pub String);

impl ConsistencyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque cursor produced by the backend for each emitted result.
/// An empty token means there is nothing to continue from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(pub String);

impl ContinuationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fencing token handed out by a lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(pub String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Freshness requirement attached to a read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "requirement", content = "token", rename_all = "snake_case")]
pub enum Consistency {
    /// Let the backend pick the cheapest snapshot.
    #[default]
    MinimizeLatency,
    /// Read at or after the write that produced this token.
    AtLeastAsFresh(ConsistencyToken),
    /// Read the latest committed state.
    FullyConsistent,
}

// ---------------------------------------------------------------------------
// Check results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permissionship {
    NoPermission,
    HasPermission,
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub permissionship: Permissionship,
    pub checked_at: ConsistencyToken,
}

impl CheckResult {
    pub fn allowed(&self) -> bool {
        self.permissionship == Permissionship::HasPermission
    }
}

// ---------------------------------------------------------------------------
// Naming rules
// ---------------------------------------------------------------------------

/// Object types: lowercase ASCII, digits, `_` and `/` (for namespaced
/// types such as `tenant/document`), starting with a letter.
pub(crate) fn validate_type_name(field: &str, name: &str) -> Result<(), PermgateError> {
    validate_name(field, name, true)
}

/// Relation and permission names: same as types but without `/`.
pub(crate) fn validate_relation_name(field: &str, name: &str) -> Result<(), PermgateError> {
    validate_name(field, name, false)
}

fn validate_name(field: &str, name: &str, allow_slash: bool) -> Result<(), PermgateError> {
    if name.is_empty() {
        return Err(PermgateError::InvalidArgument(format!(
            "{} must not be empty",
            field
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PermgateError::InvalidArgument(format!(
            "{} exceeds {} characters",
            field, MAX_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || (allow_slash && c == '/')
    });
    if !first_ok || !rest_ok {
        return Err(PermgateError::InvalidArgument(format!(
            "{} has invalid characters: {:?}",
            field, name
        )));
    }
    Ok(())
}

pub(crate) fn validate_object_id(id: &str) -> Result<(), PermgateError> {
    if id.is_empty() {
        return Err(PermgateError::InvalidArgument(
            "object_id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ID_LEN {
        return Err(PermgateError::InvalidArgument(format!(
            "object_id exceeds {} characters",
            MAX_ID_LEN
        )));
    }
    if id
        .chars()
        .any(|c| c.is_whitespace() || c == '#' || c == '@' || c == ':')
    {
        return Err(PermgateError::InvalidArgument(format!(
            "object_id has invalid characters: {:?}",
            id
        )));
    }
    Ok(())
}

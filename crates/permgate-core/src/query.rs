// crates/permgate-core/src/query.rs
//
// Query shapes for checks, reads, and the two lookup directions, plus the
// typed results a streaming lookup yields.

use serde::{Deserialize, Serialize};

use crate::error::PermgateError;
use crate::model::{
    validate_relation_name, validate_type_name, Consistency, ConsistencyToken, ContinuationToken,
    ObjectRef, Relationship, RelationshipFilter, SubjectRef,
};

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Optional paging block carried by list and lookup requests.
///
/// Whether the block is present at all matters: see the limit resolution
/// rules in `permgate-query`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<ContinuationToken>,
}

impl Pagination {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            continuation_token: None,
        }
    }

    /// The continuation token, with an empty string treated as absent.
    pub fn continuation(&self) -> Option<ContinuationToken> {
        self.continuation_token
            .as_ref()
            .filter(|t| !t.is_empty())
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// Does `subject` have `permission` on `resource`?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckQuery {
    pub resource: ObjectRef,
    pub permission: String,
    pub subject: SubjectRef,
    #[serde(default)]
    pub consistency: Consistency,
}

impl CheckQuery {
    pub fn validate(&self) -> Result<(), PermgateError> {
        self.resource.validate()?;
        validate_relation_name("permission", &self.permission)?;
        self.subject.validate()
    }
}

// ---------------------------------------------------------------------------
// ReadRelationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRelationshipsQuery {
    pub filter: RelationshipFilter,
    #[serde(default)]
    pub consistency: Consistency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl ReadRelationshipsQuery {
    pub fn validate(&self) -> Result<(), PermgateError> {
        self.filter.validate()
    }
}

/// One relationship emitted by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipResult {
    pub relationship: Relationship,
    pub continuation_token: ContinuationToken,
    pub read_at: ConsistencyToken,
}

// ---------------------------------------------------------------------------
// LookupSubjects
// ---------------------------------------------------------------------------

/// Find every subject of `subject_type` (optionally a subject set through
/// `subject_relation`) holding `permission` on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupSubjectsQuery {
    pub resource: ObjectRef,
    pub permission: String,
    pub subject_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_relation: Option<String>,
    #[serde(default)]
    pub consistency: Consistency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl LookupSubjectsQuery {
    pub fn validate(&self) -> Result<(), PermgateError> {
        self.resource.validate()?;
        validate_relation_name("permission", &self.permission)?;
        validate_type_name("subject_type", &self.subject_type)?;
        if let Some(relation) = &self.subject_relation {
            validate_relation_name("subject_relation", relation)?;
        }
        Ok(())
    }

    pub fn continuation(&self) -> Option<ContinuationToken> {
        self.pagination.as_ref().and_then(Pagination::continuation)
    }
}

/// A subject found by `LookupSubjects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectResult {
    pub subject: SubjectRef,
    pub continuation_token: ContinuationToken,
    pub looked_up_at: ConsistencyToken,
}

// ---------------------------------------------------------------------------
// LookupResources
// ---------------------------------------------------------------------------

/// Find every resource of `resource_type` on which `subject` holds
/// `permission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResourcesQuery {
    pub resource_type: String,
    pub permission: String,
    pub subject: SubjectRef,
    #[serde(default)]
    pub consistency: Consistency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl LookupResourcesQuery {
    pub fn validate(&self) -> Result<(), PermgateError> {
        validate_type_name("resource_type", &self.resource_type)?;
        validate_relation_name("permission", &self.permission)?;
        self.subject.validate()
    }

    pub fn continuation(&self) -> Option<ContinuationToken> {
        self.pagination.as_ref().and_then(Pagination::continuation)
    }
}

/// A resource found by `LookupResources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub resource: ObjectRef,
    pub continuation_token: ContinuationToken,
    pub looked_up_at: ConsistencyToken,
}

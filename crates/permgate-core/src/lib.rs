// crates/permgate-core/src/lib.rs
//
// permgate-core: Core types, errors, and the repository contract for the
// permgate permissions gateway.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the relationship data model, the lookup query and result
// shapes, the protocol-wide error type, and the trait through which the
// gateway talks to the relationship-graph authorization backend.

pub mod context;
pub mod error;
pub mod model;
pub mod query;
pub mod stream;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use permgate_core::ObjectRef;`

// Model types
pub use model::{
    CheckResult, Consistency, ConsistencyToken, ContinuationToken, LockToken, ObjectRef,
    Permissionship, Relationship, RelationshipFilter, SubjectRef, TouchSemantics,
};

// Query and result types
pub use query::{
    CheckQuery, LookupResourcesQuery, LookupSubjectsQuery, Pagination, ReadRelationshipsQuery,
    RelationshipResult, ResourceResult, SubjectResult,
};

// Context, errors, streams
pub use context::OpContext;
pub use error::PermgateError;
pub use stream::{ResultSink, ResultStream};

// Traits
pub use traits::RelationshipRepository;

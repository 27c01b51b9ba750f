// crates/permgate-query/src/lib.rs
//
// permgate-query: The query side of the permgate gateway.
//
// Resolves request limits against the system ceiling, turns bounded lookup
// requests into capped, cancellable result streams, and hosts the small
// usecases (fencing-token exchange, readiness) that sit directly on the
// repository contract.

pub mod engine;
pub mod limits;
pub mod lock;
pub mod readiness;

pub use engine::{EngineConfig, Lookup, LookupEngine, LookupState};
pub use limits::{LimitPolicy, LookupLimit, DEFAULT_MAX_LOOKUP_LIMIT};
pub use lock::LockService;
pub use readiness::ReadinessProbe;

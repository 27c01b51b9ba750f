// crates/permgate-store/src/lib.rs
//
// permgate-store: Relationship backends for the permgate gateway.
//
// Ships the in-memory backend used by the daemon's default profile and by
// tests. Clients for external authorization services implement the same
// `RelationshipRepository` trait from permgate-core.

pub mod memory;

pub use memory::MemoryRepository;

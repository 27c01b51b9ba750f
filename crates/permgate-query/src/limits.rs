// crates/permgate-query/src/limits.rs
//
// Resolution of request-provided limits against the system ceiling.
//
// The two lookup directions resolve differently:
//   LookupSubjects:  no limit or 0 -> unbounded; L -> min(L, ceiling)
//   LookupResources: no block -> ceiling; no limit or 0 -> unbounded;
//                    L -> min(L, ceiling)
//   ReadRelationships: no block, no limit, or 0 -> ceiling
// Existing clients depend on unbounded subject lookups, so the asymmetry is
// kept as-is and pinned by the tests below.

use std::fmt;
use std::num::NonZeroU32;

use permgate_core::query::Pagination;

/// Ceiling applied when no other value is configured.
pub const DEFAULT_MAX_LOOKUP_LIMIT: u32 = 1000;

/// A resolved result cap. Fixed before production starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupLimit {
    Unbounded,
    Capped(NonZeroU32),
}

impl LookupLimit {
    /// Wire form: 0 means unbounded.
    pub fn as_u32(self) -> u32 {
        match self {
            LookupLimit::Unbounded => 0,
            LookupLimit::Capped(n) => n.get(),
        }
    }

    /// Whether another item may be delivered after `delivered` items.
    pub fn allows(self, delivered: u64) -> bool {
        match self {
            LookupLimit::Unbounded => true,
            LookupLimit::Capped(n) => delivered < u64::from(n.get()),
        }
    }
}

impl fmt::Display for LookupLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupLimit::Unbounded => write!(f, "unbounded"),
            LookupLimit::Capped(n) => write!(f, "{}", n),
        }
    }
}

/// Holds the system ceiling and applies the per-operation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    ceiling: NonZeroU32,
}

impl LimitPolicy {
    /// A ceiling of 0 falls back to [`DEFAULT_MAX_LOOKUP_LIMIT`].
    pub fn new(ceiling: u32) -> Self {
        let ceiling = NonZeroU32::new(ceiling)
            .or_else(|| NonZeroU32::new(DEFAULT_MAX_LOOKUP_LIMIT))
            .unwrap_or(NonZeroU32::MIN);
        Self { ceiling }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling.get()
    }

    /// LookupSubjects: zero or absent means unbounded.
    pub fn resolve_subjects(&self, pagination: Option<&Pagination>) -> LookupLimit {
        match pagination.and_then(|p| p.limit) {
            None | Some(0) => LookupLimit::Unbounded,
            Some(requested) => self.cap(requested),
        }
    }

    /// LookupResources: the ceiling stands in only when the pagination
    /// block is missing altogether. A block without a limit, or with 0, is
    /// unbounded.
    pub fn resolve_resources(&self, pagination: Option<&Pagination>) -> LookupLimit {
        match pagination {
            None => LookupLimit::Capped(self.ceiling),
            Some(block) => match block.limit {
                None | Some(0) => LookupLimit::Unbounded,
                Some(requested) => self.cap(requested),
            },
        }
    }

    /// ReadRelationships: never unbounded.
    pub fn resolve_read(&self, pagination: Option<&Pagination>) -> LookupLimit {
        match pagination.and_then(|p| p.limit) {
            None | Some(0) => LookupLimit::Capped(self.ceiling),
            Some(requested) => self.cap(requested),
        }
    }

    fn cap(&self, requested: u32) -> LookupLimit {
        match NonZeroU32::new(requested.min(self.ceiling.get())) {
            Some(n) => LookupLimit::Capped(n),
            None => LookupLimit::Capped(self.ceiling),
        }
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOOKUP_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(n: u32) -> Option<Pagination> {
        Some(Pagination::with_limit(n))
    }

    #[test]
    fn test_no_limit_subjects_unbounded() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.resolve_subjects(None), LookupLimit::Unbounded);
        assert_eq!(
            policy.resolve_subjects(Some(&Pagination::default())),
            LookupLimit::Unbounded
        );
        assert_eq!(policy.resolve_subjects(None).as_u32(), 0);
    }

    #[test]
    fn test_no_limit_resources_ceiling() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.resolve_resources(None).as_u32(), 1000);
        // A block without a limit is not the same as no block.
        assert_eq!(
            policy.resolve_resources(Some(&Pagination::default())),
            LookupLimit::Unbounded
        );
    }

    #[test]
    fn test_explicit_zero_differs_by_direction() {
        let policy = LimitPolicy::default();
        assert_eq!(
            policy.resolve_subjects(limit(0).as_ref()),
            LookupLimit::Unbounded
        );
        assert_eq!(
            policy.resolve_resources(limit(0).as_ref()),
            LookupLimit::Unbounded
        );
        assert_eq!(policy.resolve_read(limit(0).as_ref()).as_u32(), 1000);
    }

    #[test]
    fn test_read_never_unbounded() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.resolve_read(None).as_u32(), 1000);
        assert_eq!(policy.resolve_read(Some(&Pagination::default())).as_u32(), 1000);
        assert_eq!(policy.resolve_read(limit(7).as_ref()).as_u32(), 7);
        assert_eq!(policy.resolve_read(limit(5000).as_ref()).as_u32(), 1000);
    }

    #[test]
    fn test_limit_below_ceiling_kept() {
        let policy = LimitPolicy::default();
        for requested in [1, 2, 500, 999] {
            assert_eq!(policy.resolve_subjects(limit(requested).as_ref()).as_u32(), requested);
            assert_eq!(policy.resolve_resources(limit(requested).as_ref()).as_u32(), requested);
        }
    }

    #[test]
    fn test_limit_at_or_above_ceiling_capped() {
        let policy = LimitPolicy::default();
        for requested in [1000, 1100, u32::MAX] {
            assert_eq!(policy.resolve_subjects(limit(requested).as_ref()).as_u32(), 1000);
            assert_eq!(policy.resolve_resources(limit(requested).as_ref()).as_u32(), 1000);
        }
    }

    #[test]
    fn test_custom_ceiling_and_zero_fallback() {
        assert_eq!(LimitPolicy::new(50).resolve_resources(limit(80).as_ref()).as_u32(), 50);
        assert_eq!(LimitPolicy::new(0).ceiling(), DEFAULT_MAX_LOOKUP_LIMIT);
    }

    #[test]
    fn test_allows() {
        let two = LimitPolicy::default().resolve_subjects(limit(2).as_ref());
        assert!(two.allows(0));
        assert!(two.allows(1));
        assert!(!two.allows(2));
        assert!(LookupLimit::Unbounded.allows(u64::MAX));
    }
}

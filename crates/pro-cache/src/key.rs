//! Canonical stable hashing for cache keys, built on `std::hash::Hasher`
//! rather than pulling in a new hashing crate for it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hashes any canonicalized key tuple to a stable `u64`. Not
/// collision-proof on its own; callers pair it with a discriminant field
/// checked at lookup time (see `Cache`'s patient-isolation guard).
pub fn stable_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_hashes_identically() {
        assert_eq!(stable_hash(&("agg", 1u64, vec!["a", "b"])), stable_hash(&("agg", 1u64, vec!["a", "b"])));
    }

    #[test]
    fn different_version_changes_the_hash() {
        assert_ne!(stable_hash(&("agg", 1u64)), stable_hash(&("agg", 2u64)));
    }
}

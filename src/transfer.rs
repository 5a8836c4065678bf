//! [`Transfer`]: the immutable (source, destination) pair that identifies one
//! replication intent end to end — from the moment a change event arrives
//! until it terminates in a copy event. Never mutated; used as a map key in
//! both [`crate::worker::Worker`] and [`crate::controller::Controller`].

use std::path::PathBuf;

/// An absolute, canonicalized filesystem path.
pub type AbsolutePath = PathBuf;

/// A single replication intent: copy `from` to `to`.
///
/// Equality and hashing are derived over both fields, so a `Transfer` can be
/// used directly as a `HashMap`/`HashSet` key — this is how
/// [`crate::worker::Worker`] deduplicates pending and in-flight copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Transfer {
    pub from: AbsolutePath,
    pub to: AbsolutePath,
}

impl Transfer {
    pub fn new(from: impl Into<AbsolutePath>, to: impl Into<AbsolutePath>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::fmt::Display for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from.display(), self.to.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equal_transfers_hash_the_same() {
        let a = Transfer::new("/src/a.txt", "/dst/a.txt");
        let b = Transfer::new("/src/a.txt", "/dst/a.txt");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn different_destination_is_a_different_transfer() {
        let a = Transfer::new("/src/a.txt", "/dst/a.txt");
        let b = Transfer::new("/src/a.txt", "/dst/other/a.txt");
        assert_ne!(a, b);
    }
}

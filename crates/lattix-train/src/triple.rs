//! Id-encoded triples and the positive-triple membership set.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A (head, relation, tail) fact with dense integer ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    /// Head entity id.
    pub head: usize,
    /// Relation id.
    pub relation: usize,
    /// Tail entity id.
    pub tail: usize,
}

impl Triple {
    pub fn new(head: usize, relation: usize, tail: usize) -> Self {
        Self { head, relation, tail }
    }

    /// Same relation and tail, different head.
    #[inline]
    pub fn with_head(self, head: usize) -> Self {
        Self { head, ..self }
    }

    /// Same head and relation, different tail.
    #[inline]
    pub fn with_tail(self, tail: usize) -> Self {
        Self { tail, ..self }
    }
}

impl From<(usize, usize, usize)> for Triple {
    fn from((head, relation, tail): (usize, usize, usize)) -> Self {
        Self { head, relation, tail }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.head, self.relation, self.tail)
    }
}

/// Membership structure over every known positive triple.
///
/// Built once per worker and never mutated afterwards; negative samples are
/// rejected against it.
#[derive(Debug, Clone, Default)]
pub struct PositiveSet {
    triples: HashSet<Triple>,
}

impl PositiveSet {
    pub fn new(triples: &[Triple]) -> Self {
        Self {
            triples: triples.iter().copied().collect(),
        }
    }

    #[inline]
    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

impl FromIterator<Triple> for PositiveSet {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        Self {
            triples: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_sides() {
        let t = Triple::new(1, 2, 3);
        assert_eq!(t.with_head(7), Triple::new(7, 2, 3));
        assert_eq!(t.with_tail(7), Triple::new(1, 2, 7));
    }

    #[test]
    fn test_positive_set_membership() {
        let set = PositiveSet::new(&[Triple::new(0, 0, 1), Triple::new(1, 0, 2), Triple::new(0, 0, 1)]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Triple::new(1, 0, 2)));
        assert!(!set.contains(&Triple::new(2, 0, 1)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Triple::from((4, 5, 6)).to_string(), "(4, 5, 6)");
    }
}

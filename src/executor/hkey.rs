//! Hierarchical keys
//!
//! An hkey locates a row within its group: one segment per level from the
//! group root down to the row's own table, each segment tagged with the
//! table ordinal. Ordering is lexicographic over segments, which places a
//! parent row immediately before its descendants.

use std::cmp::Ordering;
use std::fmt;

use super::datum::Datum;

/// One level of an hkey
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HKeySegment {
    pub ordinal: u32,
    pub values: Vec<Datum>,
}

impl HKeySegment {
    pub fn new(ordinal: u32, values: Vec<Datum>) -> Self {
        Self { ordinal, values }
    }

    /// True if `self` equals `other` or is a strict value prefix of it
    fn is_prefix_of(&self, other: &HKeySegment) -> bool {
        self.ordinal == other.ordinal
            && self.values.len() <= other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| a == b)
    }
}

/// Hierarchical key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HKey {
    segments: Vec<HKeySegment>,
}

impl HKey {
    pub fn new(segments: Vec<HKeySegment>) -> Self {
        Self { segments }
    }

    /// Build from `(ordinal, values)` pairs, root first
    pub fn from_segments<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = (u32, Vec<Datum>)>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(|(ordinal, values)| HKeySegment::new(ordinal, values))
                .collect(),
        }
    }

    pub fn segments(&self) -> &[HKeySegment] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Copy of the first `n` segments (all of them if `n` exceeds the length)
    pub fn prefix(&self, n: usize) -> HKey {
        HKey {
            segments: self.segments[..n.min(self.segments.len())].to_vec(),
        }
    }

    /// Drop trailing segments so at most `n` remain
    pub fn truncate(&mut self, n: usize) {
        self.segments.truncate(n);
    }

    /// Append an empty segment for `ordinal`; the result is a prefix of
    /// every key in that child table's subtree
    pub fn extend_with_ordinal(&mut self, ordinal: u32) {
        self.segments.push(HKeySegment::new(ordinal, Vec::new()));
    }

    /// True if `other` lies in the subtree rooted at `self` (including
    /// `other == self`). The last segment of `self` may be partial.
    pub fn is_prefix_of(&self, other: &HKey) -> bool {
        let n = self.segments.len();
        if n == 0 {
            return true;
        }
        if n > other.segments.len() {
            return false;
        }
        self.segments[..n - 1] == other.segments[..n - 1]
            && self.segments[n - 1].is_prefix_of(&other.segments[n - 1])
    }
}

impl PartialOrd for HKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl fmt::Display for HKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "({}", segment.ordinal)?;
            for value in &segment.values {
                write!(f, ",{}", value)?;
            }
            write!(f, ")")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[(u32, i64)]) -> HKey {
        HKey::from_segments(parts.iter().map(|(o, v)| (*o, vec![Datum::Int(*v)])))
    }

    #[test]
    fn test_hkey_order_parent_before_children() {
        let c1 = key(&[(1, 1)]);
        let o1 = key(&[(1, 1), (2, 10)]);
        let i1 = key(&[(1, 1), (2, 10), (3, 100)]);
        let o2 = key(&[(1, 1), (2, 11)]);
        let c2 = key(&[(1, 2)]);
        let mut keys = vec![c2.clone(), i1.clone(), o2.clone(), c1.clone(), o1.clone()];
        keys.sort();
        assert_eq!(keys, vec![c1, o1, i1, o2, c2]);
    }

    #[test]
    fn test_hkey_prefix() {
        let i1 = key(&[(1, 1), (2, 10), (3, 100)]);
        assert_eq!(i1.prefix(1), key(&[(1, 1)]));
        assert_eq!(i1.prefix(5), i1);
        assert!(i1.prefix(2).is_prefix_of(&i1));
        assert!(i1.is_prefix_of(&i1));
        assert!(!key(&[(1, 2)]).is_prefix_of(&i1));
        assert!(!i1.is_prefix_of(&i1.prefix(2)));
    }

    #[test]
    fn test_hkey_extend_with_ordinal() {
        let mut branch = key(&[(1, 1)]);
        branch.extend_with_ordinal(2);
        assert!(branch.is_prefix_of(&key(&[(1, 1), (2, 10)])));
        assert!(branch.is_prefix_of(&key(&[(1, 1), (2, 10), (3, 100)])));
        assert!(!branch.is_prefix_of(&key(&[(1, 1), (4, 5)])));
        assert!(!branch.is_prefix_of(&key(&[(1, 1)])));
    }

    #[test]
    fn test_hkey_truncate() {
        let mut k = key(&[(1, 1), (2, 10), (3, 100)]);
        k.truncate(2);
        assert_eq!(k.len(), 2);
        assert_eq!(k.to_string(), "{(1,1),(2,10)}");
    }
}

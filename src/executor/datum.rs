//! Runtime values carried by rows and bindings
//!
//! Integers and floats compare (and hash) as numbers, so `Int(2)` and
//! `Float(2.0)` are the same key in sorts, hash tables and hkeys. Null
//! sorts below everything else.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::catalog::DataType;

#[derive(Debug, Clone, Default)]
pub enum Datum {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Sort class; values of different classes order by class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Class {
    Null,
    Bool,
    Number,
    String,
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    fn class(&self) -> Class {
        match self {
            Datum::Null => Class::Null,
            Datum::Bool(_) => Class::Bool,
            Datum::Int(_) | Datum::Float(_) => Class::Number,
            Datum::String(_) => Class::String,
        }
    }

    /// None for null
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(DataType::Boolean),
            Datum::Int(_) => Some(DataType::BigInt),
            Datum::Float(_) => Some(DataType::Double),
            Datum::String(_) => Some(DataType::Text),
        }
    }

    /// Truth value; integers are true when nonzero
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            Datum::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Datum::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Datum::Float(f) => Some(*f),
            Datum::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unary minus; null stays null
    pub fn negate(&self) -> Option<Datum> {
        match self {
            Datum::Int(i) => i.checked_neg().map(Datum::Int),
            Datum::Float(f) => Some(Datum::Float(-f)),
            Datum::Null => Some(Datum::Null),
            _ => None,
        }
    }

    /// Logical NOT; null stays null
    pub fn not(&self) -> Option<Datum> {
        match self {
            Datum::Bool(b) => Some(Datum::Bool(!b)),
            Datum::Null => Some(Datum::Null),
            _ => None,
        }
    }

    /// Numeric addition keeping integers integral; None on overflow or
    /// non-numeric operands
    pub fn checked_add(&self, other: &Datum) -> Option<Datum> {
        match (self, other) {
            (Datum::Int(a), Datum::Int(b)) => a.checked_add(*b).map(Datum::Int),
            _ => Some(Datum::Float(self.numeric()? + other.numeric()?)),
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// An integral float, as the integer it equals
    fn integral(f: f64) -> Option<i64> {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            Some(f as i64)
        } else {
            None
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Float(v) => write!(f, "{}", v),
            Datum::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::String(v)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(v: Option<T>) -> Self {
        v.map_or(Datum::Null, Into::into)
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::String(a), Datum::String(b)) => a.cmp(b),
            (Datum::Float(a), Datum::Float(b)) => a.total_cmp(b),
            (Datum::Int(i), Datum::Float(f)) => (*i as f64).total_cmp(f),
            (Datum::Float(f), Datum::Int(i)) => f.total_cmp(&(*i as f64)),
            _ => self.class().cmp(&other.class()),
        }
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class().hash(state);
        match self {
            Datum::Null => {}
            Datum::Bool(b) => b.hash(state),
            Datum::Int(i) => i.hash(state),
            Datum::Float(f) => match Datum::integral(*f) {
                Some(i) => i.hash(state),
                None => f.to_bits().hash(state),
            },
            Datum::String(s) => s.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(d: &Datum) -> u64 {
        let mut h = DefaultHasher::new();
        d.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_accessors() {
        assert!(Datum::Null.is_null());
        assert!(Datum::Null.data_type().is_none());
        assert_eq!(Datum::Bool(true).as_int(), None);
        assert_eq!(Datum::Int(3).as_bool(), Some(true));
        assert_eq!(Datum::Int(42).as_float(), Some(42.0));
        assert_eq!(Datum::Float(2.5).as_int(), None);
        assert_eq!(Datum::from("hello").as_str(), Some("hello"));
        assert_eq!(Datum::from(None::<i64>), Datum::Null);
        assert_eq!(Datum::from(Some(4i64)), Datum::Int(4));
    }

    #[test]
    fn test_ordering_across_classes() {
        let mut values = vec![
            Datum::from("a"),
            Datum::Float(1.5),
            Datum::Null,
            Datum::Int(1),
            Datum::Bool(false),
            Datum::Int(2),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Datum::Null,
                Datum::Bool(false),
                Datum::Int(1),
                Datum::Float(1.5),
                Datum::Int(2),
                Datum::from("a"),
            ]
        );
    }

    #[test]
    fn test_numbers_equal_across_types() {
        assert_eq!(Datum::Int(2), Datum::Float(2.0));
        assert_eq!(hash_of(&Datum::Int(2)), hash_of(&Datum::Float(2.0)));
        assert_ne!(Datum::Int(2), Datum::Float(2.5));
        assert_ne!(Datum::Int(0), Datum::Bool(false));
    }

    #[test]
    fn test_hash_set_dedups_by_value() {
        use std::collections::HashSet;
        let set: HashSet<Datum> = [
            Datum::Int(1),
            Datum::Float(1.0),
            Datum::Null,
            Datum::Null,
            Datum::from("1"),
            Datum::Bool(true),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 4);
        assert_ne!(hash_of(&Datum::Null), hash_of(&Datum::Bool(false)));
    }

    #[test]
    fn test_checked_add() {
        assert_eq!(Datum::Int(2).checked_add(&Datum::Int(3)), Some(Datum::Int(5)));
        assert_eq!(Datum::Int(2).checked_add(&Datum::Float(0.5)), Some(Datum::Float(2.5)));
        assert_eq!(Datum::Int(i64::MAX).checked_add(&Datum::Int(1)), None);
        assert_eq!(Datum::from("a").checked_add(&Datum::Int(1)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Datum::Null.to_string(), "NULL");
        assert_eq!(Datum::from(7i64).to_string(), "7");
        assert_eq!(Datum::from("x").to_string(), "'x'");
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(Datum::Int(5).negate(), Some(Datum::Int(-5)));
        assert_eq!(Datum::Int(i64::MIN).negate(), None);
        assert_eq!(Datum::Float(2.5).negate(), Some(Datum::Float(-2.5)));
        assert_eq!(Datum::Bool(true).not(), Some(Datum::Bool(false)));
        assert_eq!(Datum::Null.not(), Some(Datum::Null));
        assert_eq!(Datum::from("s").not(), None);
    }
}

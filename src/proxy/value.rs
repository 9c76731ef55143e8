//! Tagged value model for objects crossing environment boundaries
//!
//! Environments exchange plain data as [`ObjectValue`]s: a small tagged
//! union every backend can represent directly. Wire formats for arbitrary
//! application types are deliberately not part of this engine; anything
//! richer travels as an opaque object handle instead.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A plain value representable in every environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ObjectValue {
    /// The unit/null value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Homogeneous or heterogeneous list
    List(Vec<ObjectValue>),
}

impl ObjectValue {
    /// Type string reported to the editor
    pub fn type_string(&self) -> &'static str {
        match self {
            ObjectValue::Null => "unit",
            ObjectValue::Bool(_) => "bool",
            ObjectValue::Int(_) => "i64",
            ObjectValue::Float(_) => "f64",
            ObjectValue::Str(_) => "string",
            ObjectValue::List(_) => "array",
        }
    }

    /// Display rendering for property previews
    pub fn display_string(&self) -> String {
        match self {
            ObjectValue::Null => "null".to_string(),
            ObjectValue::Bool(b) => b.to_string(),
            ObjectValue::Int(i) => i.to_string(),
            ObjectValue::Float(f) => f.to_string(),
            ObjectValue::Str(s) => s.clone(),
            ObjectValue::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.display_string()).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }

    /// Compare two values, `None` when the pair has no defined order
    pub fn compare(&self, other: &ObjectValue) -> Option<Ordering> {
        match (self, other) {
            (ObjectValue::Null, ObjectValue::Null) => Some(Ordering::Equal),
            (ObjectValue::Bool(a), ObjectValue::Bool(b)) => Some(a.cmp(b)),
            (ObjectValue::Int(a), ObjectValue::Int(b)) => Some(a.cmp(b)),
            (ObjectValue::Float(a), ObjectValue::Float(b)) => a.partial_cmp(b),
            (ObjectValue::Int(a), ObjectValue::Float(b)) => (*a as f64).partial_cmp(b),
            (ObjectValue::Float(a), ObjectValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (ObjectValue::Str(a), ObjectValue::Str(b)) => Some(a.cmp(b)),
            (ObjectValue::List(a), ObjectValue::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Some(Ordering::Equal) => continue,
                        other => return other,
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Stable content hash across processes
    pub fn content_hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ObjectValue::Null => 0u8.hash(state),
            ObjectValue::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            ObjectValue::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            ObjectValue::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            ObjectValue::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            ObjectValue::List(items) => {
                5u8.hash(state);
                items.len().hash(state);
                for item in items {
                    item.content_hash(state);
                }
            }
        }
    }

    /// Convert from a rhai evaluation result
    ///
    /// Returns `None` for dynamic types the value model cannot carry
    /// (maps, closures, custom types).
    pub fn from_dynamic(value: &rhai::Dynamic) -> Option<ObjectValue> {
        if value.is_unit() {
            return Some(ObjectValue::Null);
        }
        if let Some(b) = value.clone().try_cast::<bool>() {
            return Some(ObjectValue::Bool(b));
        }
        if let Some(i) = value.clone().try_cast::<i64>() {
            return Some(ObjectValue::Int(i));
        }
        if let Some(f) = value.clone().try_cast::<f64>() {
            return Some(ObjectValue::Float(f));
        }
        if let Some(s) = value.clone().try_cast::<rhai::ImmutableString>() {
            return Some(ObjectValue::Str(s.to_string()));
        }
        if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
            let items: Option<Vec<ObjectValue>> =
                arr.iter().map(ObjectValue::from_dynamic).collect();
            return items.map(ObjectValue::List);
        }
        None
    }

    /// Convert into a rhai scope value
    pub fn to_dynamic(&self) -> rhai::Dynamic {
        match self {
            ObjectValue::Null => rhai::Dynamic::UNIT,
            ObjectValue::Bool(b) => rhai::Dynamic::from(*b),
            ObjectValue::Int(i) => rhai::Dynamic::from(*i),
            ObjectValue::Float(f) => rhai::Dynamic::from(*f),
            ObjectValue::Str(s) => rhai::Dynamic::from(s.clone()),
            ObjectValue::List(items) => {
                let arr: rhai::Array = items.iter().map(|v| v.to_dynamic()).collect();
                rhai::Dynamic::from(arr)
            }
        }
    }

    /// Extract a string, if this value is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ObjectValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Extract an integer, accepting exact floats
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ObjectValue::Int(i) => Some(*i),
            ObjectValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    #[test]
    fn test_type_strings() {
        assert_eq!(ObjectValue::Int(1).type_string(), "i64");
        assert_eq!(ObjectValue::Float(1.0).type_string(), "f64");
        assert_eq!(ObjectValue::Str("x".into()).type_string(), "string");
        assert_eq!(ObjectValue::List(vec![]).type_string(), "array");
    }

    #[test]
    fn test_numeric_cross_compare() {
        let a = ObjectValue::Int(2);
        let b = ObjectValue::Float(2.0);
        assert_eq!(a.compare(&b), Some(Ordering::Equal));
        assert_eq!(
            ObjectValue::Int(3).compare(&ObjectValue::Float(2.5)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_incomparable_pair() {
        let a = ObjectValue::Int(1);
        let b = ObjectValue::Str("1".into());
        assert_eq!(a.compare(&b), None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = ObjectValue::List(vec![
            ObjectValue::Int(1),
            ObjectValue::Str("two".into()),
            ObjectValue::Float(3.0),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        let back: ObjectValue = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_content_hash_distinguishes_variants() {
        let hash = |v: &ObjectValue| {
            let mut h = DefaultHasher::new();
            v.content_hash(&mut h);
            std::hash::Hasher::finish(&h)
        };
        assert_ne!(hash(&ObjectValue::Int(1)), hash(&ObjectValue::Float(1.0)));
        assert_eq!(hash(&ObjectValue::Int(7)), hash(&ObjectValue::Int(7)));
    }

    #[test]
    fn test_dynamic_roundtrip() {
        let v = ObjectValue::List(vec![ObjectValue::Int(4), ObjectValue::Bool(true)]);
        let dynamic = v.to_dynamic();
        assert_eq!(ObjectValue::from_dynamic(&dynamic), Some(v));
    }
}

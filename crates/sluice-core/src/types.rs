//! Values and their types.
//!
//! Types form a closed recursive set: primitives, `List`, `Record`, and
//! `Enumeration`. Every value can report its type and every value of a field
//! must conform to the field's declared type (or be null).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Bool,
    Int64,
    UInt64,
    Double,
    String,
    Blob,
    /// Nanoseconds since the Unix epoch.
    Time,
    /// Nanoseconds.
    Duration,
    List(Box<DataType>),
    Record(Vec<Field>),
    /// Named variants; values carry the variant index.
    Enumeration(Vec<String>),
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::UInt64 | DataType::Double)
    }

    pub(crate) fn hash_into(&self, h: &mut blake3::Hasher) {
        match self {
            DataType::Null => h.update(b"null"),
            DataType::Bool => h.update(b"bool"),
            DataType::Int64 => h.update(b"int64"),
            DataType::UInt64 => h.update(b"uint64"),
            DataType::Double => h.update(b"double"),
            DataType::String => h.update(b"string"),
            DataType::Blob => h.update(b"blob"),
            DataType::Time => h.update(b"time"),
            DataType::Duration => h.update(b"duration"),
            DataType::List(inner) => {
                h.update(b"list<");
                inner.hash_into(h);
                h.update(b">")
            }
            DataType::Record(fields) => {
                h.update(b"record{");
                for f in fields {
                    h.update(f.name.as_bytes());
                    h.update(b":");
                    f.data_type.hash_into(h);
                    h.update(b",");
                }
                h.update(b"}")
            }
            DataType::Enumeration(variants) => {
                h.update(b"enum{");
                for v in variants {
                    h.update(v.as_bytes());
                    h.update(b",");
                }
                h.update(b"}")
            }
        };
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "null"),
            DataType::Bool => write!(f, "bool"),
            DataType::Int64 => write!(f, "int64"),
            DataType::UInt64 => write!(f, "uint64"),
            DataType::Double => write!(f, "double"),
            DataType::String => write!(f, "string"),
            DataType::Blob => write!(f, "blob"),
            DataType::Time => write!(f, "time"),
            DataType::Duration => write!(f, "duration"),
            DataType::List(inner) => write!(f, "list<{inner}>"),
            DataType::Record(fields) => {
                write!(f, "record{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, "}}")
            }
            DataType::Enumeration(variants) => write!(f, "enum{{{}}}", variants.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Time(i64),
    Duration(i64),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
    Enum(u32),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn is_nan(&self) -> bool {
        matches!(self, Value::Double(d) if d.is_nan())
    }

    /// The type a freshly inferred field holding this value gets.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Int64(_) => DataType::Int64,
            Value::UInt64(_) => DataType::UInt64,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Blob(_) => DataType::Blob,
            Value::Time(_) => DataType::Time,
            Value::Duration(_) => DataType::Duration,
            Value::List(items) => {
                let inner = items
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Value::data_type)
                    .unwrap_or(DataType::Null);
                DataType::List(Box::new(inner))
            }
            Value::Record(fields) => DataType::Record(
                fields
                    .iter()
                    .map(|(name, v)| Field::new(name.clone(), v.data_type()))
                    .collect(),
            ),
            // An enumeration value without its type is just an index.
            Value::Enum(_) => DataType::UInt64,
        }
    }

    /// Whether this value may be stored in a field of type `ty`.
    pub fn conforms_to(&self, ty: &DataType) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::Bool(_), DataType::Bool)
            | (Value::Int64(_), DataType::Int64)
            | (Value::UInt64(_), DataType::UInt64)
            | (Value::Double(_), DataType::Double)
            | (Value::String(_), DataType::String)
            | (Value::Blob(_), DataType::Blob)
            | (Value::Time(_), DataType::Time)
            | (Value::Duration(_), DataType::Duration) => true,
            (Value::List(items), DataType::List(inner)) => {
                items.iter().all(|v| v.conforms_to(inner))
            }
            (Value::Record(values), DataType::Record(fields)) => {
                values.len() == fields.len()
                    && values
                        .iter()
                        .zip(fields)
                        .all(|((name, v), f)| *name == f.name && v.conforms_to(&f.data_type))
            }
            (Value::Enum(idx), DataType::Enumeration(variants)) => (*idx as usize) < variants.len(),
            _ => false,
        }
    }

    /// Rank of the value kind; used to order values of different kinds.
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int64(_) | Value::UInt64(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Blob(_) => 4,
            Value::Time(_) => 5,
            Value::Duration(_) => 6,
            Value::List(_) => 7,
            Value::Record(_) => 8,
            Value::Enum(_) => 9,
        }
    }

    /// Comparison used by predicates. Returns `None` when the two values are
    /// not comparable (different kinds, or null against non-null).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) | (_, Null) => None,
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (UInt64(a), UInt64(b)) => Some(a.cmp(b)),
            (Int64(a), UInt64(b)) => Some((*a as i128).cmp(&(*b as i128))),
            (UInt64(a), Int64(b)) => Some((*a as i128).cmp(&(*b as i128))),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Double(a), Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Double(a), UInt64(b)) => a.partial_cmp(&(*b as f64)),
            (Int64(a), Double(b)) => (*a as f64).partial_cmp(b),
            (UInt64(a), Double(b)) => (*a as f64).partial_cmp(b),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Blob(a), Blob(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (Duration(a), Duration(b)) => Some(a.cmp(b)),
            (Enum(a), Enum(b)) => Some(a.cmp(b)),
            (List(_), List(_)) | (Record(_), Record(_)) => Some(self.total_cmp(other)),
            _ => None,
        }
    }

    /// Total order for sorting: nulls first, then by kind, NaN last among
    /// numbers.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (List(a), List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.total_cmp(y) {
                        Ordering::Equal => continue,
                        o => return o,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Record(a), Record(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    match ka.cmp(kb).then_with(|| va.total_cmp(vb)) {
                        Ordering::Equal => continue,
                        o => return o,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ if self.kind_rank() == 2
                && other.kind_rank() == 2
                && (self.is_nan() || other.is_nan()) =>
            {
                self.is_nan().cmp(&other.is_nan())
            }
            _ => match self.compare(other) {
                Some(o) => o,
                None => self.kind_rank().cmp(&other.kind_rank()),
            },
        }
    }

    /// Feed a stable encoding of this value into a hasher.
    pub fn hash_into(&self, h: &mut blake3::Hasher) {
        h.update(&[self.kind_rank()]);
        match self {
            Value::Null => {}
            Value::Bool(b) => {
                h.update(&[*b as u8]);
            }
            // Integers hash by value so that 1 and 1u hash equally.
            Value::Int64(i) => {
                h.update(&(*i as i128).to_le_bytes());
            }
            Value::UInt64(u) => {
                h.update(&(*u as i128).to_le_bytes());
            }
            Value::Double(d) => {
                h.update(&d.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                h.update(&(s.len() as u64).to_le_bytes());
                h.update(s.as_bytes());
            }
            Value::Blob(b) => {
                h.update(&(b.len() as u64).to_le_bytes());
                h.update(b);
            }
            Value::Time(t) | Value::Duration(t) => {
                h.update(&t.to_le_bytes());
            }
            Value::List(items) => {
                h.update(&(items.len() as u64).to_le_bytes());
                for v in items {
                    v.hash_into(h);
                }
            }
            Value::Record(fields) => {
                h.update(&(fields.len() as u64).to_le_bytes());
                for (k, v) in fields {
                    h.update(k.as_bytes());
                    v.hash_into(h);
                }
            }
            Value::Enum(i) => {
                h.update(&i.to_le_bytes());
            }
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt64(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON. `ty` resolves enumeration indices to variant names.
    pub fn to_json(&self, ty: Option<&DataType>) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int64(i) => J::from(*i),
            Value::UInt64(u) => J::from(*u),
            Value::Double(d) => serde_json::Number::from_f64(*d).map(J::Number).unwrap_or(J::Null),
            Value::String(s) => J::String(s.clone()),
            Value::Blob(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Time(t) | Value::Duration(t) => J::from(*t),
            Value::List(items) => {
                let inner = match ty {
                    Some(DataType::List(inner)) => Some(inner.as_ref()),
                    _ => None,
                };
                J::Array(items.iter().map(|v| v.to_json(inner)).collect())
            }
            Value::Record(fields) => {
                let mut map = serde_json::Map::new();
                for (i, (k, v)) in fields.iter().enumerate() {
                    let field_ty = match ty {
                        Some(DataType::Record(fs)) => fs.get(i).map(|f| &f.data_type),
                        _ => None,
                    };
                    map.insert(k.clone(), v.to_json(field_ty));
                }
                J::Object(map)
            }
            Value::Enum(idx) => match ty {
                Some(DataType::Enumeration(variants)) => variants
                    .get(*idx as usize)
                    .map(|s| J::String(s.clone()))
                    .unwrap_or(J::Null),
                _ => J::from(*idx),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::UInt64(u) => write!(f, "{u}"),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => write!(f, "{d:.1}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            _ => write!(f, "{}", self.to_json(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_integer_comparison() {
        assert_eq!(Value::Int64(-1).compare(&Value::UInt64(1)), Some(Ordering::Less));
        assert_eq!(Value::Double(2.5).compare(&Value::Int64(2)), Some(Ordering::Greater));
        assert_eq!(Value::String("a".into()).compare(&Value::Int64(1)), None);
        assert_eq!(Value::Null.compare(&Value::Int64(1)), None);
    }

    #[test]
    fn total_order_puts_nulls_first_and_nan_last() {
        let mut values = vec![
            Value::Double(f64::NAN),
            Value::Int64(3),
            Value::Null,
            Value::Double(1.5),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Double(1.5));
        assert_eq!(values[2], Value::Int64(3));
        assert!(matches!(values[3], Value::Double(d) if d.is_nan()));
    }

    #[test]
    fn conformance_is_recursive() {
        let ty = DataType::List(Box::new(DataType::Int64));
        assert!(Value::List(vec![Value::Int64(1), Value::Null]).conforms_to(&ty));
        assert!(!Value::List(vec![Value::String("x".into())]).conforms_to(&ty));

        let en = DataType::Enumeration(vec!["low".into(), "high".into()]);
        assert!(Value::Enum(1).conforms_to(&en));
        assert!(!Value::Enum(2).conforms_to(&en));
        assert_eq!(Value::Enum(1).to_json(Some(&en)), serde_json::json!("high"));
    }

    #[test]
    fn json_conversion_preserves_structure() {
        let json = serde_json::json!({"a": 1, "b": [true, null], "c": {"d": "x"}});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(None), json);
    }

    #[test]
    fn equal_integers_hash_equally_across_signedness() {
        let mut a = blake3::Hasher::new();
        Value::Int64(7).hash_into(&mut a);
        let mut b = blake3::Hasher::new();
        Value::UInt64(7).hash_into(&mut b);
        assert_eq!(a.finalize(), b.finalize());
    }
}

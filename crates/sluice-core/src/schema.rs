//! Named, ordered schemas shared by all rows of a table slice.

use serde::{Deserialize, Serialize};

use crate::hash::Hash256;
use crate::types::{DataType, Field};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn data_type_of(&self, name: &str) -> Option<&DataType> {
        self.index_of(name).map(|i| &self.fields[i].data_type)
    }

    /// Schema restricted to the given field indices, in that order.
    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema {
            name: self.name.clone(),
            fields: indices
                .iter()
                .filter_map(|&i| self.fields.get(i).cloned())
                .collect(),
        }
    }

    /// Content fingerprint; equal schemas always share a fingerprint.
    pub fn fingerprint(&self) -> Hash256 {
        let mut h = blake3::Hasher::new();
        h.update(self.name.as_bytes());
        h.update(&[0]);
        for f in &self.fields {
            h.update(f.name.as_bytes());
            h.update(&[0]);
            f.data_type.hash_into(&mut h);
        }
        Hash256::from(h)
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ", self.name)?;
        write!(f, "{}", DataType::Record(self.fields.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(
            "test.event",
            vec![
                Field::new("a", DataType::Int64),
                Field::new("b", DataType::String),
            ],
        )
    }

    #[test]
    fn fingerprint_tracks_field_types() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.fields[1].data_type = DataType::Blob;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn projection_keeps_requested_order() {
        let s = sample().project(&[1, 0]);
        assert_eq!(s.fields[0].name, "b");
        assert_eq!(s.index_of("a"), Some(1));
        assert_eq!(s.to_string(), "test.event record{b: string, a: int64}");
    }
}

//! Stream elements and the element types operators declare.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::slice::TableSlice;

/// What flows along one pipeline edge. `Void` marks the absence of a stream:
/// the input of a source or the output of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Void,
    Events,
    Bytes,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Void => write!(f, "void"),
            ElementType::Events => write!(f, "events"),
            ElementType::Bytes => write!(f, "bytes"),
        }
    }
}

/// Whether the consumer of a stream depends on the order of its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrder {
    Ordered,
    Unordered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Events(TableSlice),
    Bytes(Bytes),
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Events(_) => ElementType::Events,
            Element::Bytes(_) => ElementType::Bytes,
        }
    }

    /// An element that carries no data. Stalls are never forwarded.
    pub fn is_stall(&self) -> bool {
        match self {
            Element::Events(s) => s.is_empty(),
            Element::Bytes(b) => b.is_empty(),
        }
    }

    /// Rows for events, bytes for chunks.
    pub fn len(&self) -> usize {
        match self {
            Element::Events(s) => s.rows(),
            Element::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_stall()
    }

    pub fn into_events(self) -> Option<TableSlice> {
        match self {
            Element::Events(s) => Some(s),
            Element::Bytes(_) => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Element::Bytes(b) => Some(b),
            Element::Events(_) => None,
        }
    }
}

impl From<TableSlice> for Element {
    fn from(s: TableSlice) -> Self {
        Element::Events(s)
    }
}

impl From<Bytes> for Element {
    fn from(b: Bytes) -> Self {
        Element::Bytes(b)
    }
}

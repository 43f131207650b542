//! Pipeline document formats.

pub mod yaml;

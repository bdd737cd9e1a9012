//! Repository side of ingestion: project lookup, filename sanitizing and filing.

pub mod filer;
pub mod resolver;
pub mod sanitize;

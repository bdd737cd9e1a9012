//! Message parsing: subject routing and MIME attachment extraction.

pub mod mime;
pub mod subject;

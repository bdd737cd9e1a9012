//! `mailfiler`: files messages from an IMAP inbox into a per-project
//! directory tree and replies to the sender when a message cannot be filed.
//!
//! The library holds the pipeline (subject parsing, directory resolution,
//! filing), the error notifier, the mail transports and the poll loop.

pub mod config;
pub mod error;
pub mod filing;
pub mod ingest;
pub mod mail;
pub mod model;
pub mod notify;
pub mod parser;
pub mod scheduler;

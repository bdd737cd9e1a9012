//! Core data model types for fetched messages and addresses.

pub mod address;
pub mod message;

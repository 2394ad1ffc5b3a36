//! Frame-record wire format
//!
//! Recorded sessions are stored as frame records, either newline-delimited
//! JSON or a JSON array. The CLI and FFI both read this format.

mod record;

pub use record::*;

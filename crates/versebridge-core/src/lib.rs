//! Core domain logic for versebridge.
//!
//! This crate holds everything that works without a network connection:
//! the song/artist pair value type, the loose title-matching heuristic
//! used to judge lyrics-search candidates, the durable ledger of
//! unsupported pairs, and the SQLite store of confirmed strippers.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod ledger;
pub mod matcher;
pub mod song;
pub mod store;

pub use error::{Error, Result};
pub use ledger::UnsupportedLedger;
pub use song::SongQuery;
pub use store::StripperStore;

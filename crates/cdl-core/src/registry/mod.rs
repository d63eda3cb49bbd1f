//! Durable job registry (SQLite via sqlx).
//!
//! Stores every job and transfer unit with enough state to resume after a
//! crash: statuses, byte counts, resume cursors and attempt counts. Aggregate
//! job counters are not stored; they are recomputed from the units on load.
//! The event bus is in-memory only; anything a subscriber missed can be
//! re-derived from here.

mod db;
mod jobs;
mod usage;

pub use db::Registry;
pub use db::unix_timestamp;

#[cfg(test)]
pub(crate) use db::open_memory;

#[cfg(test)]
mod tests;

//! Thread-safe multiset.
//!
//! [`Multiset`] counts occurrences per distinct element behind a single
//! reader/writer lock. Reads share the lock, writes take it exclusively, and
//! every accessor returns an independent copy of the data.

mod multiset;

pub use crate::multiset::{Iter, Multiset};

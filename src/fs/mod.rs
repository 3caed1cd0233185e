//! Local filesystem attributes

pub mod stat;

pub use stat::{EntryType, LocalStat, Permissions, StatTimes};

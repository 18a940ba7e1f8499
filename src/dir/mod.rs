pub mod controller;
pub mod entry;
pub mod entry_cache;
pub mod mshr;
pub mod stats;

mod handlers;

#[cfg(test)]
mod unit_tests;

pub use controller::{CoherenceProtocol, DirectoryController};
pub use entry::{CoherenceState, DirEntry};
pub use entry_cache::EntryCache;
pub use mshr::{Mshr, MshrEntryKind};
pub use stats::{DirectoryStats, LatencyStat, OccupancyStat};

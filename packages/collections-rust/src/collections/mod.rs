//! Collection types backed by one store key each.
//!
//! Every instance owns its own batching state: buffered writes of one
//! instance are never flushed by another, even when both address the same
//! key. Two instances over one key observe each other only once their
//! batches have been flushed.

mod map;
mod set;
mod sorted_set;
mod string;

pub use map::RemoteMap;
pub use set::RemoteSet;
pub use sorted_set::{RemoteSortedSet, Scored};
pub use string::RemoteString;

/// Converts a store count to `usize`, saturating on narrow targets.
fn to_len(count: u64) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}

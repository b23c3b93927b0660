//! Append-only message storage, partitioned per chat and per day.

pub mod store;

pub use store::{MessageStore, StoreError};

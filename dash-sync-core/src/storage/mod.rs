//! Layout storage tiers and the gateway that falls back between them.

mod gateway;
mod kv;

pub use gateway::{LoadOutcome, SaveOutcome, StorageGateway, StorageSource};
pub use kv::{FileStore, KeyValueStore, MemoryStore, PayloadCodec, PlainCodec, StorageError};

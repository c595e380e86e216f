//! Cache domain - Store contract and the values that flow through it

mod entry;
mod event;
mod key;
mod serializer;
mod store;

pub use entry::CacheEntry;
pub use event::{CacheEvent, CacheEventKind};
pub use key::{TAG_NAMESPACE, TagSet, prefixed_key};
pub use serializer::{
    BinarySerializer, JsonSerializer, Serializer, SerializerKind, from_value, to_value,
};
pub use store::{Store, StoreExt, parse_counter};

#[cfg(test)]
pub use serializer::MockSerializer;
#[cfg(test)]
pub use store::mock::{MockStore, StoreCall};

//! Remote decoding secrets: fetch, cache, invalidate, retry once.

pub mod retry;
pub mod store;

pub use retry::{MAX_KEY_ATTEMPTS, with_key};
pub use store::{
    KeyFormat, KeyMaterial, KeyOrigin, KeySource, KeyStore, ObfuscationKey, builtin_key_sources,
    parse_key_material,
};

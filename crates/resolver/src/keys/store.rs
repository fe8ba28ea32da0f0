use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::decoder::parse_index_pairs;
use crate::error::ResolveError;
use crate::fetcher::{FetchRequest, Fetcher};

const MEGACLOUD_KEY_URL: &str =
    "https://raw.githubusercontent.com/itzzzme/megacloud-keys/refs/heads/main/key.txt";
const RABBITSTREAM_KEY_URL: &str = "https://raw.githubusercontent.com/Claudemirovsky/keys/e4/key";
const VIDPLAY_KEY_URL: &str =
    "https://raw.githubusercontent.com/KillerDogeEmpire/vidplay-keys/keys/keys.json";

/// Shape of a remote key document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    /// JSON `[[offset, length], ...]`.
    IndexPairs,
    /// JSON `["key", ...]`.
    KeyList,
    /// The whole body, trimmed.
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySource {
    pub url: String,
    pub format: KeyFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    IndexPairs(Vec<(usize, usize)>),
    Keys(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Static,
    Remote,
}

/// A decoding secret and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObfuscationKey {
    pub material: KeyMaterial,
    pub origin: KeyOrigin,
}

impl ObfuscationKey {
    pub fn static_text(text: impl Into<String>) -> Self {
        Self {
            material: KeyMaterial::Text(text.into()),
            origin: KeyOrigin::Static,
        }
    }

    pub fn index_pairs(&self) -> Result<&[(usize, usize)], ResolveError> {
        match &self.material {
            KeyMaterial::IndexPairs(pairs) => Ok(pairs),
            _ => Err(ResolveError::format("key is not an index-pair table")),
        }
    }

    /// The `n`th key of a list, or the text itself for `n == 0`.
    pub fn key_at(&self, n: usize) -> Result<&str, ResolveError> {
        match &self.material {
            KeyMaterial::Keys(keys) => keys
                .get(n)
                .map(String::as_str)
                .ok_or_else(|| ResolveError::format(format!("key list has no entry {n}"))),
            KeyMaterial::Text(text) if n == 0 => Ok(text),
            _ => Err(ResolveError::format(format!("key has no entry {n}"))),
        }
    }

    pub fn text(&self) -> Result<&str, ResolveError> {
        self.key_at(0)
    }
}

pub fn parse_key_material(body: &str, format: KeyFormat) -> Result<KeyMaterial, ResolveError> {
    match format {
        KeyFormat::IndexPairs => {
            let pairs = parse_index_pairs(body)?;
            if pairs.is_empty() {
                return Err(ResolveError::format("index-pair table is empty"));
            }
            Ok(KeyMaterial::IndexPairs(pairs))
        }
        KeyFormat::KeyList => {
            let keys: Vec<String> = serde_json::from_str(body)?;
            if keys.is_empty() || keys.iter().any(String::is_empty) {
                return Err(ResolveError::format("key list is empty or has blank keys"));
            }
            Ok(KeyMaterial::Keys(keys))
        }
        KeyFormat::PlainText => {
            let text = body.trim();
            if text.is_empty() {
                return Err(ResolveError::format("key document is empty"));
            }
            Ok(KeyMaterial::Text(text.to_string()))
        }
    }
}

/// Remote key sources that ship with the crate.
pub fn builtin_key_sources() -> FxHashMap<String, KeySource> {
    [
        ("megacloud", MEGACLOUD_KEY_URL, KeyFormat::PlainText),
        ("rabbitstream", RABBITSTREAM_KEY_URL, KeyFormat::IndexPairs),
        ("vidplay", VIDPLAY_KEY_URL, KeyFormat::KeyList),
    ]
    .into_iter()
    .map(|(site_type, url, format)| {
        (
            site_type.to_string(),
            KeySource {
                url: url.to_string(),
                format,
            },
        )
    })
    .collect()
}

/// Process-wide key cache keyed by site type.
///
/// A single lock covers read, fetch and populate, so concurrent first access
/// for a site type results in one remote fetch. Entries live until
/// [`invalidate`](Self::invalidate) is called after a decode failure.
pub struct KeyStore {
    fetcher: Fetcher,
    sources: FxHashMap<String, KeySource>,
    statics: FxHashMap<String, Arc<ObfuscationKey>>,
    cache: Mutex<FxHashMap<String, Arc<ObfuscationKey>>>,
}

impl KeyStore {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            sources: builtin_key_sources(),
            statics: FxHashMap::default(),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn with_source(mut self, site_type: impl Into<String>, source: KeySource) -> Self {
        self.sources.insert(site_type.into(), source);
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = (String, KeySource)>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Register a literal key. Static keys are never fetched or invalidated.
    pub fn with_static_key(mut self, site_type: impl Into<String>, key: ObfuscationKey) -> Self {
        self.statics.insert(site_type.into(), Arc::new(key));
        self
    }

    pub fn source(&self, site_type: &str) -> Option<&KeySource> {
        self.sources.get(site_type)
    }

    /// Whether `site_type` has a static key or a remote source.
    pub fn knows(&self, site_type: &str) -> bool {
        self.statics.contains_key(site_type) || self.sources.contains_key(site_type)
    }

    pub async fn get_key(&self, site_type: &str) -> Result<Arc<ObfuscationKey>, ResolveError> {
        if let Some(key) = self.statics.get(site_type) {
            return Ok(key.clone());
        }

        let mut cache = self.cache.lock().await;
        if let Some(key) = cache.get(site_type) {
            debug!(site_type, "key cache hit");
            return Ok(key.clone());
        }

        let key = Arc::new(self.fetch_key(site_type).await?);
        cache.insert(site_type.to_string(), key.clone());
        Ok(key)
    }

    /// Drop the cached key so the next [`get_key`](Self::get_key) refetches it.
    ///
    /// Only evicts when the cached entry is still `failed`; a key another
    /// task already refreshed is left in place.
    pub async fn invalidate(&self, site_type: &str, failed: &Arc<ObfuscationKey>) {
        let mut cache = self.cache.lock().await;
        match cache.get(site_type) {
            Some(current) if Arc::ptr_eq(current, failed) => {
                cache.remove(site_type);
                info!(site_type, "invalidated cached key");
            }
            Some(_) => debug!(site_type, "cached key already replaced, keeping it"),
            None => {}
        }
    }

    pub async fn is_cached(&self, site_type: &str) -> bool {
        self.cache.lock().await.contains_key(site_type)
    }

    async fn fetch_key(&self, site_type: &str) -> Result<ObfuscationKey, ResolveError> {
        let source = self
            .sources
            .get(site_type)
            .ok_or_else(|| ResolveError::key_fetch(site_type, "no key source configured"))?;

        debug!(site_type, url = %source.url, "fetching remote key");
        let request = FetchRequest::get(&source.url).no_store();
        let body = match self.fetcher.get_text(&request).await {
            Ok(body) => body,
            Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
            Err(e) => return Err(ResolveError::key_fetch(site_type, e.to_string())),
        };

        let material = parse_key_material(&body, source.format)
            .map_err(|e| ResolveError::key_fetch(site_type, e.to_string()))?;
        Ok(ObfuscationKey {
            material,
            origin: KeyOrigin::Remote,
        })
    }
}

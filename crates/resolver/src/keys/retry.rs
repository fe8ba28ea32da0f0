use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use super::store::{KeyOrigin, KeyStore, ObfuscationKey};
use crate::error::ResolveError;

/// Attempts per resolution: the cached key, then one freshly fetched key.
pub const MAX_KEY_ATTEMPTS: usize = 2;

/// Run `decode` with the key for `site_type`, invalidating and refetching it
/// once if the decode (or the key fetch) fails in a retryable way.
///
/// A key that caused a failure is never handed to `decode` again. When both
/// attempts fail the last error is wrapped in [`ResolveError::Obfuscation`].
pub async fn with_key<T, F, Fut>(
    store: &KeyStore,
    site_type: &str,
    mut decode: F,
) -> Result<T, ResolveError>
where
    F: FnMut(Arc<ObfuscationKey>) -> Fut,
    Fut: Future<Output = Result<T, ResolveError>>,
{
    let mut last = None;
    for attempt in 1..=MAX_KEY_ATTEMPTS {
        let result = match store.get_key(site_type).await {
            Ok(key) => decode(key.clone()).await.map_err(|e| (e, Some(key))),
            Err(e) => Err((e, None)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err((e, failed)) if e.is_key_retryable() => {
                warn!(site_type, attempt, error = %e, "key-dependent decode failed");
                match failed {
                    // Refetching cannot change a literal key.
                    Some(key) if key.origin == KeyOrigin::Static => {
                        last = Some(e);
                        break;
                    }
                    Some(key) => store.invalidate(site_type, &key).await,
                    None => {}
                }
                last = Some(e);
            }
            Err((e, _)) => return Err(e),
        }
    }

    Err(ResolveError::Obfuscation {
        site_type: site_type.to_string(),
        last: Box::new(last.unwrap_or_else(|| ResolveError::key_fetch(site_type, "no attempt made"))),
    })
}

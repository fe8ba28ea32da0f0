use async_trait::async_trait;
use url::Url;

use crate::error::ResolveError;
use crate::fetcher::EmbedRequest;
use crate::media::StreamDescriptor;

/// Resolves one embed page into playable streams.
///
/// Stage failures (missing payload, decode failure after the key retry,
/// non-playlist bodies) resolve to an empty list. `Err` is reserved for
/// transport failures on the final playlist fetch and for cancellation.
#[async_trait]
pub trait StreamExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, url: &Url) -> bool;

    async fn resolve(&self, request: &EmbedRequest) -> Result<Vec<StreamDescriptor>, ResolveError>;
}

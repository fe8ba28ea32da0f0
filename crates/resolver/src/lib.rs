//! Stream resolver: turns third-party video host embed pages into playable
//! stream URLs.
//!
//! ## Pipeline
//!
//! - [`fetcher::Fetcher`] - HTTP leaf with redirect control and cancellation
//! - [`challenge::ChallengeRecovery`] - One-shot anti-bot recovery around the fetcher
//! - [`decoder`] - Hex, index-pair, AES-CBC, RC4, packer and script-token decoders
//! - [`keys::KeyStore`] - Process-wide cache of remote decoding keys
//! - [`hls`] - Tolerant master playlist splitting
//! - [`extractor::HostExtractor`] - Tagged host pipelines driven by [`extractor::HostProfile`]
//!
//! ## Entry point
//!
//! [`Resolver`] routes an [`EmbedRequest`] to the matching host profile and
//! returns [`StreamDescriptor`]s. A host that fails yields an empty list so
//! callers aggregating several hosts keep whatever worked.
//!
//! ```rust,ignore
//! use stream_resolver::{EmbedRequest, Resolver, ResolverConfig};
//!
//! let resolver = Resolver::from_config(&ResolverConfig::default())?;
//! let streams = resolver
//!     .resolve(&EmbedRequest::new("https://megacloud.blog/embed-2/v2/e-1/abc?k=1"))
//!     .await?;
//! ```

pub mod challenge;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod hls;
pub mod js_engine;
pub mod keys;
pub mod media;

pub use config::ResolverConfig;
pub use error::ResolveError;
pub use extractor::{HostProfile, Pipeline, Resolver, ResolverBuilder, StreamExtractor};
pub use fetcher::EmbedRequest;
pub use media::{MediaFormat, StreamDescriptor};

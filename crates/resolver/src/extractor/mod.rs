//! Host extractors: embed page in, stream descriptors out.

pub mod context;
pub mod factory;
pub mod host;
pub mod profiles;
pub mod stream_extractor;
pub mod utils;

pub use context::PipelineContext;
pub use factory::{Resolver, ResolverBuilder};
pub use host::{EmbedPage, HostExtractor};
pub use profiles::{FutokenSource, HostProfile, PasswordSource, Pipeline, builtin_profiles};
pub use stream_extractor::StreamExtractor;
pub use utils::{DecodedSources, SourceEntry};

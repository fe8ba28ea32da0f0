pub mod media_format;
pub mod stream_descriptor;

pub use media_format::MediaFormat;
pub use stream_descriptor::{
    AudioTrack, StreamDescriptor, StreamDescriptorBuilder, SubtitleTrack, prefer_subtitle_language,
    quality_height, sort_by_preferred_quality,
};

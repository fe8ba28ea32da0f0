use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::MediaFormat;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    pub url: String,
    pub label: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub url: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A playable stream: the terminal output of a resolution.
///
/// `url` is always absolute. `headers` are the request headers the player
/// must send (usually Referer, Origin and User-Agent of the canonical host).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    // Display label, e.g. "Megacloud - 720p"
    pub quality: String,
    pub url: String,
    pub format: MediaFormat,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<SubtitleTrack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_tracks: Vec<AudioTrack>,
}

impl StreamDescriptor {
    pub fn builder(quality: impl Into<String>, url: impl Into<String>) -> StreamDescriptorBuilder {
        StreamDescriptorBuilder::new(quality, url)
    }

    /// Numeric height parsed from a `"...720p..."` label.
    pub fn height(&self) -> Option<u32> {
        quality_height(&self.quality)
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.quality, self.format.as_str(), self.url)
    }
}

#[derive(Debug, Clone)]
pub struct StreamDescriptorBuilder {
    quality: String,
    url: String,
    format: Option<MediaFormat>,
    headers: BTreeMap<String, String>,
    subtitles: Vec<SubtitleTrack>,
    audio_tracks: Vec<AudioTrack>,
}

impl StreamDescriptorBuilder {
    pub fn new(quality: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            quality: quality.into(),
            url: url.into(),
            format: None,
            headers: BTreeMap::new(),
            subtitles: Vec::new(),
            audio_tracks: Vec::new(),
        }
    }

    pub fn format(mut self, format: MediaFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn subtitles(mut self, subtitles: Vec<SubtitleTrack>) -> Self {
        self.subtitles = subtitles;
        self
    }

    pub fn audio_tracks(mut self, audio_tracks: Vec<AudioTrack>) -> Self {
        self.audio_tracks = audio_tracks;
        self
    }

    pub fn build(self) -> StreamDescriptor {
        let format = self
            .format
            .unwrap_or_else(|| MediaFormat::detect(&self.url, None));
        StreamDescriptor {
            quality: self.quality,
            url: self.url,
            format,
            headers: self.headers,
            subtitles: self.subtitles,
            audio_tracks: self.audio_tracks,
        }
    }
}

/// The number before the last `p` that follows a digit, e.g. `"HD 1080p"` → 1080.
pub fn quality_height(label: &str) -> Option<u32> {
    let bytes = label.as_bytes();
    let mut end = None;
    for i in (1..bytes.len()).rev() {
        if (bytes[i] == b'p' || bytes[i] == b'P') && bytes[i - 1].is_ascii_digit() {
            end = Some(i);
            break;
        }
    }
    let end = end?;
    let start = label[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    label[start..end].parse().ok()
}

/// Put descriptors whose label contains `preferred` first, then order by
/// descending height. Descriptors that tie keep their relative order.
pub fn sort_by_preferred_quality(descriptors: &mut [StreamDescriptor], preferred: &str) {
    descriptors.sort_by(|a, b| {
        let a_pref = !preferred.is_empty() && a.quality.contains(preferred);
        let b_pref = !preferred.is_empty() && b.quality.contains(preferred);
        b_pref
            .cmp(&a_pref)
            .then_with(|| b.height().unwrap_or(0).cmp(&a.height().unwrap_or(0)))
    });
}

/// Move subtitle tracks whose label contains `language` to the front,
/// otherwise keeping source order.
pub fn prefer_subtitle_language(tracks: &mut [SubtitleTrack], language: &str) {
    if language.is_empty() {
        return;
    }
    let language = language.to_lowercase();
    tracks.sort_by_key(|track| !track.label.to_lowercase().contains(&language));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn descriptor(quality: &str) -> StreamDescriptor {
        StreamDescriptor::builder(quality, format!("https://cdn.example.com/{quality}.m3u8")).build()
    }

    #[rstest]
    #[case("720p", Some(720))]
    #[case("Megacloud - 1080p", Some(1080))]
    #[case("HD 360P", Some(360))]
    #[case("Vidplay - Default", None)]
    #[case("800kbps", None)]
    fn test_quality_height(#[case] label: &str, #[case] height: Option<u32>) {
        assert_eq!(quality_height(label), height);
    }

    #[test]
    fn test_sort_by_preferred_quality() {
        let mut list = vec![
            descriptor("Host - 360p"),
            descriptor("Host - 1080p"),
            descriptor("Host - 720p"),
            descriptor("Host - Default"),
        ];
        sort_by_preferred_quality(&mut list, "720p");
        let labels: Vec<_> = list.iter().map(|d| d.quality.as_str()).collect();
        assert_eq!(
            labels,
            ["Host - 720p", "Host - 1080p", "Host - 360p", "Host - Default"]
        );
    }

    #[test]
    fn test_prefer_subtitle_language_is_stable() {
        let mut tracks = vec![
            SubtitleTrack { url: "a".into(), label: "Arabic".into() },
            SubtitleTrack { url: "e1".into(), label: "English".into() },
            SubtitleTrack { url: "f".into(), label: "French".into() },
            SubtitleTrack { url: "e2".into(), label: "English - SDH".into() },
        ];
        prefer_subtitle_language(&mut tracks, "english");
        let urls: Vec<_> = tracks.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, ["e1", "e2", "a", "f"]);
    }

    #[test]
    fn test_builder_detects_format() {
        let d = StreamDescriptor::builder("Default", "https://a.example/v.mp4").build();
        assert_eq!(d.format, MediaFormat::Mp4);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["format"], "mp4");
        assert!(json.get("subtitles").is_none());
    }
}

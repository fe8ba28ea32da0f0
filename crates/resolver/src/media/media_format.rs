use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Hls,
    Mp4,
}

impl MediaFormat {
    pub fn as_str(&self) -> &str {
        match self {
            MediaFormat::Hls => "hls",
            MediaFormat::Mp4 => "mp4",
        }
    }

    /// Guess the format from a source URL or a host-declared type.
    pub fn detect(url: &str, declared_type: Option<&str>) -> Self {
        let declared = declared_type.map(str::to_ascii_lowercase);
        match declared.as_deref() {
            Some("mp4") | Some("video/mp4") => return MediaFormat::Mp4,
            Some("hls") | Some("m3u8") | Some("application/x-mpegurl") => return MediaFormat::Hls,
            _ => {}
        }
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".mp4") {
            MediaFormat::Mp4
        } else {
            MediaFormat::Hls
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(MediaFormat::detect("https://a/v.mp4?t=1", None), MediaFormat::Mp4);
        assert_eq!(MediaFormat::detect("https://a/master.m3u8", None), MediaFormat::Hls);
        assert_eq!(MediaFormat::detect("https://a/get", Some("video/mp4")), MediaFormat::Mp4);
        assert_eq!(MediaFormat::detect("https://a/v.mp4", Some("hls")), MediaFormat::Hls);
    }
}

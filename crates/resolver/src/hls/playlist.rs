//! HLS playlist parsing.
//!
//! Playlists are read with `m3u8-rs`. Hosts also serve playlists that a
//! strict parser rejects (missing `#EXTM3U`, tags between `#EXT-X-STREAM-INF`
//! and its URI, a dangling last variant), so those bodies are split natively
//! on `#EXT-X-STREAM-INF:` and each segment is read on its own.

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, Playlist};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::media::AudioTrack;

const STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const MEDIA_TAG: &str = "#EXT-X-MEDIA:";

/// One quality-specific variant of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistVariant {
    /// `"{height}p"`, `"{kbps}kbps"` or `"Variant {n}"`.
    pub label: String,
    /// Absolute media playlist URL.
    pub uri: String,
    /// Position of the variant in the source playlist.
    pub ordinal: usize,
    pub bandwidth: Option<u64>,
    pub resolution: Option<(u32, u32)>,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Master,
    Media,
    NotPlaylist,
}

/// A fetched playlist body, read once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPlaylist {
    Master {
        variants: Vec<PlaylistVariant>,
        audio_tracks: Vec<AudioTrack>,
    },
    Media,
    NotPlaylist,
}

/// Parse a playlist body fetched from `base_url`.
pub fn parse_playlist(body: &str, base_url: &Url) -> ParsedPlaylist {
    match parse_strict(body) {
        Some(Playlist::MasterPlaylist(master)) => ParsedPlaylist::Master {
            variants: master_variants(&master, base_url),
            audio_tracks: master_audio_tracks(&master, base_url),
        },
        Some(Playlist::MediaPlaylist(_)) => ParsedPlaylist::Media,
        None => match classify_lines(body) {
            PlaylistKind::Master => ParsedPlaylist::Master {
                variants: split_master_playlist(body, base_url),
                audio_tracks: scan_audio_tracks(body, base_url),
            },
            PlaylistKind::Media => ParsedPlaylist::Media,
            PlaylistKind::NotPlaylist => ParsedPlaylist::NotPlaylist,
        },
    }
}

/// Classify a response body.
pub fn classify_playlist(body: &str) -> PlaylistKind {
    match parse_strict(body) {
        Some(Playlist::MasterPlaylist(_)) => PlaylistKind::Master,
        Some(Playlist::MediaPlaylist(_)) => PlaylistKind::Media,
        None => classify_lines(body),
    }
}

/// Variants of a master playlist, in source order, with URIs resolved
/// against `base_url`.
pub fn parse_master_playlist(body: &str, base_url: &Url) -> Vec<PlaylistVariant> {
    match parse_strict(body) {
        Some(Playlist::MasterPlaylist(master)) => master_variants(&master, base_url),
        _ => split_master_playlist(body, base_url),
    }
}

/// Alternate audio renditions (`#EXT-X-MEDIA:TYPE=AUDIO` with a `URI`).
pub fn parse_audio_tracks(body: &str, base_url: &Url) -> Vec<AudioTrack> {
    match parse_strict(body) {
        Some(Playlist::MasterPlaylist(master)) => master_audio_tracks(&master, base_url),
        _ => scan_audio_tracks(body, base_url),
    }
}

/// `m3u8-rs` result, or `None` when the body needs the native split.
fn parse_strict(body: &str) -> Option<Playlist> {
    let body = body.trim_start_matches('\u{feff}');
    match m3u8_rs::parse_playlist_res(body.as_bytes()) {
        Ok(Playlist::MasterPlaylist(master)) if !is_well_formed(&master) => {
            debug!("master playlist has variants without uri, splitting natively");
            None
        }
        Ok(playlist) => Some(playlist),
        Err(e) => {
            debug!(error = ?e, "playlist rejected by m3u8-rs, splitting natively");
            None
        }
    }
}

// A tag between `#EXT-X-STREAM-INF` and its URI is read by m3u8-rs as the URI.
fn is_well_formed(master: &MasterPlaylist) -> bool {
    let mut streams = master.variants.iter().filter(|v| !v.is_i_frame).peekable();
    streams.peek().is_some()
        && streams.all(|v| {
            let uri = v.uri.trim();
            !uri.is_empty() && !uri.starts_with('#')
        })
}

fn master_variants(master: &MasterPlaylist, base_url: &Url) -> Vec<PlaylistVariant> {
    master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .enumerate()
        .filter_map(|(ordinal, variant)| {
            let uri = join_variant_uri(base_url, variant.uri.trim(), ordinal)?;
            let resolution = variant.resolution.as_ref().and_then(|r| {
                Some((u32::try_from(r.width).ok()?, u32::try_from(r.height).ok()?))
            });
            let bandwidth = (variant.bandwidth > 0).then_some(variant.bandwidth);
            Some(PlaylistVariant {
                label: variant_label(resolution, bandwidth, ordinal),
                uri,
                ordinal,
                bandwidth,
                resolution,
                codecs: variant.codecs.clone(),
            })
        })
        .collect()
}

fn master_audio_tracks(master: &MasterPlaylist, base_url: &Url) -> Vec<AudioTrack> {
    master
        .alternatives
        .iter()
        .filter(|media| matches!(media.media_type, AlternativeMediaType::Audio))
        .enumerate()
        .filter_map(|(n, media)| {
            let url = base_url.join(media.uri.as_deref()?).ok()?;
            Some(AudioTrack {
                url: url.to_string(),
                label: audio_label(Some(media.name.as_str()), n),
                language: media.language.clone(),
            })
        })
        .collect()
}

fn join_variant_uri(base_url: &Url, raw_uri: &str, ordinal: usize) -> Option<String> {
    match base_url.join(raw_uri) {
        Ok(uri) => Some(uri.to_string()),
        Err(e) => {
            debug!(ordinal, uri = raw_uri, error = %e, "unresolvable variant uri, skipping");
            None
        }
    }
}

fn variant_label(resolution: Option<(u32, u32)>, bandwidth: Option<u64>, ordinal: usize) -> String {
    match (resolution, bandwidth) {
        (Some((_, height)), _) => format!("{height}p"),
        (None, Some(bandwidth)) => format!("{}kbps", bandwidth / 1000),
        (None, None) => format!("Variant {}", ordinal + 1),
    }
}

fn audio_label(name: Option<&str>, n: usize) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("Audio {}", n + 1),
    }
}

fn classify_lines(body: &str) -> PlaylistKind {
    let body = body.trim_start_matches('\u{feff}');
    if body.contains(STREAM_INF) {
        PlaylistKind::Master
    } else if body.contains("#EXTINF") || body.contains("#EXT-X-TARGETDURATION") {
        PlaylistKind::Media
    } else {
        PlaylistKind::NotPlaylist
    }
}

/// Split an attribute list (`KEY=VALUE,KEY="quoted, value"`) into pairs.
/// Commas inside double quotes do not separate attributes; quotes are removed.
pub fn parse_attributes(list: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    let mut flush = |key: &mut String, value: &mut String| {
        let k = key.trim();
        if !k.is_empty() {
            attributes.push((k.to_ascii_uppercase(), value.trim().to_string()));
        }
        key.clear();
        value.clear();
    };

    for ch in list.chars() {
        match ch {
            '"' if in_value => in_quotes = !in_quotes,
            '=' if !in_value => in_value = true,
            ',' if !in_quotes => {
                flush(&mut key, &mut value);
                in_value = false;
            }
            _ if in_value => value.push(ch),
            _ => key.push(ch),
        }
    }
    flush(&mut key, &mut value);
    attributes
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn split_master_playlist(body: &str, base_url: &Url) -> Vec<PlaylistVariant> {
    let mut variants = Vec::new();

    // The first segment precedes any variant tag.
    for (ordinal, segment) in body.split(STREAM_INF).skip(1).enumerate() {
        let mut lines = segment.lines();
        let attributes = parse_attributes(lines.next().unwrap_or_default());

        let Some(raw_uri) = lines
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
        else {
            debug!(ordinal, "variant without uri, skipping");
            continue;
        };
        let Some(uri) = join_variant_uri(base_url, raw_uri, ordinal) else {
            continue;
        };

        let resolution = attribute(&attributes, "RESOLUTION").and_then(parse_resolution);
        let bandwidth = attribute(&attributes, "BANDWIDTH").and_then(|b| b.parse::<u64>().ok());
        variants.push(PlaylistVariant {
            label: variant_label(resolution, bandwidth, ordinal),
            uri,
            ordinal,
            bandwidth,
            resolution,
            codecs: attribute(&attributes, "CODECS").map(str::to_string),
        });
    }

    variants
}

fn scan_audio_tracks(body: &str, base_url: &Url) -> Vec<AudioTrack> {
    body.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(MEDIA_TAG))
        .map(parse_attributes)
        .filter(|attributes| {
            attribute(attributes, "TYPE").is_some_and(|t| t.eq_ignore_ascii_case("AUDIO"))
        })
        .enumerate()
        .filter_map(|(n, attributes)| {
            let uri = base_url.join(attribute(&attributes, "URI")?).ok()?;
            Some(AudioTrack {
                url: uri.to_string(),
                label: audio_label(attribute(&attributes, "NAME"), n),
                language: attribute(&attributes, "LANGUAGE").map(str::to_string),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:RESOLUTION=1280x720,BANDWIDTH=1000000
720/index.m3u8
#EXT-X-STREAM-INF:RESOLUTION=640x360,BANDWIDTH=500000
360/index.m3u8
";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/video/master.m3u8").unwrap()
    }

    #[test]
    fn test_two_variants_in_source_order() {
        let variants = parse_master_playlist(MASTER, &base());
        assert_eq!(variants.len(), 2);

        assert_eq!(variants[0].ordinal, 0);
        assert_eq!(variants[0].label, "720p");
        assert_eq!(variants[0].uri, "https://cdn.example.com/video/720/index.m3u8");
        assert_eq!(variants[0].bandwidth, Some(1_000_000));

        assert_eq!(variants[1].ordinal, 1);
        assert_eq!(variants[1].label, "360p");
        assert_eq!(variants[1].uri, "https://cdn.example.com/video/360/index.m3u8");
    }

    #[test]
    fn test_order_is_not_sorted_by_quality() {
        let body = "#EXT-X-STREAM-INF:RESOLUTION=640x360\nlow.m3u8\n#EXT-X-STREAM-INF:RESOLUTION=1920x1080\nhigh.m3u8\n";
        let labels: Vec<_> = parse_master_playlist(body, &base())
            .into_iter()
            .map(|v| v.label)
            .collect();
        assert_eq!(labels, ["360p", "1080p"]);
    }

    #[rstest]
    #[case("#EXT-X-STREAM-INF:BANDWIDTH=800000\na.m3u8", "800kbps")]
    #[case("#EXT-X-STREAM-INF:PROGRAM-ID=1\na.m3u8", "Variant 1")]
    #[case("#EXT-X-STREAM-INF:CODECS=\"avc1.4d401f,mp4a.40.2\",RESOLUTION=854x480\na.m3u8", "480p")]
    fn test_label_fallbacks(#[case] body: &str, #[case] label: &str) {
        assert_eq!(parse_master_playlist(body, &base())[0].label, label);
    }

    #[test]
    fn test_uri_forms_and_blank_lines() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:RESOLUTION=1x1080\n\n  https://other.example/abs.m3u8  \n#EXT-X-STREAM-INF:RESOLUTION=1x720\n#EXT-X-SOMETHING\n/root/rel.m3u8\n#EXT-X-STREAM-INF:RESOLUTION=1x480\n";
        let variants = parse_master_playlist(body, &base());
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].uri, "https://other.example/abs.m3u8");
        assert_eq!(variants[1].uri, "https://cdn.example.com/root/rel.m3u8");
    }

    #[test]
    fn test_quoted_commas_in_attributes() {
        let attrs = parse_attributes("CODECS=\"avc1.64001f,mp4a.40.2\",RESOLUTION=1280x720");
        assert_eq!(attribute(&attrs, "CODECS"), Some("avc1.64001f,mp4a.40.2"));
        assert_eq!(attribute(&attrs, "RESOLUTION"), Some("1280x720"));
    }

    #[test]
    fn test_audio_tracks() {
        let body = "#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",LANGUAGE=\"ja\",NAME=\"Japanese\",URI=\"audio/ja.m3u8\"
#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"English\",URI=\"subs/en.m3u8\"
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"Commentary\"
#EXT-X-STREAM-INF:BANDWIDTH=1,AUDIO=\"aud\"
v.m3u8
";
        let tracks = parse_audio_tracks(body, &base());
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].label, "Japanese");
        assert_eq!(tracks[0].url, "https://cdn.example.com/video/audio/ja.m3u8");
        assert_eq!(tracks[0].language.as_deref(), Some("ja"));
    }

    #[rstest]
    #[case(MASTER, PlaylistKind::Master)]
    #[case("#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg0.ts\n", PlaylistKind::Media)]
    #[case("<html>Not found</html>", PlaylistKind::NotPlaylist)]
    fn test_classify(#[case] body: &str, #[case] kind: PlaylistKind) {
        assert_eq!(classify_playlist(body), kind);
    }

    #[test]
    fn test_strict_master_skips_iframe_variants() {
        let body = "#EXTM3U
#EXT-X-VERSION:4
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\"
1080/index.m3u8
#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=200000,URI=\"1080/iframes.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=1280x720
720/index.m3u8
";
        assert!(parse_strict(body).is_some());
        let variants = parse_master_playlist(body, &base());
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].label, "1080p");
        assert_eq!(variants[0].codecs.as_deref(), Some("avc1.640028,mp4a.40.2"));
        assert_eq!(variants[1].ordinal, 1);
        assert_eq!(variants[1].uri, "https://cdn.example.com/video/720/index.m3u8");
    }

    #[test]
    fn test_missing_header_falls_back_to_split() {
        let body = "#EXT-X-STREAM-INF:RESOLUTION=1280x720,BANDWIDTH=1000000\n720/index.m3u8\n";
        assert!(parse_strict(body).is_none());
        assert_eq!(classify_playlist(body), PlaylistKind::Master);
        assert_eq!(parse_master_playlist(body, &base())[0].label, "720p");
    }

    #[test]
    fn test_parse_playlist_reads_master_once() {
        let body = "#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",URI=\"a/en.m3u8\"
#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1280x720,AUDIO=\"aud\"
720/index.m3u8
";
        match parse_playlist(body, &base()) {
            ParsedPlaylist::Master {
                variants,
                audio_tracks,
            } => {
                assert_eq!(variants.len(), 1);
                assert_eq!(audio_tracks.len(), 1);
                assert_eq!(audio_tracks[0].url, "https://cdn.example.com/video/a/en.m3u8");
                assert_eq!(audio_tracks[0].language.as_deref(), Some("en"));
            }
            other => panic!("expected master playlist, got {other:?}"),
        }
        assert_eq!(
            parse_playlist("<html>gone</html>", &base()),
            ParsedPlaylist::NotPlaylist
        );
    }
}

//! Source and track discovery shared by every host pipeline.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::ResolveError;
use crate::media::SubtitleTrack;

static SOURCES_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"sources\s*:\s*\[\s*\{[^}]*?\bfile["']?\s*:\s*["']([^"']+)["']"#).unwrap()
});
static FILE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bfile["']?\s*:\s*["']([^"']+\.(?:m3u8|mp4)[^"']*)["']"#).unwrap());
static SOURCE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<source[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap());
static HLS_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']hls["']\s*:\s*["']([^"']+)["']"#).unwrap());

static TRACK_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]*?\b(?:file|src)["']?\s*:\s*["']([^"']+\.(?:vtt|srt)[^"']*)["'][^{}]*\}"#)
        .unwrap()
});
static TRACK_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\blabel["']?\s*:\s*["']([^"']*)["']"#).unwrap());
static TRACK_KIND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bkind["']?\s*:\s*["']([^"']*)["']"#).unwrap());

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[inline]
pub fn capture_group_1<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// One playable source as the host describes it, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceEntry {
    #[serde(alias = "src", alias = "url")]
    pub file: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl SourceEntry {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: unescape_js(&file.into()),
            kind: None,
            label: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TrackEntry {
    #[serde(alias = "src", alias = "url")]
    file: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// Sources and subtitles recovered from a page or a decoded payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSources {
    pub sources: Vec<SourceEntry>,
    pub subtitles: Vec<SubtitleTrack>,
}

impl DecodedSources {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// `\/` and `&` survive in JS string literals scraped with a regex.
fn unescape_js(value: &str) -> String {
    value.replace("\\/", "/").replace("\\u0026", "&")
}

/// Apply the shared source patterns to page or script text, in pattern
/// priority order, without duplicates.
pub fn find_sources(text: &str) -> Vec<SourceEntry> {
    let mut found: Vec<SourceEntry> = Vec::new();
    for re in [&*SOURCES_FILE, &*FILE_KEY, &*SOURCE_TAG, &*HLS_KEY] {
        for caps in re.captures_iter(text) {
            let entry = SourceEntry::new(&caps[1]);
            if !found.iter().any(|e| e.file == entry.file) {
                found.push(entry);
            }
        }
    }
    found
}

/// Keep only tracks that are captions or subtitles.
fn is_subtitle_kind(kind: Option<&str>) -> bool {
    match kind {
        None => true,
        Some(kind) => kind.eq_ignore_ascii_case("captions") || kind.eq_ignore_ascii_case("subtitles"),
    }
}

/// A track URL made absolute against the document it was found in.
fn resolve_track_url(raw: &str, base: &Url) -> Option<String> {
    match base.join(raw.trim()) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            debug!(track = raw, error = %e, "unresolvable subtitle url, skipping");
            None
        }
    }
}

/// Subtitle tracks declared inline in script text (`{file: "...vtt", label, kind}`),
/// resolved against `base`.
pub fn find_subtitles(text: &str, base: &Url) -> Vec<SubtitleTrack> {
    TRACK_OBJECT
        .captures_iter(text)
        .filter_map(|caps| {
            let object = caps.get(0)?.as_str();
            if !is_subtitle_kind(capture_group_1(&TRACK_KIND, object)) {
                return None;
            }
            Some(SubtitleTrack {
                url: resolve_track_url(&unescape_js(&caps[1]), base)?,
                label: capture_group_1(&TRACK_LABEL, object)
                    .filter(|l| !l.is_empty())
                    .unwrap_or("Unknown")
                    .to_string(),
            })
        })
        .collect()
}

/// Subtitle tracks from a JSON `tracks` array, thumbnails skipped, resolved
/// against the URL the document was fetched from.
pub fn parse_tracks(value: Option<&Value>, base: &Url) -> Vec<SubtitleTrack> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<TrackEntry>(item.clone()).ok())
        .filter(|track| is_subtitle_kind(track.kind.as_deref()))
        .filter_map(|track| {
            Some(SubtitleTrack {
                url: resolve_track_url(&track.file, base)?,
                label: track.label.unwrap_or_else(|| "Unknown".to_string()),
            })
        })
        .collect()
}

/// Parse a decoded sources document: a JSON array of entries, an object with
/// `sources`/`file`, or a bare URL.
pub fn parse_sources_document(text: &str) -> Result<Vec<SourceEntry>, ResolveError> {
    let text = text.trim();
    if text.starts_with("http") || text.starts_with("//") {
        return Ok(vec![SourceEntry::new(text)]);
    }
    let value: Value = serde_json::from_str(text)?;
    sources_from_value(&value)
}

/// Sources out of an already-parsed JSON value.
pub fn sources_from_value(value: &Value) -> Result<Vec<SourceEntry>, ResolveError> {
    let entries = match value {
        Value::Array(_) => serde_json::from_value::<Vec<SourceEntry>>(value.clone())?,
        Value::Object(map) => match (map.get("sources"), map.get("file")) {
            (Some(inner), _) => return sources_from_value(inner),
            (None, Some(Value::String(file))) => vec![SourceEntry::new(file.as_str())],
            _ => return Err(ResolveError::format("sources object has neither sources nor file")),
        },
        Value::String(file) => vec![SourceEntry::new(file.as_str())],
        _ => return Err(ResolveError::format("unexpected sources document")),
    };
    if entries.is_empty() {
        return Err(ResolveError::format("sources document is empty"));
    }
    Ok(entries)
}

/// `len` random alphanumeric characters.
pub fn random_alphanumeric(len: usize) -> String {
    (0..len)
        .map(|_| ALPHANUMERIC[rand::random::<u8>() as usize % ALPHANUMERIC.len()] as char)
        .collect()
}

/// Fill `{name}` placeholders. Unknown placeholders are left as they are.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// The embed id: the last non-empty path segment, minus any `.html`.
pub fn embed_id(url: &Url) -> Option<String> {
    url.path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.trim_end_matches(".html").to_string())
}

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn page() -> Url {
        Url::parse("https://h.example/e/abc").unwrap()
    }

    #[rstest]
    #[case(r#"jwplayer().setup({sources: [{file:"https://cdn.example/a/master.m3u8"}]})"#)]
    #[case(r#"player.src({file: 'https://cdn.example/a/master.m3u8', type: 'hls'})"#)]
    #[case(r#"<video><source src="https://cdn.example/a/master.m3u8" type="application/x-mpegURL"></video>"#)]
    #[case(r#"var cfg = {"hls":"https:\/\/cdn.example\/a\/master.m3u8"};"#)]
    fn test_find_sources_patterns(#[case] text: &str) {
        let sources = find_sources(text);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].file, "https://cdn.example/a/master.m3u8");
    }

    #[test]
    fn test_find_sources_dedupes_across_patterns() {
        let text = r#"sources:[{file:"/v/master.m3u8"}], backup: {file: "/v/master.m3u8"}"#;
        assert_eq!(find_sources(text), vec![SourceEntry::new("/v/master.m3u8")]);
    }

    #[test]
    fn test_find_subtitles_skips_thumbnails() {
        let text = r#"tracks: [
            {file: "https://s.example/en.vtt", label: "English", kind: "captions"},
            {file: "https://s.example/thumbs.vtt", kind: "thumbnails"},
            {file: "https://s.example/es.vtt", label: "Spanish"}
        ]"#;
        let labels: Vec<_> = find_subtitles(text, &page())
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, ["English", "Spanish"]);
    }

    #[test]
    fn test_relative_subtitles_resolve_against_page() {
        let text = r#"tracks:[{file:"/subs/en.vtt",label:"English"},{file:"fr.vtt",label:"French"},{file:"\/\/s.example\/de.vtt",label:"German"}]"#;
        let urls: Vec<_> = find_subtitles(text, &page()).into_iter().map(|t| t.url).collect();
        assert_eq!(
            urls,
            [
                "https://h.example/subs/en.vtt",
                "https://h.example/e/fr.vtt",
                "https://s.example/de.vtt",
            ]
        );
    }

    #[test]
    fn test_parse_tracks_from_json() {
        let tracks = json!([
            {"file": "https://s.example/en.vtt", "label": "English", "kind": "captions"},
            {"file": "https://s.example/sprite.vtt", "kind": "thumbnails"}
        ]);
        let parsed = parse_tracks(Some(&tracks), &page());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].url, "https://s.example/en.vtt");
        assert!(parse_tracks(None, &page()).is_empty());

        let api = Url::parse("https://api.example/ajax/getSources?id=1").unwrap();
        let relative = json!([{"file": "/cc/en.srt", "label": "English"}]);
        assert_eq!(
            parse_tracks(Some(&relative), &api)[0].url,
            "https://api.example/cc/en.srt"
        );
    }

    #[test]
    fn test_parse_sources_document_shapes() {
        let array = parse_sources_document(r#"[{"file":"https://a/m.m3u8","type":"hls"}]"#).unwrap();
        assert_eq!(array[0].kind.as_deref(), Some("hls"));

        let object = parse_sources_document(r#"{"sources":[{"src":"https://a/m.m3u8"}]}"#).unwrap();
        assert_eq!(object[0].file, "https://a/m.m3u8");

        let bare = parse_sources_document("https://a/v.mp4").unwrap();
        assert_eq!(bare[0].file, "https://a/v.mp4");

        assert!(parse_sources_document("[]").is_err());
        assert!(matches!(
            parse_sources_document("\u{1}garbage"),
            Err(ResolveError::Json(_))
        ));
    }

    #[test]
    fn test_template_and_url_helpers() {
        assert_eq!(
            fill_template("{origin}/api/{id}?x={missing}", &[("origin", "https://h.example"), ("id", "42")]),
            "https://h.example/api/42?x={missing}"
        );
        let url = Url::parse("https://h.example:8443/embed-2/e-1/AbC123/?k=1").unwrap();
        assert_eq!(embed_id(&url).as_deref(), Some("AbC123"));
        let sb = Url::parse("https://sbembed.com/e/x7k2.html").unwrap();
        assert_eq!(embed_id(&sb).as_deref(), Some("x7k2"));
        assert_eq!(origin_of(&url), "https://h.example:8443");
        let padding = random_alphanumeric(12);
        assert_eq!(padding.len(), 12);
        assert!(padding.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

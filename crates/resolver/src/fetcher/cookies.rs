use reqwest::header::{HeaderMap, SET_COOKIE};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Name→value cookie store used to assemble `Cookie` headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: FxHashMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a cookie string (`name1=value1; name2=value2`).
    ///
    /// Newlines are accepted as separators too; empty names or values are skipped.
    pub fn parse(cookie_string: &str) -> Self {
        let mut jar = Self::new();
        for part in cookie_string.split(&[';', '\n'][..]).map(str::trim) {
            let Some((name, value)) = part.split_once('=') else {
                continue;
            };
            jar.insert(name, value);
        }
        jar
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || value.is_empty() {
            return;
        }
        self.cookies.insert(name.to_owned(), value.to_owned());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Drop entries that are really cookie attributes (`path=/`, `max-age=..`),
    /// as produced when a raw `document.cookie` assignment is parsed.
    pub fn strip_attributes(&mut self) {
        const ATTRIBUTES: &[&str] = &["path", "domain", "expires", "max-age", "samesite"];
        self.cookies
            .retain(|name, _| !ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str()));
    }

    /// Merge `other` into this jar. Same-named cookies are replaced, all
    /// others are preserved.
    pub fn merge(&mut self, other: &CookieJar) {
        for (name, value) in &other.cookies {
            self.cookies.insert(name.clone(), value.clone());
        }
    }

    /// Store the first `name=value` pair of every `Set-Cookie` header.
    pub fn store_set_cookies(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE).iter() {
            if let Ok(cookie_str) = value.to_str()
                && let Some(cookie_part) = cookie_str.split(';').next()
                && let Some((name, value)) = cookie_part.split_once('=')
            {
                debug!(cookie = name.trim(), "storing response cookie");
                self.insert(name, value);
            }
        }
    }

    /// Render as a `Cookie` header value, names sorted for stable output.
    pub fn to_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<_> = self.cookies.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut cookie_string = String::with_capacity(
            pairs.iter().map(|(k, v)| k.len() + 1 + v.len() + 2).sum(),
        );
        for (name, value) in pairs {
            if !cookie_string.is_empty() {
                cookie_string.push_str("; ");
            }
            cookie_string.push_str(name);
            cookie_string.push('=');
            cookie_string.push_str(value);
        }
        Some(cookie_string)
    }
}

/// Merge recovered cookies into an existing `Cookie` header value.
pub fn merge_cookie_header(existing: Option<&str>, recovered: &CookieJar) -> Option<String> {
    let mut jar = existing.map(CookieJar::parse).unwrap_or_default();
    jar.merge(recovered);
    jar.to_header()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_skips_malformed_parts() {
        let jar = CookieJar::parse("a=1; broken; =x; b=; c = 3 \n d=4");
        assert_eq!(jar.len(), 3);
        assert_eq!(jar.get("a"), Some("1"));
        assert_eq!(jar.get("c"), Some("3"));
        assert_eq!(jar.get("d"), Some("4"));
        assert_eq!(jar.get("b"), None);
    }

    #[test]
    fn test_merge_replaces_same_name_and_keeps_others() {
        let recovered = CookieJar::parse("cf_clearance=new; __ddg2=abc");
        let merged = merge_cookie_header(Some("cf_clearance=old; session=42"), &recovered);
        assert_eq!(
            merged.as_deref(),
            Some("__ddg2=abc; cf_clearance=new; session=42")
        );
    }

    #[test]
    fn test_strip_attributes() {
        let mut jar = CookieJar::parse("__ddg1=abc; Path=/; max-age=3600");
        jar.strip_attributes();
        assert_eq!(jar.to_header().as_deref(), Some("__ddg1=abc"));
    }

    #[test]
    fn test_merge_into_missing_header() {
        assert_eq!(merge_cookie_header(None, &CookieJar::new()), None);
        let recovered = CookieJar::parse("token=t");
        assert_eq!(
            merge_cookie_header(None, &recovered).as_deref(),
            Some("token=t")
        );
    }

    #[test]
    fn test_store_set_cookies_takes_first_pair() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("cf_clearance=abc; Path=/; HttpOnly"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("empty=; Path=/"));
        let mut jar = CookieJar::new();
        jar.store_set_cookies(&headers);
        assert_eq!(jar.get("cf_clearance"), Some("abc"));
        assert_eq!(jar.get("empty"), None);
    }
}

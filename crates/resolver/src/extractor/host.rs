use std::collections::BTreeMap;
use std::future::ready;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::context::PipelineContext;
use super::profiles::{FutokenSource, HostProfile, PasswordSource, Pipeline};
use super::stream_extractor::StreamExtractor;
use super::utils::{
    DecodedSources, SourceEntry, capture_group_1, embed_id, fill_template, find_sources,
    find_subtitles, origin_of, parse_sources_document, parse_tracks, random_alphanumeric,
    sources_from_value,
};
use crate::decoder::{
    CipherPayload, KeyDerivation, aes_decrypt, derive_token, double_rc4_token, hex_encode,
    is_packed, split_index_pairs, unpack_all,
};
use crate::error::ResolveError;
use crate::fetcher::{EmbedRequest, FetchRequest};
use crate::hls::{ParsedPlaylist, parse_playlist};
use crate::keys::{ObfuscationKey, with_key};
use crate::media::{MediaFormat, StreamDescriptor};

/// The embed page as served after any host alias redirect.
#[derive(Debug, Clone)]
pub struct EmbedPage {
    /// Final URL. Request signing derives from this, never from the input URL.
    pub url: Url,
    pub origin: String,
    pub id: String,
    pub body: String,
}

/// Runs a [`HostProfile`]'s pipeline: embed page, sources, playlists,
/// descriptors.
pub struct HostExtractor {
    profile: HostProfile,
    pattern: Regex,
    context: Arc<PipelineContext>,
}

impl HostExtractor {
    pub fn new(profile: HostProfile, context: Arc<PipelineContext>) -> Result<Self, ResolveError> {
        let pattern = profile.compile_pattern()?;
        Ok(Self {
            profile,
            pattern,
            context,
        })
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    fn label(&self, suffix: &str) -> String {
        format!("{} - {}", self.profile.name, suffix)
    }

    /// Headers the player must send for this host, derived from the
    /// canonical origin.
    fn descriptor_headers(&self, page: &EmbedPage) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Referer".to_string(), format!("{}/", page.origin));
        headers.insert("Origin".to_string(), page.origin.clone());
        headers.insert("User-Agent".to_string(), self.context.user_agent.clone());
        headers.extend(self.profile.headers.clone());
        headers
    }

    fn api_request(&self, url: impl Into<String>, page: &EmbedPage) -> FetchRequest {
        FetchRequest::get(url)
            .headers(&self.profile.headers)
            .header("Referer", page.url.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
    }

    async fn fetch_embed(&self, request: &EmbedRequest) -> Result<EmbedPage, ResolveError> {
        let mut fetch = request.to_fetch_request();
        for (name, value) in &self.profile.headers {
            if fetch.header_value(name).is_none() {
                fetch = fetch.header(name, value);
            }
        }

        let response = self.context.http.fetch(&fetch).await?;
        let url = response.final_url.clone();
        if url.as_str() != request.url {
            debug!(host = %self.profile.name, from = %request.url, to = %url, "embed page redirected");
        }
        let id = embed_id(&url).ok_or_else(|| ResolveError::InvalidUrl(url.to_string()))?;
        Ok(EmbedPage {
            origin: origin_of(&url),
            id,
            body: response.text(),
            url,
        })
    }

    async fn locate_sources(&self, page: &EmbedPage) -> Result<DecodedSources, ResolveError> {
        match &self.profile.pipeline {
            Pipeline::DirectPlaylist => Ok(scan_text(&page.body, &page.url)),
            Pipeline::PackedScript => self.packed_sources(page).await,
            Pipeline::AesObfuscated {
                sources_api,
                payload_pattern,
                cipher,
                password,
            } => {
                self.aes_sources(
                    page,
                    sources_api.as_deref(),
                    payload_pattern.as_deref(),
                    *cipher,
                    password,
                )
                .await
            }
            Pipeline::Rc4Token {
                key_site_type,
                api,
                futoken,
            } => self.rc4_sources(page, key_site_type, api, futoken.as_ref()).await,
            Pipeline::HexPath {
                path_template,
                suffix,
            } => self.hex_path_sources(page, path_template, suffix).await,
            Pipeline::Generic => Ok(self.generic_sources(page).await),
        }
    }

    async fn packed_sources(&self, page: &EmbedPage) -> Result<DecodedSources, ResolveError> {
        if !is_packed(&page.body) {
            return Err(ResolveError::format("no packed script in embed page"));
        }
        let unpacked = unpack_all(&page.body, self.context.evaluator.clone()).await;
        if unpacked.is_empty() {
            return Err(ResolveError::format("no packed block could be unpacked"));
        }
        Ok(scan_text(&unpacked, &page.url))
    }

    async fn generic_sources(&self, page: &EmbedPage) -> DecodedSources {
        if is_packed(&page.body) {
            let unpacked = unpack_all(&page.body, self.context.evaluator.clone()).await;
            let decoded = scan_text(&unpacked, &page.url);
            if !decoded.is_empty() {
                return decoded;
            }
            debug!(url = %page.url, "packed blocks carried no sources, scanning page");
        }
        scan_text(&page.body, &page.url)
    }

    async fn aes_sources(
        &self,
        page: &EmbedPage,
        sources_api: Option<&str>,
        payload_pattern: Option<&str>,
        cipher: KeyDerivation,
        password: &PasswordSource,
    ) -> Result<DecodedSources, ResolveError> {
        let (ciphertext, subtitles) = match (sources_api, payload_pattern) {
            (Some(api), _) => {
                let id = urlencoding::encode(&page.id).into_owned();
                let url = Url::parse(&fill_template(
                    api,
                    &[("origin", page.origin.as_str()), ("id", id.as_str())],
                ))?;
                let response: Value = self
                    .context
                    .http
                    .fetch(&self.api_request(url.as_str(), page))
                    .await?
                    .json()?;
                let subtitles = parse_tracks(response.get("tracks"), &url);
                let encrypted = response
                    .get("encrypted")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                match response.get("sources") {
                    Some(Value::String(blob)) if encrypted => (blob.clone(), subtitles),
                    Some(Value::String(plain)) => {
                        return Ok(DecodedSources {
                            sources: parse_sources_document(plain)?,
                            subtitles,
                        });
                    }
                    Some(other) => {
                        return Ok(DecodedSources {
                            sources: sources_from_value(other)?,
                            subtitles,
                        });
                    }
                    None => return Err(ResolveError::format("sources response has no sources")),
                }
            }
            (None, Some(pattern)) => {
                let re = Regex::new(pattern)
                    .map_err(|e| ResolveError::format(format!("invalid payload_pattern: {e}")))?;
                let blob = capture_group_1(&re, &page.body)
                    .ok_or_else(|| ResolveError::format("encrypted payload not found in embed page"))?;
                (blob.to_string(), find_subtitles(&page.body, &page.url))
            }
            (None, None) => {
                return Err(ResolveError::format(
                    "aes profile needs sources_api or payload_pattern",
                ));
            }
        };

        let sources = self.decrypt_sources(&ciphertext, cipher, password).await?;
        Ok(DecodedSources { sources, subtitles })
    }

    async fn decrypt_sources(
        &self,
        ciphertext: &str,
        cipher: KeyDerivation,
        password: &PasswordSource,
    ) -> Result<Vec<SourceEntry>, ResolveError> {
        match password {
            PasswordSource::Static { value } => decrypt_document(ciphertext, value, cipher),
            PasswordSource::RemoteKey { site_type } => {
                with_key(&self.context.keys, site_type, |key: Arc<ObfuscationKey>| {
                    ready(
                        key.text()
                            .and_then(|passphrase| decrypt_document(ciphertext, passphrase, cipher)),
                    )
                })
                .await
            }
            PasswordSource::IndexPairs { site_type } => {
                with_key(&self.context.keys, site_type, |key: Arc<ObfuscationKey>| {
                    ready(
                        key.index_pairs()
                            .and_then(|pairs| split_index_pairs(ciphertext, pairs))
                            .and_then(|split| {
                                decrypt_document(&split.ciphertext, &split.password, cipher)
                            }),
                    )
                })
                .await
            }
        }
    }

    async fn rc4_sources(
        &self,
        page: &EmbedPage,
        key_site_type: &str,
        api: &str,
        futoken: Option<&FutokenSource>,
    ) -> Result<DecodedSources, ResolveError> {
        let query = page.url.query().unwrap_or_default();
        // A rotated key pair shows up as a rejected token, which is retryable.
        with_key(&self.context.keys, key_site_type, |key: Arc<ObfuscationKey>| async move {
            let token = double_rc4_token(
                page.id.as_bytes(),
                key.key_at(0)?.as_bytes(),
                key.key_at(1)?.as_bytes(),
            );
            let token = match futoken {
                Some(source) => self.apply_futoken(page, source, &token).await?,
                None => token,
            };
            let url = Url::parse(&fill_template(
                api,
                &[("origin", page.origin.as_str()), ("token", token.as_str()), ("query", query)],
            ))?;
            let response: Value = self
                .context
                .http
                .fetch(&self.api_request(url.as_str(), page))
                .await?
                .json()?;
            decode_token_response(&response, &url)
        })
        .await
    }

    async fn apply_futoken(
        &self,
        page: &EmbedPage,
        source: &FutokenSource,
        token: &str,
    ) -> Result<String, ResolveError> {
        let evaluator = self.context.evaluator()?;
        let url = fill_template(&source.url, &[("origin", page.origin.as_str())]);
        let script = self.context.http.fetch(&self.api_request(url, page)).await?.text();
        derive_token(evaluator, &script, &source.entry, token).await
    }

    async fn hex_path_sources(
        &self,
        page: &EmbedPage,
        path_template: &str,
        suffix: &str,
    ) -> Result<DecodedSources, ResolveError> {
        let padded = format!(
            "{}||{}||{}||{}",
            random_alphanumeric(12),
            page.id,
            random_alphanumeric(12),
            suffix
        );
        let url = Url::parse(&fill_template(
            path_template,
            &[("origin", page.origin.as_str()), ("hex", hex_encode(&padded).as_str())],
        ))?;
        let response: Value = self
            .context
            .http
            .fetch(&self.api_request(url.as_str(), page))
            .await?
            .json()?;
        let data = response
            .get("stream_data")
            .ok_or_else(|| ResolveError::format("response has no stream_data"))?;
        let file = data
            .get("file")
            .and_then(Value::as_str)
            .ok_or_else(|| ResolveError::format("stream_data has no file"))?;
        Ok(DecodedSources {
            sources: vec![SourceEntry::new(file)],
            subtitles: parse_tracks(data.get("subs"), &url),
        })
    }

    /// Turn sources into descriptors, fetching and splitting playlists.
    ///
    /// Transport failures on a playlist fetch are returned only when no
    /// source produced a descriptor.
    async fn emit(
        &self,
        page: &EmbedPage,
        decoded: DecodedSources,
    ) -> Result<Vec<StreamDescriptor>, ResolveError> {
        let headers = self.descriptor_headers(page);
        let mut descriptors = Vec::new();
        let mut terminal = None;

        for source in decoded.sources {
            let url = match page.url.join(&source.file) {
                Ok(url) => url,
                Err(e) => {
                    debug!(host = %self.profile.name, file = %source.file, error = %e, "unresolvable source url");
                    continue;
                }
            };

            if MediaFormat::detect(url.as_str(), source.kind.as_deref()) == MediaFormat::Mp4 {
                let label = self.label(source.label.as_deref().unwrap_or("Default"));
                descriptors.push(
                    StreamDescriptor::builder(label, url.as_str())
                        .format(MediaFormat::Mp4)
                        .headers(headers.clone())
                        .subtitles(decoded.subtitles.clone())
                        .build(),
                );
                continue;
            }

            let request = FetchRequest::get(url.as_str()).headers(&headers);
            let response = match self.context.http.fetch(&request).await {
                Ok(response) => response,
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(e) if e.is_terminal_fetch() => {
                    warn!(host = %self.profile.name, url = %url, error = %e, "playlist fetch failed");
                    terminal = Some(e);
                    continue;
                }
                Err(e) => {
                    warn!(host = %self.profile.name, url = %url, error = %e, "playlist fetch failed");
                    continue;
                }
            };

            let body = response.text();
            match parse_playlist(&body, &response.final_url) {
                ParsedPlaylist::Master {
                    variants,
                    audio_tracks,
                } => {
                    for variant in variants {
                        descriptors.push(
                            StreamDescriptor::builder(self.label(&variant.label), variant.uri)
                                .format(MediaFormat::Hls)
                                .headers(headers.clone())
                                .subtitles(decoded.subtitles.clone())
                                .audio_tracks(audio_tracks.clone())
                                .build(),
                        );
                    }
                }
                ParsedPlaylist::Media => descriptors.push(
                    StreamDescriptor::builder(self.label("Default"), url.as_str())
                        .format(MediaFormat::Hls)
                        .headers(headers.clone())
                        .subtitles(decoded.subtitles.clone())
                        .build(),
                ),
                ParsedPlaylist::NotPlaylist => {
                    warn!(host = %self.profile.name, url = %url, "source is not a playlist");
                }
            }
        }

        if descriptors.is_empty()
            && let Some(e) = terminal
        {
            return Err(e);
        }
        Ok(descriptors)
    }
}

#[async_trait]
impl StreamExtractor for HostExtractor {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn matches(&self, url: &Url) -> bool {
        self.pattern.is_match(url.as_str())
    }

    async fn resolve(&self, request: &EmbedRequest) -> Result<Vec<StreamDescriptor>, ResolveError> {
        let host = self.profile.name.as_str();
        let kind = self.profile.pipeline.kind();

        let page = match self.fetch_embed(request).await {
            Ok(page) => page,
            Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
            Err(e) => {
                warn!(host, url = %request.url, error = %e, "embed page fetch failed");
                return Ok(Vec::new());
            }
        };

        let decoded = match self.locate_sources(&page).await {
            Ok(decoded) if !decoded.is_empty() => decoded,
            Ok(_) => {
                warn!(host, kind, url = %page.url, "no sources found");
                return Ok(Vec::new());
            }
            Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
            Err(e) => {
                warn!(host, kind, url = %page.url, error = %e, "source extraction failed");
                return Ok(Vec::new());
            }
        };
        debug!(host, kind, sources = decoded.sources.len(), subtitles = decoded.subtitles.len(), "sources located");

        self.emit(&page, decoded).await
    }
}

fn scan_text(text: &str, base: &Url) -> DecodedSources {
    DecodedSources {
        sources: find_sources(text),
        subtitles: find_subtitles(text, base),
    }
}

fn decrypt_document(
    ciphertext: &str,
    passphrase: &str,
    cipher: KeyDerivation,
) -> Result<Vec<SourceEntry>, ResolveError> {
    let payload = CipherPayload::parse(ciphertext, cipher)?;
    let plaintext = aes_decrypt(&payload, passphrase, cipher)?;
    parse_sources_document(&plaintext)
}

/// `{"result": {"sources": [...], "tracks": [...]}}`. Anything else means
/// the host rejected the token.
fn decode_token_response(response: &Value, api_url: &Url) -> Result<DecodedSources, ResolveError> {
    let result = response
        .get("result")
        .filter(|r| r.is_object())
        .ok_or_else(|| ResolveError::format("token rejected by host api"))?;
    let sources = result
        .get("sources")
        .ok_or_else(|| ResolveError::format("token response has no sources"))?;
    Ok(DecodedSources {
        sources: sources_from_value(sources)?,
        subtitles: parse_tracks(result.get("tracks"), api_url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::encrypt_openssl_salted;
    use serde_json::json;

    #[test]
    fn test_decrypt_document_roundtrips_salted_sources() {
        let blob = encrypt_openssl_salted(
            r#"[{"file":"https://cdn.example/v/master.m3u8","type":"hls"}]"#,
            "test-key",
            *b"saltsalt",
        );
        let sources = decrypt_document(&blob, "test-key", KeyDerivation::OpensslSalted).unwrap();
        assert_eq!(sources[0].file, "https://cdn.example/v/master.m3u8");

        let err = decrypt_document(&blob, "wrong-key", KeyDerivation::OpensslSalted).unwrap_err();
        assert!(err.is_key_retryable());
    }

    fn api_url() -> Url {
        Url::parse("https://vid.example/mediainfo/tok").unwrap()
    }

    #[test]
    fn test_decode_token_response() {
        let decoded = decode_token_response(&json!({
            "status": 200,
            "result": {
                "sources": [{"file": "https://cdn.example/list.m3u8"}],
                "tracks": [{"file": "https://cdn.example/en.vtt", "label": "English", "kind": "captions"}]
            }
        }), &api_url())
        .unwrap();
        assert_eq!(decoded.sources.len(), 1);
        assert_eq!(decoded.subtitles[0].label, "English");

        let rejected = decode_token_response(&json!({"status": 200, "result": ""}), &api_url()).unwrap_err();
        assert!(rejected.is_key_retryable());
    }

    #[test]
    fn test_scan_text_collects_sources_and_tracks() {
        let decoded = scan_text(
            r#"player.setup({sources:[{file:"/hls/master.m3u8"}],tracks:[{file:"/subs/en.vtt",label:"English",kind:"captions"}]})"#,
            &Url::parse("https://embed.example/e/abc").unwrap(),
        );
        assert_eq!(decoded.sources, vec![SourceEntry::new("/hls/master.m3u8")]);
        assert_eq!(decoded.subtitles[0].url, "https://embed.example/subs/en.vtt");
    }
}

//! Host profiles: one tagged pipeline variant plus per-host constants.
//!
//! A new host that behaves like an existing one needs a profile, not code.
//! Profiles deserialize from the same shape used by the built-ins, so they
//! can be added or overridden from configuration.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decoder::KeyDerivation;
use crate::error::ResolveError;

/// Where the AES passphrase comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum PasswordSource {
    Static { value: String },
    /// The remote key for `site_type` is the passphrase.
    RemoteKey { site_type: String },
    /// The passphrase is spliced into the ciphertext at positions given by
    /// the remote index-pair table for `site_type`.
    IndexPairs { site_type: String },
}

/// Host-supplied token function applied to the RC4 token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutokenSource {
    /// Script URL template (`{origin}`).
    pub url: String,
    /// Function to call, e.g. `window.futoken`.
    pub entry: String,
}

fn default_hex_path_template() -> String {
    "{origin}/sources16/{hex}".to_string()
}

fn default_hex_suffix() -> String {
    "streamsb".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pipeline {
    /// Playlist or file URL is in the embed page.
    DirectPlaylist,
    /// Sources are inside `eval(function(p,a,c,k,e,d)...)` blocks.
    PackedScript,
    AesObfuscated {
        /// `getSources`-style API (`{origin}`, `{id}`). Without it the
        /// payload is taken from the page with `payload_pattern`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources_api: Option<String>,
        /// Regex whose first group is the encrypted payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload_pattern: Option<String>,
        cipher: KeyDerivation,
        password: PasswordSource,
    },
    Rc4Token {
        /// Remote key list; entries 0 and 1 are the two RC4 keys.
        key_site_type: String,
        /// API template (`{origin}`, `{token}`, `{query}`).
        api: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        futoken: Option<FutokenSource>,
    },
    HexPath {
        #[serde(default = "default_hex_path_template")]
        path_template: String,
        #[serde(default = "default_hex_suffix")]
        suffix: String,
    },
    /// Packed blocks if present, then the plain page.
    Generic,
}

impl Pipeline {
    pub fn kind(&self) -> &'static str {
        match self {
            Pipeline::DirectPlaylist => "direct_playlist",
            Pipeline::PackedScript => "packed_script",
            Pipeline::AesObfuscated { .. } => "aes_obfuscated",
            Pipeline::Rc4Token { .. } => "rc4_token",
            Pipeline::HexPath { .. } => "hex_path",
            Pipeline::Generic => "generic",
        }
    }

    /// Site type of the remote key this pipeline decodes with, if any.
    pub fn key_site_type(&self) -> Option<&str> {
        match self {
            Pipeline::AesObfuscated {
                password: PasswordSource::RemoteKey { site_type } | PasswordSource::IndexPairs { site_type },
                ..
            } => Some(site_type),
            Pipeline::Rc4Token { key_site_type, .. } => Some(key_site_type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    /// Display name, used as the descriptor label prefix.
    pub name: String,
    /// Regex matched against the embed URL.
    pub url_pattern: String,
    /// Extra headers for every request to this host and on its descriptors.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub pipeline: Pipeline,
}

impl HostProfile {
    pub fn new(name: impl Into<String>, url_pattern: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            url_pattern: url_pattern.into(),
            headers: BTreeMap::new(),
            pipeline,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn compile_pattern(&self) -> Result<Regex, ResolveError> {
        Regex::new(&self.url_pattern).map_err(|e| {
            ResolveError::format(format!("invalid url_pattern for host {}: {e}", self.name))
        })
    }
}

/// One representative host per pipeline variant, generic fallback last.
pub fn builtin_profiles() -> Vec<HostProfile> {
    vec![
        HostProfile::new(
            "Megacloud",
            r"^https?://(?:www\.)?megacloud\.(?:blog|tv|club)/embed-\d+/",
            Pipeline::AesObfuscated {
                sources_api: Some("{origin}/embed-2/v2/e-1/getSources?id={id}".into()),
                payload_pattern: None,
                cipher: KeyDerivation::OpensslSalted,
                password: PasswordSource::RemoteKey {
                    site_type: "megacloud".into(),
                },
            },
        ),
        HostProfile::new(
            "Rabbitstream",
            r"^https?://(?:www\.)?(?:rabbitstream\.net|dokicloud\.one)/(?:v\d/)?embed-\d+/",
            Pipeline::AesObfuscated {
                sources_api: Some("{origin}/ajax/embed-4/getSources?id={id}".into()),
                payload_pattern: None,
                cipher: KeyDerivation::OpensslSalted,
                password: PasswordSource::IndexPairs {
                    site_type: "rabbitstream".into(),
                },
            },
        ),
        HostProfile::new(
            "Vidplay",
            r"^https?://(?:www\.)?(?:vidplay\.(?:site|online|lol)|mcloud\.bz|vid2faf\.site)/e/",
            Pipeline::Rc4Token {
                key_site_type: "vidplay".into(),
                api: "{origin}/mediainfo/{token}?{query}".into(),
                futoken: Some(FutokenSource {
                    url: "{origin}/futoken".into(),
                    entry: "window.futoken".into(),
                }),
            },
        ),
        HostProfile::new(
            "StreamSB",
            r"^https?://(?:www\.)?(?:streamsb\.net|sbembed\.com|sbplay\d?\.(?:com|org)|embedsb\.com)/(?:e/|embed-)",
            Pipeline::HexPath {
                path_template: default_hex_path_template(),
                suffix: default_hex_suffix(),
            },
        )
        .with_header("watchsb", "sbstream"),
        HostProfile::new(
            "Filemoon",
            r"^https?://(?:www\.)?(?:filemoon\.(?:sx|to|in)|kerapoxy\.cc)/e/",
            Pipeline::PackedScript,
        ),
        HostProfile::new(
            "Vidstream",
            r"^https?://(?:www\.)?(?:streamtape\.com|voe\.sx|mp4upload\.com)/(?:e|embed)",
            Pipeline::DirectPlaylist,
        ),
        HostProfile::new("Generic", r"^https?://", Pipeline::Generic),
    ]
}

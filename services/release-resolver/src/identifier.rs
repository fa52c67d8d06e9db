//!
//! src/identifier.rs
//!
//! Classifies raw user input as a provider track/album url, a UPC/EAN
//! catalog code, or something we cannot resolve. Pure, no I/O.
//!

use url::Url;

use crate::types::{Identifier, InvalidReason, SpotifyAlbumId, SpotifyTrackId, Upc};

pub const DEFAULT_PROVIDER_DOMAIN: &str = "spotify.com";

#[derive(Debug, Clone)]
pub struct IdentifierParser {
    provider_domain: String
}

impl Default for IdentifierParser {
    fn default() -> Self { Self::new(DEFAULT_PROVIDER_DOMAIN) }
}

impl IdentifierParser {
    pub fn new(provider_domain: impl Into<String>) -> Self {
        Self { provider_domain: provider_domain.into().to_ascii_lowercase() }
    }

    /// Url pattern is checked before the numeric pattern.
    pub fn parse(&self, input: &str) -> Identifier {
        let input = input.trim();

        if input.to_ascii_lowercase().contains(&self.provider_domain) {
            return self.parse_provider_url(input)
                .unwrap_or(Identifier::Invalid(InvalidReason::BadUrl));
        }

        if is_catalog_code(input) {
            return Identifier::Upc(Upc(input.to_string()));
        }

        Identifier::Invalid(InvalidReason::UnrecognizedFormat)
    }

    fn parse_provider_url(&self, input: &str) -> Option<Identifier> {
        // tolerate pasted links without a scheme
        let url = if input.contains("://") {
            Url::parse(input).ok()?
        } else {
            Url::parse(&format!("https://{input}")).ok()?
        };

        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        let host = url.host_str()?.to_ascii_lowercase();
        let on_provider = host == self.provider_domain
            || host.ends_with(&format!(".{}", self.provider_domain));
        if !on_provider {
            return None;
        }

        // query and fragment never show up in path segments
        let segments: Vec<&str> = url.path_segments()?
            .filter(|s| !s.is_empty())
            .collect();

        let kind_at = segments.iter()
            .position(|s| *s == "track" || *s == "album")?;
        let id = segments.get(kind_at + 1)?;
        if !is_catalog_id(id) {
            return None;
        }

        match segments[kind_at] {
            "track" => Some(Identifier::Track(SpotifyTrackId(id.to_string()))),
            _ => Some(Identifier::Album(SpotifyAlbumId(id.to_string())))
        }
    }
}

fn is_catalog_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_catalog_code(s: &str) -> bool {
    (12..=13).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

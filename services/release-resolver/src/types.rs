use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

// Provider catalog id of a single track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpotifyTrackId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpotifyAlbumId(pub String);

// Universal product code (12 digits) or EAN (13 digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Upc(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    BadUrl,
    UnrecognizedFormat
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidReason::BadUrl => "bad-url",
            InvalidReason::UnrecognizedFormat => "unrecognized-format"
        }
    }
}

/// Classified user input. Derived once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Track(SpotifyTrackId),
    Album(SpotifyAlbumId),
    Upc(Upc),
    Invalid(InvalidReason)
}

/// Title, artist and artwork as reported by the primary provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMetadata {
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub canonical_url: String
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLink {
    pub url: String
}

/// Platform key (`spotify`, `appleMusic`, ...) to playback link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformLinkMap(BTreeMap<String, PlatformLink>);

impl PlatformLinkMap {
    pub fn new() -> Self { Self::default() }

    pub fn single(platform: &str, url: &str) -> Self {
        let mut map = Self::new();
        map.insert(platform, url);
        map
    }

    pub fn insert(&mut self, platform: &str, url: &str) {
        self.0.insert(platform.to_string(), PlatformLink { url: url.to_string() });
    }

    pub fn get(&self, platform: &str) -> Option<&PlatformLink> {
        self.0.get(platform)
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.0.contains_key(platform)
    }

    pub fn remove(&mut self, platform: &str) -> Option<PlatformLink> {
        self.0.remove(platform)
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlatformLink)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, PlatformLink)> for PlatformLinkMap {
    fn from_iter<I: IntoIterator<Item = (String, PlatformLink)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Fully resolved release, ready to be handed to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDraft {
    pub slug: String,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub source_url: String,
    pub links: PlatformLinkMap
}

/// Inbound request as sent by the submit form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    #[serde(default)]
    pub spotify_url: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub platforms: Option<HashMap<String, bool>>
}

impl ReleaseRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { spotify_url: Some(url.into()), ..Self::default() }
    }

    pub fn from_upc(upc: impl Into<String>) -> Self {
        Self { upc: Some(upc.into()), ..Self::default() }
    }

    pub fn with_platform(mut self, platform: &str, enabled: bool) -> Self {
        self.platforms
            .get_or_insert_with(HashMap::new)
            .insert(platform.to_string(), enabled);
        self
    }
}

/// Either `{ "slug": .. }` or `{ "error": .. }`; nothing else goes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReleaseResponse {
    Created { slug: String },
    Failed { error: String }
}

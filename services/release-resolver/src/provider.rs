//!
//! src/provider.rs
//!
//! Primary metadata provider: upc search, track and album lookups, and
//! the mapping from provider responses onto CanonicalMetadata.
//!

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::ResolveError;
use crate::fetch::SpotifyClient;
use crate::token::{ProviderToken, TokenCache};
use crate::types::{CanonicalMetadata, SpotifyAlbumId, SpotifyTrackId, Upc};

/// Shown when the provider lists no usable artist name.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
/// Title used when the provider returns a blank name.
pub const UNKNOWN_RELEASE: &str = "Unknown Release";

#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// First album matching the catalog code; further matches are ignored.
    async fn lookup_by_upc(&self, upc: &Upc) -> Result<Option<SpotifyAlbumId>, ResolveError>;

    async fn get_track(&self, id: &SpotifyTrackId) -> Result<CanonicalMetadata, ResolveError>;

    async fn get_album(&self, id: &SpotifyAlbumId) -> Result<CanonicalMetadata, ResolveError>;
}

///
/// Provider response schema, only the fields we read. Every field is
/// optional so presence is checked explicitly in the mapping below.
///

#[derive(Debug, Deserialize)]
pub struct ArtistDto {
    pub name: Option<String>
}

#[derive(Debug, Deserialize)]
pub struct ImageDto {
    pub url: Option<String>
}

#[derive(Debug, Default, Deserialize)]
pub struct ExternalUrlsDto {
    pub spotify: Option<String>
}

#[derive(Debug, Deserialize)]
pub struct AlbumRefDto {
    pub images: Option<Vec<ImageDto>>
}

#[derive(Debug, Deserialize)]
pub struct TrackDto {
    pub id: Option<String>,
    pub name: Option<String>,
    pub artists: Option<Vec<ArtistDto>>,
    pub album: Option<AlbumRefDto>,
    pub external_urls: Option<ExternalUrlsDto>
}

#[derive(Debug, Deserialize)]
pub struct AlbumDto {
    pub id: Option<String>,
    pub name: Option<String>,
    pub artists: Option<Vec<ArtistDto>>,
    pub images: Option<Vec<ImageDto>>,
    pub external_urls: Option<ExternalUrlsDto>
}

#[derive(Debug, Deserialize)]
pub struct SearchItemDto {
    pub id: Option<String>
}

#[derive(Debug, Deserialize)]
pub struct PagingDto {
    pub items: Option<Vec<SearchItemDto>>
}

#[derive(Debug, Deserialize)]
pub struct SearchDto {
    pub albums: Option<PagingDto>
}

fn title_of(name: Option<String>, what: &str) -> Result<String, ResolveError> {
    match name {
        Some(n) if n.trim().is_empty() => Ok(UNKNOWN_RELEASE.to_string()),
        Some(n) => Ok(n.trim().to_string()),
        None => Err(ResolveError::UpstreamFetch(format!("{what} is missing name")))
    }
}

// artist is cosmetic, falls back instead of failing
fn artist_of(artists: Option<Vec<ArtistDto>>) -> String {
    let names: Vec<String> = artists.unwrap_or_default()
        .into_iter()
        .filter_map(|a| a.name)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        UNKNOWN_ARTIST.to_string()
    } else {
        names.join(", ")
    }
}

fn cover_of(images: Option<Vec<ImageDto>>, what: &str) -> Result<String, ResolveError> {
    images.unwrap_or_default()
        .into_iter()
        .find_map(|i| i.url.filter(|u| !u.is_empty()))
        .ok_or_else(|| ResolveError::UpstreamFetch(format!("{what} has no cover images")))
}

fn canonical_of(
    external: Option<ExternalUrlsDto>,
    fallback: impl FnOnce() -> Result<String, ResolveError>
) -> Result<String, ResolveError> {
    match external.and_then(|e| e.spotify).filter(|u| !u.is_empty()) {
        Some(url) => Ok(url),
        None => fallback()
    }
}

/// Track to canonical metadata, cover comes from the track's album.
/// `web_url` builds the public page when the response lacks one.
pub fn map_track(
    dto: TrackDto,
    requested: &SpotifyTrackId,
    web_url: impl FnOnce(&str) -> Result<String, ResolveError>
) -> Result<CanonicalMetadata, ResolveError> {
    let title = title_of(dto.name, "track")?;
    let artist = artist_of(dto.artists);
    let album = dto.album
        .ok_or_else(|| ResolveError::UpstreamFetch("track has no album".into()))?;
    let cover_url = cover_of(album.images, "track album")?;
    let id = dto.id.unwrap_or_else(|| requested.0.clone());
    let canonical_url = canonical_of(dto.external_urls, || web_url(&id))?;

    Ok( CanonicalMetadata { title, artist, cover_url, canonical_url } )
}

pub fn map_album(
    dto: AlbumDto,
    requested: &SpotifyAlbumId,
    web_url: impl FnOnce(&str) -> Result<String, ResolveError>
) -> Result<CanonicalMetadata, ResolveError> {
    let title = title_of(dto.name, "album")?;
    let artist = artist_of(dto.artists);
    let cover_url = cover_of(dto.images, "album")?;
    let id = dto.id.unwrap_or_else(|| requested.0.clone());
    let canonical_url = canonical_of(dto.external_urls, || web_url(&id))?;

    Ok( CanonicalMetadata { title, artist, cover_url, canonical_url } )
}

pub fn first_search_hit(dto: SearchDto) -> Option<SpotifyAlbumId> {
    dto.albums
        .and_then(|p| p.items)
        .unwrap_or_default()
        .into_iter()
        .find_map(|item| item.id.filter(|id| !id.is_empty()))
        .map(SpotifyAlbumId)
}

/// Turns a non-auth response into json or a typed error.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ResolveError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ResolveError::UpstreamFetch("rate limited".into()));
    }
    if !status.is_success() {
        return Err(ResolveError::UpstreamFetch(format!("status {status}")));
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED
}

pub struct SpotifyProvider {
    client: SpotifyClient,
    tokens: Arc<TokenCache>
}

impl SpotifyProvider {
    pub fn new(client: SpotifyClient, tokens: Arc<TokenCache>) -> Self {
        Self { client, tokens }
    }

    pub async fn get_token(&self) -> Result<Arc<ProviderToken>, ResolveError> {
        self.tokens.get_token().await
    }

    /// Sends with the cached token; a 401 invalidates it and retries once
    /// with a fresh one. A second 401 is an auth failure.
    async fn authed_json<T, F>(&self, build: F) -> Result<T, ResolveError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> Result<RequestBuilder, ResolveError> + Send + Sync
    {
        let token = self.get_token().await?;
        let response = build(token.bearer())?.send().await?;
        if !is_auth_rejection(response.status()) {
            return decode(response).await;
        }

        warn!("provider.auth.retry");
        self.tokens.invalidate(&token);
        let token = self.get_token().await?;
        let response = build(token.bearer())?.send().await?;
        if is_auth_rejection(response.status()) {
            return Err(ResolveError::UpstreamAuth("token rejected after refresh".into()));
        }
        decode(response).await
    }

    fn web_url(&self, kind: &'static str) -> impl FnOnce(&str) -> Result<String, ResolveError> + '_ {
        move |id| self.client.web_url(kind, id).map(String::from)
    }
}

#[async_trait]
impl ProviderApi for SpotifyProvider {
    async fn lookup_by_upc(&self, upc: &Upc) -> Result<Option<SpotifyAlbumId>, ResolveError> {
        let search: SearchDto = self.authed_json(|bearer| self.client.search_upc(&upc.0, bearer))
            .await?;
        let hit = first_search_hit(search);
        debug!(upc = %upc.0, found = hit.is_some(), "provider.upc.search");
        Ok(hit)
    }

    async fn get_track(&self, id: &SpotifyTrackId) -> Result<CanonicalMetadata, ResolveError> {
        let dto: TrackDto = self.authed_json(|bearer| self.client.track(&id.0, bearer)).await?;
        map_track(dto, id, self.web_url("track"))
    }

    async fn get_album(&self, id: &SpotifyAlbumId) -> Result<CanonicalMetadata, ResolveError> {
        let dto: AlbumDto = self.authed_json(|bearer| self.client.album(&id.0, bearer)).await?;
        map_album(dto, id, self.web_url("album"))
    }
}

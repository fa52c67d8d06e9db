//! Stubs and fixtures shared by the unit tests.
//!
//! Every stub counts its calls so tests can assert which upstream
//! endpoints a resolution touched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::aggregator::AggregatorApi;
use crate::config::{build_config, AppConfig};
use crate::errors::ResolveError;
use crate::persistent::SqliteReleaseStore;
use crate::provider::ProviderApi;
use crate::token::{ProviderToken, TokenExchange};
use crate::types::{
    CanonicalMetadata, PlatformLinkMap, ReleaseDraft, SpotifyAlbumId, SpotifyTrackId, Upc
};

pub fn sample_metadata(title: &str) -> CanonicalMetadata {
    CanonicalMetadata {
        title: title.to_string(),
        artist: "Artist".to_string(),
        cover_url: "https://i.scdn.co/image/cover".to_string(),
        canonical_url: "https://provider.example/track/abc".to_string()
    }
}

pub fn sample_draft(slug: &str) -> ReleaseDraft {
    let mut links = PlatformLinkMap::single("spotify", "https://provider.example/track/abc");
    links.insert("appleMusic", "https://music.apple.com/x");
    ReleaseDraft {
        slug: slug.to_string(),
        title: "Song".to_string(),
        artist: "Artist".to_string(),
        cover_url: "https://i.scdn.co/image/cover".to_string(),
        source_url: "https://provider.example/track/abc".to_string(),
        links
    }
}

/// Fresh sqlite store in a temp dir; keep the dir alive for the test.
pub async fn temp_store() -> (SqliteReleaseStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let url = format!("sqlite://{}", dir.path().join("releases.db").display());
    let store = SqliteReleaseStore::init(&url)
        .await
        .expect("Failed to initialize test database");
    (store, dir)
}

#[derive(Default)]
pub struct StubProvider {
    track: Option<CanonicalMetadata>,
    album: Option<CanonicalMetadata>,
    upc_hit: Option<String>,
    failure: Option<ResolveError>,
    hang: bool,
    pub upc_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    track_ids: Mutex<Vec<String>>,
    album_ids: Mutex<Vec<String>>
}

impl StubProvider {
    pub fn with_track(meta: CanonicalMetadata) -> Self {
        Self { track: Some(meta), ..Self::default() }
    }

    pub fn with_upc_hit(album_id: Option<&str>) -> Self {
        Self { upc_hit: album_id.map(str::to_string), ..Self::default() }
    }

    pub fn failing(e: ResolveError) -> Self {
        Self { failure: Some(e), ..Self::default() }
    }

    pub fn album(mut self, meta: CanonicalMetadata) -> Self {
        self.album = Some(meta);
        self
    }

    /// Metadata calls never complete.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn track_ids(&self) -> Vec<String> { self.track_ids.lock().clone() }

    pub fn album_ids(&self) -> Vec<String> { self.album_ids.lock().clone() }

    async fn answer(&self, meta: &Option<CanonicalMetadata>) -> Result<CanonicalMetadata, ResolveError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        meta.clone().ok_or_else(|| ResolveError::UpstreamFetch("stub has no metadata".into()))
    }
}

#[async_trait]
impl ProviderApi for StubProvider {
    async fn lookup_by_upc(&self, _upc: &Upc) -> Result<Option<SpotifyAlbumId>, ResolveError> {
        self.upc_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.upc_hit.clone().map(SpotifyAlbumId))
    }

    async fn get_track(&self, id: &SpotifyTrackId) -> Result<CanonicalMetadata, ResolveError> {
        self.track_ids.lock().push(id.0.clone());
        self.answer(&self.track).await
    }

    async fn get_album(&self, id: &SpotifyAlbumId) -> Result<CanonicalMetadata, ResolveError> {
        self.album_ids.lock().push(id.0.clone());
        self.answer(&self.album).await
    }
}

#[derive(Default)]
pub struct StubAggregator {
    links: Option<PlatformLinkMap>,
    hang: bool,
    pub calls: AtomicUsize,
    urls: Mutex<Vec<String>>
}

impl StubAggregator {
    pub fn returning(links: PlatformLinkMap) -> Self {
        Self { links: Some(links), ..Self::default() }
    }

    pub fn failing() -> Self { Self::default() }

    pub fn hanging() -> Self {
        Self { hang: true, ..Self::default() }
    }

    pub fn requested_urls(&self) -> Vec<String> { self.urls.lock().clone() }
}

#[async_trait]
impl AggregatorApi for StubAggregator {
    async fn get_links(&self, canonical_url: &str) -> Result<PlatformLinkMap, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(canonical_url.to_string());
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.links.clone()
            .ok_or_else(|| ResolveError::UpstreamFetch("aggregator status 500".into()))
    }
}

/// Token exchange that counts how often it is hit and hands out
/// `token-1`, `token-2`, ...
pub struct CountingExchange {
    pub calls: AtomicUsize,
    delay: Duration,
    lifetime: Duration,
    fail: bool
}

impl Default for CountingExchange {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            lifetime: Duration::from_secs(3600),
            fail: false
        }
    }
}

impl CountingExchange {
    pub fn slow(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self { lifetime, ..Self::default() }
    }

    pub fn failing(delay: Duration) -> Self {
        Self { delay, fail: true, ..Self::default() }
    }
}

#[async_trait]
impl TokenExchange for CountingExchange {
    async fn exchange(&self) -> Result<ProviderToken, ResolveError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ResolveError::UpstreamAuth("stub exchange failed".into()));
        }
        Ok(ProviderToken::new(format!("token-{n}"), self.lifetime))
    }
}

/// Answers `(path, nth hit on that path)` with a status and a json body.
type Route = dyn Fn(&str, usize) -> (u16, String) + Send + Sync;

/// Minimal http/1.1 server on loopback, one response per connection.
pub struct StubServer {
    pub base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    task: tokio::task::JoinHandle<()>
}

impl StubServer {
    pub async fn start<F>(route: F) -> Self
    where
        F: Fn(&str, usize) -> (u16, String) + Send + Sync + 'static
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let route: Arc<Route> = Arc::new(route);

        let counter = Arc::clone(&hits);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                let route = Arc::clone(&route);
                tokio::spawn(async move {
                    let _ = answer(stream, &counter, route.as_ref()).await;
                });
            }
        });

        Self { base, hits, task }
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }

    /// Config whose token endpoint and api base point at this server.
    pub fn config(&self) -> AppConfig {
        let token_url = format!("{}/token", self.base);
        let api_base = format!("{}/v1/", self.base);
        build_config(&|k: &str| match k {
            "SPOTIFY_CLIENT_ID" => Some("id".to_string()),
            "SPOTIFY_CLIENT_SECRET" => Some("secret".to_string()),
            "SPOTIFY_TOKEN_URL" => Some(token_url.clone()),
            "SPOTIFY_API_BASE" => Some(api_base.clone()),
            "HTTP_TIMEOUT_MS" => Some("2000".to_string()),
            _ => None
        }).expect("stub config")
    }
}

impl Drop for StubServer {
    fn drop(&mut self) { self.task.abort(); }
}

async fn answer(
    mut stream: TcpStream,
    hits: &Mutex<HashMap<String, usize>>,
    route: &Route
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break i + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head.lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    let nth = {
        let mut hits = hits.lock();
        let n = hits.entry(path.clone()).or_insert(0);
        *n += 1;
        *n
    };

    let (status, body) = route(&path, nth);
    let response = format!(
        "HTTP/1.1 {status} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

pub fn token_body(n: usize) -> String {
    format!(r#"{{"access_token":"tok-{n}","token_type":"Bearer","expires_in":3600}}"#)
}

pub fn track_body(title: &str) -> String {
    format!(
        r#"{{"id":"x","name":"{title}","artists":[{{"name":"Artist"}}],"album":{{"images":[{{"url":"cover.jpg"}}]}}}}"#
    )
}

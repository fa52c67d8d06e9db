//!
//! src/fetch.rs
//!
//! Defines methods for building clients and requests against the
//! provider and aggregator endpoints. Nothing here sends a request.
//!

use url::Url;
use reqwest::{Client, header, redirect, RequestBuilder};

use crate::config::{AggregatorConfig, HttpConfig, SpotifyConfig};
use crate::errors::ResolveError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, ResolveError> {
    client_helper(http)
        .default_headers(headers)
        .user_agent(concat!("release-resolver/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ResolveError::Config(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, ResolveError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

fn join(base: &Url, path: &str) -> Result<Url, ResolveError> {
    base.join(path)
        .map_err(|e| ResolveError::Config(format!("join {base} + {path}: {e}")))
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, ResolveError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone()
        })
    }

    /// POST token_url, client credentials in the basic auth header
    pub fn token_request(&self) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/tracks/{id}
    pub fn track(&self, track_id: &str, bearer: &str) -> Result<RequestBuilder, ResolveError> {
        let url = join(&self.cfg.api_base, &format!("tracks/{track_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/albums/{id}
    pub fn album(&self, album_id: &str, bearer: &str) -> Result<RequestBuilder, ResolveError> {
        let url = join(&self.cfg.api_base, &format!("albums/{album_id}"))?;
        Ok(self.http.get(url).bearer_auth(bearer))
    }

    /// GET /v1/search?type=album&q=upc:...&limit=1
    pub fn search_upc(&self, upc: &str, bearer: &str) -> Result<RequestBuilder, ResolveError> {
        let url = join(&self.cfg.api_base, "search")?;
        let q = format!("upc:{upc}");
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("type", "album"),
            ("q", q.as_str()),
            ("limit", "1")
        ]))
    }

    /// Public page for a catalog entity, used when a response carries no
    /// external url of its own.
    pub fn web_url(&self, kind: &str, id: &str) -> Result<Url, ResolveError> {
        join(&self.cfg.web_base, &format!("{kind}/{id}"))
    }
}

#[derive(Clone, Debug)]
pub struct OdesliClient {
    pub http: Client,
    pub cfg: AggregatorConfig
}

impl OdesliClient {
    pub fn new(http_config: &HttpConfig, cfg: &AggregatorConfig) ->
        Result<Self, ResolveError> {
        let http = base_client(http_config)?;
        Ok( Self { http, cfg: cfg.clone() } )
    }

    /// GET /links?url=...&userCountry=...
    pub fn links(&self, canonical_url: &str) -> Result<RequestBuilder, ResolveError> {
        let url = join(&self.cfg.base_url, "links")?;
        let mut rb = self.http.get(url).query(&[("url", canonical_url)]);
        if let Some(country) = &self.cfg.user_country {
            rb = rb.query(&[("userCountry", country.as_str())]);
        }
        Ok(rb)
    }
}

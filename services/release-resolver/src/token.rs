//!
//! src/token.rs
//!
//! Process wide bearer token cache for the primary provider. Reads of a
//! live token are a single atomic load; an expired or missing token is
//! refreshed by exactly one in-flight exchange that every waiter shares.
//!

use std::{fmt, sync::Arc, time::{Duration, Instant}};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::ResolveError;
use crate::fetch::SpotifyClient;

/// Tokens are treated as expired this long before the provider says so.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(30);

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderToken {
    access_token: String,
    expires_at: Instant
}

impl ProviderToken {
    pub fn new(access_token: impl Into<String>, expires_in: Duration) -> Self {
        let lifetime = expires_in.saturating_sub(EXPIRY_SKEW);
        Self { access_token: access_token.into(), expires_at: Instant::now() + lifetime }
    }

    pub fn bearer(&self) -> &str { &self.access_token }

    pub fn is_expired(&self) -> bool { Instant::now() >= self.expires_at }
}

impl fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderToken")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can mint a fresh provider token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<ProviderToken, ResolveError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>
}

/// Client credentials grant against the provider's token endpoint.
pub struct SpotifyTokenExchange {
    client: SpotifyClient
}

impl SpotifyTokenExchange {
    pub fn new(client: SpotifyClient) -> Self { Self { client } }
}

// transport failures while minting a token are auth failures, not fetch ones
fn exchange_error(e: reqwest::Error) -> ResolveError {
    if e.is_timeout() {
        ResolveError::UpstreamTimeout(format!("token exchange: {e}"))
    } else {
        ResolveError::UpstreamAuth(format!("token exchange: {e}"))
    }
}

#[async_trait]
impl TokenExchange for SpotifyTokenExchange {
    async fn exchange(&self) -> Result<ProviderToken, ResolveError> {
        let response = self.client.token_request().send().await.map_err(exchange_error)?;
        let status = response.status();
        if !status.is_success() {
            // body may echo the client id, keep it out of the error
            return Err(ResolveError::UpstreamAuth(format!("token exchange status {status}")));
        }

        let body = response.bytes().await.map_err(exchange_error)?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| ResolveError::UpstreamAuth(format!("malformed token body: {e}")))?;

        let access_token = token.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ResolveError::UpstreamAuth("token body without access_token".into()))?;
        let expires_in = token.expires_in
            .ok_or_else(|| ResolveError::UpstreamAuth("token body without expires_in".into()))?;

        Ok(ProviderToken::new(access_token, Duration::from_secs(expires_in)))
    }
}

type Refresh = Shared<BoxFuture<'static, Result<Arc<ProviderToken>, ResolveError>>>;

pub struct TokenCache {
    exchange: Arc<dyn TokenExchange>,
    current: ArcSwapOption<ProviderToken>,
    inflight: Mutex<Option<Refresh>>
}

impl TokenCache {
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            current: ArcSwapOption::empty(),
            inflight: Mutex::new(None)
        }
    }

    fn cached(&self) -> Option<Arc<ProviderToken>> {
        self.current.load_full().filter(|t| !t.is_expired())
    }

    /// Cached token if still valid, otherwise joins (or starts) the single
    /// refresh. Every caller of one refresh sees the same token or error.
    pub async fn get_token(&self) -> Result<Arc<ProviderToken>, ResolveError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let refresh = {
            let mut inflight = self.inflight.lock();
            if let Some(token) = self.cached() {
                return Ok(token);
            }
            match inflight.as_ref() {
                Some(refresh) => refresh.clone(),
                None => {
                    info!("provider.token.refresh");
                    let exchange = Arc::clone(&self.exchange);
                    let refresh = async move {
                        exchange.exchange().await.map(Arc::new)
                    }.boxed().shared();
                    *inflight = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = refresh.clone().await;

        let mut inflight = self.inflight.lock();
        if inflight.as_ref().is_some_and(|r| r.ptr_eq(&refresh)) {
            *inflight = None;
            match &result {
                Ok(token) => self.current.store(Some(Arc::clone(token))),
                Err(e) => warn!(error = %e, "provider.token.refresh.failed")
            }
        }
        result
    }

    /// Drops `stale` if it is still the cached token, so the next
    /// `get_token` exchanges. A token already replaced is left alone.
    pub fn invalidate(&self, stale: &ProviderToken) {
        let current = self.current.load();
        if current.as_deref() == Some(stale) {
            debug!("provider.token.invalidate");
            self.current.compare_and_swap(&*current, None::<Arc<ProviderToken>>);
        }
    }
}

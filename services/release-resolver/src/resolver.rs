//!
//! src/resolver.rs
//!
//! Drives one resolution: parse -> metadata -> links -> filter -> slug.
//! Metadata is mandatory, link aggregation is optional enrichment.
//!
//!

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::AggregatorApi;
use crate::config::HTTP_TIMEOUT;
use crate::errors::ResolveError;
use crate::identifier::IdentifierParser;
use crate::policy::PlatformPolicy;
use crate::provider::ProviderApi;
use crate::slug::SlugGenerator;
use crate::types::{CanonicalMetadata, Identifier, ReleaseDraft, ReleaseRequest};

/// Where a resolution currently is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Parsed,
    MetadataResolved,
    LinksAggregated,
    Filtered,
    SlugAssigned,
    Done
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start            => "start",
            Stage::Parsed           => "parsed",
            Stage::MetadataResolved => "metadata-resolved",
            Stage::LinksAggregated  => "links-aggregated",
            Stage::Filtered         => "filtered",
            Stage::SlugAssigned     => "slug-assigned",
            Stage::Done             => "done"
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ReleaseResolver {
    parser: IdentifierParser,
    provider: Arc<dyn ProviderApi>,
    aggregator: Arc<dyn AggregatorApi>,
    policy: PlatformPolicy,
    slugs: SlugGenerator,
    call_timeout: Duration
}

impl ReleaseResolver {
    pub fn new(
        parser: IdentifierParser,
        provider: Arc<dyn ProviderApi>,
        aggregator: Arc<dyn AggregatorApi>,
        policy: PlatformPolicy,
        slugs: SlugGenerator
    ) -> Self {
        Self {
            parser,
            provider,
            aggregator,
            policy,
            slugs,
            call_timeout: Duration::from_millis(HTTP_TIMEOUT)
        }
    }

    /// Upper bound on any single upstream call.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn policy(&self) -> &PlatformPolicy { &self.policy }

    /// Same as `resolve`, but gives up with `Cancelled` once `cancel`
    /// fires. In-flight upstream calls are dropped with the future.
    pub async fn resolve_until_cancelled(
        &self,
        request: &ReleaseRequest,
        cancel: &CancellationToken
    ) -> Result<ReleaseDraft, ResolveError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("resolve.cancelled");
                Err(ResolveError::Cancelled)
            }
            result = self.resolve(request) => result
        }
    }

    pub async fn resolve(&self, request: &ReleaseRequest) -> Result<ReleaseDraft, ResolveError> {
        let mut stage = Stage::Start;
        let result = self.run(request, &mut stage).await;
        match &result {
            Ok(draft) => info!(slug = %draft.slug, links = draft.links.len(), "resolve.done"),
            Err(e) => warn!(stage = %stage, code = e.code(), error = %e, "resolve.failed")
        }
        result
    }

    async fn run(&self, request: &ReleaseRequest, stage: &mut Stage) ->
        Result<ReleaseDraft, ResolveError> {

        let identifier = self.identify(request)?;
        *stage = Stage::Parsed;
        debug!(identifier = ?identifier, "resolve.parsed");

        let metadata = self.metadata(&identifier).await?;
        *stage = Stage::MetadataResolved;
        debug!(title = %metadata.title, url = %metadata.canonical_url, "resolve.metadata");

        let aggregated = match self.bounded(self.aggregator.get_links(&metadata.canonical_url)).await {
            Ok(links) => links,
            Err(e) => {
                warn!(error = %e, "aggregator.fallback");
                self.policy.fallback(&metadata.canonical_url)
            }
        };
        *stage = Stage::LinksAggregated;

        let enabled = self.policy.enabled_optional(request.platforms.as_ref());
        let links = self.policy.apply(&aggregated, &enabled, &metadata.canonical_url);
        *stage = Stage::Filtered;
        debug!(kept = links.len(), offered = aggregated.len(), "resolve.filtered");

        let slug = self.slugs.assign(&metadata.title);
        *stage = Stage::SlugAssigned;

        let CanonicalMetadata { title, artist, cover_url, canonical_url } = metadata;
        let draft = ReleaseDraft {
            slug,
            title,
            artist,
            cover_url,
            source_url: canonical_url,
            links
        };
        *stage = Stage::Done;
        Ok(draft)
    }

    /// Picks the single supplied input and classifies it.
    fn identify(&self, request: &ReleaseRequest) -> Result<Identifier, ResolveError> {
        let url = request.spotify_url.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let upc = request.upc.as_deref().map(str::trim).filter(|s| !s.is_empty());

        let identifier = match (url, upc) {
            (Some(url), None) => self.parser.parse(url),
            (None, Some(upc)) => match self.parser.parse(upc) {
                id @ Identifier::Upc(_) => id,
                Identifier::Invalid(reason) => Identifier::Invalid(reason),
                _ => return Err(ResolveError::InvalidInput("upc field holds a url".into()))
            },
            (None, None) => return Err(ResolveError::InvalidInput(
                "neither spotifyUrl nor upc provided".into()
            )),
            (Some(_), Some(_)) => return Err(ResolveError::InvalidInput(
                "provide either spotifyUrl or upc, not both".into()
            ))
        };

        match identifier {
            Identifier::Invalid(reason) => Err(ResolveError::InvalidInput(reason.as_str().into())),
            id => Ok(id)
        }
    }

    async fn metadata(&self, identifier: &Identifier) -> Result<CanonicalMetadata, ResolveError> {
        match identifier {
            Identifier::Track(id) => self.bounded(self.provider.get_track(id)).await,
            Identifier::Album(id) => self.bounded(self.provider.get_album(id)).await,
            Identifier::Upc(upc) => {
                let album = self.bounded(self.provider.lookup_by_upc(upc)).await?
                    .ok_or_else(|| ResolveError::NotFound(format!("no album for upc {}", upc.0)))?;
                debug!(upc = %upc.0, album = %album.0, "resolve.upc");
                self.bounded(self.provider.get_album(&album)).await
            }
            Identifier::Invalid(reason) => Err(ResolveError::InvalidInput(reason.as_str().into()))
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ResolveError>>
    ) -> Result<T, ResolveError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::UpstreamTimeout(
                format!("no answer within {:?}", self.call_timeout)
            ))
        }
    }
}

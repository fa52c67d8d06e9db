//!
//! src/service.rs
//!
//! Front door for inbound requests: resolve, persist, answer with either
//! `{ slug }` or `{ error }`.
//!

use std::sync::Arc;

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::errors::ResolveError;
use crate::persistent::{ReleaseStore, StoredRelease};
use crate::resolver::ReleaseResolver;
use crate::types::{ReleaseRequest, ReleaseResponse};

/// What the release page should do for a slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseView {
    Redirect(String),
    Page(StoredRelease),
    Missing
}

pub struct ReleaseService {
    resolver: ReleaseResolver,
    store: Arc<dyn ReleaseStore>
}

impl ReleaseService {
    pub fn new(resolver: ReleaseResolver, store: Arc<dyn ReleaseStore>) -> Self {
        Self { resolver, store }
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> { &self.store }

    /// Resolves and stores; the draft is only written once complete.
    pub async fn generate(
        &self,
        request: &ReleaseRequest,
        cancel: &CancellationToken
    ) -> Result<StoredRelease, ResolveError> {
        let draft = self.resolver.resolve_until_cancelled(request, cancel).await?;
        let stored = self.store.insert_release(&draft).await?;
        info!(slug = %stored.slug, id = %stored.id, "release.stored");
        Ok(stored)
    }

    pub async fn handle(&self, request: &ReleaseRequest) -> (StatusCode, ReleaseResponse) {
        self.handle_until_cancelled(request, &CancellationToken::new()).await
    }

    pub async fn handle_until_cancelled(
        &self,
        request: &ReleaseRequest,
        cancel: &CancellationToken
    ) -> (StatusCode, ReleaseResponse) {
        match self.generate(request, cancel).await {
            Ok(stored) => (StatusCode::CREATED, ReleaseResponse::Created { slug: stored.slug }),
            Err(e) => {
                if e.status().is_server_error() {
                    error!(code = e.code(), error = %e, "release.request.failed");
                }
                (e.status(), ReleaseResponse::Failed { error: e.code().to_string() })
            }
        }
    }

    /// Resolves the stored source url again and refreshes title, artist,
    /// cover and links in place. The slug and any redirect stay as they are.
    /// `None` if there is no release under `slug`.
    pub async fn rescan(
        &self,
        slug: &str,
        cancel: &CancellationToken
    ) -> Result<Option<StoredRelease>, ResolveError> {
        let Some(stored) = self.store.get_release(slug).await? else {
            return Ok(None);
        };

        let request = ReleaseRequest::from_url(stored.source_url.as_str());
        let draft = self.resolver.resolve_until_cancelled(&request, cancel).await?;
        if !self.store.update_release(slug, &draft).await? {
            return Ok(None);
        }
        info!(slug, links = draft.links.len(), "release.rescanned");
        self.store.get_release(slug).await
    }

    pub async fn view(&self, slug: &str) -> Result<ReleaseView, ResolveError> {
        let view = match self.store.get_release(slug).await? {
            None => ReleaseView::Missing,
            Some(release) => match release.redirect_target() {
                Some(target) => ReleaseView::Redirect(target),
                None => ReleaseView::Page(release)
            }
        };
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::identifier::IdentifierParser;
    use crate::policy::PlatformPolicy;
    use crate::slug::SlugGenerator;
    use crate::test_support::{
        sample_draft, sample_metadata, temp_store, StubAggregator, StubProvider
    };
    use crate::types::PlatformLinkMap;

    async fn service(provider: StubProvider) -> (ReleaseService, tempfile::TempDir) {
        let (store, dir) = temp_store().await;
        let resolver = ReleaseResolver::new(
            IdentifierParser::new("provider.example"),
            Arc::new(provider),
            Arc::new(StubAggregator::returning(PlatformLinkMap::single("appleMusic", "a"))),
            PlatformPolicy::default(),
            SlugGenerator::default()
        ).with_call_timeout(Duration::from_secs(5));
        (ReleaseService::new(resolver, Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn success_returns_slug_and_persists() {
        let (svc, _dir) = service(StubProvider::with_track(sample_metadata("Song"))).await;

        let (status, body) = svc
            .handle(&ReleaseRequest::from_url("https://provider.example/track/abc"))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, ReleaseResponse::Created { slug: "song".into() });
        let stored = svc.store().get_release("song").await.unwrap().unwrap();
        assert_eq!(stored.links.keys().collect::<Vec<_>>(), vec!["appleMusic", "spotify"]);
    }

    #[tokio::test]
    async fn invalid_input_maps_to_bad_request() {
        let (svc, _dir) = service(StubProvider::with_track(sample_metadata("Song"))).await;

        let (status, body) = svc.handle(&ReleaseRequest::default()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, ReleaseResponse::Failed { error: "invalid-input".into() });
        assert!(svc.store().list_releases(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_release_with_same_title_conflicts() {
        let (svc, _dir) = service(StubProvider::with_track(sample_metadata("Song"))).await;
        let request = ReleaseRequest::from_url("https://provider.example/track/abc");

        let (first, _) = svc.handle(&request).await;
        let (second, body) = svc.handle(&request).await;
        assert_eq!(first, StatusCode::CREATED);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(body, ReleaseResponse::Failed { error: "slug-taken".into() });
    }

    #[tokio::test]
    async fn upstream_detail_never_reaches_caller() {
        let provider = StubProvider::failing(
            ResolveError::UpstreamAuth("client secret s3cr3t rejected".into())
        );
        let (svc, _dir) = service(provider).await;

        let (status, body) = svc
            .handle(&ReleaseRequest::from_url("https://provider.example/track/abc"))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"error":"upstream-auth-failure"}"#);
    }

    #[tokio::test]
    async fn view_follows_redirects() {
        let (svc, _dir) = service(StubProvider::with_track(sample_metadata("Song"))).await;
        svc.handle(&ReleaseRequest::from_url("https://provider.example/track/abc")).await;

        assert!(matches!(svc.view("song").await.unwrap(), ReleaseView::Page(_)));
        assert_eq!(svc.view("nope").await.unwrap(), ReleaseView::Missing);

        svc.store().set_redirect_url("song", Some("landing.example")).await.unwrap();
        assert_eq!(
            svc.view("song").await.unwrap(),
            ReleaseView::Redirect("https://landing.example".into())
        );
    }

    #[tokio::test]
    async fn rescan_refreshes_content_in_place() {
        let (svc, _dir) = service(StubProvider::with_track(sample_metadata("Song"))).await;
        let mut stale = sample_draft("old-slug");
        stale.title = "Stale".into();
        stale.links = PlatformLinkMap::single("spotify", "https://provider.example/track/abc");
        let before = svc.store().insert_release(&stale).await.unwrap();
        svc.store().set_redirect_url("old-slug", Some("landing.example")).await.unwrap();

        let after = svc.rescan("old-slug", &CancellationToken::new()).await.unwrap().unwrap();

        assert_eq!(after.id, before.id);
        assert_eq!(after.slug, "old-slug");
        assert_eq!(after.title, "Song");
        assert_eq!(after.links.keys().collect::<Vec<_>>(), vec!["appleMusic", "spotify"]);
        assert_eq!(after.redirect_url.as_deref(), Some("landing.example"));
        assert!(svc.store().get_release("song").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rescan_of_unknown_slug_is_none() {
        let (svc, _dir) = service(StubProvider::with_track(sample_metadata("Song"))).await;
        let rescanned = svc.rescan("nope", &CancellationToken::new()).await.unwrap();
        assert!(rescanned.is_none());
    }

    #[tokio::test]
    async fn failed_rescan_leaves_record_untouched() {
        let provider = StubProvider::failing(ResolveError::UpstreamFetch("status 500".into()));
        let (svc, _dir) = service(provider).await;
        let before = svc.store().insert_release(&sample_draft("song")).await.unwrap();

        let err = svc.rescan("song", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "metadata-fetch-failed");
        assert_eq!(svc.store().get_release("song").await.unwrap().unwrap(), before);
    }
}

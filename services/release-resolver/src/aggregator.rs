//!
//! src/aggregator.rs
//!
//! Cross platform link lookup through song.link (Odesli). Best effort:
//! the resolver treats every error from here as "use the fallback map".
//!

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ResolveError;
use crate::fetch::OdesliClient;
use crate::types::{PlatformLink, PlatformLinkMap};

#[async_trait]
pub trait AggregatorApi: Send + Sync {
    async fn get_links(&self, canonical_url: &str) -> Result<PlatformLinkMap, ResolveError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OdesliResponse {
    pub links_by_platform: Option<HashMap<String, OdesliLink>>
}

#[derive(Debug, Deserialize)]
pub struct OdesliLink {
    pub url: Option<String>
}

/// Platforms without a usable url are skipped; a response with no
/// platform table at all is malformed.
pub fn to_link_map(response: OdesliResponse) -> Result<PlatformLinkMap, ResolveError> {
    let table = response.links_by_platform
        .ok_or_else(|| ResolveError::UpstreamFetch("aggregator body without linksByPlatform".into()))?;

    Ok(table.into_iter()
        .filter_map(|(platform, link)| {
            let url = link.url.filter(|u| !u.trim().is_empty())?;
            Some((platform, PlatformLink { url }))
        })
        .collect())
}

#[async_trait]
impl AggregatorApi for OdesliClient {
    async fn get_links(&self, canonical_url: &str) -> Result<PlatformLinkMap, ResolveError> {
        let response = self.links(canonical_url)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::UpstreamFetch(format!("aggregator status {status}")));
        }
        let body = response.bytes().await?;
        let parsed: OdesliResponse = serde_json::from_slice(&body)?;
        let links = to_link_map(parsed)?;
        debug!(platforms = links.len(), "aggregator.links");
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_platform_urls() {
        let response: OdesliResponse = serde_json::from_value(json!({
            "entityUniqueId": "SPOTIFY_SONG::abc",
            "linksByPlatform": {
                "spotify": { "url": "s", "entityUniqueId": "SPOTIFY_SONG::abc" },
                "appleMusic": { "url": "a", "nativeAppUriMobile": "music://x" },
                "yandex": { "url": "" },
                "deezer": {}
            }
        })).unwrap();
        let links = to_link_map(response).unwrap();
        assert_eq!(links.keys().collect::<Vec<_>>(), vec!["appleMusic", "spotify"]);
        assert_eq!(links.get("appleMusic").unwrap().url, "a");
    }

    #[test]
    fn missing_table_is_an_error() {
        let response: OdesliResponse = serde_json::from_value(json!({
            "statusCode": 400, "code": "could_not_resolve_entity"
        })).unwrap();
        assert!(to_link_map(response).is_err());
    }

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    #[tokio::test]
    async fn odesli_client_testbench() -> Result<(), ResolveError> {
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = crate::config::load_config()?;
        let odesli = OdesliClient::new(&cfgs.http, &cfgs.aggregator)?;
        let links = odesli
            .get_links("https://open.spotify.com/track/6GtOsEzNUhJghrIf6UTbRV")
            .await?;
        println!("links: {}", serde_json::to_string_pretty(&links)?);
        assert!(links.contains("spotify"));

        Ok(())
    }
}

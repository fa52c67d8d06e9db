//!
//! src/policy.rs
//!
//! Allow-list of platforms that may appear on a release. Applied once,
//! after aggregation, so the whole policy lives here.
//!

use std::collections::{BTreeSet, HashMap};

use crate::config::PlatformConfig;
use crate::errors::ResolveError;
use crate::types::PlatformLinkMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformPolicy {
    primary: String,
    always_on: BTreeSet<String>,
    optional: BTreeSet<String>
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        let cfg = PlatformConfig::default();
        Self {
            primary: cfg.primary,
            always_on: cfg.always_on.into_iter().collect(),
            optional: cfg.optional.into_iter().collect()
        }
    }
}

impl PlatformPolicy {
    pub fn new<I, J>(primary: &str, always_on: I, optional: J) -> Result<Self, ResolveError>
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>
    {
        let always_on: BTreeSet<String> = always_on.into_iter().collect();
        if !always_on.contains(primary) {
            return Err(ResolveError::Config(
                format!("primary platform {primary} is not always-on")
            ));
        }
        let optional = optional.into_iter()
            .filter(|p| !always_on.contains(p))
            .collect();

        Ok( Self { primary: primary.to_string(), always_on, optional } )
    }

    pub fn from_config(cfg: &PlatformConfig) -> Result<Self, ResolveError> {
        Self::new(&cfg.primary, cfg.always_on.iter().cloned(), cfg.optional.iter().cloned())
    }

    pub fn primary(&self) -> &str { &self.primary }

    pub fn is_always_on(&self, platform: &str) -> bool {
        self.always_on.contains(platform)
    }

    /// Optional platforms enabled for one request. Every known optional
    /// platform starts enabled; the caller's map switches them on or off.
    /// Keys we do not know are ignored.
    pub fn enabled_optional(&self, requested: Option<&HashMap<String, bool>>) -> BTreeSet<String> {
        self.optional.iter()
            .filter(|p| requested.and_then(|r| r.get(*p)).copied().unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Links the aggregator found, reduced to always-on platforms plus the
    /// enabled optional ones. The primary link is added if missing.
    pub fn apply(
        &self,
        aggregated: &PlatformLinkMap,
        enabled: &BTreeSet<String>,
        canonical_url: &str
    ) -> PlatformLinkMap {
        let mut filtered: PlatformLinkMap = aggregated.iter()
            .filter(|(p, _)| self.always_on.contains(*p) || enabled.contains(*p))
            .map(|(p, link)| (p.to_string(), link.clone()))
            .collect();

        if !filtered.contains(&self.primary) {
            filtered.insert(&self.primary, canonical_url);
        }
        filtered
    }

    /// Map used when aggregation fails: only the provider's own link.
    pub fn fallback(&self, canonical_url: &str) -> PlatformLinkMap {
        PlatformLinkMap::single(&self.primary, canonical_url)
    }
}

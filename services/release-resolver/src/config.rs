use std::{fmt, time};

use url::Url;

use crate::errors::ResolveError;
use crate::identifier::DEFAULT_PROVIDER_DOMAIN;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const DEFAULT_ALWAYS_ON: &str = "spotify,appleMusic,youtubeMusic";
pub const DEFAULT_OPTIONAL: &str = "yandex,soundcloud,vk";
pub const DEFAULT_PRIMARY: &str = "spotify";

/// Source of raw settings; the process environment in production, a map
/// in tests.
pub trait Lookup {
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> Lookup for F where F: Fn(&str) -> Option<String> {
    fn get(&self, key: &str) -> Option<String> { self(key) }
}

/// Wrapper over lookup to return a missing variable error
fn env_check(env: &impl Lookup, s: &str) -> Result<String, ResolveError> {
    match env.get(s) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ResolveError::Config(format!("{s} was not set"))),
    }
}

fn env_or(env: &impl Lookup, s: &str, default: &str) -> String {
    env.get(s)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_to_u64(env: &impl Lookup, s: &str, default: u64) -> u64 {
    match env.get(s) {
        Some(v) => v.trim().parse::<u64>().unwrap_or(default),
        None => default
    }
}

/// Ensures that url is https, plain http only for local stubs
fn ensure_https(url: &Url) -> Result<(), String> {
    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        _ => Err(format!("URL must be https: {url}"))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    url
}

fn parse_https(env: &impl Lookup, key: &str, default: &str) -> Result<Url, ResolveError> {
    let raw = env_or(env, key, default);
    let url = Url::parse(&raw)
        .map_err(|e| ResolveError::Config(format!("{key} invalid {e}")))?;
    ensure_https(&url).map_err(ResolveError::Config)?;
    Ok(url)
}

pub fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

///
/// Configuration that Spotify expects when hitting endpoints
///
#[derive(Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
    pub web_base: Url,
    pub domain: String
}

// never print credentials
impl fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url.as_str())
            .field("api_base", &self.api_base.as_str())
            .field("web_base", &self.web_base.as_str())
            .field("domain", &self.domain)
            .finish()
    }
}

fn build_spotify(env: &impl Lookup) -> Result<SpotifyConfig, ResolveError> {
    let client_id     = env_check(env, "SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check(env, "SPOTIFY_CLIENT_SECRET")?;

    let token_url = parse_https(
        env, "SPOTIFY_TOKEN_URL", "https://accounts.spotify.com/api/token")?;
    let api_base  = with_trailing_slash(
        parse_https(env, "SPOTIFY_API_BASE", "https://api.spotify.com/v1/")?);
    let web_base  = with_trailing_slash(
        parse_https(env, "SPOTIFY_WEB_BASE", "https://open.spotify.com/")?);

    let domain = env_or(env, "PROVIDER_DOMAIN", DEFAULT_PROVIDER_DOMAIN)
        .trim()
        .to_ascii_lowercase();

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base, web_base, domain } )
}

///
/// Configuration for the song.link (Odesli) aggregator
///
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub base_url: Url,
    pub user_country: Option<String>
}

fn build_aggregator(env: &impl Lookup) -> Result<AggregatorConfig, ResolveError> {
    let base_url = with_trailing_slash(
        parse_https(env, "ODESLI_BASE_URL", "https://api.song.link/v1-alpha.1/")?);
    let user_country = env.get("ODESLI_USER_COUNTRY")
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty());

    Ok( AggregatorConfig { base_url, user_country } )
}

///
/// Configuration for Http timeouts, pooling, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS
        }
    }
}

fn build_http(env: &impl Lookup) -> HttpConfig {
    HttpConfig {
        timeout: time::Duration::from_millis(
            env_to_u64(env, "HTTP_TIMEOUT_MS", HTTP_TIMEOUT).max(1)),
        connect_timeout: time::Duration::from_millis(
            env_to_u64(env, "HTTP_CONNECT_TIMEOUT_MS", HTTP_CONNECT_TIMEOUT).max(1)),
        ..HttpConfig::default()
    }
}

///
/// Which platforms end up on a release page
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub primary: String,
    pub always_on: Vec<String>,
    pub optional: Vec<String>
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY.to_string(),
            always_on: parse_csv(DEFAULT_ALWAYS_ON),
            optional: parse_csv(DEFAULT_OPTIONAL)
        }
    }
}

fn build_platforms(env: &impl Lookup) -> Result<PlatformConfig, ResolveError> {
    let primary   = env_or(env, "PRIMARY_PLATFORM", DEFAULT_PRIMARY).trim().to_string();
    let always_on = parse_csv(&env_or(env, "ALWAYS_ON_PLATFORMS", DEFAULT_ALWAYS_ON));
    let optional  = parse_csv(&env_or(env, "OPTIONAL_PLATFORMS", DEFAULT_OPTIONAL));

    if !always_on.contains(&primary) {
        return Err(ResolveError::Config(
            format!("PRIMARY_PLATFORM {primary} must be listed in ALWAYS_ON_PLATFORMS")
        ));
    }

    Ok( PlatformConfig { primary, always_on, optional } )
}

///
/// Configuration for slug assignment and persistence
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub db_url: String,
    pub fallback_slug_prefix: String
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite:./data/releases.db".to_string(),
            fallback_slug_prefix: "release".to_string()
        }
    }
}

fn build_persistence(env: &impl Lookup) -> PersistenceConfig {
    let defaults = PersistenceConfig::default();
    PersistenceConfig {
        db_url: env_or(env, "RELEASES_DB_URL", &defaults.db_url),
        fallback_slug_prefix: env_or(
            env, "FALLBACK_SLUG_PREFIX", &defaults.fallback_slug_prefix)
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,release_resolver=debug,reqwest=warn,sqlx=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true
        }
    }
}

fn build_logging(env: &impl Lookup) -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let format = match env.get("LOG_FORMAT").as_deref().map(str::trim) {
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json
    };
    LoggingConfig {
        filter_directives: env_or(env, "LOG_FILTER", &defaults.filter_directives),
        format,
        ..defaults
    }
}

///
/// AppConfig which holds everything the clients, resolver and store need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub aggregator: AggregatorConfig,
    pub http: HttpConfig,
    pub platforms: PlatformConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig
}

pub fn build_config(env: &impl Lookup) -> Result<AppConfig, ResolveError> {
    let spotify     = build_spotify(env)?;
    let aggregator  = build_aggregator(env)?;
    let http        = build_http(env);
    let platforms   = build_platforms(env)?;
    let persistence = build_persistence(env);
    let logging     = build_logging(env);

    Ok( AppConfig { spotify, aggregator, http, platforms, persistence, logging } )
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, ResolveError> {
    dotenvy::dotenv().ok();
    build_config(&|k: &str| std::env::var(k).ok())
}

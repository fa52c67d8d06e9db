//!
//! src/main.rs
//!
//! Command line front end: generate releases from a url or UPC and manage
//! the stored ones.
//!
//!

use std::{collections::HashMap, io::Read, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use release_resolver::{
    aggregator::AggregatorApi,
    config::{self, AppConfig},
    errors::ResolveError,
    fetch::{OdesliClient, SpotifyClient},
    identifier::IdentifierParser,
    logging,
    persistent::SqliteReleaseStore,
    policy::PlatformPolicy,
    provider::{ProviderApi, SpotifyProvider},
    service::{ReleaseService, ReleaseView},
    slug::SlugGenerator,
    token::{SpotifyTokenExchange, TokenCache},
    types::{ReleaseRequest, ReleaseResponse},
    ReleaseResolver,
};

#[derive(Debug, Parser)]
#[command(name = "release-resolver", version, about = "Multi-platform release links")]
struct Cli {
    #[command(subcommand)]
    command: Command
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a provider url or UPC and store the release
    Generate {
        #[arg(long, conflicts_with = "upc")]
        spotify_url: Option<String>,
        #[arg(long)]
        upc: Option<String>,
        /// Optional platform switch, e.g. `yandex=false`
        #[arg(long = "platform", value_parser = parse_platform)]
        platforms: Vec<(String, bool)>
    },
    /// Read one JSON request from stdin, print the JSON response
    Request,
    /// Print a stored release
    Show { slug: String },
    /// Set (or clear, when no url is given) the redirect of a release
    Redirect { slug: String, url: Option<String> },
    /// Resolve a stored release again and refresh its links in place
    Rescan { slug: String },
    /// Delete a stored release
    Delete { slug: String },
    /// List stored releases, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32
    }
}

fn parse_platform(s: &str) -> Result<(String, bool), String> {
    let (key, value) = s.split_once('=')
        .ok_or_else(|| format!("expected key=bool, got {s}"))?;
    let enabled = value.trim().parse::<bool>()
        .map_err(|e| format!("{key}: {e}"))?;
    Ok((key.trim().to_string(), enabled))
}

async fn build_service(cfgs: &AppConfig) -> Result<ReleaseService, ResolveError> {
    let spotify = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let tokens = Arc::new(TokenCache::new(Arc::new(SpotifyTokenExchange::new(spotify.clone()))));
    let provider: Arc<dyn ProviderApi> = Arc::new(SpotifyProvider::new(spotify, tokens));
    let aggregator: Arc<dyn AggregatorApi> =
        Arc::new(OdesliClient::new(&cfgs.http, &cfgs.aggregator)?);

    let resolver = ReleaseResolver::new(
        IdentifierParser::new(cfgs.spotify.domain.clone()),
        provider,
        aggregator,
        PlatformPolicy::from_config(&cfgs.platforms)?,
        SlugGenerator::new(&cfgs.persistence.fallback_slug_prefix)
    ).with_call_timeout(cfgs.http.timeout);

    let store = SqliteReleaseStore::init(&cfgs.persistence.db_url).await?;
    Ok(ReleaseService::new(resolver, Arc::new(store)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ResolveError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| ResolveError::Internal(e.to_string()))?;
    println!("{out}");
    Ok(())
}

/// Token that fires on ctrl-c, plus the watcher to abort once done.
fn interruptible() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("release.request.interrupted");
            trigger.cancel();
        }
    });
    (cancel, watcher)
}

/// Runs one inbound request; ctrl-c abandons it.
async fn respond(service: &ReleaseService, request: ReleaseRequest) -> Result<bool, ResolveError> {
    let (cancel, watcher) = interruptible();
    let (status, body) = service.handle_until_cancelled(&request, &cancel).await;
    watcher.abort();

    print_json(&body)?;
    if !status.is_success() {
        eprintln!("status {status}");
    }
    Ok(matches!(body, ReleaseResponse::Created { .. }))
}

async fn run(cli: Cli) -> Result<bool, ResolveError> {
    let cfgs = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service = "release-resolver",
        version = %env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let service = build_service(&cfgs).await?;

    match cli.command {
        Command::Generate { spotify_url, upc, platforms } => {
            let platforms: HashMap<String, bool> = platforms.into_iter().collect();
            let request = ReleaseRequest {
                spotify_url,
                upc,
                platforms: (!platforms.is_empty()).then_some(platforms)
            };
            respond(&service, request).await
        }
        Command::Request => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            match serde_json::from_str::<ReleaseRequest>(&raw) {
                Ok(request) => respond(&service, request).await,
                Err(_) => {
                    let e = ResolveError::InvalidInput("request body is not json".into());
                    print_json(&ReleaseResponse::Failed { error: e.code().to_string() })?;
                    Ok(false)
                }
            }
        }
        Command::Show { slug } => match service.view(&slug).await? {
            ReleaseView::Missing => {
                eprintln!("no release {slug}");
                Ok(false)
            }
            ReleaseView::Redirect(target) => {
                println!("redirect: {target}");
                Ok(true)
            }
            ReleaseView::Page(release) => {
                print_json(&release)?;
                Ok(true)
            }
        },
        Command::Redirect { slug, url } => {
            let updated = service.store().set_redirect_url(&slug, url.as_deref()).await?;
            if !updated {
                eprintln!("no release {slug}");
            }
            Ok(updated)
        }
        Command::Rescan { slug } => {
            let (cancel, watcher) = interruptible();
            let rescanned = service.rescan(&slug, &cancel).await;
            watcher.abort();
            match rescanned? {
                Some(release) => {
                    print_json(&release)?;
                    Ok(true)
                }
                None => {
                    eprintln!("no release {slug}");
                    Ok(false)
                }
            }
        }
        Command::Delete { slug } => {
            let deleted = service.store().delete_release(&slug).await?;
            if !deleted {
                eprintln!("no release {slug}");
            }
            Ok(deleted)
        }
        Command::List { limit } => {
            for release in service.store().list_releases(limit).await? {
                println!("{}\t{} - {}\t{}", release.slug, release.display_artist(),
                    release.title, release.links.len());
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

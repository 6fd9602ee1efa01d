use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use versebridge_core::{StripperStore, UnsupportedLedger};
use versebridge_service::deploy::{GitPuller, SourcePuller};
use versebridge_service::discord::DeployNotifier;
use versebridge_service::genius::GeniusClient;
use versebridge_service::github::IssueClient;
use versebridge_service::service::ServiceOptions;
use versebridge_service::spotify::SpotifyClient;
use versebridge_service::token::{GitHubAppAuth, SpotifyAppAuth};
use versebridge_service::{
    Config, LyricService, TokenCache, WebhookDispatcher, WebhookValidator,
};

mod routes;

#[derive(Debug, Parser)]
#[command(name = "versebridge", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Path to the stripper database (default: from config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path to the unsupported-pairs ledger (default: from config)
    #[arg(long)]
    ledger: Option<PathBuf>,
}

/// Stands in when no deploy checkout is configured.
#[derive(Debug)]
struct DisabledPuller;

#[async_trait::async_trait]
impl SourcePuller for DisabledPuller {
    async fn pull(&self) -> Result<String> {
        anyhow::bail!("deploy checkout not configured")
    }
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    value.with_context(|| format!("missing required config: {name}"))
}

fn build_state(config: &Config) -> Result<routes::AppState> {
    let private_key_path = config
        .github_private_key_path
        .as_ref()
        .context("missing required config: github_private_key_path")?;
    let private_key_pem = std::fs::read_to_string(private_key_path)
        .with_context(|| format!("reading {}", private_key_path.display()))?;

    let tokens = Arc::new(TokenCache::new(
        SpotifyAppAuth {
            client_id: require(config.spotify_client_id.clone(), "spotify_client_id")?,
            client_secret: require(config.spotify_client_secret.clone(), "spotify_client_secret")?,
        },
        GitHubAppAuth {
            app_id: require(config.github_app_id.clone(), "github_app_id")?,
            private_key_pem,
            installation_id: require(
                config.github_installation_id.clone(),
                "github_installation_id",
            )?,
        },
    )?);

    let owner = require(config.github_owner.clone(), "github_owner")?;
    let repo = require(config.github_repo.clone(), "github_repo")?;

    let spotify = SpotifyClient::new(Arc::clone(&tokens))?
        .with_instrumental_cutoffs(config.instrumentalness_cutoff, config.speechiness_cutoff);
    let genius = GeniusClient::new(require(config.genius_token.clone(), "genius_token")?)?;
    let issues = IssueClient::new(Arc::clone(&tokens), owner, repo.clone())?;
    let meta = issues.clone();

    for path in [&config.ledger_path, &config.database_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let ledger = Arc::new(UnsupportedLedger::new(config.ledger_path.clone()));
    let store = Arc::new(StripperStore::open(&config.database_path)?);

    let service = LyricService::new(
        spotify,
        genius,
        issues,
        Arc::clone(&ledger),
        store,
        ServiceOptions {
            maintainer_secret: require(config.maintainer_secret.clone(), "maintainer_secret")?,
            min_client_version: config.min_client_version.clone(),
            latest_client_version: config.latest_client_version.clone(),
            tracker_issues_url: config.tracker_issues_url(),
        },
    );

    let validator = WebhookValidator::new(require(config.webhook_secret.clone(), "webhook_secret")?);

    let puller: Arc<dyn SourcePuller> = match &config.deploy_checkout_dir {
        Some(dir) => Arc::new(GitPuller::new(dir)),
        None => Arc::new(DisabledPuller),
    };
    let notifier = match &config.discord_webhook_url {
        Some(url) => Some(DeployNotifier::new(url.clone())?),
        None => None,
    };
    let dispatcher = WebhookDispatcher::new(ledger, repo, &config.default_branch, puller, notifier);

    Ok(routes::AppState {
        service,
        validator,
        dispatcher,
        meta,
        require_ip_check: config.webhook_require_ip_check,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if versebridge_service::config::ensure_config_file()? {
        log::info!(
            "wrote example config to {}",
            versebridge_service::config::config_file_path().display()
        );
    }
    let mut config = Config::load()?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(ledger) = cli.ledger {
        config.ledger_path = ledger;
    }

    let state = Arc::new(build_state(&config)?);
    let app = routes::router(state);

    log::info!("listening on {}", cli.bind);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    axum::serve(listener, app)
        .await
        .context("server terminated")?;

    Ok(())
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};

/// Configuration for versebridge.
///
/// Loaded from multiple sources with the following priority:
/// 1. Environment variables (VERSE_* prefix)
/// 2. Config file (~/.config/versebridge/config.toml)
/// 3. Built-in defaults
///
/// Secrets are optional at load time; the server errors out at startup
/// for whichever ones the enabled features actually need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Spotify client-credentials id (ENV: VERSE_SPOTIFY_CLIENT_ID).
    pub spotify_client_id: Option<String>,
    /// Spotify client-credentials secret (ENV: VERSE_SPOTIFY_CLIENT_SECRET).
    pub spotify_client_secret: Option<String>,

    /// Static Genius API access token (ENV: VERSE_GENIUS_TOKEN).
    pub genius_token: Option<String>,

    /// GitHub App id (ENV: VERSE_GITHUB_APP_ID).
    pub github_app_id: Option<String>,
    /// GitHub App installation id (ENV: VERSE_GITHUB_INSTALLATION_ID).
    pub github_installation_id: Option<String>,
    /// Path to the GitHub App RSA private key, PEM format
    /// (ENV: VERSE_GITHUB_PRIVATE_KEY_PATH).
    pub github_private_key_path: Option<PathBuf>,
    /// Owner of the tracking repository (ENV: VERSE_GITHUB_OWNER).
    pub github_owner: Option<String>,
    /// Name of the tracking repository (ENV: VERSE_GITHUB_REPO).
    pub github_repo: Option<String>,

    /// Shared secret for inbound webhook signatures
    /// (ENV: VERSE_WEBHOOK_SECRET).
    pub webhook_secret: Option<String>,
    /// Also require webhook sources to fall inside GitHub's published
    /// hook ranges.
    #[serde(default)]
    pub webhook_require_ip_check: bool,

    /// Shared secret for the maintenance endpoints
    /// (ENV: VERSE_MAINTAINER_SECRET).
    pub maintainer_secret: Option<String>,

    /// Discord webhook URL for deploy notifications; notifications are
    /// skipped when unset.
    pub discord_webhook_url: Option<String>,
    /// Checkout the push webhook pulls; deploy handling is disabled when
    /// unset.
    pub deploy_checkout_dir: Option<PathBuf>,
    /// Branch whose pushes trigger a deploy.
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Path of the unsupported-pairs ledger file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Path to the SQLite stripper database.
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// Oldest client version still served.
    #[serde(default = "default_client_version")]
    pub min_client_version: String,
    /// Client version advertised by `/version` and update prompts.
    #[serde(default = "default_client_version")]
    pub latest_client_version: String,

    /// Instrumental-screening cutoffs (empirically tuned defaults).
    #[serde(default = "default_instrumentalness_cutoff")]
    pub instrumentalness_cutoff: f64,
    #[serde(default = "default_speechiness_cutoff")]
    pub speechiness_cutoff: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spotify_client_id: None,
            spotify_client_secret: None,
            genius_token: None,
            github_app_id: None,
            github_installation_id: None,
            github_private_key_path: None,
            github_owner: None,
            github_repo: None,
            webhook_secret: None,
            webhook_require_ip_check: false,
            maintainer_secret: None,
            discord_webhook_url: None,
            deploy_checkout_dir: None,
            default_branch: default_branch(),
            ledger_path: default_ledger_path(),
            database_path: default_db_path(),
            min_client_version: default_client_version(),
            latest_client_version: default_client_version(),
            instrumentalness_cutoff: default_instrumentalness_cutoff(),
            speechiness_cutoff: default_speechiness_cutoff(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("verse");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        Ok(config)
    }

    /// The tracking repository's issues URL, for user-facing messages.
    pub fn tracker_issues_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/issues",
            self.github_owner.as_deref().unwrap_or("-"),
            self.github_repo.as_deref().unwrap_or("-"),
        )
    }
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_client_version() -> String {
    "1.2.0".to_string()
}

fn default_instrumentalness_cutoff() -> f64 {
    crate::spotify::DEFAULT_INSTRUMENTALNESS_CUTOFF
}

fn default_speechiness_cutoff() -> f64 {
    crate::spotify::DEFAULT_SPEECHINESS_CUTOFF
}

fn default_ledger_path() -> PathBuf {
    data_dir().join("unsupported.txt")
}

fn default_db_path() -> PathBuf {
    data_dir().join("versebridge.db")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("versebridge")
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/versebridge/config.toml
/// - macOS: ~/Library/Application Support/versebridge/config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("versebridge")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Versebridge Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. Environment variables (VERSE_* prefix)
# 2. This config file
# 3. Built-in defaults (lowest priority)

# Spotify client-credentials grant secrets, used to verify reported
# song/artist pairs against the catalog
#spotify_client_id = "your-client-id"
#spotify_client_secret = "your-client-secret"

# Genius API client access token, used to resolve lyrics-page slugs
#genius_token = "your-genius-token"

# GitHub App identity for filing tracking issues
#github_app_id = "12345"
#github_installation_id = "67890"
#github_private_key_path = "/path/to/app-private-key.pem"
#github_owner = "your-org"
#github_repo = "your-lyrics-client"

# Shared secret the inbound webhook signatures are checked against
#webhook_secret = "hunter2"

# Also require webhook sources to fall inside GitHub's published hook ranges
#webhook_require_ip_check = true

# Shared secret for the maintenance endpoints
#maintainer_secret = "hunter2"

# Discord webhook to announce deploys on (skipped when unset)
#discord_webhook_url = "https://discord.com/api/webhooks/..."

# Checkout the push webhook pulls (deploy handling disabled when unset)
#deploy_checkout_dir = "/srv/versebridge"

# Branch whose pushes trigger a deploy
#default_branch = "master"

# Local state paths
#
# Default: Platform-specific data directory
#ledger_path = "/var/lib/versebridge/unsupported.txt"
#database_path = "/var/lib/versebridge/versebridge.db"
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}

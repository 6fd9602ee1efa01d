//! GitHub issue creation and webhook metadata.
//!
//! Opens a tracking issue on the configured repository for each
//! verified-unsupported pair, authenticated with the installation token
//! from the [`TokenCache`]. Also exposes GitHub's published webhook
//! source ranges for the optional inbound IP check.

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use reqwest::Client;
use serde::Deserialize;

use versebridge_core::SongQuery;

use crate::error::ApiResult;
use crate::token::{TokenCache, USER_AGENT};

const GITHUB_API_BASE: &str = "https://api.github.com";

/// Label attached to every tracking issue; the issue-closed webhook
/// filters on it.
pub const UNSUPPORTED_LABEL: &str = "unsupported song";

/// Result of an issue-creation attempt. Callers branch on `status ==
/// 201`; a non-201 is a reportable outcome, not an error.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub status: u16,
    pub url: Option<String>,
}

impl IssueOutcome {
    pub fn created(&self) -> bool {
        self.status == 201
    }
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    #[serde(default)]
    hooks: Vec<String>,
}

/// GitHub REST client for the tracking repository.
#[derive(Debug, Clone)]
pub struct IssueClient {
    http: Client,
    tokens: Arc<TokenCache>,
    api_base: String,
    owner: String,
    repo: String,
}

impl IssueClient {
    pub fn new(tokens: Arc<TokenCache>, owner: impl Into<String>, repo: impl Into<String>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            tokens,
            api_base: GITHUB_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// The repository name tracking issues are filed against.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// File a tracking issue for a verified-unsupported pair.
    ///
    /// The body embeds the client's stripper guess and version so a
    /// contributor can reproduce the lookup.
    pub async fn open_unsupported_issue(
        &self,
        query: &SongQuery,
        version: &str,
        stripper_guess: &str,
    ) -> ApiResult<IssueOutcome> {
        let token = self.tokens.github_token().await?;
        let url = format!("{}/repos/{}/{}/issues", self.api_base, self.owner, self.repo);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("token {token}"))
            .header("Accept", "application/vnd.github.machine-man-preview+json")
            .json(&issue_payload(query, version, stripper_guess))
            .send()
            .await?;

        let status = response.status().as_u16();
        let created: Option<CreatedIssue> = response.json().await.ok();
        Ok(IssueOutcome {
            status,
            url: created.and_then(|c| c.html_url),
        })
    }

    /// GitHub's published webhook source ranges (`GET /meta`).
    ///
    /// Unparsable entries are skipped; the endpoint also lists ranges in
    /// forms the hook check does not care about.
    pub async fn hook_ip_ranges(&self) -> ApiResult<Vec<IpNet>> {
        let url = format!("{}/meta", self.api_base);
        let meta: MetaResponse = self.http.get(&url).send().await?.json().await?;

        Ok(meta
            .hooks
            .iter()
            .filter_map(|block| match block.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(e) => {
                    log::warn!("skipping unparsable hook range {block:?}: {e}");
                    None
                }
            })
            .collect())
    }
}

fn issue_payload(query: &SongQuery, version: &str, stripper_guess: &str) -> serde_json::Value {
    serde_json::json!({
        "title": query.issue_title(),
        "body": format!(
            "Check whether this is a client bug or the lyrics are genuinely \
             unavailable on Genius. \n<hr>\n <tt><b>stripper -> {stripper_guess}</b>\
             \n\nversion -> {version}</tt>"
        ),
        "labels": [UNSUPPORTED_LABEL],
    })
}

//! Discord deploy notifications.
//!
//! After a successful deploy pull the push payload's head commit is
//! posted as an embed to the configured Discord webhook. Notification is
//! fire-and-forget: failures are logged, never propagated.

use std::time::Duration;

use reqwest::Client;

use crate::error::ApiResult;
use crate::token::USER_AGENT;
use crate::webhook::HeadCommit;

/// Outbound Discord webhook client.
#[derive(Debug)]
pub struct DeployNotifier {
    http: Client,
    webhook_url: String,
}

impl DeployNotifier {
    /// `webhook_url` is the full Discord webhook URL (id/token included).
    pub fn new(webhook_url: impl Into<String>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }

    /// Announce a successful deploy of `commit` to the chat channel.
    pub async fn notify_deploy(&self, head_commit: &HeadCommit) {
        let url = format!("{}?wait=true", self.webhook_url);
        let result = self
            .http
            .post(&url)
            .json(&build_embed(head_commit))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                log::info!("sent discord deploy message");
            }
            Ok(response) => {
                log::error!("discord message send failed: {}", response.status());
            }
            Err(e) => {
                log::error!("discord message send failed: {e}");
            }
        }
    }
}

/// Embed summarising the deployed commit.
///
/// The first line of the commit message becomes the title (commits may
/// be squashed), with author attribution and timestamp carried over.
fn build_embed(head_commit: &HeadCommit) -> serde_json::Value {
    let title = head_commit.message.lines().next().unwrap_or_default();
    serde_json::json!({
        "embeds": [{
            "title": title,
            "description": format!("Updated the backend server to commit `{}`.", head_commit.id),
            "url": head_commit.url,
            "timestamp": head_commit.timestamp,
            "color": 1_501_879,
            "author": {
                "name": head_commit.author.name,
                "url": format!("https://github.com/{}", head_commit.author.username),
                "icon_url": format!("https://github.com/{}.png", head_commit.author.username),
            }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::CommitAuthor;

    #[test]
    fn test_embed_uses_first_message_line() {
        let head = HeadCommit {
            id: "abc123".to_string(),
            message: "Fix resolver tolerance\n\nSquashed details here".to_string(),
            url: "https://github.com/x/y/commit/abc123".to_string(),
            timestamp: "2024-06-01T12:00:00Z".to_string(),
            author: CommitAuthor {
                name: "Jess".to_string(),
                username: "jess".to_string(),
            },
        };
        let embed = build_embed(&head);
        assert_eq!(embed["embeds"][0]["title"], "Fix resolver tolerance");
        assert!(embed["embeds"][0]["description"]
            .as_str()
            .unwrap()
            .contains("abc123"));
        assert_eq!(
            embed["embeds"][0]["author"]["url"],
            "https://github.com/jess"
        );
    }
}

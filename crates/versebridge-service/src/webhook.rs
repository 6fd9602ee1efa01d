//! Inbound webhook validation and event dispatch.
//!
//! Every webhook request walks the same path: required headers checked,
//! HMAC signature over the raw body verified in constant time,
//! optionally the source IP matched against GitHub's published hook
//! ranges, and only then is the event looked at. Any validation failure
//! maps to a fixed 418 at the HTTP layer; the deliberately odd status
//! makes misconfigured senders stand out in logs.
//!
//! Two events act: a closed issue carrying the unsupported-song label
//! shrinks the ledger, and a push to the default branch pulls the
//! running checkout and announces the deploy.

use std::net::IpAddr;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use ipnet::IpNet;
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;

use versebridge_core::{SongQuery, UnsupportedLedger};

use crate::deploy::SourcePuller;
use crate::discord::DeployNotifier;
use crate::error::{ApiError, ApiResult};
use crate::github::UNSUPPORTED_LABEL;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

const HOOKSHOT_PREFIX: &str = "GitHub-Hookshot/";

/// Validation failures. All of them surface as the fixed teapot status.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("content type is not JSON")]
    NotJson,

    #[error("unrecognized user agent")]
    BadUserAgent,

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("source ip {0} outside published hook ranges")]
    UntrustedSource(IpAddr),

    #[error("empty or non-JSON payload")]
    MalformedPayload,
}

/// The inbound headers the validator cares about, framework-agnostic.
#[derive(Debug, Clone, Default)]
pub struct InboundHeaders {
    pub event: Option<String>,
    pub delivery: Option<String>,
    pub signature: Option<String>,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
}

/// A request that passed validation: its event name and parsed payload.
#[derive(Debug)]
pub struct ValidatedEvent {
    pub event: String,
    pub payload: Value,
}

/// Header + signature validation with a shared secret.
#[derive(Debug)]
pub struct WebhookValidator {
    secret: String,
}

impl WebhookValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Validate headers and signature; returns the parsed payload.
    ///
    /// Fails fast on the first problem, before any event-specific logic
    /// can run.
    pub fn validate(&self, headers: &InboundHeaders, body: &[u8]) -> Result<ValidatedEvent, WebhookError> {
        let event = headers
            .event
            .as_deref()
            .ok_or(WebhookError::MissingHeader("X-GitHub-Event"))?;
        headers
            .delivery
            .as_deref()
            .ok_or(WebhookError::MissingHeader("X-GitHub-Delivery"))?;
        let signature = headers
            .signature
            .as_deref()
            .ok_or(WebhookError::MissingHeader("X-Hub-Signature"))?;

        let content_type = headers.content_type.as_deref().unwrap_or_default();
        if !content_type.starts_with("application/json") {
            return Err(WebhookError::NotJson);
        }

        let user_agent = headers
            .user_agent
            .as_deref()
            .ok_or(WebhookError::MissingHeader("User-Agent"))?;
        if !user_agent.starts_with(HOOKSHOT_PREFIX) {
            return Err(WebhookError::BadUserAgent);
        }

        verify_signature(signature, body, &self.secret)?;

        let payload: Value =
            serde_json::from_slice(body).map_err(|_| WebhookError::MalformedPayload)?;
        if payload.is_null() {
            return Err(WebhookError::MalformedPayload);
        }

        Ok(ValidatedEvent {
            event: event.to_string(),
            payload,
        })
    }
}

/// Check a `<algorithm>=<hex digest>` signature over `body`.
///
/// The digest comparison runs in constant time (`Mac::verify_slice`).
pub fn verify_signature(signature: &str, body: &[u8], secret: &str) -> Result<(), WebhookError> {
    let (algorithm, digest_hex) = signature
        .split_once('=')
        .ok_or(WebhookError::MalformedSignature)?;
    let digest = hex::decode(digest_hex).map_err(|_| WebhookError::MalformedSignature)?;

    let verified = match algorithm {
        "sha1" => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .map_err(|_| WebhookError::MalformedSignature)?;
            mac.update(body);
            mac.verify_slice(&digest).is_ok()
        }
        "sha256" => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| WebhookError::MalformedSignature)?;
            mac.update(body);
            mac.verify_slice(&digest).is_ok()
        }
        other => return Err(WebhookError::UnsupportedAlgorithm(other.to_string())),
    };

    if verified {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// Defense in depth: reject sources outside the published hook ranges.
/// Skipped entirely when no ranges are configured.
pub fn check_source_ip(ip: Option<IpAddr>, ranges: Option<&[IpNet]>) -> Result<(), WebhookError> {
    let (Some(ip), Some(ranges)) = (ip, ranges) else {
        return Ok(());
    };
    if ranges.iter().any(|net| net.contains(&ip)) {
        Ok(())
    } else {
        log::warn!("unauthorized webhook attempt from {ip}");
        Err(WebhookError::UntrustedSource(ip))
    }
}

// ---------------------------------------------------------------------------
// Event payloads (the slices of GitHub's payloads the dispatcher reads)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IssuesPayload {
    pub action: String,
    pub issue: Issue,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub title: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub after: String,
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
pub struct HeadCommit {
    pub id: String,
    pub message: String,
    pub url: String,
    pub timestamp: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub username: String,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What an accepted event amounted to.
#[derive(Debug)]
pub enum EventOutcome {
    /// `ping` acknowledged.
    Pong,
    /// Issue-closed removal: how many ledger lines went away.
    Removed(usize),
    /// Deploy pull finished at this commit.
    Deployed { commit: String },
    /// Recognized request, nothing to do; the message says why.
    Ignored(String),
}

/// Routes validated events to ledger removal or deploy handling.
#[derive(Debug)]
pub struct WebhookDispatcher {
    ledger: Arc<UnsupportedLedger>,
    repo_name: String,
    default_branch_ref: String,
    puller: Arc<dyn SourcePuller>,
    notifier: Option<DeployNotifier>,
}

impl WebhookDispatcher {
    pub fn new(
        ledger: Arc<UnsupportedLedger>,
        repo_name: impl Into<String>,
        default_branch: &str,
        puller: Arc<dyn SourcePuller>,
        notifier: Option<DeployNotifier>,
    ) -> Self {
        Self {
            ledger,
            repo_name: repo_name.into(),
            default_branch_ref: format!("refs/heads/{default_branch}"),
            puller,
            notifier,
        }
    }

    /// Handle an event on the issue-tracking webhook.
    pub async fn handle_issue_event(&self, event: &ValidatedEvent) -> ApiResult<EventOutcome> {
        match event.event.as_str() {
            "ping" => Ok(EventOutcome::Pong),
            "issues" => self.handle_issues(&event.payload),
            other => {
                log::info!("ignoring webhook event type {other:?}");
                Ok(EventOutcome::Ignored("Wrong event type".to_string()))
            }
        }
    }

    fn handle_issues(&self, payload: &Value) -> ApiResult<EventOutcome> {
        let not_relevant = || {
            EventOutcome::Ignored("Event type not unsupported song issue closed.".to_string())
        };

        let Ok(payload) = serde_json::from_value::<IssuesPayload>(payload.clone()) else {
            log::warn!("malformed issues payload");
            return Ok(not_relevant());
        };
        let Some(label) = payload.issue.labels.first() else {
            return Ok(not_relevant());
        };

        if payload.action != "closed"
            || label.name != UNSUPPORTED_LABEL
            || payload.repository.name != self.repo_name
        {
            return Ok(not_relevant());
        }

        let Some(query) = SongQuery::from_issue_title(&payload.issue.title) else {
            log::warn!("issue title did not parse: {:?}", payload.issue.title);
            return Ok(not_relevant());
        };

        log::info!("{query} is to be deleted");
        let removed = self.ledger.remove_all(&query)?;
        Ok(EventOutcome::Removed(removed))
    }

    /// Handle an event on the deploy webhook.
    pub async fn handle_push_event(&self, event: &ValidatedEvent) -> ApiResult<EventOutcome> {
        match event.event.as_str() {
            "ping" => Ok(EventOutcome::Pong),
            "push" => self.handle_push(&event.payload).await,
            other => {
                log::info!("ignoring webhook event type {other:?}");
                Ok(EventOutcome::Ignored("Wrong event type".to_string()))
            }
        }
    }

    async fn handle_push(&self, payload: &Value) -> ApiResult<EventOutcome> {
        let Ok(payload) = serde_json::from_value::<PushPayload>(payload.clone()) else {
            log::warn!("malformed push payload");
            return Ok(EventOutcome::Ignored("Malformed push payload".to_string()));
        };

        if payload.git_ref != self.default_branch_ref {
            return Ok(EventOutcome::Ignored(
                "Not the default branch; ignoring".to_string(),
            ));
        }

        let commit = self
            .puller
            .pull()
            .await
            .map_err(|e| ApiError::Deploy(e.to_string()))?;

        if commit == payload.after {
            // The checkout agrees with what GitHub says was pushed.
            if let (Some(notifier), Some(head_commit)) = (&self.notifier, &payload.head_commit) {
                notifier.notify_deploy(head_commit).await;
            }
        } else {
            log::error!(
                "pulled commit {commit} does not match payload after {:?}",
                payload.after
            );
        }

        Ok(EventOutcome::Deployed { commit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn sign_sha1(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn sign_sha256(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_for(body: &[u8], secret: &str, event: &str) -> InboundHeaders {
        InboundHeaders {
            event: Some(event.to_string()),
            delivery: Some("d-1".to_string()),
            signature: Some(sign_sha1(secret, body)),
            content_type: Some("application/json".to_string()),
            user_agent: Some("GitHub-Hookshot/0440cc1".to_string()),
            client_ip: None,
        }
    }

    #[derive(Debug)]
    struct StubPuller(String);

    #[async_trait]
    impl SourcePuller for StubPuller {
        async fn pull(&self) -> AnyResult<String> {
            Ok(self.0.clone())
        }
    }

    fn dispatcher(ledger: Arc<UnsupportedLedger>, commit: &str) -> WebhookDispatcher {
        WebhookDispatcher::new(
            ledger,
            "lyrics-client",
            "master",
            Arc::new(StubPuller(commit.to_string())),
            None,
        )
    }

    fn ledger_with(lines: &[&str]) -> (TempDir, Arc<UnsupportedLedger>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unsupported.txt");
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(&path, body).unwrap();
        (dir, Arc::new(UnsupportedLedger::new(path)))
    }

    // -- validation --

    #[test]
    fn test_valid_request_passes() {
        let secret = "hunter2";
        let body = br#"{"zen": "Keep it logically awesome."}"#;
        let validator = WebhookValidator::new(secret);
        let validated = validator.validate(&headers_for(body, secret, "ping"), body).unwrap();
        assert_eq!(validated.event, "ping");
        assert_eq!(validated.payload["zen"], "Keep it logically awesome.");
    }

    #[test]
    fn test_sha256_signature_accepted() {
        let secret = "hunter2";
        let body = br#"{}"#;
        let mut headers = headers_for(body, secret, "ping");
        headers.signature = Some(sign_sha256(secret, body));
        assert!(WebhookValidator::new(secret).validate(&headers, body).is_ok());
    }

    #[test]
    fn test_missing_signature_rejected_before_dispatch() {
        let body = br#"{}"#;
        let mut headers = headers_for(body, "hunter2", "issues");
        headers.signature = None;
        let err = WebhookValidator::new("hunter2").validate(&headers, body).unwrap_err();
        assert_eq!(err, WebhookError::MissingHeader("X-Hub-Signature"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{}"#;
        let headers = headers_for(body, "other-secret", "issues");
        let err = WebhookValidator::new("hunter2").validate(&headers, body).unwrap_err();
        assert_eq!(err, WebhookError::SignatureMismatch);
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "hunter2";
        let headers = headers_for(br#"{"a": 1}"#, secret, "issues");
        let err = WebhookValidator::new(secret)
            .validate(&headers, br#"{"a": 2}"#)
            .unwrap_err();
        assert_eq!(err, WebhookError::SignatureMismatch);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let err = verify_signature("md5=abcdef", b"{}", "s").unwrap_err();
        assert_eq!(err, WebhookError::UnsupportedAlgorithm("md5".to_string()));
    }

    #[test]
    fn test_bad_user_agent_rejected() {
        let secret = "hunter2";
        let body = br#"{}"#;
        let mut headers = headers_for(body, secret, "ping");
        headers.user_agent = Some("curl/8.0".to_string());
        let err = WebhookValidator::new(secret).validate(&headers, body).unwrap_err();
        assert_eq!(err, WebhookError::BadUserAgent);
    }

    #[test]
    fn test_non_json_content_type_rejected() {
        let secret = "hunter2";
        let body = br#"{}"#;
        let mut headers = headers_for(body, secret, "ping");
        headers.content_type = Some("application/x-www-form-urlencoded".to_string());
        let err = WebhookValidator::new(secret).validate(&headers, body).unwrap_err();
        assert_eq!(err, WebhookError::NotJson);
    }

    #[test]
    fn test_source_ip_check() {
        let ranges: Vec<IpNet> = vec!["192.30.252.0/22".parse().unwrap()];
        let inside: IpAddr = "192.30.253.7".parse().unwrap();
        let outside: IpAddr = "203.0.113.9".parse().unwrap();

        assert!(check_source_ip(Some(inside), Some(&ranges)).is_ok());
        assert_eq!(
            check_source_ip(Some(outside), Some(&ranges)).unwrap_err(),
            WebhookError::UntrustedSource(outside)
        );
        // unconfigured -> skipped
        assert!(check_source_ip(Some(outside), None).is_ok());
        assert!(check_source_ip(None, Some(&ranges)).is_ok());
    }

    // -- dispatch --

    fn validated(event: &str, payload: Value) -> ValidatedEvent {
        ValidatedEvent {
            event: event.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_ping_pongs() {
        let (_dir, ledger) = ledger_with(&[]);
        let d = dispatcher(ledger, "abc");
        let outcome = d.handle_issue_event(&validated("ping", serde_json::json!({}))).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Pong));
    }

    #[tokio::test]
    async fn test_issue_closed_removes_ledger_line() {
        let (_dir, ledger) = ledger_with(&["Miracle by Caravan Palace"]);
        let d = dispatcher(Arc::clone(&ledger), "abc");

        let payload = serde_json::json!({
            "action": "closed",
            "issue": {
                "title": "Miracle by Caravan Palace unsupported.",
                "labels": [{"name": "unsupported song"}]
            },
            "repository": {"name": "lyrics-client"}
        });
        let outcome = d.handle_issue_event(&validated("issues", payload)).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Removed(1)));
        assert_eq!(ledger.contents().unwrap(), "");
    }

    #[tokio::test]
    async fn test_issue_event_filters_on_action_label_repo() {
        let (_dir, ledger) = ledger_with(&["Miracle by Caravan Palace"]);
        let d = dispatcher(Arc::clone(&ledger), "abc");

        for payload in [
            // wrong action
            serde_json::json!({
                "action": "opened",
                "issue": {"title": "Miracle by Caravan Palace unsupported.",
                          "labels": [{"name": "unsupported song"}]},
                "repository": {"name": "lyrics-client"}
            }),
            // wrong label
            serde_json::json!({
                "action": "closed",
                "issue": {"title": "Miracle by Caravan Palace unsupported.",
                          "labels": [{"name": "bug"}]},
                "repository": {"name": "lyrics-client"}
            }),
            // wrong repo
            serde_json::json!({
                "action": "closed",
                "issue": {"title": "Miracle by Caravan Palace unsupported.",
                          "labels": [{"name": "unsupported song"}]},
                "repository": {"name": "other-repo"}
            }),
            // no labels at all
            serde_json::json!({
                "action": "closed",
                "issue": {"title": "Miracle by Caravan Palace unsupported.", "labels": []},
                "repository": {"name": "lyrics-client"}
            }),
        ] {
            let outcome = d.handle_issue_event(&validated("issues", payload)).await.unwrap();
            assert!(matches!(outcome, EventOutcome::Ignored(_)));
        }
        assert!(ledger.contains(&SongQuery::new("Miracle", "Caravan Palace")).unwrap());
    }

    #[tokio::test]
    async fn test_push_to_default_branch_deploys() {
        let (_dir, ledger) = ledger_with(&[]);
        let d = dispatcher(ledger, "cafe42");

        let payload = serde_json::json!({
            "ref": "refs/heads/master",
            "after": "cafe42",
            "head_commit": null
        });
        let outcome = d.handle_push_event(&validated("push", payload)).await.unwrap();
        match outcome {
            EventOutcome::Deployed { commit } => assert_eq!(commit, "cafe42"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_push_to_other_branch_ignored() {
        let (_dir, ledger) = ledger_with(&[]);
        let d = dispatcher(ledger, "cafe42");

        let payload = serde_json::json!({
            "ref": "refs/heads/feature",
            "after": "cafe42",
            "head_commit": null
        });
        let outcome = d.handle_push_event(&validated("push", payload)).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn test_wrong_event_type_ignored() {
        let (_dir, ledger) = ledger_with(&[]);
        let d = dispatcher(ledger, "abc");
        let outcome = d
            .handle_push_event(&validated("workflow_run", serde_json::json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored(_)));
    }
}

//! HTTP surface: form endpoints for the lyrics clients, webhook
//! endpoints for GitHub, and a couple of read-only views.
//!
//! Handlers stay thin; outcomes and their user-facing messages come from
//! the service layer. Webhook validation failures all map to a fixed 418
//! so misconfigured senders are easy to spot in logs.

use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use versebridge_service::github::IssueClient;
use versebridge_service::service::MaintOutcome;
use versebridge_service::webhook::check_source_ip;
use versebridge_service::webhook::InboundHeaders;
use versebridge_service::{
    ApiError, EventOutcome, LyricService, WebhookDispatcher, WebhookError, WebhookValidator,
};

/// Default stripper guess recorded when the client did not send one.
const NO_GUESS: &str = "not supported yet";

#[derive(Debug)]
pub(crate) struct AppState {
    pub(crate) service: LyricService,
    pub(crate) validator: WebhookValidator,
    pub(crate) dispatcher: WebhookDispatcher,
    pub(crate) meta: IssueClient,
    pub(crate) require_ip_check: bool,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(master_unsupported))
        .route("/unsupported", post(report_unsupported))
        .route("/stripper", get(stripper).post(stripper))
        .route("/add_stripper", post(add_stripper))
        .route("/master_unsupported", get(master_unsupported))
        .route("/delete_unsupported", post(delete_unsupported))
        .route("/issue_closed", post(issue_closed))
        .route("/update_server", post(update_server))
        .route("/version", get(version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Service-layer failures surface as an opaque 500; details go to the
/// log, not the client.
struct AppError(ApiError);

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        log::error!("request failed: {}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}

// ---------------------------------------------------------------------------
// Client-facing form endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReportForm {
    song: String,
    artist: String,
    version: Option<String>,
    stripper: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SongForm {
    song: String,
    artist: String,
}

#[derive(Debug, Deserialize)]
struct MaintForm {
    auth: String,
    song: String,
    artist: String,
    stripper: Option<String>,
}

async fn report_unsupported(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ReportForm>,
) -> Result<Response, AppError> {
    let outcome = state
        .service
        .report_unsupported(
            &form.song,
            &form.artist,
            form.version.as_deref(),
            form.stripper.as_deref().unwrap_or(NO_GUESS),
        )
        .await?;
    Ok(state.service.report_message(&outcome).into_response())
}

async fn stripper(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SongForm>,
) -> Result<Response, AppError> {
    match state.service.resolve_stripper(&form.song, &form.artist).await? {
        Some(stripper) => Ok(stripper.into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            format!("Stripper not found for {} by {}.", form.song, form.artist),
        )
            .into_response()),
    }
}

async fn add_stripper(
    State(state): State<Arc<AppState>>,
    Form(form): Form<MaintForm>,
) -> Result<Response, AppError> {
    let stripper = form.stripper.as_deref().unwrap_or_default();
    let outcome = state
        .service
        .add_stripper(&form.auth, &form.song, &form.artist, stripper)?;
    Ok(maint_response(&outcome, &form.song, &form.artist))
}

async fn delete_unsupported(
    State(state): State<Arc<AppState>>,
    Form(form): Form<MaintForm>,
) -> Result<Response, AppError> {
    let outcome = state
        .service
        .delete_unsupported(&form.auth, &form.song, &form.artist)?;
    Ok(maint_response(&outcome, &form.song, &form.artist))
}

fn maint_response(outcome: &MaintOutcome, song: &str, artist: &str) -> Response {
    match outcome {
        MaintOutcome::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        MaintOutcome::Added { removed } => format!(
            "Added stripper for {song} by {artist} to server database successfully, \
             deleted {removed} instances from unsupported.txt"
        )
        .into_response(),
        MaintOutcome::Removed { removed } => format!(
            "Removed {removed} instances of {song} by {artist} from unsupported.txt successfully."
        )
        .into_response(),
    }
}

async fn master_unsupported(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    Ok(state.service.list_unsupported()?.into_response())
}

async fn version(State(state): State<Arc<AppState>>) -> String {
    state.service.latest_version().to_string()
}

// ---------------------------------------------------------------------------
// Webhook endpoints
// ---------------------------------------------------------------------------

async fn issue_closed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let inbound = inbound_headers(&headers);
    let event = match state.validator.validate(&inbound, &body) {
        Ok(event) => event,
        Err(err) => return Ok(teapot(&err)),
    };
    if let Err(err) = check_hook_source(&state, inbound.client_ip).await? {
        return Ok(teapot(&err));
    }

    let outcome = state.dispatcher.handle_issue_event(&event).await?;
    Ok(outcome_response(outcome, "pong"))
}

async fn update_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let inbound = inbound_headers(&headers);
    let event = match state.validator.validate(&inbound, &body) {
        Ok(event) => event,
        Err(err) => return Ok(teapot(&err)),
    };
    if let Err(err) = check_hook_source(&state, inbound.client_ip).await? {
        return Ok(teapot(&err));
    }

    let outcome = state.dispatcher.handle_push_event(&event).await?;
    Ok(outcome_response(outcome, "Hi!"))
}

/// Optional source check against GitHub's published hook ranges. The
/// outer `Result` is a range-fetch failure; the inner one the verdict.
async fn check_hook_source(
    state: &AppState,
    client_ip: Option<IpAddr>,
) -> Result<Result<(), WebhookError>, AppError> {
    if !state.require_ip_check {
        return Ok(Ok(()));
    }
    let ranges = state.meta.hook_ip_ranges().await?;
    Ok(check_source_ip(client_ip, Some(&ranges)))
}

fn outcome_response(outcome: EventOutcome, pong: &str) -> Response {
    match outcome {
        EventOutcome::Pong => Json(serde_json::json!({ "msg": pong })).into_response(),
        EventOutcome::Removed(n) => {
            format!("Deleted {n} instances from unsupported.txt").into_response()
        }
        EventOutcome::Deployed { commit } => {
            format!("Updated server to commit {commit}").into_response()
        }
        EventOutcome::Ignored(msg) => msg.into_response(),
    }
}

fn teapot(err: &WebhookError) -> Response {
    log::warn!("rejecting webhook request: {err}");
    (StatusCode::IM_A_TEAPOT, "Request validation failed.").into_response()
}

fn inbound_headers(headers: &HeaderMap) -> InboundHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    InboundHeaders {
        event: get("x-github-event"),
        delivery: get("x-github-delivery"),
        signature: get("x-hub-signature-256").or_else(|| get("x-hub-signature")),
        content_type: get("content-type"),
        user_agent: get("user-agent"),
        client_ip: client_ip(headers),
    }
}

/// Honors the proxy headers in precedence order; the socket address is
/// useless behind Cloudflare.
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    ["cf-connecting-ip", "x-real-ip"].iter().find_map(|name| {
        headers.get(*name)?.to_str().ok()?.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_client_ip_prefers_cloudflare_header() {
        let headers = header_map(&[
            ("cf-connecting-ip", "192.30.253.7"),
            ("x-real-ip", "203.0.113.9"),
        ]);
        assert_eq!(client_ip(&headers), "192.30.253.7".parse().ok());

        let headers = header_map(&[("x-real-ip", "203.0.113.9")]);
        assert_eq!(client_ip(&headers), "203.0.113.9".parse().ok());

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_inbound_headers_prefer_sha256_signature() {
        let headers = header_map(&[
            ("x-github-event", "push"),
            ("x-github-delivery", "d-1"),
            ("x-hub-signature", "sha1=aa"),
            ("x-hub-signature-256", "sha256=bb"),
            ("content-type", "application/json"),
            ("user-agent", "GitHub-Hookshot/0440cc1"),
        ]);
        let inbound = inbound_headers(&headers);
        assert_eq!(inbound.event.as_deref(), Some("push"));
        assert_eq!(inbound.signature.as_deref(), Some("sha256=bb"));
    }

    #[test]
    fn test_teapot_status() {
        let response = teapot(&WebhookError::SignatureMismatch);
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_outcome_responses() {
        let response = outcome_response(EventOutcome::Removed(2), "pong");
        assert_eq!(response.status(), StatusCode::OK);

        let response = outcome_response(
            EventOutcome::Deployed {
                commit: "cafe42".to_string(),
            },
            "Hi!",
        );
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_forbidden_maintenance_response() {
        let response = maint_response(&MaintOutcome::Forbidden, "Miracle", "Caravan Palace");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

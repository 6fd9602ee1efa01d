//! The service facade the HTTP layer calls into.
//!
//! Orchestrates the report-unsupported flow (version gate, ledger
//! membership, trivial-pair screen, catalog verification, resolver
//! signal, issue filing), stripper resolution, and the authenticated
//! maintenance operations. Outcomes are typed; the plain-text messages
//! shown to clients are rendered from them here so the route layer stays
//! a thin mapping.

use std::sync::Arc;

use versebridge_core::{SongQuery, StripperStore, UnsupportedLedger};

use crate::error::ApiResult;
use crate::genius::GeniusClient;
use crate::github::IssueClient;
use crate::spotify::SpotifyClient;

/// Result of a report-unsupported request.
#[derive(Debug)]
pub enum ReportOutcome {
    /// Client too old (or did not say); ask it to update first.
    UpdateRequired,
    /// The pair is already in the ledger, a tracking issue exists.
    AlreadyLogged,
    /// All-letters pair; the lyrics page plausibly just does not exist.
    MaybeAbsent(SongQuery),
    /// Catalog verification rejected the pair (or a stripper was already
    /// resolvable, so no issue is warranted).
    NotOnCatalog,
    /// Tracking issue filed.
    IssueCreated {
        query: SongQuery,
        url: Option<String>,
    },
    /// Ledger updated but the issue API did not return 201.
    LoggedOnly(SongQuery),
}

/// Result of an authenticated maintenance request.
#[derive(Debug, PartialEq, Eq)]
pub enum MaintOutcome {
    /// Auth secret mismatch; nothing was touched.
    Forbidden,
    /// Stripper recorded; this many ledger lines were removed.
    Added { removed: usize },
    /// This many ledger lines were removed.
    Removed { removed: usize },
}

/// Tunables for the facade beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Shared secret for the maintenance endpoints.
    pub maintainer_secret: String,
    /// Oldest client version still worth serving.
    pub min_client_version: String,
    /// Version advertised to out-of-date clients and by `/version`.
    pub latest_client_version: String,
    /// Issue-tracker URL woven into user-facing messages.
    pub tracker_issues_url: String,
}

/// Facade over the verification, resolution, ledger, and issue flows.
#[derive(Debug)]
pub struct LyricService {
    spotify: SpotifyClient,
    genius: GeniusClient,
    issues: IssueClient,
    ledger: Arc<UnsupportedLedger>,
    store: Arc<StripperStore>,
    options: ServiceOptions,
}

impl LyricService {
    pub fn new(
        spotify: SpotifyClient,
        genius: GeniusClient,
        issues: IssueClient,
        ledger: Arc<UnsupportedLedger>,
        store: Arc<StripperStore>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            spotify,
            genius,
            issues,
            ledger,
            store,
            options,
        }
    }

    /// Handle a report that a (song, artist) pair is unsupported.
    ///
    /// Only files an issue when the catalog confirms the pair is real
    /// and non-instrumental *and* no stripper is independently
    /// resolvable; the two signals are queried separately so a failure
    /// in one never blocks the other's verdict.
    pub async fn report_unsupported(
        &self,
        song: &str,
        artist: &str,
        version: Option<&str>,
        stripper_guess: &str,
    ) -> ApiResult<ReportOutcome> {
        let query = SongQuery::new(song, artist);

        let Some(version) = version else {
            return Ok(ReportOutcome::UpdateRequired);
        };
        // Versions compare lexicographically, as the clients release them.
        if version < self.options.min_client_version.as_str() {
            return Ok(ReportOutcome::UpdateRequired);
        }

        log::info!("unsupported report: {query}, stripper guess {stripper_guess:?}, client {version}");

        if self.ledger.contains(&query)? {
            return Ok(ReportOutcome::AlreadyLogged);
        }

        if query.is_trivial() {
            return Ok(ReportOutcome::MaybeAbsent(query));
        }

        if self.spotify.verify(&query).await? && self.genius.resolve_stripper(&query).await.is_none()
        {
            self.ledger.append(&query)?;

            let issue = self
                .issues
                .open_unsupported_issue(&query, version, stripper_guess)
                .await?;
            if issue.created() {
                log::info!("created tracking issue for {query}");
                return Ok(ReportOutcome::IssueCreated {
                    query,
                    url: issue.url,
                });
            }
            log::warn!("issue API returned {}; {query} logged only", issue.status);
            return Ok(ReportOutcome::LoggedOnly(query));
        }

        Ok(ReportOutcome::NotOnCatalog)
    }

    /// Resolve a stripper: confirmed store first, Genius fallback.
    pub async fn resolve_stripper(&self, song: &str, artist: &str) -> ApiResult<Option<String>> {
        let query = SongQuery::new(song, artist);

        if let Some(stripper) = self.store.find(&query)? {
            return Ok(Some(stripper));
        }

        Ok(self.genius.resolve_stripper(&query).await)
    }

    /// Record a maintainer-confirmed stripper and drop the pair from the
    /// ledger.
    pub fn add_stripper(
        &self,
        auth: &str,
        song: &str,
        artist: &str,
        stripper: &str,
    ) -> ApiResult<MaintOutcome> {
        if auth != self.options.maintainer_secret {
            return Ok(MaintOutcome::Forbidden);
        }
        let query = SongQuery::new(song, artist);
        self.store.insert(&query, stripper)?;
        let removed = self.ledger.remove_all(&query)?;
        Ok(MaintOutcome::Added { removed })
    }

    /// Remove a pair from the ledger by hand.
    pub fn delete_unsupported(&self, auth: &str, song: &str, artist: &str) -> ApiResult<MaintOutcome> {
        if auth != self.options.maintainer_secret {
            return Ok(MaintOutcome::Forbidden);
        }
        let removed = self.ledger.remove_all(&SongQuery::new(song, artist))?;
        Ok(MaintOutcome::Removed { removed })
    }

    /// Full ledger contents, newest line last.
    pub fn list_unsupported(&self) -> ApiResult<String> {
        Ok(self.ledger.contents()?)
    }

    /// The client version the backend currently advertises.
    pub fn latest_version(&self) -> &str {
        &self.options.latest_client_version
    }

    /// Plain-text message for a report outcome.
    pub fn report_message(&self, outcome: &ReportOutcome) -> String {
        let ticket_hint = format!(
            "If you feel there's an error, open a ticket at {}",
            self.options.tracker_issues_url
        );
        match outcome {
            ReportOutcome::UpdateRequired => format!(
                "Please update the lyrics client to the latest version (v{}) to get better support :)",
                self.options.latest_client_version
            ),
            ReportOutcome::AlreadyLogged => format!(
                "Issue already exists on the GitHub repo. \n{}",
                self.options.tracker_issues_url
            ),
            ReportOutcome::MaybeAbsent(query) => {
                format!("Lyrics for {query} may not exist on Genius.\n{ticket_hint}")
            }
            ReportOutcome::NotOnCatalog => format!(
                "That's a fishy request, that song doesn't seem to exist on Spotify. \n{ticket_hint}"
            ),
            ReportOutcome::IssueCreated { query, url } => format!(
                "Lyrics for that song may not exist on Genius. Created issue on the GitHub repo \
                 for {query} to investigate further. \n{}",
                url.as_deref().unwrap_or(&self.options.tracker_issues_url)
            ),
            ReportOutcome::LoggedOnly(query) => format!("Logged {query} in the server."),
        }
    }
}

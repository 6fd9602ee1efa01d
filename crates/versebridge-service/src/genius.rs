//! Genius candidate resolution.
//!
//! Given a (song, artist) pair, search the Genius API and decide whether
//! one of the ranked hits legitimately is that song. The accepted hit's
//! canonical path (`/<slug>-lyrics`) yields the stripper: the slug a
//! lyrics client can use to fetch the page directly.
//!
//! Resolution is a soft operation: transport failures, error statuses,
//! and empty result sets all come back as `None`, never as an error.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use versebridge_core::matcher::{is_title_mismatched, max_errors, strip_punctuation};
use versebridge_core::SongQuery;

use crate::error::ApiResult;
use crate::token::USER_AGENT;

const GENIUS_API_BASE: &str = "https://api.genius.com";

/// Parenthesised/bracketed asides and trailing "- ..." qualifiers; these
/// hurt recall on the Genius search index.
static ASIDES: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\([^)]*\)|\[[^\]]*\]|- .*").unwrap()
});

/// Runs of whitespace and hyphens, collapsed to a single space.
static SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"[\s-]+").unwrap()
});

/// The slug portion of a canonical `/<slug>-lyrics` path.
static LYRICS_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"/([A-Za-z0-9-]+)-lyrics$").unwrap()
});

#[derive(Debug, Deserialize)]
struct SearchResponse {
    meta: Meta,
    response: Option<HitPage>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    status: u16,
}

#[derive(Debug, Deserialize)]
struct HitPage {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    pub result: HitResult,
}

#[derive(Debug, Deserialize)]
pub struct HitResult {
    pub full_title: String,
    pub path: String,
}

/// Genius search client.
#[derive(Debug)]
pub struct GeniusClient {
    http: Client,
    token: String,
    api_base: String,
}

impl GeniusClient {
    /// `token` is the static Genius client access token.
    pub fn new(token: impl Into<String>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            token: token.into(),
            api_base: GENIUS_API_BASE.to_string(),
        })
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Try to resolve the stripper for a pair via Genius search.
    ///
    /// The search query uses the cleaned song title, but candidate
    /// comparison uses the original pair so the tolerance stays anchored
    /// to what the client reported. `None` is the normal not-found
    /// outcome, covering transport errors and non-200 API statuses too.
    pub async fn resolve_stripper(&self, query: &SongQuery) -> Option<String> {
        log::info!("resolving stripper from genius for {query}");

        let title = strip_punctuation(&query.to_string());
        let words: Vec<&str> = title.split_whitespace().collect();
        let max_err = max_errors(words.len());

        let cleaned = clean_song(&query.song);
        log::debug!("cleaned song: {cleaned}");

        let url = format!("{}/search", self.api_base);
        let response = match self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("q", format!("{cleaned} {}", query.artist))])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("genius search failed for {query}: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            log::warn!("genius search returned {} for {query}", response.status());
            return None;
        }

        let body: SearchResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                log::warn!("malformed genius search body for {query}: {e}");
                return None;
            }
        };

        if body.meta.status != 200 {
            log::warn!("genius meta status {} for {query}", body.meta.status);
            return None;
        }

        let hits = body.response.map(|r| r.hits).unwrap_or_default();
        let stripper = pick_stripper(&words, max_err, &hits);
        match &stripper {
            Some(s) => log::info!("stripper found: {s}"),
            None => log::info!("stripper not found for {query}"),
        }
        stripper
    }
}

/// Strip asides and trailing qualifiers from a song title, then collapse
/// whitespace/hyphen runs, to search better on Genius.
pub fn clean_song(song: &str) -> String {
    let without_asides = ASIDES.replace_all(song, "");
    SEPARATOR_RUNS.replace_all(&without_asides, " ").trim().to_string()
}

/// Walk hits in rank order and return the slug of the first one whose
/// title survives the mismatch tolerance.
///
/// Hits whose path does not end in `-lyrics` are skipped rather than
/// rejected outright; the API's path shape is not under our control.
pub fn pick_stripper<S: AsRef<str>>(words: &[S], max_err: usize, hits: &[Hit]) -> Option<String> {
    for hit in hits {
        let full_title = strip_punctuation(&hit.result.full_title);
        log::debug!("candidate title: {full_title}");

        if is_title_mismatched(words, &full_title, max_err) {
            continue;
        }

        match LYRICS_SLUG.captures(&hit.result.path) {
            Some(caps) => return Some(caps[1].to_string()),
            None => log::warn!("path did not end in -lyrics: {}", hit.result.path),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(full_title: &str, path: &str) -> Hit {
        Hit {
            result: HitResult {
                full_title: full_title.to_string(),
                path: path.to_string(),
            },
        }
    }

    fn words_for(query: &SongQuery) -> (Vec<String>, usize) {
        let title = strip_punctuation(&query.to_string());
        let words: Vec<String> = title.split_whitespace().map(str::to_string).collect();
        let max_err = max_errors(words.len());
        (words, max_err)
    }

    #[test]
    fn test_clean_song_strips_asides() {
        assert_eq!(clean_song("Miracle (feat. Somebody)"), "Miracle");
        assert_eq!(clean_song("Miracle [Live]"), "Miracle");
        assert_eq!(clean_song("Miracle - 2011 Remaster"), "Miracle");
    }

    #[test]
    fn test_clean_song_collapses_separator_runs() {
        assert_eq!(clean_song("Wham  Bam   Shang-A-Lang"), "Wham Bam Shang A Lang");
    }

    #[test]
    fn test_clean_song_plain_title_untouched() {
        assert_eq!(clean_song("Supersonics"), "Supersonics");
    }

    #[test]
    fn test_first_matching_hit_wins() {
        let q = SongQuery::new("Miracle", "Caravan Palace");
        let (words, max_err) = words_for(&q);
        let hits = vec![
            hit("Miracle by Caravan Palace", "/Caravan-palace-miracle-lyrics"),
            hit("Miracle by Caravan Palace", "/Some-other-path-lyrics"),
        ];
        assert_eq!(
            pick_stripper(&words, max_err, &hits).as_deref(),
            Some("Caravan-palace-miracle")
        );
    }

    #[test]
    fn test_mismatched_hits_skipped_in_rank_order() {
        let q = SongQuery::new("Miracle", "Caravan Palace");
        let (words, max_err) = words_for(&q);
        let hits = vec![
            hit("Wildflower by Billie Eilish", "/Billie-eilish-wildflower-lyrics"),
            hit("Miracle by Caravan Palace", "/Caravan-palace-miracle-lyrics"),
        ];
        assert_eq!(
            pick_stripper(&words, max_err, &hits).as_deref(),
            Some("Caravan-palace-miracle")
        );
    }

    #[test]
    fn test_non_lyrics_path_skipped() {
        let q = SongQuery::new("Miracle", "Caravan Palace");
        let (words, max_err) = words_for(&q);

        let hits = vec![hit("Miracle by Caravan Palace", "/Caravan-palace-miracle-annotated")];
        assert_eq!(pick_stripper(&words, max_err, &hits), None);

        // A later conforming hit still resolves.
        let hits = vec![
            hit("Miracle by Caravan Palace", "/Caravan-palace-miracle-annotated"),
            hit("Miracle by Caravan Palace", "/Caravan-palace-miracle-lyrics"),
        ];
        assert_eq!(
            pick_stripper(&words, max_err, &hits).as_deref(),
            Some("Caravan-palace-miracle")
        );
    }

    #[test]
    fn test_no_hits_resolves_to_none() {
        let q = SongQuery::new("Miracle", "Caravan Palace");
        let (words, max_err) = words_for(&q);
        assert_eq!(pick_stripper(&words, max_err, &[]), None);
    }

    #[test]
    fn test_search_response_shape() {
        let body: SearchResponse = serde_json::from_value(serde_json::json!({
            "meta": {"status": 200},
            "response": {"hits": [
                {"result": {"full_title": "Miracle by Caravan Palace",
                            "path": "/Caravan-palace-miracle-lyrics"}}
            ]}
        }))
        .unwrap();
        assert_eq!(body.meta.status, 200);
        assert_eq!(body.response.unwrap().hits.len(), 1);
    }
}

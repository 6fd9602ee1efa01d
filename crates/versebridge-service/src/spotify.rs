//! Spotify catalog verification.
//!
//! A reported pair is only acted on if it is a real, exact catalog
//! entry: the inputs are expected to have been copy-pasted from Spotify
//! by the reporting client, so any drift indicates a mismatched or
//! fabricated request. Verified tracks are additionally screened for
//! instrumentals, which are unlikely to have lyrics anywhere.
//!
//! Transport or response-shape failures fail closed to a `false`
//! verdict; only credential-issuance failures propagate.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use versebridge_core::SongQuery;

use crate::error::ApiResult;
use crate::token::{TokenCache, USER_AGENT};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Default instrumental cutoffs, empirically tuned.
pub const DEFAULT_INSTRUMENTALNESS_CUTOFF: f64 = 0.45;
pub const DEFAULT_SPEECHINESS_CUTOFF: f64 = 0.04;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<Track>,
}

#[derive(Debug, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<TrackArtist>,
}

#[derive(Debug, Deserialize)]
pub struct TrackArtist {
    pub name: String,
}

/// The slice of the audio-features payload the screening needs.
#[derive(Debug, Deserialize)]
pub struct AudioFeatures {
    pub instrumentalness: f64,
    pub speechiness: f64,
}

/// Spotify Web API client for catalog verification.
#[derive(Debug)]
pub struct SpotifyClient {
    http: Client,
    tokens: Arc<TokenCache>,
    api_base: String,
    instrumentalness_cutoff: f64,
    speechiness_cutoff: f64,
}

impl SpotifyClient {
    pub fn new(tokens: Arc<TokenCache>) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            tokens,
            api_base: SPOTIFY_API_BASE.to_string(),
            instrumentalness_cutoff: DEFAULT_INSTRUMENTALNESS_CUTOFF,
            speechiness_cutoff: DEFAULT_SPEECHINESS_CUTOFF,
        })
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Override the instrumental-screening cutoffs.
    #[must_use]
    pub fn with_instrumental_cutoffs(mut self, instrumentalness: f64, speechiness: f64) -> Self {
        self.instrumentalness_cutoff = instrumentalness;
        self.speechiness_cutoff = speechiness;
        self
    }

    /// Is the pair a real, exact, non-instrumental catalog entry?
    ///
    /// Returns `false` for anything short of an exact match with lyrics
    /// potential, including API hiccups (fail closed). Token refresh
    /// failures propagate as [`crate::ApiError::Auth`].
    pub async fn verify(&self, query: &SongQuery) -> ApiResult<bool> {
        let token = self.tokens.spotify_token().await?;

        let url = format!("{}/search", self.api_base);
        let response = match self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("q", format!("{} {}", query.song, query.artist)),
                ("type", "track".to_string()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("spotify search failed for {query}: {e}");
                return Ok(false);
            }
        };

        let body: SearchResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                log::warn!("malformed spotify search body for {query}: {e}");
                return Ok(false);
            }
        };

        let Some(track) = first_exact_match(query, &body) else {
            log::info!("{query} doesn't seem legit on spotify");
            return Ok(false);
        };
        log::info!("{query} legit on spotify");

        match self.audio_features(&token, &track.id).await {
            Ok(features) => {
                if is_instrumental(&features, self.instrumentalness_cutoff, self.speechiness_cutoff)
                {
                    log::info!("{query} seems to be instrumental");
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            Err(e) => {
                log::warn!("audio-features lookup failed for {query}: {e}");
                Ok(false)
            }
        }
    }

    async fn audio_features(&self, token: &str, track_id: &str) -> ApiResult<AudioFeatures> {
        let url = format!("{}/audio-features/{}", self.api_base, track_id);
        let features = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?
            .json::<AudioFeatures>()
            .await?;
        Ok(features)
    }
}

/// The first search result, if it matches the query byte-exactly.
///
/// Only the top result counts, and both the track name and the first
/// listed artist must equal the query with no normalization at all.
fn first_exact_match<'a>(query: &SongQuery, response: &'a SearchResponse) -> Option<&'a Track> {
    let track = response.tracks.as_ref()?.items.first()?;
    log::info!(
        "song: {}, artist: {}",
        track.name,
        track.artists.first().map_or("<none>", |a| a.name.as_str())
    );
    let artist_matches = track.artists.first().is_some_and(|a| a.name == query.artist);
    (track.name == query.song && artist_matches).then_some(track)
}

/// Instrumental when both tuned cutoffs agree.
fn is_instrumental(features: &AudioFeatures, instrumentalness_cutoff: f64, speechiness_cutoff: f64) -> bool {
    features.instrumentalness > instrumentalness_cutoff && features.speechiness < speechiness_cutoff
}

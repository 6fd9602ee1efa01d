//! The song/artist pair value type.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pattern for recovering a pair from a tracking-issue title.
static ISSUE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal, checked by tests
    Regex::new(r"^(.+) by (.+) unsupported\.$").unwrap()
});

/// Song/artist pairs made only of ASCII letters and spaces.
static TRIVIAL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z\s]+$").unwrap()
});

/// A (song, artist) pair as reported by a client.
///
/// Used as the lookup key everywhere: catalog verification, ledger
/// membership, and stripper resolution. The canonical text form is
/// `"<song> by <artist>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SongQuery {
    pub song: String,
    pub artist: String,
}

impl SongQuery {
    pub fn new(song: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            song: song.into(),
            artist: artist.into(),
        }
    }

    /// The title used for tracking issues: `"<song> by <artist> unsupported."`.
    pub fn issue_title(&self) -> String {
        format!("{self} unsupported.")
    }

    /// Recover a pair from a tracking-issue title.
    ///
    /// Inverse of [`issue_title`](Self::issue_title). The song capture is
    /// greedy, so `"A by B by C unsupported."` parses as song "A by B",
    /// artist "C".
    pub fn from_issue_title(title: &str) -> Option<Self> {
        let caps = ISSUE_TITLE.captures(title)?;
        Some(Self::new(&caps[1], &caps[2]))
    }

    /// Pairs made only of letters and spaces are too generic to act on:
    /// a lyrics page for them frequently just does not exist, and a
    /// tracking issue would be noise.
    pub fn is_trivial(&self) -> bool {
        TRIVIAL.is_match(&self.song) && TRIVIAL.is_match(&self.artist)
    }
}

impl fmt::Display for SongQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.song, self.artist)
    }
}

//! Title-matching heuristic for lyrics-search candidates.
//!
//! A query like "Miracle by Caravan Palace" rarely matches a search-index
//! title verbatim: punctuation drifts, "feat." suffixes appear, diacritics
//! get normalised away. The comparison here is deliberately loose: strip
//! punctuation from both sides, then require that no more than half of the
//! query's words are missing from the candidate title (case-insensitive
//! substring containment, word by word).

/// Remove every character that is not a letter, digit, or whitespace.
///
/// Case is preserved; the final comparison lowercases both sides.
pub fn strip_punctuation(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

/// Maximum number of query words allowed to miss the candidate title.
///
/// Half the query may fail to appear and the candidate is still accepted.
pub const fn max_errors(word_count: usize) -> usize {
    word_count / 2
}

/// Returns `true` when more than `max_err` of `words` are absent from
/// `candidate_title` (case-insensitive substring containment).
///
/// An empty `words` slice trivially matches; an empty title mismatches
/// any non-empty `words` once `max_err` is exhausted.
pub fn is_title_mismatched<S: AsRef<str>>(words: &[S], candidate_title: &str, max_err: usize) -> bool {
    let title = candidate_title.to_lowercase();
    let missing = words
        .iter()
        .filter(|word| !title.contains(&word.as_ref().to_lowercase()))
        .count();
    if missing > 0 {
        log::debug!("{missing} of {} query words missing from candidate", words.len());
    }
    missing > max_err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(title: &str) -> Vec<String> {
        strip_punctuation(title)
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_exact_title_matches() {
        let w = words("Bohemian Rhapsody by Queen");
        assert!(!is_title_mismatched(&w, "bohemian rhapsody by queen", max_errors(w.len())));
    }

    #[test]
    fn test_unrelated_title_mismatches() {
        let w = words("Bohemian Rhapsody by Queen");
        assert!(is_title_mismatched(&w, "Miracle by Caravan Palace", max_errors(w.len())));
    }

    #[test]
    fn test_case_insensitive_with_tolerance() {
        // "2011" is missing but tolerance (5 / 2 = 2) absorbs it.
        let w = vec!["BoHemIaN", "RhaPsoDy", "2011", "bY", "queen"];
        assert!(!is_title_mismatched(&w, "bohemian RHAPSODY By QUEEN", 2));
    }

    #[test]
    fn test_boundary_exactly_max_err_missing() {
        let w = vec!["one", "two", "three", "four"];
        // two missing == max_err -> still a match
        assert!(!is_title_mismatched(&w, "one two", 2));
        // three missing > max_err -> mismatch
        assert!(is_title_mismatched(&w, "one", 2));
    }

    #[test]
    fn test_empty_words_always_match() {
        let w: Vec<String> = vec![];
        assert!(!is_title_mismatched(&w, "anything at all", 0));
    }

    #[test]
    fn test_empty_title_never_matches() {
        let w = vec!["miracle"];
        assert!(is_title_mismatched(&w, "", 0));
    }

    #[test]
    fn test_strip_punctuation_keeps_alphanumerics() {
        assert_eq!(strip_punctuation("Don't Stop Me Now!"), "Dont Stop Me Now");
        assert_eq!(strip_punctuation("(feat. X) [Live]"), "feat X Live");
    }

    #[test]
    fn test_strip_punctuation_keeps_accented_letters() {
        assert_eq!(strip_punctuation("Céline & Björk"), "Céline  Björk");
    }

    #[test]
    fn test_max_errors_floors() {
        assert_eq!(max_errors(4), 2);
        assert_eq!(max_errors(5), 2);
        assert_eq!(max_errors(0), 0);
        assert_eq!(max_errors(1), 0);
    }
}

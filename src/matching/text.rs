// src/matching/text.rs
use once_cell::sync::Lazy;
use regex::Regex;
use strsim::jaro_winkler;

static SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s,\.\-/]+").expect("valid separator regex"));

/// Normalized similarity between a query string and a candidate label,
/// in [0, 1]. Distance is always the authoritative accept/reject signal;
/// this score is recorded on the candidate purely as a diagnostic for
/// inspecting borderline matches after the fact.
pub fn similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    if na.is_empty() && nb.is_empty() {
        return 1.0;
    }
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    jaro_winkler(&na, &nb)
}

/// Case-folds and collapses runs of whitespace/punctuation so that formatting
/// differences between sources do not depress the score.
fn normalize(s: &str) -> String {
    SEPARATOR_RE.replace_all(s.trim(), " ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_score_one() {
        assert_eq!(similarity("Coffee X", "Coffee X"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_formatting_insensitive() {
        assert_eq!(similarity("12 Main St, District 1", "12 main st district 1"), 1.0);
    }

    #[test]
    fn test_disjoint_strings_score_low() {
        let s = similarity("Coffee X", "zzqqy");
        assert!(s < 0.5, "got {}", s);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = similarity("Tram sac VinFast", "VinFast charging");
        let b = similarity("VinFast charging", "Tram sac VinFast");
        assert!((a - b).abs() < 1e-9);
    }
}

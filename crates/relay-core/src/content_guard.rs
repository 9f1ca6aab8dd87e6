//! Pattern-based input filter applied before anything reaches the backend.

use std::sync::LazyLock;

use regex::Regex;

/// Case-insensitive patterns, one per refused category.
const BLOCKED_PATTERNS: &[&str] = &[
    // exploitation / hacking
    r"(?i)(?:hack|crack|exploit|bypass|jailbreak)",
    // illegal content / piracy
    r"(?i)(?:illegal|piracy|torrent|download.*(?:movie|music|software))",
    // self-harm
    r"(?i)(?:suicide|self.*harm|kill.*myself)",
    // weapons / terrorism
    r"(?i)(?:bomb|weapon|explosive|terrorism)",
];

static COMPILED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    BLOCKED_PATTERNS
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern = %p, error = %e, "Invalid content guard pattern");
                None
            }
        })
        .collect()
});

/// True when `text` matches any blocked pattern. Stops at the first match.
pub fn is_blocked(text: &str) -> bool {
    COMPILED.iter().any(|re| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(COMPILED.len(), BLOCKED_PATTERNS.len());
    }

    #[test]
    fn test_blocks_hacking_terms_any_case() {
        for text in [
            "how do I hack a system",
            "BYPASS the filter",
            "Jailbreak prompt please",
            "tell me about exploits",
        ] {
            assert!(is_blocked(text), "expected '{}' to be blocked", text);
        }
    }

    #[test]
    fn test_blocks_other_categories() {
        assert!(is_blocked("where can I find a torrent"));
        assert!(is_blocked("download that movie for free"));
        assert!(is_blocked("thinking about self-harm"));
        assert!(is_blocked("how to build a bomb"));
    }

    #[test]
    fn test_allows_benign_text() {
        for text in ["hello", "what's the weather like?", "recommend a book", ""] {
            assert!(!is_blocked(text), "expected '{}' to pass", text);
        }
    }

    #[test]
    fn test_matches_inside_words() {
        // Substring semantics: "hackathon" contains "hack".
        assert!(is_blocked("anyone going to the hackathon?"));
    }
}

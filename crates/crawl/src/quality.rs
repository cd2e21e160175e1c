//! Four-level ordinal classification of extracted content.
//!
//! The gate between "return to the user" and "escalate to ghost". The
//! classifier measures substantive body text after stripping markdown and
//! nav noise; a false-positive guard keeps legitimate pages that merely
//! mention Cloudflare out of the blocked class.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const THIN_CHAR_THRESHOLD: usize = 80;
const THIN_WORD_THRESHOLD: usize = 15;
const MEDIUM_THIN_CHAR_THRESHOLD: usize = 600;
const MEDIUM_THIN_WORD_THRESHOLD: usize = 120;

/// The guard: pages larger than this never classify blocked on a phrase.
const GUARD_LARGE_HTML: usize = 10 * 1024;
const GUARD_MEDIUM_HTML: usize = 5 * 1024;
const GUARD_MARKDOWN_LEN: usize = 2 * 1024;

/// Patterns that indicate bot-block/challenge pages.
fn block_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)cloudflare").unwrap(),
            Regex::new(r"(?i)just a moment").unwrap(),
            Regex::new(r"(?i)please verify you are a human").unwrap(),
            Regex::new(r"(?i)captcha").unwrap(),
        ]
    })
}

/// Known error-page signatures that should never be treated as sufficient.
const ERROR_PAGE_SIGNATURES: &[&str] = &[
    "error code: 404",
    "you've arrived at an empty lot",
    "page not found",
    "doesn't look like there's anything at this address",
    "access denied",
];

fn nav_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(skip to (?:main )?content|cookie|privacy policy|terms of service|©|all rights reserved|toggle navigation|hamburger|navbar)",
        )
        .unwrap()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentQuality {
    Blocked,
    Empty,
    Minimal,
    Sufficient,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    pub quality: ContentQuality,
    pub char_count: usize,
    pub word_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub reason: String,
}

/// Remove markdown links, images, heading markers, and nav boilerplate —
/// keep body text for measurement.
pub fn strip_markdown_noise(text: &str) -> String {
    static IMAGE: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();

    let image = IMAGE.get_or_init(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
    let link = LINK.get_or_init(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
    let heading = HEADING.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s*").unwrap());

    let text = image.replace_all(text, "");
    let text = link.replace_all(&text, "$1");
    let text = heading.replace_all(&text, "");
    let text = nav_noise().replace_all(&text, "");
    text.trim().to_string()
}

/// Classify crawl content quality.
///
/// Decision order: blocked (flag or signature or 5xx) → 4xx/error-page
/// minimal → thin empty → medium-thin minimal → sufficient.
pub fn assess_content_quality(
    content: &str,
    status_code: Option<u16>,
    blocked: bool,
) -> QualityAssessment {
    let lowered = content.to_lowercase();
    let stripped = strip_markdown_noise(content);
    let char_count = stripped.chars().count();
    let word_count = stripped.split_whitespace().count();

    let assessment = |quality, blocked_reason: Option<String>, reason: String| QualityAssessment {
        quality,
        char_count,
        word_count,
        blocked_reason,
        status_code,
        reason,
    };

    if blocked {
        return assessment(
            ContentQuality::Blocked,
            Some("blocked flag from crawler".into()),
            "blocked flag".into(),
        );
    }
    for pattern in block_patterns() {
        if pattern.is_match(&lowered) {
            return assessment(
                ContentQuality::Blocked,
                Some(pattern.as_str().to_string()),
                format!("blocked signature: {}", pattern.as_str()),
            );
        }
    }

    if let Some(code) = status_code {
        if code >= 500 {
            return assessment(
                ContentQuality::Blocked,
                Some(format!("status_code={code}")),
                format!("http_{code}"),
            );
        }
        if code >= 400 {
            return assessment(ContentQuality::Minimal, None, format!("http_{code}"));
        }
    }

    if ERROR_PAGE_SIGNATURES.iter().any(|sig| lowered.contains(sig)) {
        return assessment(ContentQuality::Minimal, None, "error-page signature".into());
    }

    if char_count < THIN_CHAR_THRESHOLD || word_count < THIN_WORD_THRESHOLD {
        return assessment(ContentQuality::Empty, None, "thin body".into());
    }

    if char_count < MEDIUM_THIN_CHAR_THRESHOLD || word_count < MEDIUM_THIN_WORD_THRESHOLD {
        return assessment(ContentQuality::Minimal, None, "medium-thin body".into());
    }

    assessment(ContentQuality::Sufficient, None, "sufficient body".into())
}

/// False-positive guard for phrase-based block classifications.
///
/// A page that names Cloudflare in its nav/scripts is not an interstitial:
/// interstitials are small. Large HTML (or medium HTML with substantial
/// markdown) overrides a phrase match.
pub fn block_phrase_is_false_positive(html: &str, markdown: &str) -> bool {
    if html.len() > GUARD_LARGE_HTML {
        return true;
    }
    if html.len() >= GUARD_MEDIUM_HTML && markdown.len() > GUARD_MARKDOWN_LEN {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(words: usize) -> String {
        "substantive narrative text ".repeat(words / 3)
    }

    #[test]
    fn blocked_flag_wins_over_everything() {
        let a = assess_content_quality(&body(500), Some(200), true);
        assert_eq!(a.quality, ContentQuality::Blocked);
    }

    #[test]
    fn block_signatures_classify_blocked() {
        let a = assess_content_quality("Just a moment... checking", Some(200), false);
        assert_eq!(a.quality, ContentQuality::Blocked);
    }

    #[test]
    fn server_errors_classify_blocked() {
        let a = assess_content_quality(&body(500), Some(503), false);
        assert_eq!(a.quality, ContentQuality::Blocked);
    }

    #[test]
    fn client_errors_classify_minimal() {
        let a = assess_content_quality(&body(500), Some(404), false);
        assert_eq!(a.quality, ContentQuality::Minimal);
    }

    #[test]
    fn error_page_signatures_classify_minimal() {
        let a = assess_content_quality(
            &format!("{} page not found {}", body(200), body(200)),
            Some(200),
            false,
        );
        assert_eq!(a.quality, ContentQuality::Minimal);
    }

    #[test]
    fn thin_body_is_empty() {
        let a = assess_content_quality("a few words only", Some(200), false);
        assert_eq!(a.quality, ContentQuality::Empty);
    }

    #[test]
    fn medium_thin_body_is_minimal() {
        // ~40 words: past the empty gate, short of sufficient.
        let text = "meaningful prose words here again ".repeat(8);
        let a = assess_content_quality(&text, Some(200), false);
        assert_eq!(a.quality, ContentQuality::Minimal);
    }

    #[test]
    fn substantial_body_is_sufficient() {
        let a = assess_content_quality(&body(600), Some(200), false);
        assert_eq!(a.quality, ContentQuality::Sufficient);
    }

    #[test]
    fn adding_text_never_downgrades() {
        // empty → minimal → sufficient as text grows.
        let thin = assess_content_quality("tiny", Some(200), false);
        let medium = assess_content_quality(&"plain words of body text ".repeat(20), Some(200), false);
        let large = assess_content_quality(&"plain words of body text ".repeat(60), Some(200), false);
        assert!(thin.quality <= medium.quality);
        assert!(medium.quality <= large.quality);
    }

    #[test]
    fn markdown_noise_does_not_count_as_body() {
        let noisy = "![img](x.png) [link](y) # Heading\ncookie privacy policy";
        let stripped = strip_markdown_noise(noisy);
        assert!(!stripped.contains("x.png"));
        assert!(stripped.contains("link"));
        assert!(!stripped.contains('#'));
    }

    #[test]
    fn large_pages_override_phrase_blocks() {
        let html = format!("<html>{}cloudflare{}</html>", "x".repeat(6000), "y".repeat(6000));
        assert!(block_phrase_is_false_positive(&html, ""));

        let medium_html = format!("<html>{}cloudflare</html>", "x".repeat(5200));
        assert!(block_phrase_is_false_positive(&medium_html, &"m".repeat(3000)));
        assert!(!block_phrase_is_false_positive(&medium_html, "short md"));

        let small = "<html>just a moment</html>";
        assert!(!block_phrase_is_false_positive(small, ""));
    }
}

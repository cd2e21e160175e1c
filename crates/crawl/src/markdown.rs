//! HTML → markdown conversion.

use htmd::HtmlToMarkdown;

/// Tags stripped entirely before conversion: scripts, styling, and chrome
/// that never carries body content.
const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "nav", "footer", "iframe", "form"];

/// Convert page HTML to markdown.
pub fn html_to_markdown(html: &str) -> String {
    let converter = HtmlToMarkdown::builder().skip_tags(SKIPPED_TAGS.to_vec()).build();
    match converter.convert(html) {
        Ok(md) => md,
        Err(err) => {
            tracing::warn!(error = %err, "markdown conversion failed");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_paragraphs_survive() {
        let md = html_to_markdown("<h1>Title</h1><p>Body text here.</p>");
        assert!(md.contains("# Title"));
        assert!(md.contains("Body text here."));
    }

    #[test]
    fn scripts_and_nav_are_stripped() {
        let md = html_to_markdown(
            "<nav>Home | About</nav><script>alert(1)</script><p>Content</p>",
        );
        assert!(!md.contains("alert"));
        assert!(!md.contains("Home | About"));
        assert!(md.contains("Content"));
    }
}

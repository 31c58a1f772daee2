use regex::Regex;
use std::sync::OnceLock;

fn absolute_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(?:[a-z][a-z0-9+.\-]*:)?//").expect("Failed to compile absolute URL pattern")
    })
}

/// True for `scheme://…` and protocol-relative `//…` URLs
pub fn is_absolute_url(url: &str) -> bool {
    absolute_url_pattern().is_match(url)
}

/// Join a plugin site and a relative path with exactly one slash between them
pub fn join_site_path(site: &str, path: &str) -> String {
    format!("{}/{}", site.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("https://example.com/novel/1"));
        assert!(is_absolute_url("HTTP://EXAMPLE.COM"));
        assert!(is_absolute_url("//cdn.example.com/a.png"));
        assert!(is_absolute_url("app+custom://x"));
        assert!(!is_absolute_url("/novel/1"));
        assert!(!is_absolute_url("novel/1"));
        assert!(!is_absolute_url("mailto:someone@example.com"));
    }

    #[test]
    fn test_join_site_path() {
        assert_eq!(join_site_path("https://a.com/", "/n/1"), "https://a.com/n/1");
        assert_eq!(join_site_path("https://a.com", "n/1"), "https://a.com/n/1");
    }
}

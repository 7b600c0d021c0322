//! URL Normalization
//!
//! Rewrites "viewer" URLs on common source-hosting sites into URLs that
//! serve the raw file. Best effort: anything unrecognised (including
//! malformed input) is returned unchanged and fails later at fetch time.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

const GITHUB_HOST: &str = "github.com";
const GITHUB_RAW_HOST: &str = "raw.githubusercontent.com";
const GIST_HOST: &str = "gist.github.com";
const GITLAB_HOST: &str = "gitlab.com";
const BITBUCKET_HOST: &str = "bitbucket.org";

/// Minimum path segments for a bitbucket source link: user/repo/src/ref/file
const BITBUCKET_MIN_SEGMENTS: usize = 5;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+").unwrap());

/// Check if a submitted message starts with an http(s) URL
pub fn is_url(text: &str) -> bool {
    URL_RE.is_match(text.trim_start())
}

/// The URL a message starts with; any text after it is ignored
pub fn leading_url(text: &str) -> Option<&str> {
    URL_RE.find(text.trim_start()).map(|m| m.as_str())
}

/// Rewrite a URL to its raw-content equivalent, or return it unchanged
pub fn normalize(url: &str) -> String {
    let trimmed = url.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return url.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return url.to_string();
    };

    let rewritten = match host.to_ascii_lowercase().as_str() {
        GITHUB_HOST => rewrite_github(&parsed),
        GIST_HOST => rewrite_gist(&parsed),
        GITLAB_HOST => rewrite_gitlab(&parsed),
        BITBUCKET_HOST => rewrite_bitbucket(&parsed),
        _ => None,
    };

    match rewritten {
        Some(raw) => {
            tracing::debug!("Normalized URL {} -> {}", trimmed, raw);
            raw
        }
        None => url.to_string(),
    }
}

fn rewrite_github(url: &Url) -> Option<String> {
    if !url.path().contains("/blob/") {
        return None;
    }
    let mut raw = url.clone();
    raw.set_host(Some(GITHUB_RAW_HOST)).ok()?;
    raw.set_path(&url.path().replacen("/blob/", "/", 1));
    Some(raw.to_string())
}

fn rewrite_gist(url: &Url) -> Option<String> {
    let path = url.path().trim_end_matches('/');
    if path.is_empty() || path.ends_with("/raw") {
        return None;
    }
    let mut raw = url.clone();
    raw.set_path(&format!("{}/raw", path));
    Some(raw.to_string())
}

fn rewrite_gitlab(url: &Url) -> Option<String> {
    if !url.path().contains("/blob/") {
        return None;
    }
    let mut raw = url.clone();
    raw.set_path(&url.path().replacen("/blob/", "/raw/", 1));
    Some(raw.to_string())
}

fn rewrite_bitbucket(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() < BITBUCKET_MIN_SEGMENTS {
        return None;
    }
    // user/repo come first, so `src` can only be a later segment
    let src_idx = segments
        .iter()
        .enumerate()
        .skip(2)
        .find(|(_, s)| **s == "src")
        .map(|(i, _)| i)?;

    let rewritten: Vec<&str> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| if i == src_idx { "raw" } else { s })
        .collect();

    let mut raw = url.clone();
    raw.set_path(&format!("/{}", rewritten.join("/")));
    Some(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/readme.md"));
        assert!(is_url("  http://example.com  "));
        assert!(!is_url("# Heading"));
        assert!(!is_url("see https://example.com for details"));
        assert!(!is_url("ftp://example.com/file.md"));
        assert!(!is_url("https://"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_url_followed_by_text() {
        let text = "https://github.com/u/r/blob/main/f.md\nplease fetch this";
        assert!(is_url(text));
        assert_eq!(
            leading_url(text),
            Some("https://github.com/u/r/blob/main/f.md")
        );
        assert_eq!(
            leading_url("  http://example.com/a.md thanks"),
            Some("http://example.com/a.md")
        );
        assert_eq!(leading_url("# Heading https://example.com"), None);
    }

    #[test]
    fn test_github_blob() {
        assert_eq!(
            normalize("https://github.com/u/r/blob/main/f.md"),
            "https://raw.githubusercontent.com/u/r/main/f.md"
        );
        assert_eq!(
            normalize("https://github.com/u/r/blob/main/docs/a.md?plain=1"),
            "https://raw.githubusercontent.com/u/r/main/docs/a.md?plain=1"
        );
    }

    #[test]
    fn test_github_without_blob_unchanged() {
        let url = "https://github.com/u/r";
        assert_eq!(normalize(url), url);
    }

    #[test]
    fn test_gist() {
        assert_eq!(
            normalize("https://gist.github.com/u/abcd/"),
            "https://gist.github.com/u/abcd/raw"
        );
        assert_eq!(
            normalize("https://gist.github.com/u/abcd"),
            "https://gist.github.com/u/abcd/raw"
        );
    }

    #[test]
    fn test_gitlab_blob() {
        assert_eq!(
            normalize("https://gitlab.com/u/r/blob/main/f.md"),
            "https://gitlab.com/u/r/raw/main/f.md"
        );
    }

    #[test]
    fn test_bitbucket_src() {
        assert_eq!(
            normalize("https://bitbucket.org/u/r/src/main/f.md"),
            "https://bitbucket.org/u/r/raw/main/f.md"
        );
        // Too few segments: identity
        let short = "https://bitbucket.org/u/src/f.md";
        assert_eq!(normalize(short), short);
    }

    #[test]
    fn test_bitbucket_src_as_owner_or_repo() {
        let owner = "https://bitbucket.org/src/r/x/y/z";
        assert_eq!(normalize(owner), owner);

        assert_eq!(
            normalize("https://bitbucket.org/u/src/src/main/f.md"),
            "https://bitbucket.org/u/src/raw/main/f.md"
        );
    }

    #[test]
    fn test_unrelated_and_malformed_unchanged() {
        let url = "https://example.com/blob/main/f.md";
        assert_eq!(normalize(url), url);
        assert_eq!(normalize("not a url"), "not a url");
    }

    #[test]
    fn test_already_raw_is_idempotent() {
        for url in [
            "https://raw.githubusercontent.com/u/r/main/f.md",
            "https://gist.github.com/u/abcd/raw",
            "https://gitlab.com/u/r/raw/main/f.md",
            "https://bitbucket.org/u/r/raw/main/f.md",
        ] {
            assert_eq!(normalize(url), url);
            assert_eq!(normalize(&normalize(url)), url);
        }
    }
}

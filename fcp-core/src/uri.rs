//! Freenet URI handling: parse, canonical form, browser-style relative merge.
//!
//! The engine never parses URIs; it transmits them verbatim in the `URI`
//! field. This type exists for the layers above (crawlers, publishers) that
//! need to resolve links found inside fetched content.

use std::fmt;
use std::str::FromStr;

const KEY_TYPES: [&str; 4] = ["CHK", "KSK", "SSK", "USK"];

#[derive(Debug, thiserror::Error)]
#[error("invalid freenet uri: {0}")]
pub struct UriError(pub String);

/// A parsed Freenet address: `<site>[/path][?query][#anchor]` where site is
/// `CHK@...`, `KSK@...`, `SSK@...` or `USK@...`. Accepts an optional
/// `freenet:` scheme or a single leading slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreenetUri {
    site: String,
    path: Option<String>,
    query: Option<String>,
    anchor: Option<String>,
}

impl FreenetUri {
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let mut rest = input.trim();
        if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        }
        if let Some(stripped) = rest.strip_prefix("freenet:") {
            rest = stripped;
        }
        let valid_prefix = rest.len() > 4
            && KEY_TYPES
                .iter()
                .any(|key| rest.as_bytes().starts_with(key.as_bytes()))
            && rest.as_bytes()[3] == b'@';
        if !valid_prefix {
            return Err(UriError(input.to_string()));
        }

        let site_end = rest
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(rest.len());
        let site = rest[..site_end].to_string();
        let mut tail = &rest[site_end..];

        let mut path = None;
        if tail.starts_with('/') {
            let path_end = tail.find(|c| c == '?' || c == '#').unwrap_or(tail.len());
            path = Some(tail[..path_end].to_string());
            tail = &tail[path_end..];
        }
        let mut query = None;
        if let Some(stripped) = tail.strip_prefix('?') {
            let query_end = stripped.find('#').unwrap_or(stripped.len());
            query = Some(stripped[..query_end].to_string());
            tail = &stripped[query_end..];
        }
        let anchor = tail.strip_prefix('#').map(str::to_string);

        Ok(FreenetUri {
            site,
            path,
            query,
            anchor,
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    /// `CHK`, `KSK`, `SSK` or `USK`.
    pub fn key_type(&self) -> &str {
        &self.site[..3]
    }

    /// Whether this address points at the base page of its key:
    /// CHKs and KSKs hold a single file, SSK bases look like `/site/`,
    /// USK bases carry a site name and revision (`/site/5` or `/site-5`).
    pub fn is_root(&self) -> bool {
        let path = self.path.as_deref().unwrap_or("");
        match self.key_type() {
            "CHK" | "KSK" => true,
            "SSK" => {
                let inner = path.strip_prefix('/').and_then(|p| p.strip_suffix('/'));
                inner.is_some_and(|seg| !seg.is_empty() && !seg.contains('/'))
            }
            "USK" => usk_base(path),
            _ => false,
        }
    }

    /// Resolve a reference found relative to this URI, the way a browser
    /// would: absolute paths and full URIs win outright, fragments are
    /// merged against this URI's path with `./` and `../` handling.
    pub fn merge(&self, reference: &str) -> String {
        if reference.starts_with('/') {
            return reference.to_string();
        }
        let reference = reference.trim();
        match FreenetUri::parse(reference) {
            Ok(other) if other.site == self.site => format!(
                "{}{}",
                self.site,
                merge_paths(
                    self.path.as_deref().unwrap_or(""),
                    other.path.as_deref().unwrap_or(""),
                )
            ),
            Ok(other) => other.to_string(),
            Err(_) => format!(
                "{}{}",
                self.site,
                merge_paths(self.path.as_deref().unwrap_or(""), reference)
            ),
        }
    }
}

impl FromStr for FreenetUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FreenetUri::parse(s)
    }
}

impl fmt::Display for FreenetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.site)?;
        if let Some(path) = &self.path {
            write!(f, "{path}")?;
        }
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(anchor) = &self.anchor {
            write!(f, "#{anchor}")?;
        }
        Ok(())
    }
}

fn merge_paths(old: &str, new: &str) -> String {
    if let Some(rest) = new.strip_prefix("../") {
        let mut base = old.to_string();
        if !base.ends_with('/') {
            base = drop_last_segment(&base);
        }
        base = parent_dir(&base);
        return merge_paths(&base, rest);
    }
    if let Some(rest) = new.strip_prefix("./") {
        let mut base = old.to_string();
        if !base.ends_with('/') {
            base = parent_dir(&base);
        }
        return format!("{base}{}", rest.replace("./", ""));
    }
    if new.starts_with('/') {
        return new.to_string();
    }
    format!("{old}{new}")
}

/// Remove a trailing `/segment` entirely.
fn drop_last_segment(path: &str) -> String {
    if path.ends_with('/') {
        return path.to_string();
    }
    match path.rfind('/') {
        Some(index) => path[..index].to_string(),
        None => path.to_string(),
    }
}

/// Replace a trailing `/segment` with `/`.
fn parent_dir(path: &str) -> String {
    if path.ends_with('/') {
        return path.to_string();
    }
    match path.rfind('/') {
        Some(index) => path[..=index].to_string(),
        None => path.to_string(),
    }
}

/// `/name/5`, `/name-5` and the like: a site segment followed by a numeric
/// revision separated by `/` or `-`.
fn usk_base(path: &str) -> bool {
    let bytes = path.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'/' {
            continue;
        }
        let mut i = start + 1;
        let name_start = i;
        while i < bytes.len() && bytes[i] != b'/' && bytes[i] != b'-' {
            i += 1;
        }
        if i == name_start || i == bytes.len() {
            continue;
        }
        let mut j = i + 1;
        let digits_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_prefixed_forms() {
        for input in [
            "SSK@abc123/mysite/page.html",
            "/SSK@abc123/mysite/page.html",
            "freenet:SSK@abc123/mysite/page.html",
            "/freenet:SSK@abc123/mysite/page.html",
        ] {
            let uri = FreenetUri::parse(input).unwrap();
            assert_eq!(uri.site(), "SSK@abc123");
            assert_eq!(uri.path(), Some("/mysite/page.html"));
        }
    }

    #[test]
    fn rejects_unknown_key_types() {
        assert!(FreenetUri::parse("ABC@whatever").is_err());
        assert!(FreenetUri::parse("http://example.com").is_err());
        assert!(FreenetUri::parse("").is_err());
    }

    #[test]
    fn splits_query_and_anchor() {
        let uri = FreenetUri::parse("USK@key/Index/34/?type=text#top").unwrap();
        assert_eq!(uri.site(), "USK@key");
        assert_eq!(uri.path(), Some("/Index/34/"));
        assert_eq!(uri.query(), Some("type=text"));
        assert_eq!(uri.anchor(), Some("top"));
        assert_eq!(uri.to_string(), "USK@key/Index/34/?type=text#top");
    }

    #[test]
    fn canonical_form_drops_prefix() {
        let uri = FreenetUri::parse("freenet:KSK@gpl.txt").unwrap();
        assert_eq!(uri.to_string(), "KSK@gpl.txt");
    }

    #[test]
    fn merge_absolute_reference_wins() {
        let uri = FreenetUri::parse("SSK@key/site/page.html").unwrap();
        assert_eq!(uri.merge("/SSK@other/x"), "/SSK@other/x");
    }

    #[test]
    fn merge_other_site_returns_other() {
        let uri = FreenetUri::parse("SSK@key/site/page.html").unwrap();
        assert_eq!(uri.merge("KSK@gpl.txt"), "KSK@gpl.txt");
    }

    #[test]
    fn merge_same_site_merges_paths() {
        let uri = FreenetUri::parse("SSK@key/site/page.html").unwrap();
        assert_eq!(
            uri.merge("SSK@key/site/other.html"),
            "SSK@key/site/other.html"
        );
    }

    #[test]
    fn merge_dot_fragment_resolves_against_directory() {
        let uri = FreenetUri::parse("SSK@key/site/page.html").unwrap();
        assert_eq!(uri.merge("./image.jpg"), "SSK@key/site/image.jpg");
    }

    #[test]
    fn merge_parent_fragment_climbs_one_level() {
        let uri = FreenetUri::parse("SSK@key/site/sub/page.html").unwrap();
        assert_eq!(uri.merge("../image.jpg"), "SSK@key/site/image.jpg");
    }

    #[test]
    fn root_classification_per_key_type() {
        assert!(FreenetUri::parse("KSK@gpl.txt").unwrap().is_root());
        assert!(FreenetUri::parse("CHK@hash/file").unwrap().is_root());
        assert!(FreenetUri::parse("SSK@key/mysite/").unwrap().is_root());
        assert!(!FreenetUri::parse("SSK@key/mysite/page.html").unwrap().is_root());
        assert!(FreenetUri::parse("USK@key/Index/34/").unwrap().is_root());
        assert!(!FreenetUri::parse("USK@key/").unwrap().is_root());
    }
}

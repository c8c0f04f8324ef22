use std::sync::LazyLock;

use regex::Regex;

static RESOLUTION_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{3,4})\s*p\b").unwrap());

static HDR_LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:hdr10|hdr|dolby\s*vision|dv)\b").unwrap());

/// First capture group of `regex` in `haystack`, if any.
pub fn capture_group_1<'h>(regex: &Regex, haystack: &'h str) -> Option<&'h str> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub fn capture_group_1_owned(regex: &Regex, haystack: &str) -> Option<String> {
    capture_group_1(regex, haystack).map(str::to_owned)
}

/// Undo the `\/` escaping providers apply to URLs embedded in script bodies.
pub fn unescape_json_slashes(value: &str) -> String {
    value.replace("\\/", "/")
}

/// Pull a vertical resolution out of a quality label such as `"1080p"`,
/// `"HD 720P"` or a URL path like `video_480p.m3u8`.
pub fn parse_resolution_token(label: &str) -> Option<u32> {
    capture_group_1(&RESOLUTION_TOKEN_REGEX, label).and_then(|token| token.parse().ok())
}

/// True when a quality label advertises an HDR rendition.
pub fn is_hdr_label(label: &str) -> bool {
    HDR_LABEL_REGEX.is_match(label)
}

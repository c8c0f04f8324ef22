use std::sync::LazyLock;

use regex::Regex;

use crate::extractor::utils::unescape_json_slashes;

/// One scan rule: a name for the debug log and the pattern that pulls a
/// stream URL out of the embed markup.
pub(super) struct MarkupRule {
    pub name: &'static str,
    pub regex: &'static LazyLock<Regex>,
}

static PLAYER_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""file"\s*:\s*"([^"]+)""#).unwrap());

static SOURCES_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"sources\s*:\s*\[\s*\{[^\]]*?["']?file["']?\s*:\s*["']([^"']+)["']"#).unwrap());

static MANIFEST_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(https?://[^"'\s\\]+\.m3u8[^"'\s\\]*)"#).unwrap());

static SCRIPT_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>(.*?)</script>").unwrap());

static MEDIA_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(https?://[^"'\s\\]+\.(?:mp4|mkv|webm)[^"'\s\\]*)"#).unwrap());

/// Ordered by reliability. The first rule that yields an absolute URL wins.
static STRUCTURED_RULES: &[MarkupRule] = &[
    MarkupRule {
        name: "player-file",
        regex: &PLAYER_FILE,
    },
    MarkupRule {
        name: "sources-file",
        regex: &SOURCES_FILE,
    },
    MarkupRule {
        name: "manifest-url",
        regex: &MANIFEST_URL,
    },
];

/// Scan an embed page for a playable stream URL.
///
/// Passes, in order: the structured rules against the raw markup, the same
/// rules against each `<script>` body with `\/` escapes undone, then a last
/// generic media-file pass. Returns the matching rule name alongside the URL.
pub(super) fn scan_markup(html: &str) -> Option<(&'static str, String)> {
    for rule in STRUCTURED_RULES {
        if let Some(url) = first_url(rule.regex, html) {
            return Some((rule.name, url));
        }
    }

    for caps in SCRIPT_BODY.captures_iter(html) {
        if let Some(body) = caps.get(1) {
            let body = unescape_json_slashes(body.as_str());
            for rule in STRUCTURED_RULES {
                if let Some(url) = first_url(rule.regex, &body) {
                    return Some(("script-scan", url));
                }
            }
        }
    }

    first_url(&MEDIA_URL, html).map(|url| ("media-url", url))
}

fn first_url(regex: &Regex, haystack: &str) -> Option<String> {
    for caps in regex.captures_iter(haystack) {
        if let Some(m) = caps.get(1) {
            let candidate = unescape_json_slashes(m.as_str());
            if candidate.starts_with("http") {
                return Some(candidate);
            }
        }
    }
    None
}

use regex::Regex;
use std::sync::OnceLock;

use super::paywall::{CONTENT_END_MARKER, PAYWALL_MARKER};

/// Line the plaintext part shows in place of the upgrade teaser.
pub const PAYWALL_PLAINTEXT: &str =
    "This post is for paying subscribers only. Upgrade your subscription to keep reading.";

struct Patterns {
    dropped: Regex,
    comment: Regex,
    line_break: Regex,
    block: Regex,
    link: Regex,
    tag: Regex,
    numeric_entity: Regex,
    spaces: Regex,
    blank_lines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("plaintext pattern is valid");
        Patterns {
            dropped: re(r"(?is)<(head|style|script)\b[^>]*>.*?</(head|style|script)>"),
            comment: re(r"(?s)<!--.*?-->"),
            line_break: re(r"(?i)<br\s*/?>"),
            block: re(r"(?i)</?(p|div|h[1-6]|ul|ol|li|blockquote|table|tr|section|article|header|footer|figure|figcaption|pre|hr)\b[^>]*>"),
            link: re(r#"(?is)<a\b[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>(.*?)</a>"#),
            tag: re(r"<[^>]+>"),
            numeric_entity: re(r"&#(x[0-9a-fA-F]+|[0-9]+);"),
            spaces: re(r"[ \t\r\f]+"),
            blank_lines: re(r"\n[ \t]*\n(\s*\n)+"),
        }
    })
}

/// Derives the plaintext part of an email from its (already segment-filtered)
/// HTML.
pub fn from_html(html: &str) -> String {
    let html = replace_teaser(html);
    let p = patterns();

    let text = p.dropped.replace_all(&html, "");
    let text = p.comment.replace_all(&text, "");
    let text = p.line_break.replace_all(&text, "\n");
    let text = p.link.replace_all(&text, |caps: &regex::Captures<'_>| {
        let href = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
        let label = p.tag.replace_all(caps.get(3).map(|m| m.as_str()).unwrap_or(""), "");
        let label = label.trim();
        if href.is_empty() || label == href {
            label.to_string()
        } else if label.is_empty() {
            format!("[{}]", href)
        } else {
            format!("{} [{}]", label, href)
        }
    });
    let text = p.block.replace_all(&text, "\n\n");
    let text = p.tag.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = p.spaces.replace_all(&text, " ");

    let lines: Vec<&str> = text.split('\n').map(str::trim).collect();
    let text = lines.join("\n");
    let text = p.blank_lines.replace_all(&text, "\n\n");

    text.trim().to_string()
}

fn replace_teaser(html: &str) -> String {
    let Some(start) = html.find(PAYWALL_MARKER) else {
        return html.to_string();
    };
    let after = start + PAYWALL_MARKER.len();

    let mut out = String::with_capacity(html.len());
    out.push_str(&html[..start]);
    out.push_str("<p>");
    out.push_str(PAYWALL_PLAINTEXT);
    out.push_str("</p>");
    if let Some(end) = html[after..].find(CONTENT_END_MARKER) {
        out.push_str(&html[after + end..]);
    }
    out
}

pub fn decode_entities(text: &str) -> String {
    let text = patterns()
        .numeric_entity
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let raw = &caps[1];
            let code = match raw.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => raw.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        });

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

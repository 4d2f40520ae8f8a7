use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::segment::extract::{normalize_segment, segment_attr_regex};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn segment_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"<([a-zA-Z][a-zA-Z0-9-]*)\b[^>]*?\sdata-gh-segment\s*=\s*(?:"[^"]*"|'[^']*')[^>]*>"#,
        )
        .expect("segment block pattern is valid")
    })
}

fn attribute_strip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\s+data-gh-segment\s*=\s*(?:"[^"]*"|'[^']*')"#)
            .expect("segment attribute strip pattern is valid")
    })
}

fn any_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)\b[^>]*?(/?)>").expect("tag pattern is valid")
    })
}

/// Keeps the segment-scoped elements addressed to `target` and deletes the
/// others. With no target every block is kept. Kept blocks lose the segment
/// attribute.
pub fn apply_segment_blocks(html: &str, target: Option<&str>) -> String {
    match target.map(normalize_segment) {
        None => retain_segment_blocks(html, |_| true),
        Some(t) => retain_segment_blocks(html, |declared| declared == t),
    }
}

/// Keeps every segment-scoped element whose normalised expression satisfies
/// `keep`, deleting the rest.
pub fn retain_segment_blocks(html: &str, keep: impl Fn(&str) -> bool) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(m) = segment_block_regex().find_at(html, pos) {
        out.push_str(&html[pos..m.start()]);

        let open_tag = m.as_str();
        let declared = segment_attr_regex()
            .captures(open_tag)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|v| normalize_segment(v.as_str()))
            .unwrap_or_default();

        if keep(&declared) {
            out.push_str(&attribute_strip_regex().replace(open_tag, ""));
            pos = m.end();
            continue;
        }

        let tag_name = segment_block_regex()
            .captures(open_tag)
            .and_then(|c| c.get(1))
            .map(|n| n.as_str().to_ascii_lowercase())
            .unwrap_or_default();

        if open_tag.ends_with("/>") || VOID_ELEMENTS.contains(&tag_name.as_str()) {
            pos = m.end();
            continue;
        }

        match closing_tag_end(html, m.end(), &tag_name) {
            Some(end) => pos = end,
            None => {
                warn!(tag = %tag_name, segment = %declared, "Unclosed segment block, dropping the rest of the document");
                pos = html.len();
            }
        }
    }

    out.push_str(&html[pos..]);
    out
}

/// Byte offset just past the tag closing an element opened before `from`.
fn closing_tag_end(html: &str, from: usize, tag_name: &str) -> Option<usize> {
    let mut depth = 1usize;

    for caps in any_tag_regex().captures_iter(&html[from..]) {
        let name = caps.get(2)?.as_str();
        if !name.eq_ignore_ascii_case(tag_name) {
            continue;
        }
        let closing = caps.get(1).is_some_and(|c| !c.as_str().is_empty());
        let self_closing = caps.get(3).is_some_and(|c| !c.as_str().is_empty());

        if closing {
            depth -= 1;
            if depth == 0 {
                return caps.get(0).map(|whole| from + whole.end());
            }
        } else if !self_closing {
            depth += 1;
        }
    }

    None
}

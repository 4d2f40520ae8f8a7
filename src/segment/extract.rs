use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::filter::Filter;
use crate::render::paywall::MEMBERS_ONLY_MARKER;

pub const SEGMENT_ATTRIBUTE: &str = "data-gh-segment";
pub const FREE_SEGMENT: &str = "status:free";
pub const PAID_SEGMENT: &str = "status:-free";

pub(crate) fn segment_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"data-gh-segment\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("segment attribute pattern is valid")
    })
}

/// Canonical form of a segment expression, so `status: free` and
/// `status:free` compare equal. Unparseable expressions only have their
/// whitespace collapsed.
pub(crate) fn normalize_segment(expr: &str) -> String {
    match Filter::parse(expr) {
        Ok(filter) => filter.to_string(),
        Err(_) => expr.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Collects the distinct segment expressions used by `html`, in first-seen order.
///
/// Documents carrying the members-only marker also need the free and paid
/// status segments; those are appended after the explicit ones.
pub fn extract_segments(html: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();

    for caps in segment_attr_regex().captures_iter(html) {
        let raw = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
        let expr = normalize_segment(raw);
        if expr.is_empty() {
            continue;
        }
        if !segments.contains(&expr) {
            segments.push(expr);
        }
    }

    if html.contains(MEMBERS_ONLY_MARKER) {
        for implied in [FREE_SEGMENT, PAID_SEGMENT] {
            if !segments.iter().any(|s| s == implied) {
                segments.push(implied.to_string());
            }
        }
    }

    segments
}

/// Segments the planner partitions recipients by.
///
/// `segments` is either empty (one universal rendering) or the free/paid
/// status pair, which is mutually exclusive and covers every member. Every
/// other expression found in the document is `scoped`: it further splits the
/// status partitions by which of those expressions a member matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentSet {
    segments: Vec<String>,
    scoped: Vec<String>,
}

impl SegmentSet {
    pub fn new(segments: Vec<String>, scoped: Vec<String>) -> Self {
        Self { segments, scoped }
    }

    pub fn for_planning(extracted: &[String]) -> Self {
        if extracted.is_empty() {
            return Self::default();
        }

        let mut segments: Vec<String> = Vec::with_capacity(2);
        let mut scoped: Vec<String> = Vec::new();

        for expr in extracted {
            let pair_member = match expr.as_str() {
                FREE_SEGMENT => Some(FREE_SEGMENT),
                PAID_SEGMENT => Some(PAID_SEGMENT),
                _ => None,
            };

            match pair_member {
                Some(s) => {
                    if !segments.iter().any(|existing| existing == s) {
                        segments.push(s.to_string());
                    }
                }
                None => {
                    if !scoped.contains(expr) {
                        scoped.push(expr.clone());
                    }
                }
            }
        }

        for complement in [FREE_SEGMENT, PAID_SEGMENT] {
            if !segments.iter().any(|s| s == complement) {
                segments.push(complement.to_string());
            }
        }

        if !scoped.is_empty() {
            debug!(scoped = ?scoped, "Partitioning by scoped segment expressions");
        }

        Self { segments, scoped }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn scoped(&self) -> &[String] {
        &self.scoped
    }

    pub fn is_universal(&self) -> bool {
        self.segments.is_empty() && self.scoped.is_empty()
    }
}

/// The view of a document one batch is rendered for: its status segment plus
/// the scoped expressions every member of the batch matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SegmentKey {
    segment: Option<String>,
    scoped: Vec<String>,
}

impl SegmentKey {
    pub fn new(segment: Option<&str>, scoped: &[String]) -> Self {
        Self {
            segment: segment.map(normalize_segment),
            scoped: scoped.iter().map(|s| normalize_segment(s)).collect(),
        }
    }

    pub fn segment(&self) -> Option<&str> {
        self.segment.as_deref()
    }

    pub fn scoped(&self) -> &[String] {
        &self.scoped
    }

    /// No segment at all: every block is shown.
    pub fn is_universal(&self) -> bool {
        self.segment.is_none() && self.scoped.is_empty()
    }

    /// Whether a block declared for `expr` belongs in this view.
    pub fn includes(&self, expr: &str) -> bool {
        let expr = normalize_segment(expr);
        self.is_universal()
            || self.segment.as_deref() == Some(expr.as_str())
            || self.scoped.iter().any(|s| *s == expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_free_content_is_empty() {
        assert!(extract_segments("<p>Hello</p><p>World</p>").is_empty());
        assert!(SegmentSet::for_planning(&[]).is_universal());
    }

    #[test]
    fn test_explicit_segments_in_first_seen_order() {
        let html = r#"
            <div data-gh-segment="status:-free">paid</div>
            <div data-gh-segment='status:free'>free</div>
            <div data-gh-segment="status:-free">paid again</div>
        "#;
        assert_eq!(extract_segments(html), vec!["status:-free", "status:free"]);
    }

    #[test]
    fn test_members_only_marker_appends_status_pair() {
        let html = "<p>Free</p><!--members-only--><p>Paid</p>";
        assert_eq!(extract_segments(html), vec!["status:free", "status:-free"]);
    }

    #[test]
    fn test_marker_dedupes_against_explicit_segments() {
        let html = r#"<p data-gh-segment="status:-free">x</p><!--members-only--><p>y</p>"#;
        assert_eq!(extract_segments(html), vec!["status:-free", "status:free"]);
    }

    #[test]
    fn test_planning_set_adds_complement() {
        let set = SegmentSet::for_planning(&["status:-free".to_string()]);
        assert_eq!(set.segments(), &["status:-free", "status:free"]);
        assert!(set.scoped().is_empty());
    }

    #[test]
    fn test_planning_set_keeps_scoped_expressions() {
        let extracted = vec!["label:vip".to_string(), "status:free".to_string()];
        let set = SegmentSet::for_planning(&extracted);
        assert_eq!(set.segments(), &["status:free", "status:-free"]);
        assert_eq!(set.scoped(), &["label:vip"]);
        assert!(!set.is_universal());
    }

    #[test]
    fn test_equivalent_expressions_normalise_equal() {
        assert_eq!(normalize_segment("status: free"), normalize_segment("status:free"));
        assert_eq!(
            normalize_segment("status:-free , label.slug:VIP"),
            "status:-free,label:VIP"
        );
        let html = r#"<p data-gh-segment="status: free">a</p><p data-gh-segment="status:free">b</p>"#;
        assert_eq!(extract_segments(html), vec!["status:free"]);
    }

    #[test]
    fn test_segment_key_includes() {
        let key = SegmentKey::new(Some("status:-free"), &["status:-free,label.slug:VIP".to_string()]);
        assert!(key.includes("status:-free"));
        assert!(key.includes("status:-free, label:VIP"));
        assert!(!key.includes("status:free"));
        assert!(!key.includes("label:gold"));

        let universal = SegmentKey::new(None, &[]);
        assert!(universal.is_universal());
        assert!(universal.includes("status:free"));
    }

    #[test]
    fn test_whitespace_in_attribute_is_normalised() {
        let html = r#"<div data-gh-segment=" status:free ">x</div>"#;
        assert_eq!(extract_segments(html), vec!["status:free"]);
    }
}

//! Members-only and teaser handling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::segment::{Filter, StatusClass};

pub const MEMBERS_ONLY_MARKER: &str = "<!--members-only-->";
pub const PAYWALL_MARKER: &str = "<!-- PAYWALL -->";
pub const CONTENT_END_MARKER: &str = "<!-- POST CONTENT END -->";

/// Who a post is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Members,
    Paid,
    Tiers,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Members => "members",
            Visibility::Paid => "paid",
            Visibility::Tiers => "tiers",
        }
    }

    /// Whether free members see only the part of the post above the
    /// members-only marker.
    pub fn gates_free_members(&self) -> bool {
        matches!(self, Visibility::Paid | Visibility::Tiers)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "members" => Ok(Visibility::Members),
            "paid" => Ok(Visibility::Paid),
            "tiers" => Ok(Visibility::Tiers),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

/// The audience a rendering is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Unknown,
    Free,
    Paid,
}

impl Audience {
    pub fn from_segment(segment: Option<&str>) -> Self {
        let Some(expr) = segment else {
            return Audience::Unknown;
        };
        match Filter::parse(expr).ok().and_then(|f| f.implied_status()) {
            Some(StatusClass::Free) => Audience::Free,
            Some(StatusClass::NonFree) => Audience::Paid,
            None => Audience::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentGate {
    /// Members-only content shown, teaser removed.
    Full,
    /// Members-only content removed, teaser kept.
    Paywalled,
}

pub fn decide(visibility: Option<Visibility>, audience: Audience) -> ContentGate {
    match (visibility, audience) {
        (Some(v), Audience::Free) if v.gates_free_members() => ContentGate::Paywalled,
        _ => ContentGate::Full,
    }
}

pub fn apply(html: &str, gate: ContentGate) -> String {
    let members_only = html.find(MEMBERS_ONLY_MARKER);

    match (gate, members_only) {
        (ContentGate::Paywalled, Some(mo)) => {
            let after = mo + MEMBERS_ONLY_MARKER.len();
            let resume = find_from(html, PAYWALL_MARKER, after)
                .or_else(|| find_from(html, CONTENT_END_MARKER, after));

            let mut out = String::with_capacity(html.len());
            out.push_str(&html[..mo]);
            if let Some(resume) = resume {
                out.push_str(&html[resume..]);
            }
            out
        }
        _ => remove_teaser(html),
    }
}

fn remove_teaser(html: &str) -> String {
    let Some(start) = html.find(PAYWALL_MARKER) else {
        return html.to_string();
    };

    let mut out = String::with_capacity(html.len());
    out.push_str(&html[..start]);
    if let Some(end) = find_from(html, CONTENT_END_MARKER, start) {
        out.push_str(&html[end..]);
    }
    out
}

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEASER_POST: &str = "<p>Intro</p><!--members-only--><p>Secret</p>\
        <!-- PAYWALL --><p>Upgrade</p><!-- POST CONTENT END --><p>Footer</p>";

    #[test]
    fn test_decide() {
        assert_eq!(decide(Some(Visibility::Paid), Audience::Free), ContentGate::Paywalled);
        assert_eq!(decide(Some(Visibility::Tiers), Audience::Free), ContentGate::Paywalled);
        assert_eq!(decide(Some(Visibility::Members), Audience::Free), ContentGate::Full);
        assert_eq!(decide(Some(Visibility::Public), Audience::Free), ContentGate::Full);
        assert_eq!(decide(Some(Visibility::Paid), Audience::Paid), ContentGate::Full);
        assert_eq!(decide(Some(Visibility::Paid), Audience::Unknown), ContentGate::Full);
        assert_eq!(decide(None, Audience::Free), ContentGate::Full);
    }

    #[test]
    fn test_audience_from_segment() {
        assert_eq!(Audience::from_segment(None), Audience::Unknown);
        assert_eq!(Audience::from_segment(Some("status:free")), Audience::Free);
        assert_eq!(Audience::from_segment(Some("status:-free")), Audience::Paid);
        assert_eq!(Audience::from_segment(Some("label:vip")), Audience::Unknown);
    }

    #[test]
    fn test_paywalled_keeps_teaser_and_footer() {
        assert_eq!(
            apply(TEASER_POST, ContentGate::Paywalled),
            "<p>Intro</p><!-- PAYWALL --><p>Upgrade</p><!-- POST CONTENT END --><p>Footer</p>"
        );
    }

    #[test]
    fn test_full_removes_teaser() {
        assert_eq!(
            apply(TEASER_POST, ContentGate::Full),
            "<p>Intro</p><!--members-only--><p>Secret</p><!-- POST CONTENT END --><p>Footer</p>"
        );
    }

    #[test]
    fn test_paywalled_without_teaser_resumes_at_content_end() {
        let html = "<p>A</p><!--members-only--><p>B</p><!-- POST CONTENT END --><p>C</p>";
        assert_eq!(
            apply(html, ContentGate::Paywalled),
            "<p>A</p><!-- POST CONTENT END --><p>C</p>"
        );
    }

    #[test]
    fn test_paywalled_without_later_markers_truncates() {
        let html = "<p>Free</p><!--members-only--><p>Paid</p>";
        assert_eq!(apply(html, ContentGate::Paywalled), "<p>Free</p>");
        assert_eq!(apply(html, ContentGate::Full), html);
    }

    #[test]
    fn test_teaser_without_content_end_runs_to_document_end() {
        let html = "<p>A</p><!-- PAYWALL --><p>Upgrade</p>";
        assert_eq!(apply(html, ContentGate::Full), "<p>A</p>");
    }

    #[test]
    fn test_paywalled_without_members_only_marker_is_full() {
        let html = "<p>A</p><!-- PAYWALL --><p>Upgrade</p>";
        assert_eq!(apply(html, ContentGate::Paywalled), "<p>A</p>");
    }
}

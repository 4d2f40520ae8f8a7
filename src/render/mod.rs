//! Per-segment views of one canonical post document.

pub mod html;
pub mod links;
pub mod paywall;
pub mod plaintext;
pub mod replacements;

use serde::Serialize;

use crate::segment::SegmentKey;

pub use paywall::{Audience, ContentGate, Visibility};
pub use plaintext::PAYWALL_PLAINTEXT;
pub use replacements::{parse_replacements, Replacement, ReplacementFormat};

/// The canonical rendered post an email is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub html: String,
    /// `None` when the post's visibility is not known.
    pub visibility: Option<Visibility>,
}

impl Document {
    pub fn new(html: impl Into<String>, visibility: Option<Visibility>) -> Self {
        Self {
            html: html.into(),
            visibility,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedContent {
    pub html: String,
    pub plaintext: String,
}

/// Produces the view of `document` seen by members of `segment`.
///
/// `None` renders for an unknown audience: every segment block is unwrapped,
/// members-only content is shown and the upgrade teaser is hidden.
/// Personalization tokens are left in place.
pub fn render_for_segment(document: &Document, segment: Option<&str>) -> RenderedContent {
    render_for_key(document, &SegmentKey::new(segment, &[]))
}

/// Like [`render_for_segment`], additionally keeping blocks for every scoped
/// expression in `key`. The paywall follows the status segment alone.
pub fn render_for_key(document: &Document, key: &SegmentKey) -> RenderedContent {
    let html = html::retain_segment_blocks(&document.html, |expr| key.includes(expr));

    let gate = paywall::decide(document.visibility, Audience::from_segment(key.segment()));
    let html = paywall::apply(&html, gate);

    let plaintext = plaintext::from_html(&html);
    RenderedContent { html, plaintext }
}

//! Veracite Citations: normalization and correlation for inline citation markup
//!
//! LLM-generated text carries inline `<cite … />` markers pointing claims at
//! spans of source documents, URLs, or audio/video timestamps. Years of schema
//! drift mean those markers arrive in several historical attribute spellings
//! and both self-closing and wrapped forms. This crate turns that input into
//! one canonical form and correlates verification results back onto it:
//!
//! ```text
//! raw LLM text ──► TagNormalizer ──► canonical tags
//!                                        │
//!                                        ▼
//!                                extract_citations ──► Citation records
//!                                        │                   │
//!                                        ▼                   ▼
//!                                replace_citations ◄── citation_key
//!                                        │            (content fingerprint)
//!                                        ▼
//!                           final prose / status indicators
//! ```
//!
//! Correlation is by *content*, not by caller-supplied ordinal position: every
//! citation has a stable [`citation_key`] derived from its semantic fields, so
//! re-numbering or re-ordering citations never detaches them from their
//! verification results. A legacy 1-based ordinal lookup remains as a
//! fallback for old callers.
//!
//! The normalizer never fails: unrecognized or malformed fragments pass
//! through unchanged, because this text is always user-facing and one bad
//! marker must not corrupt a whole document.

pub mod extract;
pub mod key;
pub mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Citation model
// ============================================================================

/// One inline reference in generated text.
///
/// The kind is resolved at the parser boundary, so downstream code cannot
/// read a field the kind does not support (no `timestamps` on a document
/// citation, no `line_ids` on a media citation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Citation {
    Document(SpanCitation),
    Url(SpanCitation),
    AudioVideo(MediaCitation),
}

/// Citation into a text span of a document or URL source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanCitation {
    /// Owning source attachment.
    pub attachment_id: String,
    /// The claimed text.
    pub full_phrase: String,
    /// Optional highlighted sub-span of the phrase.
    pub anchor_text: Option<String>,
    /// Ordered line numbers, empty when the source has no line structure.
    pub line_ids: Vec<u32>,
    /// Raw page id as it appeared in the markup, e.g. `page_1_index_0`.
    pub start_page_id: Option<String>,
    /// Page number derived from `start_page_id`.
    pub page_number: Option<u32>,
    /// Rectangle for image-region citations.
    pub selection: Option<Selection>,
    /// Free-text annotation emitted by the generator.
    pub reasoning: Option<String>,
    /// Free-text annotation emitted by the generator.
    pub value: Option<String>,
}

/// Citation into an audio/video source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaCitation {
    pub attachment_id: String,
    pub full_phrase: String,
    /// Ordered timestamps as written in the markup.
    pub timestamps: Vec<String>,
    pub reasoning: Option<String>,
    pub value: Option<String>,
}

/// Rectangle selecting an image region, in source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Citation {
    pub fn attachment_id(&self) -> &str {
        match self {
            Citation::Document(c) | Citation::Url(c) => &c.attachment_id,
            Citation::AudioVideo(c) => &c.attachment_id,
        }
    }

    pub fn full_phrase(&self) -> &str {
        match self {
            Citation::Document(c) | Citation::Url(c) => &c.full_phrase,
            Citation::AudioVideo(c) => &c.full_phrase,
        }
    }

    pub fn anchor_text(&self) -> Option<&str> {
        match self {
            Citation::Document(c) | Citation::Url(c) => c.anchor_text.as_deref(),
            Citation::AudioVideo(_) => None,
        }
    }
}

// ============================================================================
// Verification model
// ============================================================================

/// External judgment of whether a citation's claimed text is present in its
/// source. Produced by the verification service; read-only here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// `None` models the wire's explicit `null` status.
    pub status: Option<VerificationStatus>,
    pub match_snippet: Option<String>,
    pub page: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque reference to an evidence image, if the service captured one.
    pub evidence_image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Found,
    FoundAnchorTextOnly,
    FoundPhraseMissedAnchorText,
    FoundOnOtherPage,
    FoundOnOtherLine,
    PartialTextFound,
    FirstWordFound,
    NotFound,
    Pending,
    Loading,
}

/// Presentation indicator for a verification status.
///
/// This mapping is a contract consumed by the external renderer; the exact
/// characters matter.
pub fn status_indicator(status: Option<VerificationStatus>) -> &'static str {
    use VerificationStatus::*;
    match status {
        Some(Found) => "☑",
        Some(
            FoundOnOtherPage
            | FoundOnOtherLine
            | PartialTextFound
            | FirstWordFound
            | FoundPhraseMissedAnchorText
            | FoundAnchorTextOnly,
        ) => "✅",
        Some(NotFound) => "❌",
        Some(Pending | Loading) | None => "⌛",
    }
}

// ============================================================================
// Warning hook
// ============================================================================

/// Callback invoked when the normalizer or extractor skips over markup it
/// cannot make sense of. Injected at construction rather than routed through
/// a process-wide logger; the default forwards to `tracing::warn!`.
pub type WarnHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub(crate) fn default_warn_handler() -> WarnHandler {
    Arc::new(|message| tracing::warn!(target: "veracite::citations", "{message}"))
}

// ============================================================================
// Re-exports
// ============================================================================

pub use extract::{extract_citations, replace_citations, ReplaceOptions};
pub use key::{citation_key, request_fingerprint, CITATION_KEY_PREFIX, REQUEST_FINGERPRINT_PREFIX};
pub use normalize::{normalize_citation_tags, TagNormalizer};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_mapping_is_bit_exact() {
        use VerificationStatus::*;
        assert_eq!(status_indicator(Some(Found)), "☑");
        for partial in [
            FoundOnOtherPage,
            FoundOnOtherLine,
            PartialTextFound,
            FirstWordFound,
            FoundPhraseMissedAnchorText,
            FoundAnchorTextOnly,
        ] {
            assert_eq!(status_indicator(Some(partial)), "✅");
        }
        assert_eq!(status_indicator(Some(NotFound)), "❌");
        assert_eq!(status_indicator(Some(Pending)), "⌛");
        assert_eq!(status_indicator(Some(Loading)), "⌛");
        assert_eq!(status_indicator(None), "⌛");
    }

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&VerificationStatus::FoundPhraseMissedAnchorText).unwrap();
        assert_eq!(json, "\"found_phrase_missed_anchor_text\"");
        let parsed: VerificationStatus = serde_json::from_str("\"not_found\"").unwrap();
        assert_eq!(parsed, VerificationStatus::NotFound);
    }
}

//! Content-derived citation keys (versioned, deterministic)
//!
//! Verification results come back asynchronously and must land on the right
//! citation even after callers re-number or re-order their maps, so identity
//! is derived from citation *content*, never from storage position.
//!
//! Encoding: a fixed-order key-view of the citation's semantic fields is
//! serialized with `serde_json` (struct field order is declaration order,
//! hence deterministic) and digested with SHA-256:
//!
//! - citation key: `"cite-sha256:<64 lowercase hex digits>"`
//! - request fingerprint: `"verify-sha256:<64 lowercase hex digits>"`
//!
//! Free-text annotations (`reasoning`, `value`) and the raw `start_page_id`
//! spelling are excluded: they do not change what span is being cited.

use crate::{Citation, MediaCitation, Selection, SpanCitation};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix used in serialized citation keys.
pub const CITATION_KEY_PREFIX: &str = "cite-sha256:";

/// Prefix used in serialized verification-request fingerprints.
pub const REQUEST_FINGERPRINT_PREFIX: &str = "verify-sha256:";

/// The fixed, ordered field subset a citation key is computed over.
#[derive(Debug, Serialize)]
struct KeyFields<'a> {
    kind: &'static str,
    attachment_id: &'a str,
    full_phrase: &'a str,
    anchor_text: Option<&'a str>,
    line_ids: &'a [u32],
    page_number: Option<u32>,
    timestamps: Option<&'a [String]>,
    selection: Option<&'a Selection>,
}

fn span_fields<'a>(kind: &'static str, c: &'a SpanCitation) -> KeyFields<'a> {
    KeyFields {
        kind,
        attachment_id: &c.attachment_id,
        full_phrase: &c.full_phrase,
        anchor_text: c.anchor_text.as_deref(),
        line_ids: c.line_ids.as_slice(),
        page_number: c.page_number,
        timestamps: None,
        selection: c.selection.as_ref(),
    }
}

fn media_fields(c: &MediaCitation) -> KeyFields<'_> {
    KeyFields {
        kind: "audio_video",
        attachment_id: &c.attachment_id,
        full_phrase: &c.full_phrase,
        anchor_text: None,
        line_ids: &[],
        page_number: None,
        timestamps: Some(c.timestamps.as_slice()),
        selection: None,
    }
}

/// Compute the stable content key for a citation.
///
/// Pure function of citation content: invariant to caller labels, ordinals,
/// and source attribute order; distinct whenever `full_phrase`,
/// `anchor_text`, `line_ids`, `page_number`, `timestamps`, or `selection`
/// differ.
pub fn citation_key(citation: &Citation) -> String {
    let fields = match citation {
        Citation::Document(c) => span_fields("document", c),
        Citation::Url(c) => span_fields("url", c),
        Citation::AudioVideo(c) => media_fields(c),
    };

    // serde_json only fails on non-finite floats in `selection`; fall back to
    // the Debug rendering so the key function stays total.
    let bytes =
        serde_json::to_vec(&fields).unwrap_or_else(|_| format!("{fields:?}").into_bytes());

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{CITATION_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Compute the composite fingerprint for one verification request: the
/// attachment plus the *set* of citation contents, independent of the
/// caller's map labels and iteration order.
pub fn request_fingerprint<'a, I>(attachment_id: &str, citations: I) -> String
where
    I: IntoIterator<Item = &'a Citation>,
{
    let mut keys: Vec<String> = citations.into_iter().map(citation_key).collect();
    keys.sort();
    keys.dedup();

    let mut hasher = Sha256::new();
    hasher.update(attachment_id.as_bytes());
    for key in &keys {
        // 0xFF never occurs in UTF-8, so the separator is unambiguous.
        hasher.update([0xFF]);
        hasher.update(key.as_bytes());
    }
    format!("{REQUEST_FINGERPRINT_PREFIX}{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(full_phrase: &str, line_ids: &[u32]) -> SpanCitation {
        SpanCitation {
            attachment_id: "abc123".to_string(),
            full_phrase: full_phrase.to_string(),
            anchor_text: Some("anchor".to_string()),
            line_ids: line_ids.to_vec(),
            start_page_id: Some("page_1_index_0".to_string()),
            page_number: Some(1),
            selection: None,
            reasoning: None,
            value: None,
        }
    }

    #[test]
    fn key_has_expected_prefix_and_width() {
        let key = citation_key(&Citation::Document(span("x", &[1])));
        assert!(key.starts_with(CITATION_KEY_PREFIX));
        assert_eq!(key.len(), CITATION_KEY_PREFIX.len() + 64);
    }

    #[test]
    fn equal_content_means_equal_key() {
        let a = Citation::Document(span("Revenue grew 45%", &[1, 2, 3]));
        let b = Citation::Document(span("Revenue grew 45%", &[1, 2, 3]));
        assert_eq!(citation_key(&a), citation_key(&b));
    }

    #[test]
    fn annotations_do_not_affect_the_key() {
        let plain = span("x", &[1]);
        let mut annotated = plain.clone();
        annotated.reasoning = Some("because".to_string());
        annotated.value = Some("extra".to_string());
        assert_eq!(
            citation_key(&Citation::Document(plain)),
            citation_key(&Citation::Document(annotated))
        );
    }

    #[test]
    fn raw_page_id_spelling_does_not_affect_the_key() {
        let a = span("x", &[1]);
        let mut b = a.clone();
        b.start_page_id = Some("page_1_index_3".to_string());
        assert_eq!(
            citation_key(&Citation::Document(a)),
            citation_key(&Citation::Document(b))
        );
    }

    #[test]
    fn line_ids_change_the_key() {
        let a = Citation::Document(span("x", &[1, 2, 3]));
        let b = Citation::Document(span("x", &[1, 2, 4]));
        assert_ne!(citation_key(&a), citation_key(&b));
    }

    #[test]
    fn selection_changes_the_key() {
        let mut with_selection = span("x", &[1]);
        with_selection.selection = Some(Selection {
            left: 1.0,
            top: 2.0,
            width: 30.0,
            height: 40.0,
        });
        assert_ne!(
            citation_key(&Citation::Document(span("x", &[1]))),
            citation_key(&Citation::Document(with_selection))
        );
    }

    #[test]
    fn phrase_changes_the_key() {
        let a = Citation::Document(span("Revenue grew 45%", &[1]));
        let b = Citation::Document(span("Revenue grew 46%", &[1]));
        assert_ne!(citation_key(&a), citation_key(&b));
    }

    #[test]
    fn kind_is_part_of_the_key() {
        let doc = Citation::Document(span("x", &[1]));
        let url = Citation::Url(span("x", &[1]));
        assert_ne!(citation_key(&doc), citation_key(&url));
    }

    #[test]
    fn fingerprint_ignores_citation_order() {
        let a = Citation::Document(span("first", &[1]));
        let b = Citation::Document(span("second", &[2]));
        assert_eq!(
            request_fingerprint("abc123", [&a, &b]),
            request_fingerprint("abc123", [&b, &a])
        );
    }

    #[test]
    fn fingerprint_tracks_content_changes() {
        let a = Citation::Document(span("first", &[1]));
        let b = Citation::Document(span("first", &[1, 2]));
        assert_ne!(
            request_fingerprint("abc123", [&a]),
            request_fingerprint("abc123", [&b])
        );
        assert_ne!(
            request_fingerprint("abc123", [&a]),
            request_fingerprint("other", [&a])
        );
    }
}

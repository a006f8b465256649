//! Citation extraction and replacement
//!
//! Runs after (and internally through) the normalizer, so it only ever sees
//! canonical self-closing markers. Two modes:
//!
//! - extraction: structured [`Citation`] records for the request layer;
//! - replacement: strip markers from prose, optionally leaving the anchor
//!   text in place and/or emitting a verification status indicator.
//!
//! Result resolution per marker occurrence: content key first, then the
//! legacy 1-based ordinal key, then unresolved (renders as pending). A
//! citation that cannot be resolved never fails the document.

use crate::{
    citation_key, normalize_citation_tags, status_indicator, Citation, MediaCitation, Selection,
    SpanCitation, Verification,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Options for [`replace_citations`]. Defaults fully elide markers, leaving
/// bare prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceOptions {
    /// Emit the marker's anchor text at its position, before any indicator.
    pub leave_anchor_text_behind: bool,
    /// Emit the status indicator for each marker.
    pub show_verification_status: bool,
}

/// Parse all citation markers in `text` into structured records, normalizing
/// drifted markup first. Malformed fragments are skipped, not errors.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let normalized = normalize_citation_tags(text);
    scan_canonical(&normalized)
        .into_iter()
        .map(|marker| marker.citation)
        .collect()
}

/// Replace every citation marker in `text` according to `options`,
/// correlating verification results by content key with a legacy ordinal
/// fallback. Pure function; `verifications` is keyed by citation key (or by
/// 1-based ordinals as decimal strings for legacy callers).
pub fn replace_citations(
    text: &str,
    verifications: Option<&HashMap<String, Verification>>,
    options: &ReplaceOptions,
) -> String {
    let normalized = normalize_citation_tags(text);
    let markers = scan_canonical(&normalized);

    let mut out = String::with_capacity(normalized.len());
    let mut pos = 0;

    for (index, marker) in markers.iter().enumerate() {
        out.push_str(&normalized[pos..marker.start]);

        if options.leave_anchor_text_behind {
            if let Some(anchor) = marker.citation.anchor_text() {
                out.push_str(anchor);
            }
        }
        if options.show_verification_status {
            let ordinal_key = (index + 1).to_string();
            let verification = verifications.and_then(|map| {
                map.get(&citation_key(&marker.citation))
                    .or_else(|| map.get(&ordinal_key))
            });
            out.push_str(status_indicator(verification.and_then(|v| v.status)));
        }

        pos = marker.end;
    }

    out.push_str(&normalized[pos..]);
    out.trim().to_string()
}

// ============================================================================
// Canonical marker scanning
// ============================================================================

struct CanonicalMarker {
    citation: Citation,
    start: usize,
    end: usize,
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<cite((?:\s+[A-Za-z_][A-Za-z0-9_]*="(?:\\.|[^"\\])*")*)\s*/>"#).unwrap()
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)="((?:\\.|[^"\\])*)""#).unwrap()
    })
}

fn scan_canonical(normalized: &str) -> Vec<CanonicalMarker> {
    marker_re()
        .captures_iter(normalized)
        .map(|cap| {
            let whole = cap.get(0).unwrap();
            let attrs: Vec<(String, String)> = attr_re()
                .captures_iter(cap.get(1).map_or("", |m| m.as_str()))
                .map(|attr| (attr[1].to_string(), unescape_value(&attr[2])))
                .collect();
            CanonicalMarker {
                citation: citation_from_attrs(&attrs),
                start: whole.start(),
                end: whole.end(),
            }
        })
        .collect()
}

/// Undo the canonical quote escaping to recover the literal value text.
fn unescape_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && matches!(chars[i + 1], '\'' | '"') {
            out.push(chars[i + 1]);
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Build the tagged-union record for one marker. Missing fields degrade to
/// empty values rather than failing; kind is resolved here so downstream
/// code can only see the fields its kind supports.
fn citation_from_attrs(attrs: &[(String, String)]) -> Citation {
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };

    let attachment_id = get("attachment_id").unwrap_or_default();
    let full_phrase = get("full_phrase").unwrap_or_default();
    let reasoning = get("reasoning");
    let value = get("value");

    if let Some(timestamps) = get("timestamps") {
        return Citation::AudioVideo(MediaCitation {
            attachment_id,
            full_phrase,
            timestamps: timestamps
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            reasoning,
            value,
        });
    }

    let start_page_id = get("start_page_id");
    let span = SpanCitation {
        page_number: start_page_id.as_deref().and_then(parse_page_number),
        attachment_id,
        full_phrase,
        anchor_text: get("anchor_text"),
        line_ids: get("line_ids")
            .map(|ids| {
                ids.split(',')
                    .filter_map(|id| id.trim().parse::<u32>().ok())
                    .collect()
            })
            .unwrap_or_default(),
        start_page_id,
        selection: get("selection").as_deref().and_then(parse_selection),
        reasoning,
        value,
    };

    if span.attachment_id.starts_with("http://") || span.attachment_id.starts_with("https://") {
        Citation::Url(span)
    } else {
        Citation::Document(span)
    }
}

/// Page ids look like `page_1_index_0`; plain integers are also accepted.
fn parse_page_number(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.trim().parse::<u32>() {
        return Some(n);
    }
    let rest = raw.strip_prefix("page_")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Selections are written `left,top,width,height`.
fn parse_selection(raw: &str) -> Option<Selection> {
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f64>());
    let (left, top, width, height) = (
        parts.next()?.ok()?,
        parts.next()?.ok()?,
        parts.next()?.ok()?,
        parts.next()?.ok()?,
    );
    if parts.next().is_some() {
        return None;
    }
    let rect = Selection {
        left,
        top,
        width,
        height,
    };
    [left, top, width, height]
        .iter()
        .all(|v| v.is_finite())
        .then_some(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VerificationStatus;

    const SCENARIO_INPUT: &str = "Revenue grew 45%<cite attachment_id='abc123' key_span='Revenue Growth' full_phrase='Revenue grew 45%' start_page_key='page_1_index_0' line_ids='1-3' /> last year.";

    #[test]
    fn default_replace_strips_markers_to_bare_prose() {
        let out = replace_citations(SCENARIO_INPUT, None, &ReplaceOptions::default());
        assert_eq!(out, "Revenue grew 45% last year.");
    }

    #[test]
    fn leave_anchor_text_behind_emits_anchor_at_marker_position() {
        let options = ReplaceOptions {
            leave_anchor_text_behind: true,
            ..Default::default()
        };
        let out = replace_citations(SCENARIO_INPUT, None, &options);
        assert_eq!(out, "Revenue grew 45%Revenue Growth last year.");
    }

    #[test]
    fn extracts_structured_document_citation() {
        let citations = extract_citations(SCENARIO_INPUT);
        assert_eq!(citations.len(), 1);
        let Citation::Document(span) = &citations[0] else {
            panic!("expected a document citation");
        };
        assert_eq!(span.attachment_id, "abc123");
        assert_eq!(span.full_phrase, "Revenue grew 45%");
        assert_eq!(span.anchor_text.as_deref(), Some("Revenue Growth"));
        assert_eq!(span.line_ids, vec![1, 2, 3]);
        assert_eq!(span.start_page_id.as_deref(), Some("page_1_index_0"));
        assert_eq!(span.page_number, Some(1));
    }

    #[test]
    fn textual_and_structural_line_ids_collapse_to_one_key() {
        let extracted = &extract_citations(SCENARIO_INPUT)[0];
        let constructed = Citation::Document(SpanCitation {
            attachment_id: "abc123".to_string(),
            full_phrase: "Revenue grew 45%".to_string(),
            anchor_text: Some("Revenue Growth".to_string()),
            line_ids: vec![1, 2, 3],
            start_page_id: Some("page_1_index_0".to_string()),
            page_number: Some(1),
            ..Default::default()
        });
        assert_eq!(citation_key(extracted), citation_key(&constructed));
    }

    #[test]
    fn key_is_invariant_to_source_attribute_order() {
        let reordered = "Revenue grew 45%<cite line_ids='1,2,3' full_phrase='Revenue grew 45%' start_page_key='page_1_index_0' attachment_id='abc123' key_span='Revenue Growth' /> last year.";
        assert_eq!(
            citation_key(&extract_citations(SCENARIO_INPUT)[0]),
            citation_key(&extract_citations(reordered)[0]),
        );
    }

    #[test]
    fn http_attachment_ids_become_url_citations() {
        let text = "<cite attachment_id='https://example.com/report' full_phrase='x' />";
        assert!(matches!(&extract_citations(text)[0], Citation::Url(_)));
    }

    #[test]
    fn timestamps_make_an_audio_video_citation() {
        let text = "<cite attachment_id='a' full_phrase='x' timestamps='10,11,12' />";
        let Citation::AudioVideo(media) = &extract_citations(text)[0] else {
            panic!("expected audio-video");
        };
        assert_eq!(media.timestamps, vec!["10", "11", "12"]);
    }

    #[test]
    fn selection_parses_as_rectangle() {
        let text = "<cite attachment_id='a' full_phrase='x' selection='1.5,2,30,40' />";
        let Citation::Document(span) = &extract_citations(text)[0] else {
            panic!("expected document");
        };
        assert_eq!(
            span.selection,
            Some(Selection {
                left: 1.5,
                top: 2.0,
                width: 30.0,
                height: 40.0
            })
        );
    }

    #[test]
    fn status_resolution_prefers_content_key() {
        let key = citation_key(&extract_citations(SCENARIO_INPUT)[0]);
        let mut verifications = HashMap::new();
        verifications.insert(
            key,
            Verification {
                status: Some(VerificationStatus::Found),
                ..Default::default()
            },
        );
        // A conflicting ordinal entry must lose to the content key.
        verifications.insert(
            "1".to_string(),
            Verification {
                status: Some(VerificationStatus::NotFound),
                ..Default::default()
            },
        );
        let options = ReplaceOptions {
            show_verification_status: true,
            ..Default::default()
        };
        let out = replace_citations(SCENARIO_INPUT, Some(&verifications), &options);
        assert_eq!(out, "Revenue grew 45%☑ last year.");
    }

    #[test]
    fn falls_back_to_legacy_ordinal_keys() {
        let mut verifications = HashMap::new();
        verifications.insert(
            "1".to_string(),
            Verification {
                status: Some(VerificationStatus::PartialTextFound),
                ..Default::default()
            },
        );
        let options = ReplaceOptions {
            show_verification_status: true,
            ..Default::default()
        };
        let out = replace_citations(SCENARIO_INPUT, Some(&verifications), &options);
        assert_eq!(out, "Revenue grew 45%✅ last year.");
    }

    #[test]
    fn unresolved_citations_render_pending() {
        let options = ReplaceOptions {
            show_verification_status: true,
            ..Default::default()
        };
        let out = replace_citations(SCENARIO_INPUT, None, &options);
        assert_eq!(out, "Revenue grew 45%⌛ last year.");

        let empty = HashMap::new();
        let out = replace_citations(SCENARIO_INPUT, Some(&empty), &options);
        assert_eq!(out, "Revenue grew 45%⌛ last year.");
    }

    #[test]
    fn anchor_text_precedes_indicator() {
        let options = ReplaceOptions {
            leave_anchor_text_behind: true,
            show_verification_status: true,
        };
        let out = replace_citations(SCENARIO_INPUT, None, &options);
        assert_eq!(out, "Revenue grew 45%Revenue Growth⌛ last year.");
    }

    #[test]
    fn malformed_markers_are_not_extracted_but_survive_replacement() {
        let text = "intro <cite broken> tail";
        assert!(extract_citations(text).is_empty());
        assert_eq!(
            replace_citations(text, None, &ReplaceOptions::default()),
            "intro <cite broken> tail"
        );
    }
}

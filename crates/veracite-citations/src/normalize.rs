//! Tag grammar normalizer: one canonical form for drifted citation markup
//!
//! The citation micro-language has been through several attribute-naming
//! schemes (`fileId`, `key_span`, `start_page_key`, camelCase variants) and
//! two element forms (self-closing and wrapped-content). The normalizer
//! accepts all of them and emits exactly one shape:
//!
//! ```text
//! <cite attachment_id="…" start_page_id="…" full_phrase="…" line_ids="1,2,3" />
//! ```
//!
//! Contract: never fails. A fragment the scanner cannot make sense of is
//! copied through verbatim and reported via the warning hook; the surrounding
//! prose is always preserved. Normalization is idempotent.

use crate::{default_warn_handler, WarnHandler};
use regex::Regex;

/// Canonical attribute order for document/url markers.
const SPAN_ATTR_ORDER: &[&str] = &[
    "attachment_id",
    "reasoning",
    "start_page_id",
    "full_phrase",
    "anchor_text",
    "line_ids",
    "value",
];

/// Canonical attribute order for audio/video markers.
const MEDIA_ATTR_ORDER: &[&str] = &[
    "attachment_id",
    "full_phrase",
    "timestamps",
    "reasoning",
    "value",
];

/// Ranges wider than this pass through unexpanded. Legacy input never comes
/// close; anything that does is corrupt markup, not a citation.
const MAX_RANGE_SPAN: u64 = 10_000;

/// Normalizes inline citation markers embedded in free text.
pub struct TagNormalizer {
    attr_re: Regex,
    range_re: Regex,
    warn: WarnHandler,
}

impl TagNormalizer {
    pub fn new() -> Self {
        Self::with_warn_handler(default_warn_handler())
    }

    /// Create a normalizer that reports parse anomalies through `handler`
    /// instead of the default `tracing` target.
    pub fn with_warn_handler(handler: WarnHandler) -> Self {
        Self {
            attr_re: Regex::new(
                r#"^\s*([A-Za-z\\][A-Za-z0-9_\\]*)\s*=\s*('(?:\\.|[^'\\])*'|"(?:\\.|[^"\\])*")"#,
            )
            .unwrap(),
            range_re: Regex::new(r"^(\d+)\s*-\s*(\d+)$").unwrap(),
            warn: handler,
        }
    }

    /// Rewrite every recognized citation marker in `text` into canonical
    /// self-closing form. Prose and inter-marker whitespace are preserved;
    /// the whole string is trimmed at the ends.
    pub fn normalize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;

        while let Some(found) = text[pos..].find("<cite") {
            let start = pos + found;
            out.push_str(&text[pos..start]);

            match self.parse_marker(text, start) {
                Some(marker) => {
                    if let Some(inner) = &marker.hoisted {
                        out.push_str(inner);
                    }
                    out.push_str(&self.render_marker(&marker.attrs));
                    pos = marker.end;
                }
                None => {
                    // Malformed fragment: copy through untouched and keep
                    // scanning after the element name.
                    out.push_str("<cite");
                    pos = start + "<cite".len();
                }
            }
        }

        out.push_str(&text[pos..]);
        out.trim().to_string()
    }

    /// Parse one marker starting at `start` (which points at `<cite`).
    /// Returns `None` for anything that is not a well-formed marker.
    fn parse_marker(&self, text: &str, start: usize) -> Option<ParsedMarker> {
        let mut cursor = start + "<cite".len();

        // Boundary check so e.g. "<citePlaceholder" is plain text.
        match text[cursor..].chars().next() {
            Some(c) if c.is_whitespace() || c == '/' || c == '>' => {}
            _ => return None,
        }

        let mut attrs: Vec<(String, String)> = Vec::new();
        loop {
            if let Some(cap) = self.attr_re.captures(&text[cursor..]) {
                let quoted = cap.get(2).unwrap().as_str();
                let raw_name = cap.get(1).unwrap().as_str();
                let raw_value = &quoted[1..quoted.len() - 1];

                // Rendered markdown turns `_` into `\_` inside attribute names.
                let name = canonical_attr_name(&raw_name.replace("\\_", "_"));
                let value = self.canonicalize_value(&name, raw_value);
                attrs.push((name, value));

                cursor += cap.get(0).unwrap().end();
                continue;
            }

            let rest = &text[cursor..];
            let ws = rest.len() - rest.trim_start().len();
            let tail = &text[cursor + ws..];

            if tail.starts_with("/>") {
                return Some(ParsedMarker {
                    attrs,
                    hoisted: None,
                    end: cursor + ws + 2,
                });
            }
            if tail.starts_with('>') {
                // Wrapped form: hoist the inner content to just before the
                // marker, trimmed at the edges but with internal line breaks
                // intact, and rewrite as self-closing.
                let inner_start = cursor + ws + 1;
                let Some(close) = text[inner_start..].find("</cite>") else {
                    (self.warn)("citation marker is missing its closing tag; left unchanged");
                    return None;
                };
                let inner = text[inner_start..inner_start + close].trim();
                return Some(ParsedMarker {
                    attrs,
                    hoisted: (!inner.is_empty()).then(|| inner.to_string()),
                    end: inner_start + close + "</cite>".len(),
                });
            }

            (self.warn)("unparseable citation attribute list; marker left unchanged");
            return None;
        }
    }

    /// Apply the value canonicalization pipeline in its fixed order:
    /// entities, emphasis, line breaks, quote escaping, range expansion.
    fn canonicalize_value(&self, name: &str, raw: &str) -> String {
        let value = decode_entities(raw);
        let value = strip_emphasis(&value);
        let value = flatten_line_breaks(&value);
        let value = normalize_quote_escapes(&value);
        if name == "line_ids" || name == "timestamps" {
            self.expand_ranges(&value)
        } else {
            value
        }
    }

    /// Expand hyphenated ranges (`"3-7"` → `"3,4,5,6,7"`) inside a comma
    /// list, after stripping bracket decoration. A descending range emits
    /// only its start value; legacy input depends on that exact behavior.
    fn expand_ranges(&self, value: &str) -> String {
        let stripped: String = value.chars().filter(|c| !matches!(c, '[' | ']')).collect();
        let mut parts: Vec<String> = Vec::new();

        for segment in stripped.split(',') {
            let seg = segment.trim();
            if seg.is_empty() {
                continue;
            }
            let Some(cap) = self.range_re.captures(seg) else {
                parts.push(seg.to_string());
                continue;
            };
            match (cap[1].parse::<u64>(), cap[2].parse::<u64>()) {
                (Ok(start), Ok(end)) if start > end => parts.push(start.to_string()),
                (Ok(start), Ok(end)) if end - start <= MAX_RANGE_SPAN => {
                    parts.extend((start..=end).map(|n| n.to_string()));
                }
                _ => {
                    (self.warn)("citation line range could not be expanded; left as written");
                    parts.push(seg.to_string());
                }
            }
        }

        parts.join(",")
    }

    /// Emit a marker in canonical attribute order. Attributes outside the
    /// fixed order (`selection`, unknown names) follow the ordered ones,
    /// keeping their original relative order.
    fn render_marker(&self, attrs: &[(String, String)]) -> String {
        let order: &[&str] = if attrs.iter().any(|(name, _)| name == "timestamps") {
            MEDIA_ATTR_ORDER
        } else {
            SPAN_ATTR_ORDER
        };

        let mut ordered: Vec<&(String, String)> = Vec::with_capacity(attrs.len());
        for name in order {
            ordered.extend(attrs.iter().filter(|(n, _)| n == name));
        }
        ordered.extend(attrs.iter().filter(|(n, _)| !order.contains(&n.as_str())));

        let mut rendered = String::from("<cite");
        for (name, value) in ordered {
            rendered.push(' ');
            rendered.push_str(name);
            rendered.push_str("=\"");
            rendered.push_str(value);
            rendered.push('"');
        }
        rendered.push_str(" />");
        rendered
    }
}

impl Default for TagNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize with the default warning hook.
pub fn normalize_citation_tags(text: &str) -> String {
    TagNormalizer::new().normalize(text)
}

struct ParsedMarker {
    attrs: Vec<(String, String)>,
    hoisted: Option<String>,
    end: usize,
}

/// Alias table for the historical attribute spellings.
fn canonical_attr_name(name: &str) -> String {
    match name {
        "fileID" | "fileId" | "file_id" | "attachmentId" => "attachment_id",
        "key_span" | "keySpan" | "anchorText" => "anchor_text",
        "start_page_key" | "startPageKey" | "startPageId" => "start_page_id",
        "fullPhrase" => "full_phrase",
        "lineIds" => "line_ids",
        other => other,
    }
    .to_string()
}

/// Decode the entity set the upstream generator is known to emit. `&amp;`
/// goes last so `&amp;quot;` stays a literal `&quot;`.
fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Strip markdown emphasis markers that leak into attribute values when the
/// surrounding prose gets emphasized. Single underscores stay.
fn strip_emphasis(value: &str) -> String {
    value.replace("**", "").replace("__", "").replace('*', "")
}

fn flatten_line_breaks(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Quote-escape normalization: collapse doubly-escaped quotes to single
/// escapes, escape bare quotes, and never touch an already-escaped one.
/// Applies to both quote characters.
fn normalize_quote_escapes(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len() + 4);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if i + 2 < chars.len() && chars[i + 1] == '\\' && is_quote(chars[i + 2]) {
                out.push('\\');
                out.push(chars[i + 2]);
                i += 3;
            } else if i + 1 < chars.len() && is_quote(chars[i + 1]) {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            } else {
                out.push(c);
                i += 1;
            }
        } else if is_quote(c) {
            out.push('\\');
            out.push(c);
            i += 1;
        } else {
            out.push(c);
            i += 1;
        }
    }

    out
}

fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

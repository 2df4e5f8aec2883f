//! Marker-delimited response parsing.
//!
//! Collaborator responses are free text organised into sections introduced by
//! markers such as `LANGUAGE:` or `FIXED_CODE:`. A marker is recognised at the
//! start of a line, case-insensitively, optionally decorated with markdown
//! `#`, `*` or `_`. Markers inside an open code fence are ignored.
//!
//! Parsing never fails. Sections that are absent or empty yield defaults and
//! are listed in [`ParsedFields::missing`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Advisory, AdvisoryKind};

/// How a section's body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Trimmed free text.
    Text,
    /// One item per non-empty line; bullets and "none" dropped.
    List,
    /// Source code with any surrounding fence removed.
    Code,
}

/// One marker in a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    /// Field name used to look the value up.
    pub key: &'static str,
    /// Marker text without the trailing colon.
    pub marker: &'static str,
    pub kind: SectionKind,
}

impl SectionSpec {
    pub const fn new(key: &'static str, marker: &'static str, kind: SectionKind) -> Self {
        Self { key, marker, kind }
    }
}

/// The ordered set of markers expected in one kind of response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub sections: &'static [SectionSpec],
}

impl ResponseSchema {
    /// Initial code generation.
    pub const GENERATION: ResponseSchema = ResponseSchema {
        name: "generation",
        sections: &[
            SectionSpec::new("language", "LANGUAGE", SectionKind::Text),
            SectionSpec::new("dependencies", "DEPENDENCIES", SectionKind::List),
            SectionSpec::new("code", "CODE", SectionKind::Code),
            SectionSpec::new("explanation", "EXPLANATION", SectionKind::Text),
        ],
    };

    /// Fix requests.
    pub const FIX: ResponseSchema = ResponseSchema {
        name: "fix",
        sections: &[
            SectionSpec::new("error_analysis", "ERROR_ANALYSIS", SectionKind::Text),
            SectionSpec::new("fix_approach", "FIX_APPROACH", SectionKind::Text),
            SectionSpec::new("fixed_code", "FIXED_CODE", SectionKind::Code),
        ],
    };

    /// Test-input synthesis.
    pub const INPUT_SYNTHESIS: ResponseSchema = ResponseSchema {
        name: "input_synthesis",
        sections: &[
            SectionSpec::new("input_analysis", "INPUT_ANALYSIS", SectionKind::Text),
            SectionSpec::new("test_data", "TEST_DATA", SectionKind::Text),
            SectionSpec::new("execution_method", "EXECUTION_METHOD", SectionKind::Text),
            SectionSpec::new("modified_code", "MODIFIED_CODE", SectionKind::Code),
        ],
    };

    pub fn section(&self, key: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.key == key)
    }
}

/// A parsed section value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

/// The fields extracted from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFields {
    values: BTreeMap<String, FieldValue>,
    /// Language tags found on code fences, keyed by field.
    fence_tags: BTreeMap<String, String>,
    /// Markers that were absent or had an empty body, in schema order.
    pub missing: Vec<String>,
}

impl ParsedFields {
    /// Text (or code) field; empty when absent.
    pub fn text(&self, key: &str) -> &str {
        match self.values.get(key) {
            Some(FieldValue::Text(text)) => text,
            _ => "",
        }
    }

    /// List field; empty when absent.
    pub fn list(&self, key: &str) -> &[String] {
        match self.values.get(key) {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Language tag of the fence a code field was wrapped in, if any.
    pub fn fence_tag(&self, key: &str) -> Option<&str> {
        self.fence_tags.get(key).map(String::as_str)
    }

    pub fn set_text(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.to_string(), FieldValue::Text(value.into()));
    }

    pub fn set_list(&mut self, key: &str, items: Vec<String>) {
        self.values.insert(key.to_string(), FieldValue::List(items));
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }

    /// One `ParseDegraded` advisory per missing section.
    pub fn advisories(&self, schema: &ResponseSchema) -> Vec<Advisory> {
        self.missing
            .iter()
            .map(|marker| {
                Advisory::new(
                    AdvisoryKind::ParseDegraded,
                    format!("{} response had no {marker} section", schema.name),
                )
            })
            .collect()
    }
}

/// Parse `response` against `schema`.
pub fn parse(response: &str, schema: &ResponseSchema) -> ParsedFields {
    let (raw, unclosed_fence) = split_sections(response, schema, true);
    let raw = if unclosed_fence && raw.iter().any(Option::is_none) {
        // An unterminated fence swallowed later markers; read them anyway.
        split_sections(response, schema, false).0
    } else {
        raw
    };

    let mut fields = ParsedFields::default();
    for (section, body) in schema.sections.iter().zip(raw) {
        let body = body.unwrap_or_default();
        let empty = match section.kind {
            SectionKind::Code => {
                let (code, tag) = strip_code_fence_tagged(&body);
                if let Some(tag) = tag {
                    fields.fence_tags.insert(section.key.to_string(), tag);
                }
                let empty = code.trim().is_empty();
                fields.set_text(section.key, code);
                empty
            }
            SectionKind::Text => {
                let text = strip_enclosing_fence(&body).trim().to_string();
                let empty = text.is_empty();
                fields.set_text(section.key, text);
                empty
            }
            SectionKind::List => {
                let items = split_list(&body);
                let empty = items.is_empty() && !mentions_none(&body);
                fields.set_list(section.key, items);
                empty
            }
        };
        if empty {
            fields.missing.push(section.marker.to_string());
        }
    }
    fields
}

/// Re-serialize fields in schema order using the canonical marker layout.
pub fn render(fields: &ParsedFields, schema: &ResponseSchema) -> String {
    let mut out = String::new();
    for section in schema.sections {
        out.push_str(section.marker);
        out.push_str(":\n");
        match section.kind {
            SectionKind::Code => {
                out.push_str("```");
                out.push_str(fields.fence_tag(section.key).unwrap_or_default());
                out.push('\n');
                out.push_str(fields.text(section.key));
                out.push_str("\n```\n");
            }
            SectionKind::List => {
                let items = fields.list(section.key);
                if items.is_empty() {
                    out.push_str("none\n");
                }
                for item in items {
                    out.push_str(item);
                    out.push('\n');
                }
            }
            SectionKind::Text => {
                out.push_str(fields.text(section.key));
                out.push('\n');
            }
        }
        out.push('\n');
    }
    out
}

/// Remove surrounding code fences. Idempotent.
pub fn strip_code_fence(text: &str) -> String {
    strip_code_fence_tagged(text).0
}

/// Remove surrounding code fences, returning the outermost language tag.
///
/// A body that opens with a fence ends at its closing fence; anything after
/// it is prose and is dropped.
pub fn strip_code_fence_tagged(text: &str) -> (String, Option<String>) {
    let mut current = trim_blank_lines(text).to_string();
    let mut tag = None;
    loop {
        let mut lines = current.lines();
        let Some(first) = lines.next() else { break };
        let Some(lang) = first.trim().strip_prefix("```") else {
            // No opening fence; drop a dangling closing one.
            match current.trim_end().strip_suffix("```") {
                Some(rest) if rest.is_empty() || rest.ends_with('\n') => {
                    current = trim_blank_lines(rest).to_string();
                    continue;
                }
                _ => break,
            }
        };
        if tag.is_none() && !lang.trim().is_empty() && !lang.contains('`') {
            tag = Some(lang.trim().to_string());
        }
        let mut body = Vec::new();
        for line in lines {
            if line.trim() == "```" {
                break;
            }
            body.push(line);
        }
        current = trim_blank_lines(&body.join("\n")).to_string();
    }
    (current, tag)
}

/// Unwrap text only when a fence encloses all of it.
fn strip_enclosing_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() > 3 {
        strip_code_fence(trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Drop leading blank lines and trailing whitespace, keeping indentation.
fn trim_blank_lines(text: &str) -> &str {
    let text = text.trim_end();
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            start += line.len();
        } else {
            break;
        }
    }
    &text[start..]
}

fn split_list(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start()
                .to_string()
        })
        .map(|line| strip_numbering(&line).trim().trim_matches('`').trim().to_string())
        .filter(|item| !item.is_empty() && !item.starts_with("```") && !is_none_word(item))
        .collect()
}

fn strip_numbering(item: &str) -> &str {
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &item[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest;
        }
    }
    item
}

fn is_none_word(item: &str) -> bool {
    let lowered = item.trim_end_matches('.').to_lowercase();
    matches!(lowered.as_str(), "none" | "n/a" | "no dependencies" | "無" | "无")
}

fn mentions_none(body: &str) -> bool {
    body.lines().any(|line| {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        is_none_word(line)
    })
}

/// Split `response` into raw section bodies, one slot per schema section.
///
/// Returns whether a fence was still open at the end of the text.
fn split_sections(
    response: &str,
    schema: &ResponseSchema,
    track_fences: bool,
) -> (Vec<Option<String>>, bool) {
    let mut raw: Vec<Option<String>> = vec![None; schema.sections.len()];
    let mut current: Option<usize> = None;
    let mut buf = String::new();
    let mut in_fence = false;

    for line in response.lines() {
        if !in_fence {
            if let Some((idx, rest)) = match_marker(line, schema) {
                flush(&mut raw, current, &mut buf);
                // First occurrence wins; repeated markers are skipped.
                current = if raw[idx].is_none() {
                    raw[idx] = Some(String::new());
                    Some(idx)
                } else {
                    None
                };
                if !rest.is_empty() {
                    if track_fences && rest.starts_with("```") {
                        in_fence = true;
                    }
                    buf.push_str(rest);
                    buf.push('\n');
                }
                continue;
            }
        }
        if track_fences && line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if current.is_some() {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    flush(&mut raw, current, &mut buf);
    (raw, in_fence)
}

fn flush(raw: &mut [Option<String>], current: Option<usize>, buf: &mut String) {
    if let Some(idx) = current {
        raw[idx] = Some(std::mem::take(buf));
    }
    buf.clear();
}

/// Match a marker at the start of `line`, returning its index and the text
/// after the colon.
fn match_marker<'a>(line: &'a str, schema: &ResponseSchema) -> Option<(usize, &'a str)> {
    let trimmed = line
        .trim_start()
        .trim_start_matches(['#', '*', '_'])
        .trim_start();
    for (idx, section) in schema.sections.iter().enumerate() {
        let Some(len) = marker_prefix_len(trimmed, section.marker) else {
            continue;
        };
        let after = trimmed[len..].trim_start_matches(['*', '_']).trim_start();
        if let Some(rest) = after.strip_prefix(':').or_else(|| after.strip_prefix('：')) {
            return Some((idx, rest.trim_start_matches(['*', '_']).trim()));
        }
    }
    None
}

/// Byte length of `marker` at the start of `text`, ignoring ASCII case and
/// treating `_` and space as equal.
fn marker_prefix_len(text: &str, marker: &str) -> Option<usize> {
    let mut consumed = 0;
    let mut chars = text.chars();
    for expected in marker.chars() {
        let actual = chars.next()?;
        let same = actual.eq_ignore_ascii_case(&expected)
            || (matches!(expected, '_' | ' ') && matches!(actual, '_' | ' '));
        if !same {
            return None;
        }
        consumed += actual.len_utf8();
    }
    Some(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERATED: &str = "Here is your program.\n\n\
        **LANGUAGE:** Python\n\
        DEPENDENCIES:\n- pandas>=2.0\n- numpy\n\
        ## Code:\n```python\nimport pandas as pd\n\nresult = pd.Series([1, 2]).sum()\n```\n\
        EXPLANATION: Sums a series.\n";

    #[test]
    fn test_parse_generation_response() {
        let fields = parse(GENERATED, &ResponseSchema::GENERATION);
        assert_eq!(fields.text("language"), "Python");
        assert_eq!(fields.list("dependencies"), ["pandas>=2.0", "numpy"]);
        assert_eq!(
            fields.text("code"),
            "import pandas as pd\n\nresult = pd.Series([1, 2]).sum()"
        );
        assert_eq!(fields.fence_tag("code"), Some("python"));
        assert_eq!(fields.text("explanation"), "Sums a series.");
        assert!(!fields.is_degraded());
    }

    #[test]
    fn test_missing_markers_degrade_to_defaults() {
        let fields = parse("CODE:\nprint('hi')\n", &ResponseSchema::GENERATION);
        assert_eq!(fields.text("code"), "print('hi')");
        assert_eq!(fields.text("language"), "");
        assert!(fields.list("dependencies").is_empty());
        assert_eq!(fields.missing, vec!["LANGUAGE", "DEPENDENCIES", "EXPLANATION"]);
        assert_eq!(fields.advisories(&ResponseSchema::GENERATION).len(), 3);
    }

    #[test]
    fn test_none_dependencies_is_not_degraded() {
        let text = "LANGUAGE: python\nDEPENDENCIES: none\nCODE:\nx = 1\nEXPLANATION: trivial";
        let fields = parse(text, &ResponseSchema::GENERATION);
        assert!(fields.list("dependencies").is_empty());
        assert!(!fields.is_degraded());
    }

    #[test]
    fn test_markers_inside_fence_are_code() {
        let text = "FIXED_CODE:\n```python\n# Error_analysis: not a marker\nx = 1\n```\n\
                    ERROR_ANALYSIS: divide by zero";
        let fields = parse(text, &ResponseSchema::FIX);
        assert_eq!(fields.text("fixed_code"), "# Error_analysis: not a marker\nx = 1");
        assert_eq!(fields.text("error_analysis"), "divide by zero");
    }

    #[test]
    fn test_unclosed_fence_does_not_swallow_markers() {
        let text = "ERROR_ANALYSIS: bad\nFIX_APPROACH: change it\nFIXED_CODE:\n```python\nx = 2\n";
        let fields = parse(text, &ResponseSchema::FIX);
        assert_eq!(fields.text("fixed_code"), "x = 2");
        assert_eq!(fields.text("fix_approach"), "change it");

        let text = "FIXED_CODE:\n```python\nx = 2\nERROR_ANALYSIS: bad\n";
        let fields = parse(text, &ResponseSchema::FIX);
        assert_eq!(fields.text("fixed_code"), "x = 2");
        assert_eq!(fields.text("error_analysis"), "bad");
    }

    #[test]
    fn test_strip_code_fence_is_idempotent() {
        for input in [
            "```python\nprint(1)\n```",
            "````\n```js\nconsole.log(1)\n```\n````",
            "    indented()\n",
            "print(2)\n```",
            "",
        ] {
            let once = strip_code_fence(input);
            assert_eq!(strip_code_fence(&once), once, "input: {input:?}");
        }
        assert_eq!(strip_code_fence("    indented()\n"), "    indented()");
    }

    #[test]
    fn test_parse_render_parse_is_idempotent_on_code() {
        let samples = [
            (GENERATED, ResponseSchema::GENERATION, "code"),
            (
                "ERROR_ANALYSIS: x\nFIX_APPROACH: y\nFIXED_CODE:\n  def f():\n      return 1\n",
                ResponseSchema::FIX,
                "fixed_code",
            ),
            (
                "input_analysis: reads two ints\nTEST_DATA:\n```\n3\n4\n```\nMODIFIED_CODE:",
                ResponseSchema::INPUT_SYNTHESIS,
                "modified_code",
            ),
        ];
        for (text, schema, key) in samples {
            let first = parse(text, &schema);
            let second = parse(&render(&first, &schema), &schema);
            let third = parse(&render(&second, &schema), &schema);
            assert_eq!(first.text(key), second.text(key));
            assert_eq!(second.text(key), third.text(key));
        }
    }

    #[test]
    fn test_text_section_unwraps_enclosing_fence() {
        let text = "TEST_DATA:\n```\n5\n7\n```\nEXECUTION_METHOD: stdin";
        let fields = parse(text, &ResponseSchema::INPUT_SYNTHESIS);
        assert_eq!(fields.text("test_data"), "5\n7");
        assert_eq!(fields.text("execution_method"), "stdin");
    }

    #[test]
    fn test_list_strips_bullets_and_numbering() {
        let items = split_list("1. requests==2.31\n* `flask`\n\n- None\n2) lodash@4\n");
        assert_eq!(items, ["requests==2.31", "flask", "lodash@4"]);
    }
}

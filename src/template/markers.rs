//! `{{ name }}` marker scanning.

use lazy_static::lazy_static;
use regex::Regex;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

lazy_static! {
    static ref MARKER_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*(?: [A-Za-z0-9_.\-]+)*$").unwrap();
}

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Marker { name: &'a str, offset: usize },
}

/// Marker syntax error at a byte offset of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub offset: usize,
    pub reason: String,
}

impl SyntaxError {
    fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }

    /// 1-based line of the offending marker.
    pub fn line_in(&self, source: &str) -> usize {
        let end = self.offset.min(source.len());
        source[..end].matches('\n').count() + 1
    }
}

/// Split `source` into literal text and markers.
pub fn parse(source: &str) -> Result<Vec<Segment<'_>>, SyntaxError> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    while let Some(found) = source[cursor..].find(OPEN) {
        let open = cursor + found;
        let inner_start = open + OPEN.len();
        let inner_len = source[inner_start..]
            .find(CLOSE)
            .ok_or_else(|| SyntaxError::new(open, "unclosed marker, expected '}}'"))?;
        let inner = &source[inner_start..inner_start + inner_len];

        if inner.contains(OPEN) {
            return Err(SyntaxError::new(open, "nested '{{' inside marker"));
        }

        let name = inner.trim();
        if name.is_empty() {
            return Err(SyntaxError::new(open, "empty marker name"));
        }
        if !MARKER_NAME.is_match(name) {
            return Err(SyntaxError::new(
                open,
                format!("invalid marker name '{name}'"),
            ));
        }

        if open > cursor {
            segments.push(Segment::Literal(&source[cursor..open]));
        }
        segments.push(Segment::Marker { name, offset: open });
        cursor = inner_start + inner_len + CLOSE.len();
    }

    if cursor < source.len() {
        segments.push(Segment::Literal(&source[cursor..]));
    }

    Ok(segments)
}

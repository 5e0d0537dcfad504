//! Value escaping per output format.

use super::TemplateFormat;

/// Escape a substituted value so it reads as literal text in `format`.
pub fn escape_value(format: TemplateFormat, value: &str) -> String {
    match format {
        TemplateFormat::Html => escape_html(value),
        TemplateFormat::Typst => escape_typst_markup(value),
        TemplateFormat::Text => value.to_string(),
    }
}

/// Escape special characters for HTML text and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape characters that Typst markup would otherwise interpret.
///
/// `/` is always escaped since `//` and `/*` open comments. Heading and list
/// markers (`=`, `-`, `+`) only matter as the first character of a line, and
/// a value may itself start a line, so they are escaped there.
pub fn escape_typst_markup(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut line_start = true;
    for ch in value.chars() {
        let special = matches!(
            ch,
            '\\' | '#' | '$' | '*' | '_' | '`' | '@' | '<' | '>' | '[' | ']' | '~' | '/'
        ) || (line_start && matches!(ch, '=' | '-' | '+'));
        if special {
            out.push('\\');
        }
        out.push(ch);
        if ch == '\n' {
            line_start = true;
        } else if !ch.is_whitespace() {
            line_start = false;
        }
    }
    out
}

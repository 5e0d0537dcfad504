//! Template rendering - fills `{{ name }}` markers from a [`ReportContext`].
//!
//! This module contains:
//! - `markers` - marker scanning and syntax errors
//! - `escape` - per-format escaping of substituted values
//!
//! Rendering is all-or-nothing: every marker must resolve, otherwise no
//! document is produced.

pub mod escape;
pub mod markers;


use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::context::ReportContext;
use markers::Segment;

/// Errors that can occur while loading or rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template '{template}' is missing values for: {}", .fields.join(", "))]
    MissingField {
        template: String,
        fields: Vec<String>,
    },
    #[error("malformed template '{template}' at line {line} (byte {offset}): {reason}")]
    Malformed {
        template: String,
        line: usize,
        offset: usize,
        reason: String,
    },
}

/// Markup flavour of a template, detected from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Html,
    Typst,
    Text,
}

impl TemplateFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("html") | Some("htm") => Self::Html,
            Some("typ") => Self::Typst,
            _ => Self::Text,
        }
    }

    /// Extension used when the rendered document is written to disk.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Typst => "typ",
            Self::Text => "txt",
        }
    }
}

/// A document skeleton with substitution markers.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub format: TemplateFormat,
    pub source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, format: TemplateFormat, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format,
            source: source.into(),
        }
    }

    /// Distinct marker names in order of first appearance.
    pub fn fields(&self) -> Result<Vec<String>, TemplateError> {
        let segments = parse_segments(&self.name, &self.source)?;
        let mut seen = BTreeSet::new();
        Ok(segments
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Marker { name, .. } if seen.insert(name) => Some(name.to_string()),
                _ => None,
            })
            .collect())
    }
}

/// Output of substitution. Lives only for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub template_name: String,
    pub format: TemplateFormat,
    pub content: String,
}

impl RenderedDocument {
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Stateless renderer for report templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Read a template from disk. The file name becomes the template name.
    pub async fn load(&self, path: &Path) -> Result<Template, TemplateError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => TemplateError::NotFound {
                    path: path.to_path_buf(),
                },
                _ => TemplateError::Io {
                    path: path.to_path_buf(),
                    source,
                },
            })?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        log::debug!("loaded template '{}' ({} bytes)", name, source.len());
        Ok(Template::new(name, TemplateFormat::from_path(path), source))
    }

    /// Substitute every marker in `template` from `context`.
    pub fn render(
        &self,
        template: &Template,
        context: &ReportContext,
    ) -> Result<RenderedDocument, TemplateError> {
        let content = substitute(&template.name, &template.source, template.format, context)?;
        Ok(RenderedDocument {
            template_name: template.name.clone(),
            format: template.format,
            content,
        })
    }

    /// Render an ad-hoc text template such as a mail subject. No escaping.
    pub fn render_text(
        &self,
        name: &str,
        source: &str,
        context: &ReportContext,
    ) -> Result<String, TemplateError> {
        substitute(name, source, TemplateFormat::Text, context)
    }
}

fn parse_segments<'a>(name: &str, source: &'a str) -> Result<Vec<Segment<'a>>, TemplateError> {
    markers::parse(source).map_err(|err| TemplateError::Malformed {
        template: name.to_string(),
        line: err.line_in(source),
        offset: err.offset,
        reason: err.reason,
    })
}

fn substitute(
    name: &str,
    source: &str,
    format: TemplateFormat,
    context: &ReportContext,
) -> Result<String, TemplateError> {
    let segments = parse_segments(name, source)?;

    let missing: BTreeSet<&str> = segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Marker { name, .. } if !context.contains(name) => Some(*name),
            _ => None,
        })
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::MissingField {
            template: name.to_string(),
            fields: missing.into_iter().map(str::to_string).collect(),
        });
    }

    let mut out = String::with_capacity(source.len());
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Marker { name, .. } => {
                if let Some(value) = context.get(name) {
                    out.push_str(&escape::escape_value(format, &value.to_string()));
                }
            }
        }
    }
    Ok(out)
}

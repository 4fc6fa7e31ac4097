//! HTTP path templates.
//!
//! ```text
//! Template = "/" Segments [ Verb ] ;
//! Segments = Segment { "/" Segment } ;
//! Segment  = "*" | "**" | LITERAL | Variable ;
//! Variable = "{" FieldPath [ "=" Segments ] "}" ;
//! FieldPath = IDENT { "." IDENT } ;
//! Verb     = ":" LITERAL ;
//! ```
//!
//! A template is compiled once into a flat list of segments. Variables are
//! recorded as ranges over that list, so `{name=shelves/*/books/*}` captures
//! four request segments joined with `/`. `{var}` is shorthand for
//! `{var=*}`. A template holds at most one `**`, which matches zero or more
//! segments.

use std::collections::HashMap;
use std::fmt;

/// Errors produced while parsing a path template.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("path template must start with '/': {0}")]
    MissingLeadingSlash(String),

    #[error("empty segment in path template: {0}")]
    EmptySegment(String),

    #[error("unbalanced braces in path template: {0}")]
    UnbalancedBraces(String),

    #[error("nested variable in path template: {0}")]
    NestedVariable(String),

    #[error("invalid variable name '{name}' in path template: {template}")]
    InvalidVariableName { name: String, template: String },

    #[error("duplicate variable '{name}' in path template: {template}")]
    DuplicateVariable { name: String, template: String },

    #[error("invalid literal '{literal}' in path template: {template}")]
    InvalidLiteral { literal: String, template: String },

    #[error("path template may contain at most one '**': {0}")]
    MultipleDoubleWildcards(String),

    #[error("empty custom verb in path template: {0}")]
    EmptyVerb(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*`
    Single,
    /// `**`
    Multi,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Variable {
    name: String,
    /// Segment range `[start, end)` in `PathTemplate::segments`.
    start: usize,
    end: usize,
}

/// A compiled path template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTemplate {
    text: String,
    segments: Vec<Segment>,
    variables: Vec<Variable>,
    verb: Option<String>,
    multi: Option<usize>,
}

impl PathTemplate {
    /// Parse a template such as `/v1/{name=shelves/*}/books:search`.
    ///
    /// A trailing `/` in the template is ignored.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let err_text = || template.to_string();

        let body = template
            .strip_prefix('/')
            .ok_or_else(|| TemplateError::MissingLeadingSlash(err_text()))?;

        let (path, verb) = split_verb(body).map_err(|()| TemplateError::UnbalancedBraces(err_text()))?;
        let verb = match verb {
            Some("") => return Err(TemplateError::EmptyVerb(err_text())),
            Some(v) if v.contains('/') => {
                return Err(TemplateError::InvalidLiteral {
                    literal: v.to_string(),
                    template: err_text(),
                });
            }
            other => other.map(str::to_string),
        };

        let path = path.strip_suffix('/').unwrap_or(path);

        let mut segments = Vec::new();
        let mut variables: Vec<Variable> = Vec::new();

        if !path.is_empty() {
            for raw in split_top_level(path) {
                if raw.is_empty() {
                    return Err(TemplateError::EmptySegment(err_text()));
                }

                if let Some(inner) = raw.strip_prefix('{') {
                    let inner = inner
                        .strip_suffix('}')
                        .ok_or_else(|| TemplateError::UnbalancedBraces(err_text()))?;
                    if inner.contains('{') || inner.contains('}') {
                        return Err(TemplateError::NestedVariable(err_text()));
                    }

                    let (name, pattern) = inner.split_once('=').unwrap_or((inner, "*"));
                    if !is_field_path(name) {
                        return Err(TemplateError::InvalidVariableName {
                            name: name.to_string(),
                            template: err_text(),
                        });
                    }
                    if variables.iter().any(|v| v.name == name) {
                        return Err(TemplateError::DuplicateVariable {
                            name: name.to_string(),
                            template: err_text(),
                        });
                    }

                    let start = segments.len();
                    for sub in pattern.split('/') {
                        segments.push(parse_plain_segment(sub, template)?);
                    }
                    variables.push(Variable {
                        name: name.to_string(),
                        start,
                        end: segments.len(),
                    });
                } else {
                    segments.push(parse_plain_segment(raw, template)?);
                }
            }
        }

        let mut multis = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == Segment::Multi)
            .map(|(i, _)| i);
        let multi = multis.next();
        if multis.next().is_some() {
            return Err(TemplateError::MultipleDoubleWildcards(err_text()));
        }

        Ok(Self {
            text: template.to_string(),
            segments,
            variables,
            verb,
            multi,
        })
    }

    /// The custom verb declared by this template, if any.
    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Names of the captured variables, in template order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    /// The template text as it was parsed.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Match a request path, returning the captured variables.
    ///
    /// Leading and trailing `/` are ignored on the request path. A path that
    /// contains `:` never matches a template without a custom verb.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let trimmed = path.trim_matches('/');

        let (path, verb) = match &self.verb {
            None => {
                if trimmed.contains(':') {
                    return None;
                }
                (trimmed, None)
            }
            Some(_) => {
                let last_start = trimmed.rfind('/').map_or(0, |i| i + 1);
                match trimmed[last_start..].rfind(':') {
                    Some(i) => {
                        let at = last_start + i;
                        (&trimmed[..at], Some(&trimmed[at + 1..]))
                    }
                    None => (trimmed, None),
                }
            }
        };
        if verb != self.verb.as_deref() {
            return None;
        }

        let parts: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };

        let spans = self.spans(parts.len())?;
        for (segment, &(start, end)) in self.segments.iter().zip(&spans) {
            let ok = match segment {
                Segment::Literal(lit) => end - start == 1 && parts[start] == lit,
                Segment::Single => end - start == 1 && !parts[start].is_empty(),
                Segment::Multi => parts[start..end].iter().all(|p| !p.is_empty()),
            };
            if !ok {
                return None;
            }
        }

        let captured = self
            .variables
            .iter()
            .map(|var| {
                let (from, to) = (spans[var.start].0, spans[var.end - 1].1);
                (var.name.clone(), parts[from..to].join("/"))
            })
            .collect();

        Some(captured)
    }

    /// For each template segment, the `[start, end)` range of request
    /// segments it covers. `None` when the lengths cannot line up.
    fn spans(&self, len: usize) -> Option<Vec<(usize, usize)>> {
        match self.multi {
            None => {
                if len != self.segments.len() {
                    return None;
                }
                Some((0..len).map(|i| (i, i + 1)).collect())
            }
            Some(m) => {
                let fixed = self.segments.len() - 1;
                if len < fixed {
                    return None;
                }
                let consumed = len - fixed;
                Some(
                    (0..self.segments.len())
                        .map(|i| {
                            if i < m {
                                (i, i + 1)
                            } else if i == m {
                                (m, m + consumed)
                            } else {
                                let at = i - 1 + consumed;
                                (at, at + 1)
                            }
                        })
                        .collect(),
                )
            }
        }
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Split off a `:verb` suffix that sits outside any variable braces.
fn split_verb(body: &str) -> Result<(&str, Option<&str>), ()> {
    let mut depth = 0usize;
    let mut verb_at = None;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1).ok_or(())?,
            ':' if depth == 0 && verb_at.is_none() => verb_at = Some(i),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(());
    }
    Ok(match verb_at {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    })
}

/// Split on `/` outside of braces.
fn split_top_level(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                out.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&path[start..]);
    out
}

fn parse_plain_segment(raw: &str, template: &str) -> Result<Segment, TemplateError> {
    match raw {
        "" => Err(TemplateError::EmptySegment(template.to_string())),
        "*" => Ok(Segment::Single),
        "**" => Ok(Segment::Multi),
        lit if lit.contains(['*', '{', '}', ':']) => Err(TemplateError::InvalidLiteral {
            literal: lit.to_string(),
            template: template.to_string(),
        }),
        lit => Ok(Segment::Literal(lit.to_string())),
    }
}

fn is_field_path(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|ident| {
            let mut chars = ident.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

//! Registry path templates.
//!
//! A pattern is a `/`-separated path whose segments are literals, named
//! captures (`{partner}`) or anonymous wildcards (`*`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Capture(String),
    Wildcard,
}

/// Values captured from a matched path, by capture name.
pub type Captures = BTreeMap<String, String>;

/// Parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for part in split(raw) {
            let segment = if part == "*" {
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(Error::InvalidInput(format!("Empty capture in pattern {}", raw)));
                }
                Segment::Capture(name.to_string())
            } else if part.contains(['{', '}']) {
                return Err(Error::InvalidInput(format!(
                    "Malformed segment '{}' in pattern {}",
                    part, raw
                )));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Match a concrete path; every segment must line up.
    pub fn matches(&self, path: &str) -> Option<Captures> {
        let parts: Vec<&str> = split(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captures = Captures::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit != part => return None,
                Segment::Literal(_) | Segment::Wildcard => {}
                Segment::Capture(name) => {
                    captures.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(captures)
    }

    /// Fill captures back into the template.
    pub fn render(&self, captures: &Captures) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Capture(name) => match captures.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(Error::InvalidInput(format!(
                            "No value for capture '{}' in {}",
                            name, self.raw
                        )))
                    }
                },
                Segment::Wildcard => {
                    return Err(Error::InvalidInput(format!(
                        "Cannot render wildcard in {}",
                        self.raw
                    )))
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }
}

impl FromStr for PathPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}

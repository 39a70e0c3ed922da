use crate::{PolicyError, PolicyResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Exact(String),
    Any,
}

fn parse_segment(raw: &str) -> Segment {
    if raw == "*" || (raw.len() > 1 && raw.starts_with(':')) {
        Segment::Any
    } else {
        Segment::Exact(raw.to_string())
    }
}

/// Slash-delimited resource template such as `/api/v1/doc/:id`.
///
/// A `:name` or `*` segment matches exactly one non-empty path segment and
/// never spans deeper levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> PolicyResult<Self> {
        if !raw.starts_with('/') {
            return Err(PolicyError::InvalidRule(format!(
                "resource pattern must start with '/': {raw}"
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments: raw.split('/').map(parse_segment).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/');
        for segment in &self.segments {
            let Some(part) = parts.next() else {
                return false;
            };
            match segment {
                Segment::Exact(expected) => {
                    if expected != part {
                        return false;
                    }
                }
                Segment::Any => {
                    if part.is_empty() {
                        return false;
                    }
                }
            }
        }
        // Segment counts must be equal.
        parts.next().is_none()
    }
}

pub fn key_match(pattern: &str, path: &str) -> bool {
    PathPattern::parse(pattern)
        .map(|parsed| parsed.matches(path))
        .unwrap_or(false)
}

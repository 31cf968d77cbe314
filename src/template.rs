//! Message templates for gate output.
//!
//! Templates use `{key}` placeholders. `{{` and `}}` produce literal braces.
//! Every template exposes the keys it requires so callers can choose between
//! strict rendering (missing keys are an error) and lossy rendering (missing
//! keys become [`MISSING_VALUE`] and are logged).

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::warn;

/// Variables available to a template.
pub type TemplateVars = BTreeMap<String, String>;

/// Substituted for keys with no value in lossy rendering.
pub const MISSING_VALUE: &str = "(not available)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Key(String),
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse a template.
    ///
    /// A `{` that does not open a well-formed `{key}` is kept as literal text.
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            segments: parse(source),
        }
    }

    /// The template text as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Keys referenced by this template, in order of first appearance.
    #[must_use]
    pub fn required_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Key(key) = segment {
                if !keys.contains(&key.as_str()) {
                    keys.push(key.as_str());
                }
            }
        }
        keys
    }

    /// Render, failing if any required key is missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] listing every missing key.
    pub fn render(&self, vars: &TemplateVars) -> Result<String> {
        let missing: Vec<String> = self
            .required_keys()
            .into_iter()
            .filter(|key| !vars.contains_key(*key))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Template { missing });
        }
        Ok(self.fill(vars))
    }

    /// Render, substituting [`MISSING_VALUE`] for missing keys.
    #[must_use]
    pub fn render_lossy(&self, vars: &TemplateVars) -> String {
        if let Err(e) = self.render(vars) {
            warn!(template = %self.source, error = %e, "rendering template with placeholders");
        }
        self.fill(vars)
    }

    fn fill(&self, vars: &TemplateVars) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Key(key) => out.push_str(vars.get(key).map_or(MISSING_VALUE, String::as_str)),
            }
        }
        out
    }
}

impl From<&str> for MessageTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

fn parse(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if closed && is_key(&key) {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Key(key));
                } else {
                    literal.push('{');
                    literal.push_str(&key);
                    if closed {
                        literal.push('}');
                    }
                }
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

//! Canonical request keys.
//!
//! A [`CanonicalKey`] names exactly one (original object, transform parameters) pair. Its text
//! form is what the variant store is keyed by and what the edge router sends to the transform
//! service, so it must parse back into an identical key.

mod normalize;
mod params;

use std::fmt;

use thiserror::Error;

pub use normalize::{DEFAULT_MAX_DIMENSION, KeyNormalizer, QueryKeyPolicy};
pub use params::{OutputFormat, TransformParams};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed request: {reason}")]
pub struct MalformedRequest {
    reason: String,
}

impl MalformedRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    original: String,
    params: TransformParams,
    query: Option<String>,
    text: String,
}

impl CanonicalKey {
    pub(crate) fn new(original: String, params: TransformParams, query: Option<String>) -> Self {
        let mut text = String::with_capacity(original.len() + 48);
        text.push_str(&original);
        text.push('/');
        text.push_str(&params.render());
        if let Some(query) = &query {
            text.push('?');
            text.push_str(query);
        }
        Self {
            original,
            params,
            query,
            text,
        }
    }

    /// Decodes the text form produced by [`CanonicalKey::as_str`]. Only canonical text is
    /// accepted: anything that would render differently is rejected.
    pub fn parse(text: &str) -> Result<Self, MalformedRequest> {
        let text = text.strip_prefix('/').unwrap_or(text);
        let (path, query) = match text.split_once('?') {
            Some((path, query)) if !query.is_empty() => (path, Some(query.to_string())),
            Some(_) => return Err(MalformedRequest::new("empty query in canonical key")),
            None => (text, None),
        };
        let (original, rendered) = path
            .rsplit_once('/')
            .ok_or_else(|| MalformedRequest::new("canonical key missing parameters"))?;
        normalize::validate_object_path(original)?;
        let params = TransformParams::parse_rendered(rendered)?;
        let key = Self::new(original.to_string(), params, query);
        if key.text != text {
            return Err(MalformedRequest::new("canonical key is not in canonical form"));
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Storage path of the original object in the origin store.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn params(&self) -> &TransformParams {
        &self.params
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn is_negotiated(&self) -> bool {
        self.params.format != Some(OutputFormat::Auto)
    }

    /// Resolves `format=auto` against the client's `Accept` header. Keys without `auto` are
    /// returned unchanged.
    pub fn negotiate(self, accept: Option<&str>) -> Self {
        if self.is_negotiated() {
            return self;
        }
        let format = OutputFormat::negotiate(accept);
        let params = TransformParams {
            format: Some(format),
            ..self.params
        };
        Self::new(self.original, params, self.query)
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

use std::collections::BTreeSet;

use super::params::{OutputFormat, TransformParams, parse_dimension, parse_quality};
use super::{CanonicalKey, MalformedRequest};

pub const DEFAULT_MAX_DIMENSION: u32 = 4000;

/// Which non-transform query parameters take part in the canonical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKeyPolicy {
    None,
    All { order_significant: bool },
    AllowList {
        names: BTreeSet<String>,
        order_significant: bool,
    },
}

impl QueryKeyPolicy {
    fn admits(&self, name: &str) -> bool {
        match self {
            QueryKeyPolicy::None => false,
            QueryKeyPolicy::All { .. } => true,
            QueryKeyPolicy::AllowList { names, .. } => names.contains(name),
        }
    }

    fn order_significant(&self) -> bool {
        match self {
            QueryKeyPolicy::None => false,
            QueryKeyPolicy::All { order_significant } => *order_significant,
            QueryKeyPolicy::AllowList {
                order_significant, ..
            } => *order_significant,
        }
    }
}

/// Maps `{prefix}/{params}/{object-path}` requests onto canonical keys.
///
/// Parameter segments are read left to right until the first segment that is not a parameter
/// token; the last segment is always part of the object path. Recognized tokens are `WxH`, `Wx`,
/// `xH`, a format name and `qN`. Query parameters `width`, `height`, `format` and `quality` are
/// folded into the same parameter set.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    prefix: Vec<String>,
    max_dimension: u32,
    query: QueryKeyPolicy,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new("", DEFAULT_MAX_DIMENSION, QueryKeyPolicy::None)
    }
}

impl KeyNormalizer {
    pub fn new(prefix: &str, max_dimension: u32, query: QueryKeyPolicy) -> Self {
        let prefix = prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            prefix,
            max_dimension,
            query,
        }
    }

    pub fn normalize(
        &self,
        raw_path: &str,
        raw_query: Option<&str>,
    ) -> Result<CanonicalKey, MalformedRequest> {
        if !raw_path.starts_with('/') {
            return Err(MalformedRequest::new("path must start with '/'"));
        }
        let segments: Vec<&str> = raw_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        if segments.len() < self.prefix.len()
            || segments
                .iter()
                .zip(&self.prefix)
                .any(|(segment, prefix)| segment != prefix)
        {
            return Err(MalformedRequest::new("path is outside the configured prefix"));
        }
        let segments = &segments[self.prefix.len()..];

        let mut params = TransformParams::default();
        let mut consumed = 0usize;
        while consumed + 1 < segments.len() {
            if !self.apply_segment(&mut params, segments[consumed])? {
                break;
            }
            consumed += 1;
        }
        let path_params = consumed;

        let object_segments = &segments[consumed..];
        if object_segments.is_empty() {
            return Err(MalformedRequest::new("path is missing an object name"));
        }
        let original = object_segments.join("/");
        validate_object_path(&original)?;

        let extra = self.apply_query(&mut params, raw_query)?;
        if path_params == 0 && params.is_empty() {
            return Err(MalformedRequest::new(
                "path must look like {prefix}/{params}/{filename}",
            ));
        }

        Ok(CanonicalKey::new(original, params, extra))
    }

    /// Returns `Ok(false)` when the segment is not a parameter token.
    fn apply_segment(
        &self,
        params: &mut TransformParams,
        segment: &str,
    ) -> Result<bool, MalformedRequest> {
        if let Ok(format) = segment.parse::<OutputFormat>() {
            params.set("format", format.as_str(), self.max_dimension)?;
            return Ok(true);
        }

        if let Some(quality) = segment.strip_prefix('q')
            && !quality.is_empty()
            && quality.bytes().all(|b| b.is_ascii_digit())
        {
            let quality = parse_quality(quality)?;
            params.set("quality", &quality.to_string(), self.max_dimension)?;
            return Ok(true);
        }

        if let Some((width, height)) = segment.split_once('x')
            && (!width.is_empty() || !height.is_empty())
            && width.bytes().chain(height.bytes()).all(|b| b.is_ascii_digit())
        {
            if !width.is_empty() {
                let width = parse_dimension(width, self.max_dimension)?;
                params.set("width", &width.to_string(), self.max_dimension)?;
            }
            if !height.is_empty() {
                let height = parse_dimension(height, self.max_dimension)?;
                params.set("height", &height.to_string(), self.max_dimension)?;
            }
            return Ok(true);
        }

        Ok(false)
    }

    fn apply_query(
        &self,
        params: &mut TransformParams,
        raw_query: Option<&str>,
    ) -> Result<Option<String>, MalformedRequest> {
        let Some(raw_query) = raw_query else {
            return Ok(None);
        };

        let mut extra = Vec::new();
        for pair in raw_query.split('&').filter(|pair| !pair.is_empty()) {
            if pair.chars().any(|c| c.is_control() || c == '#') {
                return Err(MalformedRequest::new("query contains invalid characters"));
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let lower = name.to_ascii_lowercase();
            if TransformParams::is_param_name(&lower) {
                params.set(&lower, value, self.max_dimension)?;
                continue;
            }
            if self.query.admits(name) {
                extra.push((name.to_string(), value.to_string()));
            }
        }

        if extra.is_empty() {
            return Ok(None);
        }
        if !self.query.order_significant() {
            extra.sort();
        }
        let rendered = extra
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        Ok(Some(rendered))
    }
}

pub(super) fn validate_object_path(path: &str) -> Result<(), MalformedRequest> {
    if path.is_empty() {
        return Err(MalformedRequest::new("object path must not be empty"));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(MalformedRequest::new("object path contains an invalid segment"));
        }
        if segment
            .chars()
            .any(|c| c.is_control() || c == '\\' || c == '?' || c == '#')
        {
            return Err(MalformedRequest::new("object path contains invalid characters"));
        }
    }
    Ok(())
}

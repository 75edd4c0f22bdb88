use std::sync::Arc;

use http::Method;
use regex::Regex;

use crate::config::{BehaviorTarget, TtlBounds};
use crate::key::KeyNormalizer;

/// A cache behavior with its path pattern compiled and its key normalizer built.
#[derive(Debug, Clone)]
pub struct CompiledBehavior {
    pub name: Arc<str>,
    pub path: Option<PathMatcher>,
    pub target: BehaviorTarget,
    pub methods: MethodMask,
    pub ttl: TtlBounds,
    pub cors: bool,
    /// Only transform behaviors normalize requests into keys.
    pub normalizer: Option<KeyNormalizer>,
}

/// Read methods a behavior answers. The edge serves nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodMask(u8);

const GET: u8 = 1 << 0;
const HEAD: u8 = 1 << 1;
const OPTIONS: u8 = 1 << 2;

impl MethodMask {
    pub fn any() -> Self {
        Self(GET | HEAD | OPTIONS)
    }

    /// Methods outside GET, HEAD and OPTIONS are ignored; the loader rejects them earlier.
    pub fn from_methods(methods: &[Method]) -> Self {
        Self(methods.iter().filter_map(method_bit).fold(0, |mask, bit| mask | bit))
    }

    pub fn allows(&self, method: &Method) -> bool {
        method_bit(method).is_some_and(|bit| self.0 & bit != 0)
    }
}

fn method_bit(method: &Method) -> Option<u8> {
    match method.as_str() {
        "GET" => Some(GET),
        "HEAD" => Some(HEAD),
        "OPTIONS" => Some(OPTIONS),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
}

impl PathMatcher {
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_mask_matches_listed_methods() {
        let mask = MethodMask::from_methods(&[Method::HEAD, Method::GET]);
        assert!(mask.allows(&Method::GET));
        assert!(mask.allows(&Method::HEAD));
        assert!(!mask.allows(&Method::OPTIONS));
        assert!(!mask.allows(&Method::POST));
        assert!(MethodMask::any().allows(&Method::OPTIONS));
        assert!(!MethodMask::any().allows(&Method::DELETE));
    }
}

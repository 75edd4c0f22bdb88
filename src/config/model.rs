use std::sync::Arc;

use http::Method;

use crate::key::QueryKeyPolicy;

/// Cache behaviors as loaded from disk, before path patterns are compiled.
#[derive(Debug, Clone)]
pub struct BehaviorsConfig {
    /// Evaluated in order; the first matching path pattern wins.
    pub behaviors: Vec<Behavior>,
    /// Applies when no pattern matches. Has no path pattern.
    pub default: Behavior,
}

#[derive(Debug, Clone)]
pub struct Behavior {
    pub name: Arc<str>,
    pub path: Option<Arc<str>>,
    pub target: BehaviorTarget,
    pub methods: MethodMatch,
    pub ttl: TtlBounds,
    pub query: QueryKeyPolicy,
    /// Overrides the global CORS switch for this behavior.
    pub cors: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorTarget {
    /// Normalize, then serve from the variant store or the transform service.
    Transform,
    /// Serve the original object untouched.
    Origin,
}

impl BehaviorTarget {
    pub const fn as_str(self) -> &'static str {
        match self {
            BehaviorTarget::Transform => "transform",
            BehaviorTarget::Origin => "origin",
        }
    }
}

#[derive(Debug, Clone)]
pub enum MethodMatch {
    Any,
    List(Vec<Method>),
}

/// TTL bounds in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlBounds {
    pub min: u64,
    pub default: u64,
    pub max: u64,
}

impl TtlBounds {
    pub const fn new(min: u64, default: u64, max: u64) -> Self {
        Self { min, default, max }
    }

    /// Clamps an object's own max-age into `[min, max]`, using `default` when it has none.
    pub fn effective(&self, max_age: Option<u64>) -> u64 {
        max_age.unwrap_or(self.default).clamp(self.min, self.max)
    }
}

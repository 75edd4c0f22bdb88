use std::sync::Arc;

use super::model::CompiledBehavior;

/// Ordered behaviors plus the default. Immutable after startup.
#[derive(Debug, Clone)]
pub struct BehaviorSet {
    behaviors: Arc<[CompiledBehavior]>,
    default: Arc<CompiledBehavior>,
}

impl BehaviorSet {
    pub fn new(behaviors: Vec<CompiledBehavior>, default: CompiledBehavior) -> Self {
        Self {
            behaviors: Arc::from(behaviors.into_boxed_slice()),
            default: Arc::new(default),
        }
    }

    /// First behavior whose path pattern matches `path`, else the default.
    pub fn select(&self, path: &str) -> &CompiledBehavior {
        self.behaviors
            .iter()
            .find(|behavior| {
                behavior
                    .path
                    .as_ref()
                    .is_some_and(|matcher| matcher.matches(path))
            })
            .unwrap_or(&self.default)
    }

    pub fn default_behavior(&self) -> &CompiledBehavior {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{BehaviorTarget, parse_behaviors};
    use crate::policy::{CompileOptions, compile_behaviors};

    fn options() -> CompileOptions {
        CompileOptions {
            path_prefix: String::new(),
            max_dimension: 4000,
            cors_enabled: true,
        }
    }

    #[test]
    fn first_matching_behavior_wins() -> anyhow::Result<()> {
        let config = parse_behaviors(
            r#"
            [[behavior]]
            name = "svg"
            path = "/*/*/*.svg"
            target = "origin"

            [[behavior]]
            name = "catch-svg"
            path = "/**/*.svg"
            "#,
        )?;
        let set = compile_behaviors(&config, &options())?;
        assert_eq!(set.select("/400x/rio/logo.svg").name.as_ref(), "svg");
        assert_eq!(set.select("/400x/logo.svg").name.as_ref(), "catch-svg");
        let fallback = set.select("/400x400/webp/rio/cat.jpg");
        assert_eq!(fallback.name.as_ref(), "default");
        assert_eq!(fallback.target, BehaviorTarget::Transform);
        Ok(())
    }
}

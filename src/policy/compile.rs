use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use regex::Regex;

use crate::config::{Behavior, BehaviorTarget, BehaviorsConfig, MethodMatch};
use crate::key::KeyNormalizer;

use super::matcher::BehaviorSet;
use super::model::{CompiledBehavior, MethodMask, PathMatcher};

/// Settings shared by every behavior's key normalizer and response policy.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub path_prefix: String,
    pub max_dimension: u32,
    pub cors_enabled: bool,
}

/// Compiles behaviors once at startup: path globs become anchored regexes and every transform
/// behavior gets a key normalizer carrying its query policy.
pub fn compile_behaviors(config: &BehaviorsConfig, options: &CompileOptions) -> Result<BehaviorSet> {
    let mut behaviors = Vec::with_capacity(config.behaviors.len());
    for behavior in &config.behaviors {
        let compiled = compile_behavior(behavior, options)
            .with_context(|| format!("failed to compile behavior '{}'", behavior.name))?;
        behaviors.push(compiled);
    }
    let default = compile_behavior(&config.default, options)
        .context("failed to compile default behavior")?;
    Ok(BehaviorSet::new(behaviors, default))
}

fn compile_behavior(behavior: &Behavior, options: &CompileOptions) -> Result<CompiledBehavior> {
    let path = behavior
        .path
        .as_ref()
        .map(compile_path_pattern)
        .transpose()?;
    let methods = match &behavior.methods {
        MethodMatch::Any => MethodMask::any(),
        MethodMatch::List(list) => MethodMask::from_methods(list),
    };
    let normalizer = match behavior.target {
        BehaviorTarget::Transform => Some(KeyNormalizer::new(
            &options.path_prefix,
            options.max_dimension,
            behavior.query.clone(),
        )),
        BehaviorTarget::Origin => None,
    };
    Ok(CompiledBehavior {
        name: behavior.name.clone(),
        path,
        target: behavior.target,
        methods,
        ttl: behavior.ttl,
        cors: behavior.cors.unwrap_or(options.cors_enabled),
        normalizer,
    })
}

/// `*` matches within one segment, a `**` segment matches any number of segments.
fn compile_path_pattern(pattern: &Arc<str>) -> Result<PathMatcher> {
    if !pattern.starts_with('/') {
        return Err(anyhow!("path pattern must start with '/'"));
    }

    let mut regex = String::from("^");
    for segment in pattern.split('/').skip(1) {
        if segment == "**" {
            regex.push_str("(?:/[^/]*)*");
            continue;
        }
        regex.push('/');
        let mut literal = String::new();
        for ch in segment.chars() {
            if ch == '*' {
                if !literal.is_empty() {
                    regex.push_str(&regex::escape(&literal));
                    literal.clear();
                }
                regex.push_str("[^/]*");
            } else {
                literal.push(ch);
            }
        }
        if !literal.is_empty() {
            regex.push_str(&regex::escape(&literal));
        }
    }
    regex.push('$');

    let compiled = Regex::new(&regex).with_context(|| format!("invalid path regex '{regex}'"))?;
    Ok(PathMatcher::new(compiled))
}

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::Method;
use serde::Deserialize;

use super::model::{Behavior, BehaviorTarget, BehaviorsConfig, MethodMatch, TtlBounds};
use crate::key::QueryKeyPolicy;

/// Path pattern of the built-in bypass for vector images.
pub const DEFAULT_BYPASS_PATTERN: &str = "/**/*.svg";

const DEFAULT_MIN_TTL: u64 = 30;
const DEFAULT_TTL: u64 = 86_400;
const DEFAULT_MAX_TTL: u64 = 31_536_000;

pub fn load_behaviors<P: AsRef<Path>>(path: P) -> Result<BehaviorsConfig> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read behaviors config at {}", path.display()))?;
    parse_behaviors(&data)
        .with_context(|| format!("failed to load behaviors config at {}", path.display()))
}

pub fn parse_behaviors(data: &str) -> Result<BehaviorsConfig> {
    let doc: BehaviorsDoc = toml::from_str(data).context("invalid behaviors TOML")?;

    let default = match doc.default {
        Some(raw) => {
            ensure!(raw.path.is_none(), "default behavior must not set a path pattern");
            parse_behavior(raw, "default")?
        }
        None => builtin_default(),
    };

    let mut seen_names = HashSet::new();
    let mut behaviors = Vec::with_capacity(doc.behaviors.len());
    for (idx, raw) in doc.behaviors.into_iter().enumerate() {
        let fallback_name = format!("behavior#{idx}");
        let behavior = parse_behavior(raw, &fallback_name)?;
        if behavior.path.is_none() {
            bail!("behavior '{}' must set a path pattern", behavior.name);
        }
        if !seen_names.insert(behavior.name.clone()) {
            bail!("duplicate behavior name '{}'", behavior.name);
        }
        behaviors.push(behavior);
    }

    Ok(BehaviorsConfig { behaviors, default })
}

impl BehaviorsConfig {
    /// Behaviors used when no behaviors file is configured: vector images bypass
    /// transformation, everything else is transformed.
    pub fn builtin() -> Self {
        Self {
            behaviors: vec![Behavior {
                name: Arc::from("svg-bypass"),
                path: Some(Arc::from(DEFAULT_BYPASS_PATTERN)),
                target: BehaviorTarget::Origin,
                methods: MethodMatch::List(vec![Method::GET, Method::HEAD]),
                ttl: TtlBounds::new(DEFAULT_MIN_TTL, DEFAULT_TTL, DEFAULT_MAX_TTL),
                query: QueryKeyPolicy::None,
                cors: None,
            }],
            default: builtin_default(),
        }
    }
}

fn builtin_default() -> Behavior {
    Behavior {
        name: Arc::from("default"),
        path: None,
        target: BehaviorTarget::Transform,
        methods: MethodMatch::List(vec![Method::GET, Method::HEAD]),
        ttl: TtlBounds::new(DEFAULT_MIN_TTL, DEFAULT_TTL, DEFAULT_MAX_TTL),
        query: QueryKeyPolicy::None,
        cors: None,
    }
}

fn parse_behavior(raw: RawBehavior, fallback_name: &str) -> Result<Behavior> {
    let name = raw.name.clone().unwrap_or_else(|| fallback_name.to_string());
    let target = match raw.target.as_deref().unwrap_or("transform") {
        "transform" => BehaviorTarget::Transform,
        "origin" | "bypass" => BehaviorTarget::Origin,
        other => bail!("behavior '{name}' has unsupported target '{other}'"),
    };
    let methods = parse_methods(raw.methods.as_deref())
        .with_context(|| format!("behavior '{name}' has invalid methods"))?;
    let ttl = TtlBounds::new(
        raw.min_ttl.unwrap_or(DEFAULT_MIN_TTL),
        raw.default_ttl.unwrap_or(DEFAULT_TTL),
        raw.max_ttl.unwrap_or(DEFAULT_MAX_TTL),
    );
    ensure!(
        ttl.min <= ttl.default && ttl.default <= ttl.max,
        "behavior '{name}' must satisfy min_ttl <= default_ttl <= max_ttl"
    );
    let query = parse_query_policy(raw.query_string.as_ref(), raw.query_order_significant)
        .with_context(|| format!("behavior '{name}' has invalid query_string"))?;
    if target == BehaviorTarget::Origin && query != QueryKeyPolicy::None {
        bail!("behavior '{name}' targets the origin and must not set query_string");
    }
    let path = match raw.path {
        Some(path) => {
            validate_path_pattern(&path)
                .with_context(|| format!("behavior '{name}' has invalid path '{path}'"))?;
            Some(Arc::from(path))
        }
        None => None,
    };

    Ok(Behavior {
        name: Arc::from(name),
        path,
        target,
        methods,
        ttl,
        query,
        cors: raw.cors,
    })
}

fn parse_methods(methods: Option<&[String]>) -> Result<MethodMatch> {
    match methods {
        None => Ok(MethodMatch::List(vec![Method::GET, Method::HEAD])),
        Some([]) => bail!("methods array must not be empty"),
        Some([only]) if only.eq_ignore_ascii_case("ANY") => Ok(MethodMatch::Any),
        Some(methods) => {
            let mut seen = HashSet::new();
            let mut parsed = Vec::with_capacity(methods.len());
            for method in methods {
                if method.eq_ignore_ascii_case("ANY") {
                    bail!("methods array must not mix ANY with explicit methods");
                }
                let parsed_method = match method.to_ascii_uppercase().as_str() {
                    "GET" => Method::GET,
                    "HEAD" => Method::HEAD,
                    "OPTIONS" => Method::OPTIONS,
                    _ => bail!("method '{method}' is not served; use GET, HEAD or OPTIONS"),
                };
                if !seen.insert(parsed_method.clone()) {
                    bail!("duplicate HTTP method '{method}'");
                }
                parsed.push(parsed_method);
            }
            Ok(MethodMatch::List(parsed))
        }
    }
}

fn parse_query_policy(raw: Option<&RawQueryString>, order_significant: bool) -> Result<QueryKeyPolicy> {
    match raw {
        None => Ok(QueryKeyPolicy::None),
        Some(RawQueryString::Mode(mode)) => match mode.as_str() {
            "none" => Ok(QueryKeyPolicy::None),
            "all" => Ok(QueryKeyPolicy::All { order_significant }),
            other => bail!("unsupported query_string mode '{other}'"),
        },
        Some(RawQueryString::AllowList(names)) => {
            ensure!(!names.is_empty(), "query_string allow-list must not be empty");
            let mut set = BTreeSet::new();
            for name in names {
                ensure!(
                    !name.is_empty() && !name.contains(['&', '=']),
                    "invalid query parameter name '{name}'"
                );
                set.insert(name.clone());
            }
            Ok(QueryKeyPolicy::AllowList {
                names: set,
                order_significant,
            })
        }
    }
}

fn validate_path_pattern(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("path pattern must start with '/'");
    }
    for segment in path.split('/').skip(1) {
        if segment.is_empty() || segment == "*" || segment == "**" {
            continue;
        }
        if segment.contains("**") {
            bail!("'**' may only appear as its own segment");
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-._*~%".contains(c))
        {
            return Err(anyhow!("path segment '{segment}' contains invalid character"));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct BehaviorsDoc {
    #[serde(default)]
    default: Option<RawBehavior>,
    #[serde(default, rename = "behavior")]
    behaviors: Vec<RawBehavior>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBehavior {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    methods: Option<Vec<String>>,
    #[serde(default)]
    min_ttl: Option<u64>,
    #[serde(default)]
    default_ttl: Option<u64>,
    #[serde(default)]
    max_ttl: Option<u64>,
    #[serde(default)]
    query_string: Option<RawQueryString>,
    #[serde(default)]
    query_order_significant: bool,
    #[serde(default)]
    cors: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQueryString {
    Mode(String),
    AllowList(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_behaviors_in_order() -> Result<()> {
        let config = parse_behaviors(
            r#"
            [default]
            default_ttl = 3600
            query_string = ["v"]

            [[behavior]]
            name = "svg"
            path = "/*/*/*.svg"
            target = "origin"
            min_ttl = 60
            max_ttl = 600
            default_ttl = 300

            [[behavior]]
            name = "thumbs"
            path = "/thumbs/**"
            methods = ["get"]
            query_string = "all"
            query_order_significant = true
            cors = false
            "#,
        )?;
        assert_eq!(config.behaviors.len(), 2);
        assert_eq!(config.behaviors[0].target, BehaviorTarget::Origin);
        assert_eq!(config.behaviors[0].ttl, TtlBounds::new(60, 300, 600));
        assert_eq!(
            config.behaviors[1].query,
            QueryKeyPolicy::All {
                order_significant: true
            }
        );
        assert_eq!(config.behaviors[1].cors, Some(false));
        assert!(matches!(
            &config.behaviors[1].methods,
            MethodMatch::List(methods) if methods == &[Method::GET]
        ));
        assert_eq!(config.default.ttl.default, 3600);
        assert!(matches!(
            &config.default.query,
            QueryKeyPolicy::AllowList { names, .. } if names.contains("v")
        ));
        Ok(())
    }

    #[test]
    fn builtin_behaviors_bypass_svg() {
        let config = BehaviorsConfig::builtin();
        assert_eq!(config.behaviors.len(), 1);
        assert_eq!(
            config.behaviors[0].path.as_deref(),
            Some(DEFAULT_BYPASS_PATTERN)
        );
        assert_eq!(config.default.target, BehaviorTarget::Transform);
        assert_eq!(config.default.ttl, TtlBounds::new(30, 86_400, 31_536_000));
        assert_eq!(config.behaviors[0].ttl.min, 30);
    }

    #[test]
    fn rejects_inverted_ttl_bounds() {
        let err = parse_behaviors(
            r#"
            [[behavior]]
            name = "bad"
            path = "/x/*"
            min_ttl = 100
            max_ttl = 10
            "#,
        )
        .expect_err("min above max");
        assert!(format!("{err:#}").contains("min_ttl"));
    }

    #[test]
    fn rejects_behavior_without_path() {
        let err = parse_behaviors(
            r#"
            [[behavior]]
            name = "nopath"
            "#,
        )
        .expect_err("missing path");
        assert!(err.to_string().contains("path pattern"));
    }

    #[test]
    fn rejects_duplicate_names_and_bad_methods() {
        assert!(
            parse_behaviors(
                r#"
                [[behavior]]
                name = "a"
                path = "/a/*"
                [[behavior]]
                name = "a"
                path = "/b/*"
                "#
            )
            .is_err()
        );
        assert!(
            parse_behaviors(
                r#"
                [[behavior]]
                path = "/a/*"
                methods = ["ANY", "GET"]
                "#
            )
            .is_err()
        );
    }

    #[test]
    fn rejects_methods_the_edge_does_not_serve() {
        for method in ["POST", "purge", "DELETE"] {
            let err = parse_behaviors(&format!(
                "[[behavior]]\npath = \"/a/*\"\nmethods = [\"GET\", \"{method}\"]\n"
            ))
            .expect_err("write methods are rejected");
            assert!(format!("{err:#}").contains("is not served"), "{method}: {err:#}");
        }
        assert!(parse_behaviors("[[behavior]]\npath = \"/a/*\"\nmethods = [\"options\"]\n").is_ok());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(parse_behaviors("[default]\nttl = 5\n").is_err());
    }
}

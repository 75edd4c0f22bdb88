use std::{borrow::Cow, future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::time::timeout;

/// Wraps `tokio::time::timeout`, converting elapsed deadlines and inner errors into contextual
/// `anyhow::Error` values for consistent diagnostics.
pub async fn timeout_with_context<F, T, E>(
    duration: Duration,
    future: F,
    context: impl Into<String>,
) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let context = context.into();
    timeout(duration, future)
        .await
        .map_err(|_| anyhow!("timed out {context}"))?
        .with_context(|| format!("failed while {context}"))
}

/// Collapses runs of `/` into one, borrowing when the path is already clean.
pub fn collapse_slashes(path: &str) -> Cow<'_, str> {
    if !path.contains("//") {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_slashes_merges_runs() {
        assert!(matches!(collapse_slashes("/a/b/c.svg"), Cow::Borrowed(_)));
        assert_eq!(collapse_slashes("//a///b/c.svg"), "/a/b/c.svg");
        assert_eq!(collapse_slashes("/"), "/");
    }

    #[tokio::test]
    async fn timeout_with_context_reports_elapsed() {
        let err = timeout_with_context(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), std::io::Error>(())
            },
            "waiting for origin",
        )
        .await
        .expect_err("should time out");
        assert!(err.to_string().contains("timed out waiting for origin"));
    }
}

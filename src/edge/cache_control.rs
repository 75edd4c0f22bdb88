/// Directives of a stored `Cache-Control` value that affect edge freshness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub private: bool,
    pub no_store: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
}

impl CacheDirectives {
    pub fn parse(value: Option<&str>) -> Self {
        let mut cc = Self::default();
        let Some(value) = value else {
            return cc;
        };
        for part in value.split(',') {
            let part = part.trim();
            if part.eq_ignore_ascii_case("private") {
                cc.private = true;
            } else if part.eq_ignore_ascii_case("no-store") {
                cc.no_store = true;
            } else if let Some(secs) = directive_seconds(part, "max-age") {
                cc.max_age = Some(secs);
            } else if let Some(secs) = directive_seconds(part, "s-maxage") {
                cc.s_maxage = Some(secs);
            }
        }
        cc
    }

    /// Shared-cache lifetime: `s-maxage` wins over `max-age`.
    pub fn shared_max_age(&self) -> Option<u64> {
        self.s_maxage.or(self.max_age)
    }

    pub fn forbids_caching(&self) -> bool {
        self.no_store || self.private
    }
}

fn directive_seconds(part: &str, name: &str) -> Option<u64> {
    let (key, value) = part.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case(name) {
        return None;
    }
    value.trim().trim_matches('"').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifetimes() {
        let cc = CacheDirectives::parse(Some("public, max-age=31622400"));
        assert_eq!(cc.max_age, Some(31_622_400));
        assert_eq!(cc.shared_max_age(), Some(31_622_400));
        assert!(!cc.forbids_caching());

        let cc = CacheDirectives::parse(Some("max-age=60, S-MaxAge=\"600\""));
        assert_eq!(cc.shared_max_age(), Some(600));
    }

    #[test]
    fn missing_or_garbage_values_have_no_lifetime() {
        assert_eq!(CacheDirectives::parse(None), CacheDirectives::default());
        let cc = CacheDirectives::parse(Some("max-age=soon, no-store"));
        assert_eq!(cc.max_age, None);
        assert!(cc.forbids_caching());
    }
}

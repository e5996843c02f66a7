use crate::config::RateLimitConfig;
use crate::domain::{KeyScope, Quota, NORMAL_TIER};
use std::collections::HashMap;

/// Quota for a path prefix, per subject tier
#[derive(Debug, Clone)]
pub struct QuotaRule {
    prefix: String,
    scope: KeyScope,
    tiers: HashMap<String, Quota>,
}

impl QuotaRule {
    pub fn new(prefix: impl Into<String>, scope: KeyScope, tiers: HashMap<String, Quota>) -> Self {
        Self {
            prefix: normalize_prefix(prefix.into()),
            scope,
            tiers,
        }
    }

    /// Rule with only a "normal" tier
    pub fn single(prefix: impl Into<String>, quota: Quota) -> Self {
        Self::new(
            prefix,
            KeyScope::PerPath,
            HashMap::from([(NORMAL_TIER.to_string(), quota)]),
        )
    }

    pub fn with_tier(mut self, tier: impl Into<String>, quota: Quota) -> Self {
        self.tiers.insert(tier.into(), quota);
        self
    }

    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn quota_for(&self, tier: &str) -> Option<Quota> {
        self.tiers
            .get(tier)
            .or_else(|| self.tiers.get(NORMAL_TIER))
            .copied()
    }
}

/// Prefixes always start with '/', so "api/slow/" and "/api/slow/" are the same rule
fn normalize_prefix(prefix: String) -> String {
    if prefix.starts_with('/') {
        prefix
    } else {
        format!("/{}", prefix)
    }
}

pub const DEFAULT_KEY_NAMESPACE: &str = "rate";

/// Outcome of quota resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuota {
    pub quota: Quota,
    pub scope: KeyScope,
    /// Prefix of the matching rule; `None` when the global default applied
    pub rule_prefix: Option<String>,
}

impl ResolvedQuota {
    pub fn matched_rule(&self) -> bool {
        self.rule_prefix.is_some()
    }
}

/// Maps (path, tier) to a quota by longest-prefix match
#[derive(Debug, Clone)]
pub struct QuotaResolver {
    /// Sorted by prefix length, longest first; equal lengths keep configuration order
    rules: Vec<QuotaRule>,
    default: Quota,
    namespace: String,
}

impl QuotaResolver {
    pub fn new(default: Quota, mut rules: Vec<QuotaRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            rules,
            default,
            namespace: DEFAULT_KEY_NAMESPACE.to_string(),
        }
    }

    /// Keys built by this resolver start with `namespace` instead of "rate"
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| QuotaRule::new(rule.prefix.clone(), rule.scope, rule.tiers.clone()))
            .collect();

        Self::new(config.default, rules)
    }

    /// Resolve the quota for a request path and subject tier
    pub fn resolve(&self, path: &str, tier: &str) -> ResolvedQuota {
        for rule in &self.rules {
            if !path.starts_with(rule.prefix.as_str()) {
                continue;
            }
            // A rule without this tier or a normal tier does not cover the subject
            if let Some(quota) = rule.quota_for(tier) {
                return ResolvedQuota {
                    quota,
                    scope: rule.scope,
                    rule_prefix: Some(rule.prefix.clone()),
                };
            }
        }

        ResolvedQuota {
            quota: self.default,
            scope: KeyScope::PerPath,
            rule_prefix: None,
        }
    }

    /// Counter key for a subject under a resolved quota
    pub fn quota_key(&self, resolved: &ResolvedQuota, identifier: &str, path: &str) -> String {
        let rule_prefix = resolved.rule_prefix.as_deref().unwrap_or("/");
        resolved
            .scope
            .quota_key(&self.namespace, identifier, path, rule_prefix)
    }

    pub fn rules(&self) -> &[QuotaRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> QuotaResolver {
        QuotaResolver::new(
            Quota::new(1000, 60),
            vec![
                QuotaRule::single("/api/", Quota::new(100, 60)),
                QuotaRule::single("/api/slow/", Quota::new(50, 60))
                    .with_tier("premium", Quota::new(200, 60)),
                QuotaRule::single("/api/fast/", Quota::new(5, 60))
                    .with_tier("premium", Quota::new(20, 60)),
            ],
        )
    }

    #[test]
    fn test_longest_prefix_wins() {
        let resolved = resolver().resolve("/api/slow/x", NORMAL_TIER);
        assert_eq!(resolved.quota.limit, 50);
        assert_eq!(resolved.rule_prefix.as_deref(), Some("/api/slow/"));

        let resolved = resolver().resolve("/api/other", NORMAL_TIER);
        assert_eq!(resolved.quota.limit, 100);
    }

    #[test]
    fn test_tier_lookup_and_fallback() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("/api/fast/a", "premium").quota.limit, 20);
        assert_eq!(resolver.resolve("/api/fast/a", "gold").quota.limit, 5);
        // "/api/" only defines normal, premium falls back to it
        assert_eq!(resolver.resolve("/api/x", "premium").quota.limit, 100);
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let resolved = resolver().resolve("/health/live", NORMAL_TIER);
        assert_eq!(resolved.quota, Quota::new(1000, 60));
        assert_eq!(resolved.scope, KeyScope::PerPath);
        assert!(!resolved.matched_rule());
    }

    #[test]
    fn test_ties_keep_configuration_order() {
        let resolver = QuotaResolver::new(
            Quota::new(1, 1),
            vec![
                QuotaRule::single("/a/", Quota::new(10, 60)),
                QuotaRule::single("/a/", Quota::new(20, 60)),
            ],
        );
        assert_eq!(resolver.resolve("/a/b", NORMAL_TIER).quota.limit, 10);
    }

    #[test]
    fn test_prefix_is_normalized() {
        let resolver = QuotaResolver::new(
            Quota::new(1000, 60),
            vec![QuotaRule::single("api/slow/", Quota::new(50, 60))],
        );
        assert_eq!(resolver.rules()[0].prefix(), "/api/slow/");
        assert_eq!(resolver.resolve("/api/slow/x", NORMAL_TIER).quota.limit, 50);
    }

    #[test]
    fn test_rule_without_matching_tier_falls_through() {
        let premium_only = QuotaRule::new(
            "/api/vip/",
            KeyScope::PerIdentifier,
            HashMap::from([("premium".to_string(), Quota::new(500, 60))]),
        );
        let resolver = QuotaResolver::new(
            Quota::new(1000, 60),
            vec![QuotaRule::single("/api/", Quota::new(100, 60)), premium_only],
        );

        let premium = resolver.resolve("/api/vip/x", "premium");
        assert_eq!(premium.quota.limit, 500);
        assert_eq!(premium.scope, KeyScope::PerIdentifier);

        assert_eq!(resolver.resolve("/api/vip/x", NORMAL_TIER).quota.limit, 100);
    }

    #[test]
    fn test_shared_rules_get_their_own_keys() {
        let resolver = QuotaResolver::new(
            Quota::new(1000, 60),
            vec![
                QuotaRule::single("/a/", Quota::new(2, 60)).with_scope(KeyScope::PerIdentifier),
                QuotaRule::single("/b/", Quota::new(2, 30)).with_scope(KeyScope::PerIdentifier),
            ],
        );

        let a = resolver.resolve("/a/x", NORMAL_TIER);
        let b = resolver.resolve("/b/x", NORMAL_TIER);
        assert_eq!(resolver.quota_key(&a, "user:1", "/a/x"), "rate:user:1:/a/");
        assert_eq!(resolver.quota_key(&a, "user:1", "/a/y"), "rate:user:1:/a/");
        assert_eq!(resolver.quota_key(&b, "user:1", "/b/x"), "rate:user:1:/b/");

        let default = resolver.resolve("/other", NORMAL_TIER);
        assert_eq!(resolver.quota_key(&default, "user:1", "/other"), "rate:user:1:/other");
    }

    #[test]
    fn test_namespace_prefixes_keys() {
        let resolver = QuotaResolver::new(Quota::new(10, 60), vec![]).with_namespace("rate:route:hello");
        let resolved = resolver.resolve("/api/hello", NORMAL_TIER);
        assert_eq!(
            resolver.quota_key(&resolved, "ip:10.0.0.1", "/api/hello"),
            "rate:route:hello:ip:10.0.0.1:/api/hello"
        );
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::Config::from_toml_str(crate::config::tests::TEST_CONFIG).unwrap();
        let resolver = QuotaResolver::from_config(&config.rate_limit);

        assert_eq!(resolver.resolve("/api/fast/x", "premium").quota.limit, 20);
        assert_eq!(resolver.resolve("/api/slow/x", NORMAL_TIER).scope, KeyScope::PerIdentifier);
        assert_eq!(resolver.resolve("/other", NORMAL_TIER).quota.limit, 100);
    }
}
